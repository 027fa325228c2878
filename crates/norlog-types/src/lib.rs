#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// On-flash sector header: `{ u32 status; u32 version; }`, resident in the
/// final eight bytes of each sector.
pub const SECTOR_HEADER_SIZE: u32 = 8;
/// Byte offset of the status word within the sector header.
pub const SECTOR_STATUS_OFFSET: u32 = 0;
/// Byte offset of the version word within the sector header.
pub const SECTOR_VERSION_OFFSET: u32 = 4;
/// On-flash slot header: a single `u32` status word ahead of the payload.
pub const SLOT_HEADER_SIZE: u32 = 4;

/// Sector lifecycle ladder. NOR flash programs can only clear bits, so every
/// transition down the ladder clears bits relative to the previous value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectorState {
    /// All-ones, the state a physical erase leaves behind.
    Erased,
    /// Erased and stamped with a version; ready to be written.
    Free,
    /// Contains slots.
    InUse,
    /// Erase begun but not finished; the next mount completes it.
    Erasing,
    /// The whole partition is mid-format; mounting must fail.
    Formatting,
}

impl SectorState {
    pub const ERASED: u32 = 0xFFFF_FFFF;
    pub const FREE: u32 = 0xFFFF_FF00;
    pub const IN_USE: u32 = 0xFFFF_0000;
    pub const ERASING: u32 = 0xFF00_0000;
    pub const FORMATTING: u32 = 0x0000_0000;

    /// The on-flash status word for this state.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::Erased => Self::ERASED,
            Self::Free => Self::FREE,
            Self::InUse => Self::IN_USE,
            Self::Erasing => Self::ERASING,
            Self::Formatting => Self::FORMATTING,
        }
    }

    /// Decode a status word read off flash. `None` means the word is not on
    /// the ladder and the sector is corrupt.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            Self::ERASED => Some(Self::Erased),
            Self::FREE => Some(Self::Free),
            Self::IN_USE => Some(Self::InUse),
            Self::ERASING => Some(Self::Erasing),
            Self::FORMATTING => Some(Self::Formatting),
            _ => None,
        }
    }
}

impl fmt::Display for SectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Erased => "ERASED",
            Self::Free => "FREE",
            Self::InUse => "IN_USE",
            Self::Erasing => "ERASING",
            Self::Formatting => "FORMATTING",
        };
        f.write_str(name)
    }
}

/// Slot lifecycle ladder; same bit-clearing discipline as [`SectorState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    /// Never written since the enclosing sector was erased.
    Erased,
    /// Write started but not committed; the payload is not trustworthy.
    Reserved,
    /// Write committed; the payload is exactly what the writer appended.
    Valid,
    /// Consumed and acknowledged.
    Garbage,
}

impl SlotState {
    pub const ERASED: u32 = 0xFFFF_FFFF;
    pub const RESERVED: u32 = 0xFFFF_FF00;
    pub const VALID: u32 = 0xFFFF_0000;
    pub const GARBAGE: u32 = 0xFF00_0000;

    /// The on-flash status word for this state.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::Erased => Self::ERASED,
            Self::Reserved => Self::RESERVED,
            Self::Valid => Self::VALID,
            Self::Garbage => Self::GARBAGE,
        }
    }

    /// Decode a status word read off flash. A torn status program can leave
    /// a word that is on no rung; such slots are skipped, not errors.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            Self::ERASED => Some(Self::Erased),
            Self::RESERVED => Some(Self::Reserved),
            Self::VALID => Some(Self::Valid),
            Self::GARBAGE => Some(Self::Garbage),
            _ => None,
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Erased => "ERASED",
            Self::Reserved => "RESERVED",
            Self::Valid => "VALID",
            Self::Garbage => "GARBAGE",
        };
        f.write_str(name)
    }
}

/// Byte address within the flash device's 32-bit address space.
///
/// This is a unit-carrying wrapper to prevent mixing byte addresses with
/// sector or slot indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlashAddr(pub u32);

impl fmt::Display for FlashAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A `(sector, slot)` pair naming one record slot within the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub sector: u32,
    pub slot: u32,
}

impl Location {
    pub const ZERO: Self = Self { sector: 0, slot: 0 };

    #[must_use]
    pub const fn new(sector: u32, slot: u32) -> Self {
        Self { sector, slot }
    }

    /// Move to slot 0 of the next sector, wrapping at the partition end.
    pub fn advance_sector(&mut self, geometry: &Geometry) {
        self.slot = 0;
        self.sector += 1;
        if self.sector >= geometry.sector_count() {
            self.sector = 0;
        }
    }

    /// Move to the next slot, rolling into the next sector when the current
    /// one runs out.
    pub fn advance_slot(&mut self, geometry: &Geometry) {
        self.slot += 1;
        if self.slot >= geometry.slots_per_sector() {
            self.advance_sector(geometry);
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{},{}}}", self.sector, self.slot)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("invalid geometry: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

/// Validated partition geometry plus the record schema.
///
/// Construction checks every derived quantity once so the hot paths can use
/// plain arithmetic: at least one slot must fit per sector, the ring needs at
/// least two sectors (one is structurally reserved as the rotation buffer),
/// and the partition must end inside the 32-bit flash address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    sector_size: u32,
    sector_offset: u32,
    sector_count: u32,
    object_size: u32,
    version: u32,
    slots_per_sector: u32,
}

impl Geometry {
    /// Validate a partition descriptor and record schema.
    ///
    /// * `sector_size` — erase-unit size in bytes.
    /// * `sector_offset` — partition start, in sectors from the flash base.
    /// * `sector_count` — partition length in sectors.
    /// * `object_size` — fixed record payload size in bytes.
    /// * `version` — user-chosen schema version stamped into sector headers.
    pub fn new(
        sector_size: u32,
        sector_offset: u32,
        sector_count: u32,
        object_size: u32,
        version: u32,
    ) -> Result<Self, GeometryError> {
        if object_size == 0 {
            return Err(GeometryError::InvalidField {
                field: "object_size",
                reason: "must be non-zero",
            });
        }
        if sector_count < 2 {
            return Err(GeometryError::InvalidField {
                field: "sector_count",
                reason: "ring needs at least two sectors",
            });
        }
        let slot_stride = SLOT_HEADER_SIZE
            .checked_add(object_size)
            .ok_or(GeometryError::InvalidField {
                field: "object_size",
                reason: "slot stride overflows u32",
            })?;
        let slots_per_sector = sector_size.saturating_sub(SECTOR_HEADER_SIZE) / slot_stride;
        if slots_per_sector == 0 {
            return Err(GeometryError::InvalidField {
                field: "sector_size",
                reason: "no slot fits after the sector header",
            });
        }
        let end_sector = sector_offset
            .checked_add(sector_count)
            .ok_or(GeometryError::InvalidField {
                field: "sector_offset",
                reason: "partition end overflows u32",
            })?;
        end_sector
            .checked_mul(sector_size)
            .ok_or(GeometryError::InvalidField {
                field: "sector_count",
                reason: "partition end address overflows u32",
            })?;

        Ok(Self {
            sector_size,
            sector_offset,
            sector_count,
            object_size,
            version,
            slots_per_sector,
        })
    }

    #[must_use]
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    #[must_use]
    pub fn sector_count(&self) -> u32 {
        self.sector_count
    }

    #[must_use]
    pub fn object_size(&self) -> u32 {
        self.object_size
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Slots that fit in one sector after the tail-resident header.
    #[must_use]
    pub fn slots_per_sector(&self) -> u32 {
        self.slots_per_sector
    }

    /// Usable record capacity. One sector is always kept FREE as the
    /// rotation buffer, so only `sector_count - 1` sectors hold records.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.slots_per_sector * (self.sector_count - 1)
    }

    /// Bytes from one slot's status word to the next: header plus payload.
    #[must_use]
    pub fn slot_stride(&self) -> u32 {
        SLOT_HEADER_SIZE + self.object_size
    }

    /// Base address of a sector, counting the partition offset.
    #[must_use]
    pub fn sector_address(&self, sector: u32) -> FlashAddr {
        FlashAddr((self.sector_offset + sector) * self.sector_size)
    }

    /// Address of the sector header, resident in the sector's final bytes so
    /// the version word written during reformat survives until the final
    /// status transition.
    #[must_use]
    pub fn sector_header_address(&self, sector: u32) -> FlashAddr {
        FlashAddr(self.sector_address(sector).0 + self.sector_size - SECTOR_HEADER_SIZE)
    }

    /// Address of a slot's status word. Slots pack from the sector base.
    #[must_use]
    pub fn slot_address(&self, loc: Location) -> FlashAddr {
        FlashAddr(self.sector_address(loc.sector).0 + loc.slot * self.slot_stride())
    }

    /// Address of a slot's payload, just past its status word.
    #[must_use]
    pub fn payload_address(&self, loc: Location) -> FlashAddr {
        FlashAddr(self.slot_address(loc).0 + SLOT_HEADER_SIZE)
    }

    /// Total partition length in bytes.
    #[must_use]
    pub fn partition_len(&self) -> u32 {
        self.sector_count * self.sector_size
    }
}
