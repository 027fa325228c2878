#![forbid(unsafe_code)]
//! Developer harness for norlog partitions.
//!
//! Everything here is diagnostics and convenience around the core API: a
//! mount-or-format helper, machine-readable stats, and a human-readable
//! partition map. None of it is needed to operate a ring.

use norlog::{
    Flash, FlashAddr, Geometry, Location, NorlogError, Result, RingLog, SECTOR_VERSION_OFFSET,
    SectorState, SlotState,
};
use serde::Serialize;
use std::fmt::Write as _;

/// Mount the partition, falling back to a destructive format when the
/// on-flash state is unmountable (interrupted format, corruption, schema
/// skew, lost FREE sector). Genuine adapter failures still propagate.
///
/// Returns `true` when the partition was formatted.
pub fn mount_or_format(ring: &mut RingLog, flash: &dyn Flash) -> Result<bool> {
    match ring.scan(flash) {
        Ok(()) => Ok(false),
        Err(
            NorlogError::InterruptedFormat
            | NorlogError::Corruption { .. }
            | NorlogError::VersionMismatch { .. }
            | NorlogError::NoFreeSector,
        ) => {
            ring.format(flash)?;
            Ok(true)
        }
        Err(err) => Err(err),
    }
}

/// Point-in-time counters and positions for one mounted ring.
#[derive(Debug, Clone, Serialize)]
pub struct RingStats {
    pub capacity: u32,
    pub count_estimate: u32,
    pub count_exact: u32,
    pub read: Location,
    pub cursor: Location,
    pub write: Location,
}

pub fn collect_stats(ring: &RingLog, flash: &dyn Flash) -> Result<RingStats> {
    Ok(RingStats {
        capacity: ring.capacity(),
        count_estimate: ring.count_estimate(),
        count_exact: ring.count_exact(flash)?,
        read: ring.read_head(),
        cursor: ring.cursor(),
        write: ring.write_head(),
    })
}

fn read_u32(flash: &dyn Flash, addr: FlashAddr) -> Result<u32> {
    let mut bytes = [0_u8; 4];
    flash.read(addr, &mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn sector_state_label(raw: u32) -> &'static str {
    match SectorState::from_raw(raw) {
        Some(SectorState::Erased) => "ERASED",
        Some(SectorState::Free) => "FREE",
        Some(SectorState::InUse) => "IN_USE",
        Some(SectorState::Erasing) => "ERASING",
        Some(SectorState::Formatting) => "FORMATTING",
        None => "UNKNOWN",
    }
}

fn slot_state_glyph(raw: u32) -> char {
    match SlotState::from_raw(raw) {
        Some(SlotState::Erased) => 'E',
        Some(SlotState::Reserved) => 'R',
        Some(SlotState::Valid) => 'V',
        Some(SlotState::Garbage) => 'G',
        None => '?',
    }
}

/// Render the partition as one line per sector: index, version word, sector
/// state, and an `E/R/V/G` glyph per slot. The first line carries the three
/// in-RAM positions.
pub fn render_map(ring: &RingLog, flash: &dyn Flash) -> Result<String> {
    let geometry: &Geometry = ring.geometry();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "read: {} cursor: {} write: {}",
        ring.read_head(),
        ring.cursor(),
        ring.write_head()
    );

    for sector in 0..geometry.sector_count() {
        let header = geometry.sector_header_address(sector);
        let status = read_u32(flash, header)?;
        let version = read_u32(flash, FlashAddr(header.0 + SECTOR_VERSION_OFFSET))?;
        let _ = write!(
            out,
            "[{sector:04}] [v={version:#010x}] [{:<10}] ",
            sector_state_label(status)
        );
        for slot in 0..geometry.slots_per_sector() {
            let raw = read_u32(flash, geometry.slot_address(Location::new(sector, slot)))?;
            out.push(slot_state_glyph(raw));
        }
        out.push('\n');
    }
    Ok(out)
}
