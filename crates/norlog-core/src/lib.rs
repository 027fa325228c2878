#![forbid(unsafe_code)]
//! Crash-safe, wear-levelling FIFO record log stored on a NOR-flash
//! partition.
//!
//! The partition is a ring of fixed-size record slots grouped into
//! erase-unit sectors. Records are appended at the write head, consumed
//! oldest-first at the cursor, and acknowledged by advancing the read head;
//! when the ring fills, the oldest sector is recycled automatically. All
//! consistency is carried by two monotone status ladders programmed into the
//! sector and slot headers — NOR flash can only clear bits, so each
//! lifecycle step clears bits relative to the last and a mount-time scan can
//! always tell how far any interrupted operation got. There is no journal
//! and no checksum: a torn append leaves a RESERVED slot that readers skip,
//! and a torn erase leaves an ERASING sector that the next mount finishes.

use norlog_error::{NorlogError, Result};
use norlog_flash::Flash;
use norlog_types::{
    FlashAddr, Geometry, Location, SECTOR_VERSION_OFFSET, SectorState, SlotState,
};
use tracing::{debug, trace};

/// One FIFO ring over one flash partition.
///
/// Holds the three in-RAM positions (`read`, `cursor`, `write`) plus the
/// page-coalescing buffer. The flash capability is borrowed per call rather
/// than owned, so one driver can serve several rings on disjoint partitions.
///
/// A fresh instance carries no usable positions: call [`RingLog::scan`] to
/// mount existing contents, or [`RingLog::format`] to wipe the partition
/// into a valid empty ring. Operations are not internally synchronized; the
/// caller serializes all mutation of one instance.
#[derive(Debug)]
pub struct RingLog {
    geometry: Geometry,
    /// Oldest undiscarded record (== `write` when the ring is empty).
    read: Location,
    /// Fetch position, always within `[read, write)` in ring order.
    cursor: Location,
    /// Next ERASED slot to be populated.
    write: Location,
    /// Page-coalescing buffer; fill level is `cache.len()`.
    cache: Vec<u8>,
}

impl RingLog {
    /// Create an instance over a validated partition geometry.
    #[must_use]
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            read: Location::ZERO,
            cursor: Location::ZERO,
            write: Location::ZERO,
            cache: Vec::with_capacity(geometry.object_size() as usize),
        }
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Oldest undiscarded record position.
    #[must_use]
    pub fn read_head(&self) -> Location {
        self.read
    }

    /// Current fetch position.
    #[must_use]
    pub fn cursor(&self) -> Location {
        self.cursor
    }

    /// Next slot an append will populate.
    #[must_use]
    pub fn write_head(&self) -> Location {
        self.write
    }

    /// Usable record capacity: one sector is structurally reserved to keep
    /// the "one FREE sector at all times" invariant.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.geometry.capacity()
    }

    // -----------------------------------------------------------------------
    // Header access
    // -----------------------------------------------------------------------

    fn read_u32(&self, flash: &dyn Flash, addr: FlashAddr) -> Result<u32> {
        let mut bytes = [0_u8; 4];
        flash.read(addr, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn program_u32(&self, flash: &dyn Flash, addr: FlashAddr, value: u32) -> Result<()> {
        flash.program(addr, &value.to_le_bytes())
    }

    fn sector_status_raw(&self, flash: &dyn Flash, sector: u32) -> Result<u32> {
        self.read_u32(flash, self.geometry.sector_header_address(sector))
    }

    /// Program a sector status word. The value must be a bitwise-AND
    /// descendant of the current word; the ladder constants guarantee this
    /// for every legal transition.
    fn set_sector_status(&self, flash: &dyn Flash, sector: u32, state: SectorState) -> Result<()> {
        self.program_u32(flash, self.geometry.sector_header_address(sector), state.raw())
    }

    fn sector_version(&self, flash: &dyn Flash, sector: u32) -> Result<u32> {
        let addr = self.geometry.sector_header_address(sector);
        self.read_u32(flash, FlashAddr(addr.0 + SECTOR_VERSION_OFFSET))
    }

    fn slot_status_raw(&self, flash: &dyn Flash, loc: Location) -> Result<u32> {
        self.read_u32(flash, self.geometry.slot_address(loc))
    }

    fn set_slot_status(&self, flash: &dyn Flash, loc: Location, state: SlotState) -> Result<()> {
        self.program_u32(flash, self.geometry.slot_address(loc), state.raw())
    }

    // -----------------------------------------------------------------------
    // Sector lifecycle
    // -----------------------------------------------------------------------

    /// Crash-safe sector erase: ERASING, physical erase, version stamp,
    /// FREE. Power loss at any point leaves ERASING or ERASED behind, and
    /// the next mount re-runs this to completion. Applied to an
    /// already-FREE sector it simply leaves the sector FREE.
    fn sector_free(&self, flash: &dyn Flash, sector: u32) -> Result<()> {
        let version_addr = FlashAddr(self.geometry.sector_header_address(sector).0 + SECTOR_VERSION_OFFSET);
        self.set_sector_status(flash, sector, SectorState::Erasing)?;
        flash.erase(self.geometry.sector_address(sector))?;
        self.program_u32(flash, version_addr, self.geometry.version())?;
        self.set_sector_status(flash, sector, SectorState::Free)?;
        debug!(target: "norlog::sector", sector, "sector_freed");
        Ok(())
    }

    /// Free one sector so a future append finds it ready.
    ///
    /// This is a hint for an external low-priority task: the append path
    /// performs the same work inline whenever the next-ahead sector is not
    /// FREE, so calling it is never required. No positional guard is
    /// applied — freeing a sector that still holds undiscarded records
    /// destroys them.
    pub fn erase_sector(&self, flash: &dyn Flash, sector: u32) -> Result<()> {
        if sector >= self.geometry.sector_count() {
            return Err(NorlogError::SectorOutOfRange {
                sector,
                count: self.geometry.sector_count(),
            });
        }
        self.sector_free(flash, sector)
    }

    // -----------------------------------------------------------------------
    // Format
    // -----------------------------------------------------------------------

    /// Two-phase global wipe: first mark every sector FORMATTING so an
    /// interrupted format is unambiguous at the next mount, then erase each
    /// sector through the full `sector_free` protocol.
    pub fn format(&mut self, flash: &dyn Flash) -> Result<()> {
        debug!(target: "norlog::format", sectors = self.geometry.sector_count(), "format_begin");
        for sector in 0..self.geometry.sector_count() {
            self.set_sector_status(flash, sector, SectorState::Formatting)?;
        }
        for sector in 0..self.geometry.sector_count() {
            self.sector_free(flash, sector)?;
        }
        self.read = Location::ZERO;
        self.cursor = Location::ZERO;
        self.write = Location::ZERO;
        self.cache.clear();
        debug!(target: "norlog::format", "format_complete");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mount scan
    // -----------------------------------------------------------------------

    /// Rebuild `read`, `write` and `cursor` from on-flash state alone.
    ///
    /// Sectors left ERASED or ERASING by an interrupted erase are silently
    /// finished. A FORMATTING sector, a status word off the ladder, a
    /// missing FREE sector, or a schema version mismatch on an IN_USE
    /// sector all fail the mount; the caller may then choose to `format`.
    pub fn scan(&mut self, flash: &dyn Flash) -> Result<()> {
        let sector_count = self.geometry.sector_count();
        // The read sector is the first IN_USE sector after a FREE one; the
        // write sector is the last IN_USE sector before a FREE one.
        let mut previous = SectorState::Free;
        let mut read_sector = 0_u32;
        let mut write_sector = sector_count - 1;
        let mut free_seen = false;
        let mut used_seen = false;

        for sector in 0..sector_count {
            let raw = self.sector_status_raw(flash, sector)?;
            let status = match SectorState::from_raw(raw) {
                Some(SectorState::Formatting) => {
                    debug!(target: "norlog::scan", sector, "interrupted_format");
                    return Err(NorlogError::InterruptedFormat);
                }
                Some(SectorState::Erased) | Some(SectorState::Erasing) => {
                    // Finish what a power cut interrupted.
                    self.sector_free(flash, sector)?;
                    SectorState::Free
                }
                Some(status @ SectorState::Free) | Some(status @ SectorState::InUse) => status,
                None => {
                    return Err(NorlogError::Corruption {
                        sector,
                        detail: format!("unknown sector status word {raw:#010x}"),
                    });
                }
            };

            if status == SectorState::InUse {
                let found = self.sector_version(flash, sector)?;
                if found != self.geometry.version() {
                    return Err(NorlogError::VersionMismatch {
                        sector,
                        expected: self.geometry.version(),
                        found,
                    });
                }
            }

            free_seen |= status == SectorState::Free;
            used_seen |= status == SectorState::InUse;

            if status == SectorState::InUse && previous == SectorState::Free {
                read_sector = sector;
            }
            if status == SectorState::Free && previous == SectorState::InUse {
                write_sector = sector - 1;
            }
            previous = status;
        }

        if !free_seen {
            return Err(NorlogError::NoFreeSector);
        }
        if !used_seen {
            write_sector = 0;
        }

        // Find the append point: the first ERASED slot in the write sector.
        // RESERVED slots from torn appends are not ERASED, so the write head
        // skips past them and their positions stay dead until the sector is
        // recycled. A completely full sector rolls the head onto slot 0 of
        // the next (FREE) sector.
        self.write = Location::new(write_sector, 0);
        while self.write.sector == write_sector {
            let raw = self.slot_status_raw(flash, self.write)?;
            if raw == SlotState::ERASED {
                break;
            }
            self.write.advance_slot(&self.geometry);
        }

        // Park the read head on the oldest VALID slot, or on the write head
        // when there is nothing to read.
        self.read = Location::new(read_sector, 0);
        while self.read != self.write {
            let raw = self.slot_status_raw(flash, self.read)?;
            if raw == SlotState::VALID {
                break;
            }
            self.read.advance_slot(&self.geometry);
        }

        self.cursor = self.read;
        debug!(
            target: "norlog::scan",
            read = %self.read,
            write = %self.write,
            "mounted"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Append
    // -----------------------------------------------------------------------

    /// Append one record, recycling the oldest sector when the ring is full.
    ///
    /// Three sectors take part: the write sector (promoted to IN_USE on
    /// first use), the next-ahead sector (freed now so the write head never
    /// collides with unreclaimed data), and the sector past that (where the
    /// read head and cursor retreat to if the freed sector held them). The
    /// slot itself commits in two phases, RESERVED before the payload and
    /// VALID after, so a power cut mid-payload leaves an inert slot that
    /// readers skip.
    pub fn append(&mut self, flash: &dyn Flash, object: &[u8]) -> Result<()> {
        let expected = self.geometry.object_size() as usize;
        if object.len() != expected {
            return Err(NorlogError::ObjectSizeMismatch {
                expected,
                actual: object.len(),
            });
        }

        // Uphold the ring invariant: the sector ahead of the write head must
        // be FREE before this append completes.
        let next_sector = (self.write.sector + 1) % self.geometry.sector_count();
        let next_raw = self.sector_status_raw(flash, next_sector)?;
        if next_raw != SectorState::FREE {
            if self.read.sector == next_sector {
                self.read.advance_sector(&self.geometry);
                trace!(target: "norlog::append", read = %self.read, "read_head_evicted");
            }
            if self.cursor.sector == next_sector {
                self.cursor.advance_sector(&self.geometry);
            }
            self.sector_free(flash, next_sector)?;
        }

        let raw = self.sector_status_raw(flash, self.write.sector)?;
        match SectorState::from_raw(raw) {
            Some(SectorState::Free) => {
                self.set_sector_status(flash, self.write.sector, SectorState::InUse)?;
            }
            Some(SectorState::InUse) => {}
            _ => {
                return Err(NorlogError::Corruption {
                    sector: self.write.sector,
                    detail: format!("write sector is neither FREE nor IN_USE ({raw:#010x})"),
                });
            }
        }

        self.set_slot_status(flash, self.write, SlotState::Reserved)?;
        flash.program(self.geometry.payload_address(self.write), object)?;
        self.set_slot_status(flash, self.write, SlotState::Valid)?;
        trace!(target: "norlog::append", loc = %self.write, "record_committed");

        self.write.advance_slot(&self.geometry);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Fetch / discard / rewind
    // -----------------------------------------------------------------------

    /// Fetch the next record at the cursor, oldest-first.
    ///
    /// Returns `Ok(false)` when the cursor has caught up with the write head
    /// and nothing remains — that is the ring being empty, not an error.
    /// Slots that are not VALID (torn RESERVED commits, discarded GARBAGE)
    /// are skipped silently.
    pub fn fetch(&mut self, flash: &dyn Flash, object: &mut [u8]) -> Result<bool> {
        let expected = self.geometry.object_size() as usize;
        if object.len() != expected {
            return Err(NorlogError::ObjectSizeMismatch {
                expected,
                actual: object.len(),
            });
        }

        while self.cursor != self.write {
            let raw = self.slot_status_raw(flash, self.cursor)?;
            if raw == SlotState::VALID {
                flash.read(self.geometry.payload_address(self.cursor), object)?;
                self.cursor.advance_slot(&self.geometry);
                return Ok(true);
            }
            trace!(target: "norlog::fetch", loc = %self.cursor, status = raw, "slot_skipped");
            self.cursor.advance_slot(&self.geometry);
        }
        Ok(false)
    }

    /// Acknowledge everything fetched so far: mark each slot from the read
    /// head up to the cursor GARBAGE. Sectors are never erased here; space
    /// is reclaimed lazily by append pressure.
    pub fn discard(&mut self, flash: &dyn Flash) -> Result<()> {
        while self.read != self.cursor {
            self.set_slot_status(flash, self.read, SlotState::Garbage)?;
            self.read.advance_slot(&self.geometry);
        }
        Ok(())
    }

    /// Mark the single slot at the read head GARBAGE and advance past it.
    ///
    /// Unconditional: on an empty ring this garbages the slot the next
    /// append would have used and walks the read head ahead of the write
    /// head. The caller must check for emptiness first. The cursor is left
    /// where it is; a cursor overtaken this way only re-skips the newly
    /// garbaged slot on its next fetch.
    pub fn discard_one(&mut self, flash: &dyn Flash) -> Result<()> {
        self.set_slot_status(flash, self.read, SlotState::Garbage)?;
        self.read.advance_slot(&self.geometry);
        Ok(())
    }

    /// Move the cursor back to the oldest undiscarded record, replaying
    /// everything fetched but not yet discarded.
    pub fn rewind(&mut self) {
        self.cursor = self.read;
    }

    // -----------------------------------------------------------------------
    // Counts
    // -----------------------------------------------------------------------

    /// O(1) record count derived from the positions alone. Counts every
    /// slot in the `[read, write)` window, including GARBAGE and RESERVED,
    /// so it never undershoots [`RingLog::count_exact`].
    #[must_use]
    pub fn count_estimate(&self) -> u32 {
        let sector_count = i64::from(self.geometry.sector_count());
        let sector_diff =
            (i64::from(self.write.sector) - i64::from(self.read.sector)).rem_euclid(sector_count);
        let estimate = sector_diff * i64::from(self.geometry.slots_per_sector())
            + i64::from(self.write.slot)
            - i64::from(self.read.slot);
        estimate.max(0) as u32
    }

    /// O(n) exact count of VALID records between the read and write heads.
    pub fn count_exact(&self, flash: &dyn Flash) -> Result<u32> {
        let mut count = 0;
        let mut loc = self.read;
        while loc != self.write {
            if self.slot_status_raw(flash, loc)? == SlotState::VALID {
                count += 1;
            }
            loc.advance_slot(&self.geometry);
        }
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Page-coalescing buffer
    // -----------------------------------------------------------------------

    /// Accumulate `bytes` into the in-RAM page buffer, amortizing small
    /// writes into whole-object appends. When `bytes` would overflow the
    /// buffer, the buffer is flushed through [`RingLog::append`] first.
    /// Returns the number of bytes buffered.
    ///
    /// One flushed buffer equals one flash object, so `bytes` longer than
    /// the configured object size can never fit and are rejected.
    pub fn append_to_cache(&mut self, flash: &dyn Flash, bytes: &[u8]) -> Result<usize> {
        let capacity = self.geometry.object_size() as usize;
        if bytes.len() > capacity {
            return Err(NorlogError::ObjectSizeMismatch {
                expected: capacity,
                actual: bytes.len(),
            });
        }
        if self.cache.len() + bytes.len() > capacity {
            self.flush_cache(flash)?;
        }
        self.cache.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Force out a partially-filled page buffer as one appended object.
    /// The unused tail is `0xFF` filler, which programs as a no-op on NOR.
    /// Does nothing when the buffer is empty.
    pub fn flush_cache(&mut self, flash: &dyn Flash) -> Result<()> {
        if self.cache.is_empty() {
            return Ok(());
        }
        let capacity = self.geometry.object_size() as usize;
        let mut page = std::mem::take(&mut self.cache);
        page.resize(capacity, 0xFF);
        let result = self.append(flash, &page);
        page.clear();
        self.cache = page;
        result
    }

    /// Bytes currently held in the page buffer.
    #[must_use]
    pub fn cache_fill(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use norlog_flash::MemFlash;

    const VERSION: u32 = 0x42;

    /// The original bring-up geometry: 3 slots per sector, 15 usable slots,
    /// small enough to wrap constantly.
    fn small_geometry() -> Geometry {
        Geometry::new(32, 4, 6, 4, VERSION).expect("geometry")
    }

    fn small_flash() -> MemFlash {
        let geom = small_geometry();
        MemFlash::new((4 + geom.sector_count()) * geom.sector_size(), geom.sector_size())
    }

    fn formatted() -> (MemFlash, RingLog) {
        let flash = small_flash();
        let mut ring = RingLog::new(small_geometry());
        ring.format(&flash).expect("format");
        (flash, ring)
    }

    fn record(tag: u8) -> [u8; 4] {
        [tag, 0, 0, 0]
    }

    fn linear_offset(ring: &RingLog, loc: Location) -> u32 {
        loc.sector * ring.geometry().slots_per_sector() + loc.slot
    }

    /// A freshly scanned instance must agree with the live one.
    fn assert_scan_integrity(flash: &MemFlash, ring: &RingLog) {
        let mut rescanned = RingLog::new(*ring.geometry());
        rescanned.scan(flash).expect("rescan");
        assert_eq!(rescanned.read_head(), ring.read_head());
        assert_eq!(rescanned.write_head(), ring.write_head());
    }

    #[test]
    fn format_then_scan_yields_empty_ring() {
        let (flash, mut ring) = formatted();

        let mut mounted = RingLog::new(small_geometry());
        mounted.scan(&flash).expect("scan");
        assert_eq!(mounted.read_head(), Location::ZERO);
        assert_eq!(mounted.cursor(), Location::ZERO);
        assert_eq!(mounted.write_head(), Location::ZERO);
        assert_eq!(mounted.count_exact(&flash).expect("count"), 0);

        let mut out = [0_u8; 4];
        assert!(!ring.fetch(&flash, &mut out).expect("fetch"));
    }

    #[test]
    fn fetch_before_any_append_leaves_positions_alone() {
        let (flash, mut ring) = formatted();
        let mut out = [0_u8; 4];
        for _ in 0..3 {
            assert!(!ring.fetch(&flash, &mut out).expect("fetch"));
        }
        assert_eq!(linear_offset(&ring, ring.read_head()), 0);
        assert_eq!(linear_offset(&ring, ring.cursor()), 0);
        assert_eq!(linear_offset(&ring, ring.write_head()), 0);
        assert_scan_integrity(&flash, &ring);
    }

    #[test]
    fn append_fetch_rewind_round_trip() {
        let (flash, mut ring) = formatted();

        for i in 0..3_u8 {
            ring.append(&flash, &record(0x11 * (i + 1))).expect("append");
            assert_eq!(linear_offset(&ring, ring.write_head()), u32::from(i) + 1);
            assert_scan_integrity(&flash, &ring);
        }

        let mut out = [0_u8; 4];
        for i in 0..3_u8 {
            assert!(ring.fetch(&flash, &mut out).expect("fetch"));
            assert_eq!(out, record(0x11 * (i + 1)));
            assert_eq!(linear_offset(&ring, ring.cursor()), u32::from(i) + 1);
        }
        assert!(!ring.fetch(&flash, &mut out).expect("fetch"));

        ring.rewind();
        assert_eq!(linear_offset(&ring, ring.cursor()), 0);
        for i in 0..3_u8 {
            assert!(ring.fetch(&flash, &mut out).expect("fetch"));
            assert_eq!(out, record(0x11 * (i + 1)));
        }
    }

    #[test]
    fn discard_acknowledges_fetched_records() {
        let (flash, mut ring) = formatted();

        for i in 0..4_u8 {
            ring.append(&flash, &record(0x11 * (i + 1))).expect("append");
            assert_scan_integrity(&flash, &ring);
        }

        let mut out = [0_u8; 4];
        for i in 0..2_u8 {
            assert!(ring.fetch(&flash, &mut out).expect("fetch"));
            assert_eq!(out, record(0x11 * (i + 1)));
        }
        ring.discard(&flash).expect("discard");
        assert_scan_integrity(&flash, &ring);
        assert_eq!(linear_offset(&ring, ring.read_head()), 2);
        assert_eq!(linear_offset(&ring, ring.cursor()), 2);
        assert_eq!(linear_offset(&ring, ring.write_head()), 4);

        for i in 2..4_u8 {
            assert!(ring.fetch(&flash, &mut out).expect("fetch"));
            assert_eq!(out, record(0x11 * (i + 1)));
        }
        ring.discard(&flash).expect("discard");
        assert_eq!(linear_offset(&ring, ring.read_head()), 4);
        assert_eq!(linear_offset(&ring, ring.cursor()), 4);
        assert_eq!(linear_offset(&ring, ring.write_head()), 4);
        assert_scan_integrity(&flash, &ring);
    }

    #[test]
    fn discard_one_advances_a_single_slot() {
        let (flash, mut ring) = formatted();
        for i in 0..3_u8 {
            ring.append(&flash, &record(i + 1)).expect("append");
        }

        ring.discard_one(&flash).expect("discard_one");
        assert_eq!(linear_offset(&ring, ring.read_head()), 1);
        assert_eq!(ring.count_exact(&flash).expect("count"), 2);

        // The cursor stays behind and skips the garbaged slot on its own.
        assert_eq!(linear_offset(&ring, ring.cursor()), 0);
        let mut out = [0_u8; 4];
        assert!(ring.fetch(&flash, &mut out).expect("fetch"));
        assert_eq!(out, record(2));
    }

    #[test]
    fn counts_track_appends_fetches_and_discards() {
        let (flash, mut ring) = formatted();
        assert_eq!(ring.count_exact(&flash).expect("count"), 0);

        for i in 0..10_u8 {
            ring.append(&flash, &record(0x11 * (i + 1))).expect("append");
        }
        assert_eq!(ring.count_exact(&flash).expect("count"), 10);
        assert_eq!(ring.count_estimate(), 10);

        ring.scan(&flash).expect("rescan");
        assert_eq!(ring.count_exact(&flash).expect("count"), 10);
        assert_eq!(ring.count_estimate(), 10);

        for i in 10..13_u8 {
            ring.append(&flash, &record(0x11 * (i + 1))).expect("append");
        }
        assert_eq!(ring.count_exact(&flash).expect("count"), 13);
        assert_eq!(ring.count_estimate(), 13);

        // Fetch without discard changes no counts.
        let mut out = [0_u8; 4];
        for _ in 0..4 {
            assert!(ring.fetch(&flash, &mut out).expect("fetch"));
        }
        assert_eq!(ring.count_exact(&flash).expect("count"), 13);
        assert_eq!(ring.count_estimate(), 13);

        ring.scan(&flash).expect("rescan");
        for _ in 0..4 {
            assert!(ring.fetch(&flash, &mut out).expect("fetch"));
        }
        ring.discard(&flash).expect("discard");
        assert_eq!(ring.count_exact(&flash).expect("count"), 9);
        assert_eq!(ring.count_estimate(), 9);
    }

    #[test]
    fn count_estimate_handles_ring_wrap() {
        let (_flash, mut ring) = formatted();
        let geom = *ring.geometry();
        // Read head on the final slot of the final sector, write head wrapped
        // to the origin: exactly one slot apart.
        ring.read = Location::new(geom.sector_count() - 1, geom.slots_per_sector() - 1);
        ring.write = Location::ZERO;
        assert_eq!(ring.count_estimate(), 1);
    }

    #[test]
    fn capacity_reserves_one_sector() {
        let ring = RingLog::new(small_geometry());
        assert_eq!(ring.capacity(), 3 * (6 - 1));
    }

    #[test]
    fn overflow_recycles_oldest_sector() {
        let (flash, mut ring) = formatted();
        let capacity = ring.capacity();
        let slots_per_sector = ring.geometry().slots_per_sector();

        for i in 0..capacity {
            ring.append(&flash, &record(i as u8)).expect("append");
        }
        assert_eq!(ring.count_exact(&flash).expect("count"), capacity);
        assert_scan_integrity(&flash, &ring);

        for _ in 0..3 {
            // One more append must sacrifice one whole sector of records.
            ring.append(&flash, &record(0x42)).expect("append");
            assert_eq!(
                ring.count_exact(&flash).expect("count"),
                capacity - slots_per_sector + 1
            );
            assert_scan_integrity(&flash, &ring);

            for i in 0..slots_per_sector - 1 {
                ring.append(&flash, &record(i as u8)).expect("append");
            }
            assert_eq!(ring.count_exact(&flash).expect("count"), capacity);
            assert_scan_integrity(&flash, &ring);
        }
    }

    #[test]
    fn append_rejects_wrong_payload_length() {
        let (flash, mut ring) = formatted();
        assert!(matches!(
            ring.append(&flash, &[1, 2, 3]),
            Err(NorlogError::ObjectSizeMismatch {
                expected: 4,
                actual: 3
            })
        ));
        let mut short = [0_u8; 2];
        assert!(matches!(
            ring.fetch(&flash, &mut short),
            Err(NorlogError::ObjectSizeMismatch { .. })
        ));
    }

    #[test]
    fn erase_sector_checks_range_and_is_idempotent_on_free() {
        let (flash, ring) = formatted();
        assert!(matches!(
            ring.erase_sector(&flash, 6),
            Err(NorlogError::SectorOutOfRange { sector: 6, count: 6 })
        ));

        // Freeing an already-FREE sector leaves it FREE.
        ring.erase_sector(&flash, 2).expect("erase_sector");
        let raw = ring.sector_status_raw(&flash, 2).expect("status");
        assert_eq!(SectorState::from_raw(raw), Some(SectorState::Free));
        assert_eq!(
            ring.sector_version(&flash, 2).expect("version"),
            VERSION
        );
    }

    #[test]
    fn page_cache_coalesces_small_writes() {
        let geom = Geometry::new(128, 0, 4, 16, VERSION).expect("geometry");
        let flash = MemFlash::new(geom.partition_len(), geom.sector_size());
        let mut ring = RingLog::new(geom);
        ring.format(&flash).expect("format");

        // Three 6-byte chunks: the third would overflow a 16-byte buffer, so
        // the first two flush as one object.
        assert_eq!(ring.append_to_cache(&flash, &[0xA1; 6]).expect("cache"), 6);
        assert_eq!(ring.append_to_cache(&flash, &[0xB2; 6]).expect("cache"), 6);
        assert_eq!(ring.cache_fill(), 12);
        assert_eq!(ring.count_exact(&flash).expect("count"), 0);

        assert_eq!(ring.append_to_cache(&flash, &[0xC3; 6]).expect("cache"), 6);
        assert_eq!(ring.cache_fill(), 6);
        assert_eq!(ring.count_exact(&flash).expect("count"), 1);

        let mut out = [0_u8; 16];
        assert!(ring.fetch(&flash, &mut out).expect("fetch"));
        let mut expected = [0xFF_u8; 16];
        expected[..6].fill(0xA1);
        expected[6..12].fill(0xB2);
        assert_eq!(out, expected);

        // Force out the remainder.
        ring.flush_cache(&flash).expect("flush");
        assert_eq!(ring.cache_fill(), 0);
        assert!(ring.fetch(&flash, &mut out).expect("fetch"));
        let mut tail = [0xFF_u8; 16];
        tail[..6].fill(0xC3);
        assert_eq!(out, tail);

        // Oversized chunks can never fit.
        assert!(matches!(
            ring.append_to_cache(&flash, &[0_u8; 17]),
            Err(NorlogError::ObjectSizeMismatch { .. })
        ));
    }

    #[test]
    fn flush_cache_on_empty_buffer_is_a_no_op() {
        let (flash, mut ring) = formatted();
        let programs_before = flash.program_ops();
        ring.flush_cache(&flash).expect("flush");
        assert_eq!(flash.program_ops(), programs_before);
    }
}
