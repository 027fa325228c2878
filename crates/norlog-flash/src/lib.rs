#![forbid(unsafe_code)]
//! Flash access primitives.
//!
//! Provides the `Flash` capability trait the ring core is written against,
//! plus two NOR simulators: `MemFlash` (in-RAM, with operation counters and
//! a raw-overwrite hatch for crash injection) and `FileFlash` (file-backed,
//! for the harness and for state that survives process restarts).

use norlog_error::{NorlogError, Result};
use norlog_types::FlashAddr;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// NOR flash capability: whole-sector erase, bit-clearing program, random
/// read. Object-safe so a simulator and a real driver can coexist behind one
/// `&dyn Flash`.
///
/// `program` semantically ANDs the supplied bytes into the existing contents:
/// bits move 1→0 only. Multiple programs of the same bytes are permitted as
/// long as each only clears bits. No alignment beyond byte granularity is
/// required of implementors.
pub trait Flash: Send + Sync {
    /// Erase the entire sector containing `addr`; every byte of it reads
    /// back as `0xFF` afterwards.
    fn erase(&self, addr: FlashAddr) -> Result<()>;

    /// AND `data` into the contents at `addr..addr + data.len()`.
    fn program(&self, addr: FlashAddr, data: &[u8]) -> Result<()>;

    /// Read `buf.len()` bytes starting at `addr`.
    fn read(&self, addr: FlashAddr, buf: &mut [u8]) -> Result<()>;
}

fn check_range(total: u32, addr: FlashAddr, len: usize) -> Result<std::ops::Range<usize>> {
    let start = addr.0 as usize;
    let end = start
        .checked_add(len)
        .ok_or(NorlogError::OutOfBounds { addr: addr.0, len })?;
    if end > total as usize {
        return Err(NorlogError::OutOfBounds { addr: addr.0, len });
    }
    Ok(start..end)
}

/// In-RAM NOR simulator.
///
/// A fresh instance reads as all-ones, like a factory-fresh chip. Operation
/// counters let tests assert flash quiescence, and `raw_overwrite` bypasses
/// the AND discipline to plant arbitrary torn states.
#[derive(Debug)]
pub struct MemFlash {
    cells: Mutex<Vec<u8>>,
    sector_size: u32,
    erase_ops: AtomicU64,
    program_ops: AtomicU64,
    read_ops: AtomicU64,
}

impl MemFlash {
    /// Create a simulator of `len` bytes with the given erase-unit size.
    ///
    /// # Panics
    ///
    /// Panics if `sector_size` is zero or does not divide `len`.
    #[must_use]
    pub fn new(len: u32, sector_size: u32) -> Self {
        assert!(sector_size > 0, "sector_size must be non-zero");
        assert!(
            len % sector_size == 0,
            "len must be a whole number of sectors"
        );
        Self {
            cells: Mutex::new(vec![0xFF; len as usize]),
            sector_size,
            erase_ops: AtomicU64::new(0),
            program_ops: AtomicU64::new(0),
            read_ops: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        self.cells.lock().len() as u32
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.lock().is_empty()
    }

    #[must_use]
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    #[must_use]
    pub fn erase_ops(&self) -> u64 {
        self.erase_ops.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn program_ops(&self) -> u64 {
        self.program_ops.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn read_ops(&self) -> u64 {
        self.read_ops.load(Ordering::Relaxed)
    }

    /// Copy of the full cell array, for byte-level assertions.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.cells.lock().clone()
    }

    /// Overwrite cells verbatim, bypassing the AND discipline.
    ///
    /// This exists to plant states a real power cut could leave behind (a
    /// status word rolled back, a half-programmed header) that the `Flash`
    /// operations themselves can never produce.
    pub fn raw_overwrite(&self, addr: FlashAddr, data: &[u8]) -> Result<()> {
        let mut cells = self.cells.lock();
        let range = check_range(cells.len() as u32, addr, data.len())?;
        cells[range].copy_from_slice(data);
        Ok(())
    }
}

impl Flash for MemFlash {
    fn erase(&self, addr: FlashAddr) -> Result<()> {
        let mut cells = self.cells.lock();
        check_range(cells.len() as u32, addr, 1)?;
        let start = (addr.0 - addr.0 % self.sector_size) as usize;
        let end = start + self.sector_size as usize;
        cells[start..end].fill(0xFF);
        self.erase_ops.fetch_add(1, Ordering::Relaxed);
        debug!(target: "norlog::flash::mem", addr = addr.0, sector_start = start, "erase");
        Ok(())
    }

    fn program(&self, addr: FlashAddr, data: &[u8]) -> Result<()> {
        let mut cells = self.cells.lock();
        let range = check_range(cells.len() as u32, addr, data.len())?;
        for (cell, byte) in cells[range].iter_mut().zip(data) {
            *cell &= byte;
        }
        self.program_ops.fetch_add(1, Ordering::Relaxed);
        trace!(target: "norlog::flash::mem", addr = addr.0, len = data.len(), "program");
        Ok(())
    }

    fn read(&self, addr: FlashAddr, buf: &mut [u8]) -> Result<()> {
        let cells = self.cells.lock();
        let range = check_range(cells.len() as u32, addr, buf.len())?;
        buf.copy_from_slice(&cells[range]);
        self.read_ops.fetch_add(1, Ordering::Relaxed);
        trace!(target: "norlog::flash::mem", addr = addr.0, len = buf.len(), "read");
        Ok(())
    }
}

/// File-backed NOR simulator using positional I/O.
///
/// Opening an existing image preserves its contents, so a harness run can
/// pick up the partition a previous run left behind. A brand-new image is
/// extended with zero bytes, which the ring core reads as a mid-format
/// partition; callers format before first use.
#[derive(Debug)]
pub struct FileFlash {
    file: File,
    len: u32,
    sector_size: u32,
}

impl FileFlash {
    /// Open or create a flash image of `len` bytes at `path`.
    ///
    /// # Panics
    ///
    /// Panics if `sector_size` is zero or does not divide `len`.
    pub fn open(path: impl AsRef<Path>, len: u32, sector_size: u32) -> Result<Self> {
        assert!(sector_size > 0, "sector_size must be non-zero");
        assert!(
            len % sector_size == 0,
            "len must be a whole number of sectors"
        );
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        file.set_len(u64::from(len))?;
        Ok(Self {
            file,
            len,
            sector_size,
        })
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }
}

impl Flash for FileFlash {
    fn erase(&self, addr: FlashAddr) -> Result<()> {
        check_range(self.len, addr, 1)?;
        let start = addr.0 - addr.0 % self.sector_size;
        let blank = vec![0xFF_u8; self.sector_size as usize];
        self.file.write_all_at(&blank, u64::from(start))?;
        debug!(target: "norlog::flash::file", addr = addr.0, sector_start = start, "erase");
        Ok(())
    }

    fn program(&self, addr: FlashAddr, data: &[u8]) -> Result<()> {
        check_range(self.len, addr, data.len())?;
        let mut current = vec![0_u8; data.len()];
        self.file.read_exact_at(&mut current, u64::from(addr.0))?;
        for (cell, byte) in current.iter_mut().zip(data) {
            *cell &= byte;
        }
        self.file.write_all_at(&current, u64::from(addr.0))?;
        trace!(target: "norlog::flash::file", addr = addr.0, len = data.len(), "program");
        Ok(())
    }

    fn read(&self, addr: FlashAddr, buf: &mut [u8]) -> Result<()> {
        check_range(self.len, addr, buf.len())?;
        self.file.read_exact_at(buf, u64::from(addr.0))?;
        Ok(())
    }
}
