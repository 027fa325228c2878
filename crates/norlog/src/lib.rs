#![forbid(unsafe_code)]
//! norlog public API facade.
//!
//! Re-exports the ring core, the flash capability trait and simulators, and
//! the geometry/status types through one crate. This is the crate downstream
//! consumers depend on.

pub use norlog_core::RingLog;
pub use norlog_error::{NorlogError, Result};
pub use norlog_flash::{FileFlash, Flash, MemFlash};
pub use norlog_types::{
    FlashAddr, Geometry, GeometryError, Location, SECTOR_HEADER_SIZE, SECTOR_STATUS_OFFSET,
    SECTOR_VERSION_OFFSET, SLOT_HEADER_SIZE, SectorState, SlotState,
};
