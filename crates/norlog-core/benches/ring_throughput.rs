#![forbid(unsafe_code)]
//! Append/fetch throughput over the in-RAM NOR simulator.
//!
//! The append path includes the inline sector recycling that a full ring
//! performs, so sustained numbers reflect steady-state rotation rather than
//! the one-time fill of an empty partition.

use criterion::{Criterion, criterion_group, criterion_main};
use norlog_core::RingLog;
use norlog_flash::MemFlash;
use norlog_types::Geometry;

fn bench_ring_throughput(c: &mut Criterion) {
    // 16 sectors of 4 KiB, 64-byte records.
    let geometry = Geometry::new(4096, 0, 16, 64, 1).expect("geometry");

    c.bench_function("append_64b_sustained", |b| {
        let flash = MemFlash::new(geometry.partition_len(), geometry.sector_size());
        let mut ring = RingLog::new(geometry);
        ring.format(&flash).expect("format");

        let record = [0xAB_u8; 64];
        b.iter(|| {
            ring.append(&flash, &record).expect("append");
        });
    });

    c.bench_function("append_fetch_discard_64b", |b| {
        let flash = MemFlash::new(geometry.partition_len(), geometry.sector_size());
        let mut ring = RingLog::new(geometry);
        ring.format(&flash).expect("format");

        let record = [0x5A_u8; 64];
        let mut out = [0_u8; 64];
        b.iter(|| {
            ring.append(&flash, &record).expect("append");
            assert!(ring.fetch(&flash, &mut out).expect("fetch"));
            ring.discard(&flash).expect("discard");
        });
    });

    c.bench_function("scan_half_full_partition", |b| {
        let flash = MemFlash::new(geometry.partition_len(), geometry.sector_size());
        let mut ring = RingLog::new(geometry);
        ring.format(&flash).expect("format");
        let record = [0xC3_u8; 64];
        for _ in 0..ring.capacity() / 2 {
            ring.append(&flash, &record).expect("append");
        }

        b.iter(|| {
            let mut mounted = RingLog::new(geometry);
            mounted.scan(&flash).expect("scan");
            mounted.write_head()
        });
    });
}

criterion_group!(benches, bench_ring_throughput);
criterion_main!(benches);
