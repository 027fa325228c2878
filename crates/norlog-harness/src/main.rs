#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use norlog::{FileFlash, Geometry, RingLog};
use norlog_harness::{collect_stats, mount_or_format, render_map};
use std::env;

// Fixed demo partition: eight 4 KiB sectors of 16-byte records.
const SECTOR_SIZE: u32 = 4096;
const SECTOR_COUNT: u32 = 8;
const OBJECT_SIZE: u32 = 16;
const VERSION: u32 = 0x0000_0001;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(cmd) = args.next() else {
        print_usage();
        return Ok(());
    };

    match cmd.as_str() {
        "demo" => {
            let image = require_image(args.next())?;
            demo(&image)
        }
        "stats" => {
            let image = require_image(args.next())?;
            let (flash, mut ring) = open(&image)?;
            mount_or_format(&mut ring, &flash).context("mount")?;
            let stats = collect_stats(&ring, &flash).context("stats")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        "dump" => {
            let image = require_image(args.next())?;
            let (flash, mut ring) = open(&image)?;
            mount_or_format(&mut ring, &flash).context("mount")?;
            print!("{}", render_map(&ring, &flash).context("dump")?);
            Ok(())
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {cmd}")
        }
    }
}

fn require_image(arg: Option<String>) -> Result<String> {
    arg.context("missing <image> argument")
}

fn open(image: &str) -> Result<(FileFlash, RingLog)> {
    let geometry = Geometry::new(SECTOR_SIZE, 0, SECTOR_COUNT, OBJECT_SIZE, VERSION)
        .context("demo geometry")?;
    let flash = FileFlash::open(image, geometry.partition_len(), SECTOR_SIZE)
        .with_context(|| format!("open flash image {image}"))?;
    Ok((flash, RingLog::new(geometry)))
}

/// Mount (or format) the image, append a handful of records, then drain and
/// acknowledge everything readable.
fn demo(image: &str) -> Result<()> {
    let (flash, mut ring) = open(image)?;

    let formatted = mount_or_format(&mut ring, &flash).context("mount")?;
    println!(
        "mounted {image}: formatted={formatted} capacity={} records={}",
        ring.capacity(),
        ring.count_exact(&flash).context("count")?
    );

    for i in 0..5_u8 {
        let mut object = [0_u8; OBJECT_SIZE as usize];
        object[0] = i + 1;
        ring.append(&flash, &object).context("append")?;
    }
    println!("appended 5 records, now {}", ring.count_exact(&flash)?);

    let mut object = [0_u8; OBJECT_SIZE as usize];
    let mut drained = 0_u32;
    while ring.fetch(&flash, &mut object).context("fetch")? {
        drained += 1;
    }
    ring.discard(&flash).context("discard")?;
    println!("drained {drained} records, {} remain", ring.count_exact(&flash)?);

    Ok(())
}

fn print_usage() {
    println!("norlog-harness");
    println!();
    println!("USAGE:");
    println!("  norlog-harness demo <image>");
    println!("  norlog-harness stats <image>");
    println!("  norlog-harness dump <image>");
}
