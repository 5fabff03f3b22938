//! CLI tool to print the register writes stored in an OPB file.
use std::fs::File;
use std::io::BufReader;

use snafu::prelude::*;
use snafu::{report, Whatever};

use opbcodec::OpbReader;

#[report]
fn main() -> Result<(), Whatever> {
    let args = std::env::args().collect::<Vec<_>>();
    if args.len() != 2 {
        eprintln!("Usage: opbdump <input.opb>");
        std::process::exit(-1);
    }
    let input = &args[1];

    let file = File::open(input).whatever_context("Failed to open OPB file")?;
    let mut reader =
        OpbReader::new(BufReader::new(file)).whatever_context("Failed to read OPB header")?;

    let header = reader.header_info();
    println!("Format: {}", header.format);
    println!("Instruments: {}", header.instrument_count);
    println!("Chunks: {}", header.chunk_count);

    for cmd in &mut reader {
        let cmd = cmd.whatever_context("Failed to decode OPB file")?;
        println!("{:.3}: 0x{:03X}, 0x{:02X}", cmd.time, cmd.address, cmd.data);
    }
    Ok(())
}
