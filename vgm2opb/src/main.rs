//! CLI tool to convert VGM files to OPB files.
use snafu::prelude::*;
use snafu::{report, Whatever};

use opbcodec::diagnostics::Level;
use opbcodec::{Encoder, Format, Vgm};

#[report]
fn main() -> Result<(), Whatever> {
    let mut args = std::env::args().skip(1).collect::<Vec<_>>();
    let raw = match args.iter().position(|arg| arg == "--raw") {
        Some(i) => {
            args.remove(i);
            true
        }
        None => false,
    };
    // Expecting 2 arguments: input file and output file
    if args.len() != 2 {
        eprintln!("Usage: vgm2opb [--raw] <input.vgm> <output.opb>");
        std::process::exit(-1);
    }
    let input = &args[0];
    let output = &args[1];

    let vgm = Vgm::from_file(input).whatever_context("Failed to read VGM file")?;
    let commands = vgm.opl_commands();
    if commands.is_empty() {
        eprintln!("No OPL commands found in VGM file");
    }

    let format = if raw { Format::Raw } else { Format::Default };
    Encoder::new(format)
        .with_logger(|level: Level, msg: &str| {
            if level <= Level::Info {
                eprintln!("[{}] {}", level, msg);
            }
        })
        .encode_to_file(&commands, output)
        .whatever_context("Failed to write OPB file")?;

    println!(
        "Wrote {} commands ({:.2} s) in {} format",
        commands.len(),
        vgm.total_samples() as f64 / opbcodec::vgm::SAMPLE_RATE as f64,
        format
    );
    Ok(())
}
