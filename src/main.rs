/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::{bail, Result};
use clap::Parser;
use emsais::ints::{Serial, U40};
use emsais::utils::parse_memory;
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// The suffix array is written as packed little-endian 5-byte offsets.
type TextOffset = U40;

#[derive(Parser, Debug)]
#[command(
    name = "sa_tool",
    version,
    about = "Construct the suffix array of the text stored in FILE.",
    long_about = None
)]
struct Args {
    /// The input text file.
    file: PathBuf,

    /// Use MEM bytes of RAM for the computation. Metric and IEC suffixes are
    /// recognized, e.g., 10k, 1Mi, 3G give MEM = 10^4, 2^20, 3*10^6.
    #[arg(short, long, default_value = "3584Mi", value_name = "MEM")]
    mem: String,

    /// Output filename. Default: FILE.saX, where X is the integer size used
    /// to encode the suffix array (5 bytes by default).
    #[arg(short, long, value_name = "OUTFILE")]
    output: Option<PathBuf>,
}

/// Asks whether an existing output file may be overwritten; `n` or end of
/// input aborts the run.
fn confirm_overwrite(path: &std::path::Path) -> Result<()> {
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("Output file ({}) exists. Overwrite? [y/n]: ", path.display());
        std::io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            bail!("failed to read answer");
        }
        match line.trim() {
            "y" => return Ok(()),
            "n" => std::process::exit(1),
            _ => continue,
        }
    }
}

pub fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let Some(ram_use) = parse_memory(&args.mem).filter(|&mem| mem > 0) else {
        bail!("parsing RAM limit ({}) failed", args.mem);
    };

    if !args.file.exists() {
        bail!("input file ({}) does not exist", args.file.display());
    }

    let output = args.output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "{}.sa{}",
            args.file.display(),
            TextOffset::BYTES
        ))
    });
    if output.exists() {
        confirm_overwrite(&output)?;
    }

    emsais::em_compute_sa::<u8, TextOffset>(ram_use, 256, &args.file, &output)?;
    Ok(())
}
