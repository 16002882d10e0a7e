/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::Result;
use emsais::ints::{UInt, U40};
use emsais::naive::naive_sa;
use emsais::utils::{read_all, write_all};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

/// Runs the whole pipeline on `text` with the given RAM budget and checks
/// the output against the naive sorter.
fn check_sa<C: UInt>(dir: &Path, text: &[C], alphabet_size: u64, ram_use: u64) -> Result<()> {
    let text_path = dir.join(format!("text.{:x}", rand::random::<u32>()));
    let sa_path = text_path.with_extension("sa5");
    write_all(&text_path, text)?;

    emsais::em_compute_sa::<C, U40>(ram_use, alphabet_size, &text_path, &sa_path)?;

    let sa: Vec<u64> = read_all::<U40>(&sa_path)?
        .into_iter()
        .map(|value| value.to_u64())
        .collect();
    assert_eq!(
        sa,
        naive_sa(text),
        "wrong suffix array for n = {}, sigma = {}, ram = {}",
        text.len(),
        alphabet_size,
        ram_use
    );
    Ok(())
}

#[test]
fn test_abracadabra_tiny_ram() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let text_path = dir.path().join("text");
    let sa_path = dir.path().join("text.sa5");
    write_all(&text_path, b"abracadabra".as_slice())?;
    // A 40-byte budget makes the induce blocks three symbols long.
    emsais::em_compute_sa::<u8, U40>(40, 256, &text_path, &sa_path)?;
    let sa: Vec<u64> = read_all::<U40>(&sa_path)?
        .into_iter()
        .map(|value| value.to_u64())
        .collect();
    assert_eq!(sa, vec![10, 7, 0, 3, 5, 8, 1, 4, 6, 9, 2]);
    Ok(())
}

#[test]
fn test_mississippi() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for ram_use in [64, 1 << 10, 1 << 20] {
        check_sa(dir.path(), b"mississippi".as_slice(), 256, ram_use)?;
    }
    Ok(())
}

#[test]
fn test_small_integer_alphabet() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let text: Vec<u8> = vec![4, 2, 2, 4, 2, 2, 4, 1];
    for ram_use in [48, 1 << 16] {
        check_sa(dir.path(), &text, 5, ram_use)?;
    }
    Ok(())
}

#[test]
fn test_single_symbol() -> Result<()> {
    let dir = tempfile::tempdir()?;
    check_sa(dir.path(), b"a".as_slice(), 256, 1 << 10)?;
    Ok(())
}

#[test]
fn test_runs_of_one_symbol() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for n in [2usize, 7, 64, 1000] {
        check_sa(dir.path(), &vec![7u8; n], 256, 128)?;
    }
    Ok(())
}

#[test]
fn test_alternating_symbols() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // Long equal-type runs across every block boundary.
    let text: Vec<u8> = (0..4096).map(|i| (i & 1) as u8).collect();
    for ram_use in [512, 1 << 14] {
        check_sa(dir.path(), &text, 2, ram_use)?;
    }
    Ok(())
}

#[test]
fn test_random_bytes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut rng = StdRng::seed_from_u64(0xDA7A);
    let text: Vec<u8> = (0..8192).map(|_| rng.random()).collect();
    // 64 KiB keeps the whole level in one block; 2 KiB forces dozens of
    // blocks and heap spills.
    for ram_use in [1 << 16, 1 << 11] {
        check_sa(dir.path(), &text, 256, ram_use)?;
    }
    Ok(())
}

#[test]
fn test_small_alphabets() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut rng = StdRng::seed_from_u64(0x5A15);
    for sigma in [2u64, 6] {
        for n in [16usize, 500, 4096] {
            let text: Vec<u8> = (0..n).map(|_| rng.random_range(0..sigma) as u8).collect();
            for ram_use in [256, 1 << 15] {
                check_sa(dir.path(), &text, sigma, ram_use)?;
            }
        }
    }
    Ok(())
}

#[test]
fn test_wide_alphabets() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut rng = StdRng::seed_from_u64(0x51D3);
    for sigma in [1u64 << 10, 1 << 18] {
        for n in [100usize, 2048] {
            let text: Vec<u32> = (0..n).map(|_| rng.random_range(0..sigma) as u32).collect();
            for ram_use in [1 << 12, 1 << 20] {
                check_sa(dir.path(), &text, sigma, ram_use)?;
            }
        }
    }
    Ok(())
}

#[test]
fn test_randomized_against_oracle() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut rng = StdRng::seed_from_u64(0x0AC1E);
    let alphabets = [2u64, 6, 26, 256];
    for _ in 0..20 {
        let n = rng.random_range(1..2000);
        let sigma = alphabets[rng.random_range(0..alphabets.len())];
        let text: Vec<u8> = (0..n).map(|_| rng.random_range(0..sigma) as u8).collect();
        let ram_use = rng.random_range(40..4096);
        check_sa(dir.path(), &text, sigma, ram_use)?;
    }
    Ok(())
}

#[test]
fn test_empty_text() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let text_path = dir.path().join("empty");
    let sa_path = dir.path().join("empty.sa5");
    write_all::<u8>(&text_path, &[])?;
    let stats = emsais::em_compute_sa::<u8, U40>(1 << 20, 256, &text_path, &sa_path)?;
    assert_eq!(stats.text_length, 0);
    assert_eq!(emsais::utils::file_size(&sa_path)?, 0);
    Ok(())
}

#[test]
fn test_temp_files_are_removed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let text_path = dir.path().join("text");
    let sa_path = dir.path().join("text.sa5");
    let text: Vec<u8> = b"yabbadabbadoo".repeat(20);
    write_all(&text_path, &text)?;
    emsais::em_compute_sa::<u8, U40>(200, 256, &text_path, &sa_path)?;
    // Only the input and the output survive the run.
    let mut entries: Vec<String> = std::fs::read_dir(dir.path())?
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    entries.sort();
    assert_eq!(entries, vec!["text", "text.sa5"]);
    Ok(())
}
