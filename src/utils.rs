/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Small file helpers shared by the pipeline stages, plus the parser for
//! human-readable memory amounts used by the `--mem` option.

use crate::ints::Serial;
use anyhow::{ensure, Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Returns the size of `path` in bytes.
pub fn file_size(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    Ok(std::fs::metadata(path)
        .with_context(|| format!("Could not stat {}", path.display()))?
        .len())
}

/// Deletes `path`.
pub fn file_delete(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    std::fs::remove_file(path).with_context(|| format!("Could not delete {}", path.display()))
}

/// Deletes `path` if it exists; failures are logged and otherwise ignored.
/// Used on error paths and for streams that may already have been consumed
/// and unlinked by their reader.
pub fn file_delete_if_exists(path: impl AsRef<Path>) {
    let path = path.as_ref();
    if path.exists() {
        if let Err(err) = std::fs::remove_file(path) {
            log::warn!("Could not delete {}: {}", path.display(), err);
        }
    }
}

/// Derives a fresh temporary file name from `base`; the name carries a random
/// hash so concurrent runs sharing an output directory cannot collide.
pub fn temp_file_name(base: impl AsRef<Path>) -> PathBuf {
    PathBuf::from(format!(
        "{}.tmp.{:016x}",
        base.as_ref().display(),
        rand::random::<u64>()
    ))
}

/// Derives `n` fresh temporary file names from `base`, one per block.
pub fn temp_file_names(base: impl AsRef<Path>, n: usize) -> Vec<PathBuf> {
    (0..n).map(|_| temp_file_name(base.as_ref())).collect()
}

/// Reads the element at `index` from a file of packed `T`.
pub fn read_at<T: Serial>(path: impl AsRef<Path>, index: u64) -> Result<T> {
    let path = path.as_ref();
    let mut file =
        File::open(path).with_context(|| format!("Could not open {}", path.display()))?;
    file.seek(SeekFrom::Start(index * T::BYTES as u64))
        .with_context(|| format!("Could not seek in {}", path.display()))?;
    let mut buf = vec![0u8; T::BYTES];
    file.read_exact(&mut buf)
        .with_context(|| format!("Could not read {}", path.display()))?;
    Ok(T::load_le(&buf))
}

/// Reads a whole file of packed `T` into memory.
pub fn read_all<T: Serial>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    let bytes =
        std::fs::read(path).with_context(|| format!("Could not read {}", path.display()))?;
    ensure!(
        bytes.len() % T::BYTES == 0,
        "{}: length {} is not a multiple of the element width {}",
        path.display(),
        bytes.len(),
        T::BYTES
    );
    Ok(bytes.chunks_exact(T::BYTES).map(T::load_le).collect())
}

/// Writes a slice of packed `T` to a file, replacing any previous content.
pub fn write_all<T: Serial>(path: impl AsRef<Path>, values: &[T]) -> Result<()> {
    let path = path.as_ref();
    let mut bytes = vec![0u8; values.len() * T::BYTES];
    for (value, chunk) in values.iter().zip(bytes.chunks_exact_mut(T::BYTES)) {
        value.store_le(chunk);
    }
    let mut file =
        File::create(path).with_context(|| format!("Could not create {}", path.display()))?;
    file.write_all(&bytes)
        .with_context(|| format!("Could not write {}", path.display()))?;
    Ok(())
}

/// Reads the half-open item range `[beg, end)` from an open file of packed
/// `T`.
pub fn read_range<T: Serial>(file: &mut File, path: &Path, beg: u64, end: u64) -> Result<Vec<T>> {
    let n_items = (end - beg) as usize;
    let mut bytes = vec![0u8; n_items * T::BYTES];
    file.seek(SeekFrom::Start(beg * T::BYTES as u64))
        .with_context(|| format!("Could not seek in {}", path.display()))?;
    file.read_exact(&mut bytes)
        .with_context(|| format!("Could not read {}", path.display()))?;
    Ok(bytes.chunks_exact(T::BYTES).map(T::load_le).collect())
}

/// Parses a memory amount with optional metric (`k`, `m`, `g`, `t`,
/// ×10³/10⁶/10⁹/10¹²) or IEC (`ki`, `mi`, `gi`, `ti`, ×2¹⁰/2²⁰/2³⁰/2⁴⁰)
/// suffix, case-insensitive. Returns `None` on malformed input.
pub fn parse_memory(text: &str) -> Option<u64> {
    let text = text.trim();
    let digits_end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if digits_end == 0 {
        return None;
    }
    let value: u64 = text[..digits_end].parse().ok()?;
    let suffix = text[digits_end..].to_ascii_lowercase();
    let multiplier = match suffix.as_str() {
        "" => 1,
        "k" => 1_000,
        "m" => 1_000_000,
        "g" => 1_000_000_000,
        "t" => 1_000_000_000_000,
        "ki" => 1u64 << 10,
        "mi" => 1u64 << 20,
        "gi" => 1u64 << 30,
        "ti" => 1u64 << 40,
        _ => return None,
    };
    value.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ints::U40;

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("1024"), Some(1024));
        assert_eq!(parse_memory("10k"), Some(10_000));
        assert_eq!(parse_memory("1Mi"), Some(1 << 20));
        assert_eq!(parse_memory("3G"), Some(3_000_000_000));
        assert_eq!(parse_memory("2ti"), Some(2 << 40));
        assert_eq!(parse_memory("3584Mi"), Some(3584 << 20));
        assert_eq!(parse_memory(""), None);
        assert_eq!(parse_memory("k"), None);
        assert_eq!(parse_memory("10x"), None);
        assert_eq!(parse_memory("10kib"), None);
    }

    #[test]
    fn test_read_write_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("values");
        let values: Vec<U40> = (0..1000u64).map(|i| U40::from(i * 77)).collect();
        write_all(&path, &values)?;
        assert_eq!(file_size(&path)?, 5000);
        assert_eq!(read_all::<U40>(&path)?, values);
        assert_eq!(read_at::<U40>(&path, 123)?.to_u64(), 123 * 77);
        file_delete(&path)?;
        assert!(!path.exists());
        Ok(())
    }
}
