/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::backward_stream_reader::BackwardStreamReader;
use super::multipart_writer::part_path;
use crate::ints::Serial;
use anyhow::Result;
use std::path::PathBuf;

/// Reads a multi-part stream back to front: parts are visited last to first,
/// each scanned from its end, and every part file is deleted as soon as it
/// has been fully consumed, reclaiming disk space early.
pub struct BackwardMultipartReader<T: Serial> {
    base: PathBuf,
    next_part: usize,
    cur: Option<BackwardStreamReader<T>>,
    bytes_read: u64,
}

impl<T: Serial> BackwardMultipartReader<T> {
    /// Creates a backward reader over the `parts` parts of `base`.
    pub fn new(base: impl Into<PathBuf>, parts: usize) -> Result<Self> {
        let base = base.into();
        let cur = if parts > 0 {
            Some(BackwardStreamReader::new(part_path(&base, parts - 1))?)
        } else {
            None
        };
        Ok(BackwardMultipartReader {
            base,
            next_part: parts,
            cur,
            bytes_read: 0,
        })
    }

    /// Moves to the previous part when the current one is exhausted,
    /// deleting the exhausted file.
    fn advance(&mut self) -> Result<()> {
        while let Some(reader) = &mut self.cur {
            if !reader.is_empty() {
                return Ok(());
            }
            self.bytes_read += reader.bytes_read();
            self.cur = None;
            self.next_part -= 1;
            crate::utils::file_delete(part_path(&self.base, self.next_part))?;
            if self.next_part > 0 {
                self.cur = Some(BackwardStreamReader::new(part_path(
                    &self.base,
                    self.next_part - 1,
                ))?);
            }
        }
        Ok(())
    }

    /// Consumes and returns the next element in reverse writing order.
    pub fn read(&mut self) -> Result<T> {
        self.advance()?;
        let reader = self
            .cur
            .as_mut()
            .unwrap_or_else(|| panic!("{}: read past end", self.base.display()));
        Ok(reader.read())
    }

    /// Returns true iff every part has been consumed.
    pub fn is_empty(&mut self) -> Result<bool> {
        self.advance()?;
        Ok(self.cur.is_none())
    }

    /// Total bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
            + self
                .cur
                .as_ref()
                .map(|reader| reader.bytes_read())
                .unwrap_or(0)
    }
}

impl<T: Serial> Drop for BackwardMultipartReader<T> {
    fn drop(&mut self) {
        // Remove any part not yet unlinked by `advance` (a consumer that
        // reads exactly the item count never looks past the last element).
        self.cur = None;
        for part in 0..self.next_part {
            crate::utils::file_delete_if_exists(part_path(&self.base, part));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MultipartWriter;

    #[test]
    fn test_multipart_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("ids");
        let mut writer = MultipartWriter::<u16>::new(&base, 64)?;
        for i in 0..1000u16 {
            writer.push(i)?;
        }
        let (parts, bytes) = writer.finish()?;
        assert_eq!(bytes, 2000);
        assert_eq!(parts, 2000usize.div_ceil(64));

        let mut reader = BackwardMultipartReader::<u16>::new(&base, parts)?;
        for i in (0..1000u16).rev() {
            assert!(!reader.is_empty()?);
            assert_eq!(reader.read()?, i);
        }
        assert!(reader.is_empty()?);
        // Every part has been deleted while reading.
        for part in 0..parts {
            assert!(!part_path(&base, part).exists());
        }
        Ok(())
    }

    #[test]
    fn test_multipart_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("none");
        let (parts, bytes) = MultipartWriter::<u16>::new(&base, 64)?.finish()?;
        assert_eq!((parts, bytes), (0, 0));
        let mut reader = BackwardMultipartReader::<u16>::new(&base, parts)?;
        assert!(reader.is_empty()?);
        Ok(())
    }
}
