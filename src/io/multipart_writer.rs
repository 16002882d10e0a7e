/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::stream_writer::StreamWriter;
use crate::ints::Serial;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Returns the path of the `part`-th part of a multi-part file.
pub fn part_path(base: impl AsRef<Path>, part: usize) -> PathBuf {
    PathBuf::from(format!("{}.part.{:06}", base.as_ref().display(), part))
}

/// A writer that rotates to a new file every `part_size` bytes.
///
/// Parts are named `<base>.part.<i>` with monotonically increasing,
/// zero-padded `i`; readers concatenate them in order. Multi-part streams let
/// consumers reclaim disk space early by deleting each part as soon as it has
/// been fully read.
pub struct MultipartWriter<T: Serial> {
    base: PathBuf,
    part_size: u64,
    cur: Option<StreamWriter<T>>,
    cur_bytes: u64,
    parts: usize,
    bytes_written: u64,
}

impl<T: Serial> MultipartWriter<T> {
    /// Creates a multi-part writer rotating at `part_size` bytes.
    pub fn new(base: impl AsRef<Path>, part_size: u64) -> Result<Self> {
        Ok(MultipartWriter {
            base: base.as_ref().to_owned(),
            part_size: part_size.max(1),
            cur: None,
            cur_bytes: 0,
            parts: 0,
            bytes_written: 0,
        })
    }

    /// Appends a single element, rotating parts as needed.
    pub fn push(&mut self, value: T) -> Result<()> {
        if self.cur.is_none() {
            self.cur = Some(StreamWriter::new(part_path(&self.base, self.parts))?);
            self.cur_bytes = 0;
        }
        let writer = self.cur.as_mut().unwrap();
        writer.push(value);
        self.cur_bytes += T::BYTES as u64;
        self.bytes_written += T::BYTES as u64;
        if self.cur_bytes >= self.part_size {
            self.cur.take().unwrap().finish()?;
            self.parts += 1;
        }
        Ok(())
    }

    /// Number of parts, counting the one currently open.
    pub fn parts(&self) -> usize {
        self.parts + self.cur.is_some() as usize
    }

    /// Total bytes pushed so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Closes the current part and returns `(parts, bytes_written)`.
    pub fn finish(mut self) -> Result<(usize, u64)> {
        if let Some(writer) = self.cur.take() {
            writer.finish()?;
            self.parts += 1;
        }
        Ok((self.parts, self.bytes_written))
    }
}
