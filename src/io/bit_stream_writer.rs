/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::stream_writer::StreamWriter;
use anyhow::Result;
use std::path::Path;

/// An asynchronous writer of single bits, packed LSB-first into bytes.
///
/// On close the partial tail byte is flushed zero-padded, followed by one
/// trailer byte holding the number of valid bits in the final data byte
/// (`1..=8`, or `0` for a stream with no bits at all). The trailer is what
/// allows [`BackwardBitStreamReader`](super::BackwardBitStreamReader) to find
/// the last bit; forward readers never reach it because consumers always
/// know how many bits they wrote.
pub struct BitStreamWriter {
    inner: StreamWriter<u8>,
    cur: u8,
    filled: u8,
    bits_written: u64,
}

impl BitStreamWriter {
    /// Creates a bit writer over `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(BitStreamWriter {
            inner: StreamWriter::new(path)?,
            cur: 0,
            filled: 0,
            bits_written: 0,
        })
    }

    /// Appends a single bit.
    #[inline]
    pub fn push(&mut self, bit: bool) {
        self.cur |= (bit as u8) << self.filled;
        self.filled += 1;
        self.bits_written += 1;
        if self.filled == 8 {
            self.inner.push(self.cur);
            self.cur = 0;
            self.filled = 0;
        }
    }

    /// Total bits pushed so far.
    pub fn bits_written(&self) -> u64 {
        self.bits_written
    }

    /// Total bytes that will land on disk, trailer included.
    pub fn bytes_written(&self) -> u64 {
        self.bits_written.div_ceil(8) + 1
    }

    /// Flushes the tail byte and the trailer, and closes the stream.
    pub fn finish(mut self) -> Result<u64> {
        let last_bits = if self.filled > 0 {
            let bits = self.filled;
            self.inner.push(self.cur);
            bits
        } else if self.bits_written > 0 {
            8
        } else {
            0
        };
        self.inner.push(last_bits);
        self.inner.finish()
    }
}
