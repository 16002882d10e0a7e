/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::multi_stream_writer::MultiStreamWriter;
use anyhow::Result;
use std::path::PathBuf;

/// A bit-granularity façade over [`MultiStreamWriter`]: `k` logical bit
/// streams, each closed with the same tail-byte-plus-trailer convention as
/// [`BitStreamWriter`](super::BitStreamWriter).
pub struct MultiBitStreamWriter {
    inner: MultiStreamWriter<u8>,
    cur: Vec<u8>,
    filled: Vec<u8>,
    any: Vec<bool>,
}

impl MultiBitStreamWriter {
    /// Creates one logical bit stream per path.
    pub fn new(
        paths: &[PathBuf],
        buf_bytes_per_stream: usize,
        n_spare_buffers: usize,
    ) -> Result<Self> {
        Ok(MultiBitStreamWriter {
            inner: MultiStreamWriter::new(paths, buf_bytes_per_stream, n_spare_buffers)?,
            cur: vec![0; paths.len()],
            filled: vec![0; paths.len()],
            any: vec![false; paths.len()],
        })
    }

    /// Appends a bit to the `stream`-th logical stream.
    #[inline]
    pub fn write_to(&mut self, stream: usize, bit: bool) {
        self.cur[stream] |= (bit as u8) << self.filled[stream];
        self.filled[stream] += 1;
        self.any[stream] = true;
        if self.filled[stream] == 8 {
            self.inner.write_to(stream, self.cur[stream]);
            self.cur[stream] = 0;
            self.filled[stream] = 0;
        }
    }

    /// Flushes tails and trailers of every stream and closes the writer,
    /// returning the total bytes written.
    pub fn finish(mut self) -> Result<u64> {
        for stream in 0..self.cur.len() {
            let last_bits = if self.filled[stream] > 0 {
                let bits = self.filled[stream];
                self.inner.write_to(stream, self.cur[stream]);
                bits
            } else if self.any[stream] {
                8
            } else {
                0
            };
            self.inner.write_to(stream, last_bits);
        }
        self.inner.finish()
    }
}
