/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::backward_stream_reader::BackwardStreamReader;
use anyhow::Result;
use std::path::Path;

/// An asynchronous reader of single bits in reverse writing order: the first
/// [`read`](BackwardBitStreamReader::read) yields the last bit written.
///
/// The trailer byte written by [`BitStreamWriter`](super::BitStreamWriter)
/// tells how many bits of the final data byte are valid.
pub struct BackwardBitStreamReader {
    inner: BackwardStreamReader<u8>,
    cur: u8,
    bits_left: u8,
    started: bool,
}

impl BackwardBitStreamReader {
    /// Creates a backward bit reader over `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(BackwardBitStreamReader {
            inner: BackwardStreamReader::new(path)?,
            cur: 0,
            bits_left: 0,
            started: false,
        })
    }

    /// Consumes and returns the next bit, scanning from the last written bit
    /// towards the first.
    #[inline]
    pub fn read(&mut self) -> bool {
        if !self.started {
            self.started = true;
            let trailer = self.inner.read();
            debug_assert!(trailer >= 1 && trailer <= 8);
            self.cur = self.inner.read();
            self.bits_left = trailer;
        }
        if self.bits_left == 0 {
            self.cur = self.inner.read();
            self.bits_left = 8;
        }
        self.bits_left -= 1;
        (self.cur >> self.bits_left) & 1 != 0
    }

    /// Total bytes consumed from disk so far.
    pub fn bytes_read(&self) -> u64 {
        self.inner.bytes_read()
    }
}
