/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::stream_reader::StreamReader;
use anyhow::Result;
use std::path::Path;

/// An asynchronous reader of single bits in writing order.
///
/// The caller is expected to read at most as many bits as were written, so
/// the trailer byte appended by
/// [`BitStreamWriter`](super::BitStreamWriter) is never decoded as data.
pub struct BitStreamReader {
    inner: StreamReader<u8>,
    cur: u8,
    bits_left: u8,
    bits_read: u64,
}

impl BitStreamReader {
    /// Creates a bit reader over `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(BitStreamReader {
            inner: StreamReader::new(path)?,
            cur: 0,
            bits_left: 0,
            bits_read: 0,
        })
    }

    /// Consumes and returns the next bit.
    #[inline]
    pub fn read(&mut self) -> bool {
        if self.bits_left == 0 {
            self.cur = self.inner.read();
            self.bits_left = 8;
        }
        let bit = self.cur & 1 != 0;
        self.cur >>= 1;
        self.bits_left -= 1;
        self.bits_read += 1;
        bit
    }

    /// Total bytes consumed from disk so far.
    pub fn bytes_read(&self) -> u64 {
        self.inner.bytes_read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{BackwardBitStreamReader, BitStreamWriter};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_bit_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for n_bits in [0usize, 1, 7, 8, 9, 1000, 4096, 4099] {
            let path = dir.path().join(format!("bits.{}", n_bits));
            let bits: Vec<bool> = (0..n_bits).map(|_| rng.random()).collect();
            let mut writer = BitStreamWriter::new(&path)?;
            for &bit in &bits {
                writer.push(bit);
            }
            assert_eq!(writer.bits_written(), n_bits as u64);
            writer.finish()?;

            let mut forward = BitStreamReader::new(&path)?;
            for &bit in &bits {
                assert_eq!(forward.read(), bit);
            }

            let mut backward = BackwardBitStreamReader::new(&path)?;
            for &bit in bits.iter().rev() {
                assert_eq!(backward.read(), bit);
            }
        }
        Ok(())
    }
}
