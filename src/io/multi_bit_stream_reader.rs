/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::multi_stream_reader::MultiStreamReader;
use anyhow::Result;
use std::path::PathBuf;

/// A bit-granularity façade over [`MultiStreamReader`], reading each logical
/// stream in writing order. Trailer bytes are never decoded because
/// consumers know how many bits each stream holds.
pub struct MultiBitStreamReader {
    inner: MultiStreamReader<u8>,
    cur: Vec<u8>,
    bits_left: Vec<u8>,
}

impl MultiBitStreamReader {
    /// Creates one logical bit stream per path.
    pub fn new(paths: &[PathBuf], buf_bytes_per_stream: usize) -> Result<Self> {
        Ok(MultiBitStreamReader {
            inner: MultiStreamReader::new(paths, buf_bytes_per_stream)?,
            cur: vec![0; paths.len()],
            bits_left: vec![0; paths.len()],
        })
    }

    /// Consumes and returns the next bit of the `stream`-th logical stream.
    #[inline]
    pub fn read_from(&mut self, stream: usize) -> bool {
        if self.bits_left[stream] == 0 {
            self.cur[stream] = self.inner.read_from(stream);
            self.bits_left[stream] = 8;
        }
        let bit = self.cur[stream] & 1 != 0;
        self.cur[stream] >>= 1;
        self.bits_left[stream] -= 1;
        bit
    }

    /// Total bytes consumed so far, over all streams.
    pub fn bytes_read(&self) -> u64 {
        self.inner.bytes_read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MultiBitStreamWriter;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_multi_bit_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths: Vec<PathBuf> = (0..4).map(|i| dir.path().join(format!("b{}", i))).collect();
        let mut rng = StdRng::seed_from_u64(99);
        let bits: Vec<Vec<bool>> = (0..4)
            .map(|stream| (0..(13 * (stream + 1))).map(|_| rng.random()).collect())
            .collect();

        let mut writer = MultiBitStreamWriter::new(&paths, 4, 2)?;
        for (stream, stream_bits) in bits.iter().enumerate() {
            for &bit in stream_bits {
                writer.write_to(stream, bit);
            }
        }
        writer.finish()?;

        let mut reader = MultiBitStreamReader::new(&paths, 4)?;
        for (stream, stream_bits) in bits.iter().enumerate() {
            for &bit in stream_bits {
                assert_eq!(reader.read_from(stream), bit);
            }
        }
        Ok(())
    }
}
