/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::items_per_buffer;
use crate::ints::Serial;
use anyhow::{ensure, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::thread::JoinHandle;

/// The backward counterpart of
/// [`MultiStreamReader`](super::MultiStreamReader): each logical stream is
/// consumed from the end of its file towards the beginning.
pub struct BackwardMultiStreamReader<T: Serial> {
    bufs: Vec<(Vec<T>, usize)>,
    req_tx: Option<Sender<(usize, Vec<T>)>>,
    resp_rx: Vec<Receiver<Vec<T>>>,
    io_thread: Option<JoinHandle<()>>,
    bytes_read: u64,
}

impl<T: Serial> BackwardMultiStreamReader<T> {
    /// Creates one backward logical stream per path, each with two buffers of
    /// `buf_bytes_per_stream` bytes.
    pub fn new(paths: &[PathBuf], buf_bytes_per_stream: usize) -> Result<Self> {
        let items_per_buf = items_per_buffer(buf_bytes_per_stream, T::BYTES, 2);
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let mut file =
                File::open(path).with_context(|| format!("Could not open {}", path.display()))?;
            let len = file
                .seek(SeekFrom::End(0))
                .with_context(|| format!("Could not seek in {}", path.display()))?;
            ensure!(
                len % T::BYTES as u64 == 0,
                "{}: length {} is not a multiple of the element width {}",
                path.display(),
                len,
                T::BYTES
            );
            files.push((file, len, path.clone()));
        }

        let (req_tx, req_rx) = unbounded::<(usize, Vec<T>)>();
        let mut resp_tx = Vec::with_capacity(paths.len());
        let mut resp_rx = Vec::with_capacity(paths.len());
        for _ in paths {
            let (tx, rx) = unbounded::<Vec<T>>();
            resp_tx.push(tx);
            resp_rx.push(rx);
        }

        let io_thread = std::thread::spawn(move || {
            let mut scratch = vec![0u8; items_per_buf * T::BYTES];
            for (stream, mut buf) in req_rx {
                let (file, remaining, path) = &mut files[stream];
                let take = (*remaining).min(scratch.len() as u64) as usize;
                file.seek(SeekFrom::Start(*remaining - take as u64))
                    .and_then(|_| file.read_exact(&mut scratch[..take]))
                    .unwrap_or_else(|err| {
                        panic!("I/O error reading {}: {}", path.display(), err)
                    });
                *remaining -= take as u64;
                buf.clear();
                buf.extend(scratch[..take].chunks_exact(T::BYTES).rev().map(T::load_le));
                if resp_tx[stream].send(buf).is_err() {
                    break;
                }
            }
        });

        for stream in 0..paths.len() {
            req_tx
                .send((stream, Vec::with_capacity(items_per_buf)))
                .unwrap();
        }

        Ok(BackwardMultiStreamReader {
            bufs: (0..paths.len()).map(|_| (Vec::new(), 0)).collect(),
            req_tx: Some(req_tx),
            resp_rx,
            io_thread: Some(io_thread),
            bytes_read: 0,
        })
    }

    /// Consumes and returns the next element of the `stream`-th stream,
    /// scanning its file back to front.
    #[inline]
    pub fn read_from(&mut self, stream: usize) -> T {
        let (buf, pos) = &mut self.bufs[stream];
        if *pos == buf.len() {
            let next = self.resp_rx[stream]
                .recv()
                .expect("multi-stream I/O thread terminated");
            let old = std::mem::replace(buf, next);
            *pos = 0;
            assert!(!buf.is_empty(), "read past end of stream {}", stream);
            if let Some(req_tx) = &self.req_tx {
                let _ = req_tx.send((stream, old));
            }
        }
        let value = buf[*pos];
        *pos += 1;
        self.bytes_read += T::BYTES as u64;
        value
    }

    /// Total bytes consumed so far, over all streams.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<T: Serial> Drop for BackwardMultiStreamReader<T> {
    fn drop(&mut self) {
        self.req_tx.take();
        for rx in &self.resp_rx {
            while rx.try_recv().is_ok() {}
        }
        if let Some(handle) = self.io_thread.take() {
            let _ = handle.join();
        }
    }
}

/// The backward counterpart of
/// [`MultiBitStreamReader`](super::MultiBitStreamReader): each logical bit
/// stream is consumed from its last written bit towards the first, using the
/// per-file trailer byte.
pub struct BackwardMultiBitStreamReader {
    inner: BackwardMultiStreamReader<u8>,
    cur: Vec<u8>,
    bits_left: Vec<u8>,
    started: Vec<bool>,
}

impl BackwardMultiBitStreamReader {
    /// Creates one backward logical bit stream per path.
    pub fn new(paths: &[PathBuf], buf_bytes_per_stream: usize) -> Result<Self> {
        Ok(BackwardMultiBitStreamReader {
            inner: BackwardMultiStreamReader::new(paths, buf_bytes_per_stream)?,
            cur: vec![0; paths.len()],
            bits_left: vec![0; paths.len()],
            started: vec![false; paths.len()],
        })
    }

    /// Consumes and returns the next bit of the `stream`-th logical stream in
    /// reverse writing order.
    #[inline]
    pub fn read_from(&mut self, stream: usize) -> bool {
        if !self.started[stream] {
            self.started[stream] = true;
            let trailer = self.inner.read_from(stream);
            debug_assert!(trailer >= 1 && trailer <= 8);
            self.cur[stream] = self.inner.read_from(stream);
            self.bits_left[stream] = trailer;
        }
        if self.bits_left[stream] == 0 {
            self.cur[stream] = self.inner.read_from(stream);
            self.bits_left[stream] = 8;
        }
        self.bits_left[stream] -= 1;
        (self.cur[stream] >> self.bits_left[stream]) & 1 != 0
    }

    /// Total bytes consumed so far, over all streams.
    pub fn bytes_read(&self) -> u64 {
        self.inner.bytes_read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MultiBitStreamWriter, MultiStreamWriter};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_backward_multi_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("s{}", i))).collect();
        let mut writer = MultiStreamWriter::<u64>::new(&paths, 32, 2)?;
        for stream in 0..3usize {
            for i in 0..(64 * (stream as u64 + 1)) {
                writer.write_to(stream, i ^ 0xABCD);
            }
        }
        writer.finish()?;

        let mut reader = BackwardMultiStreamReader::<u64>::new(&paths, 32)?;
        for stream in 0..3usize {
            for i in (0..(64 * (stream as u64 + 1))).rev() {
                assert_eq!(reader.read_from(stream), i ^ 0xABCD);
            }
        }
        Ok(())
    }

    #[test]
    fn test_backward_multi_bits() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("b{}", i))).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let bits: Vec<Vec<bool>> = (0..3)
            .map(|stream| (0..(17 * (stream + 1))).map(|_| rng.random()).collect())
            .collect();

        let mut writer = MultiBitStreamWriter::new(&paths, 4, 2)?;
        for (stream, stream_bits) in bits.iter().enumerate() {
            for &bit in stream_bits {
                writer.write_to(stream, bit);
            }
        }
        writer.finish()?;

        let mut reader = BackwardMultiBitStreamReader::new(&paths, 4)?;
        for (stream, stream_bits) in bits.iter().enumerate() {
            for &bit in stream_bits.iter().rev() {
                assert_eq!(reader.read_from(stream), bit);
            }
        }
        Ok(())
    }
}
