/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::items_per_buffer;
use crate::ints::Serial;
use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::thread::JoinHandle;

/// An asynchronous writer over `k` logical streams sharing one I/O thread
/// and one pool of spare buffers.
///
/// Each [`write_to`](MultiStreamWriter::write_to) behaves as if the stream
/// had its own file; the I/O thread services whichever stream fills a buffer
/// first.
pub struct MultiStreamWriter<T: Serial> {
    bufs: Vec<Vec<T>>,
    items_per_buf: usize,
    full_tx: Option<Sender<(usize, Vec<T>)>>,
    empty_rx: Receiver<Vec<T>>,
    io_thread: Option<JoinHandle<()>>,
    bytes_written: u64,
}

impl<T: Serial> MultiStreamWriter<T> {
    /// Creates one logical stream per path. Every stream holds one buffer of
    /// `buf_bytes_per_stream` bytes; `n_spare_buffers` more circulate through
    /// the I/O thread.
    pub fn new(
        paths: &[PathBuf],
        buf_bytes_per_stream: usize,
        n_spare_buffers: usize,
    ) -> Result<Self> {
        let items_per_buf = items_per_buffer(buf_bytes_per_stream, T::BYTES, 1);
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push((
                File::create(path)
                    .with_context(|| format!("Could not create {}", path.display()))?,
                path.clone(),
            ));
        }

        let (full_tx, full_rx) = unbounded::<(usize, Vec<T>)>();
        let (empty_tx, empty_rx) = unbounded::<Vec<T>>();
        for _ in 0..n_spare_buffers.max(1) {
            empty_tx.send(Vec::with_capacity(items_per_buf)).unwrap();
        }

        let io_thread = std::thread::spawn(move || {
            let mut scratch = vec![0u8; items_per_buf * T::BYTES];
            for (stream, mut buf) in full_rx {
                let (file, path) = &mut files[stream];
                let filled = buf.len() * T::BYTES;
                for (value, chunk) in buf.iter().zip(scratch.chunks_exact_mut(T::BYTES)) {
                    value.store_le(chunk);
                }
                file.write_all(&scratch[..filled])
                    .unwrap_or_else(|err| panic!("I/O error writing {}: {}", path.display(), err));
                buf.clear();
                if empty_tx.send(buf).is_err() {
                    break;
                }
            }
        });

        Ok(MultiStreamWriter {
            bufs: (0..paths.len())
                .map(|_| Vec::with_capacity(items_per_buf))
                .collect(),
            items_per_buf,
            full_tx: Some(full_tx),
            empty_rx,
            io_thread: Some(io_thread),
            bytes_written: 0,
        })
    }

    /// Number of logical streams.
    pub fn n_streams(&self) -> usize {
        self.bufs.len()
    }

    /// Appends an element to the `stream`-th logical stream.
    #[inline]
    pub fn write_to(&mut self, stream: usize, value: T) {
        self.bufs[stream].push(value);
        self.bytes_written += T::BYTES as u64;
        if self.bufs[stream].len() == self.items_per_buf {
            let next = self.empty_rx.recv().expect("multi-stream I/O thread terminated");
            let full = std::mem::replace(&mut self.bufs[stream], next);
            self.full_tx
                .as_ref()
                .unwrap()
                .send((stream, full))
                .expect("multi-stream I/O thread terminated");
        }
    }

    /// Total bytes pushed so far, over all streams.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn shutdown(&mut self) -> std::thread::Result<()> {
        if let Some(full_tx) = self.full_tx.take() {
            for (stream, buf) in self.bufs.iter_mut().enumerate() {
                if !buf.is_empty() {
                    let _ = full_tx.send((stream, std::mem::take(buf)));
                }
            }
            drop(full_tx);
        }
        match self.io_thread.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }

    /// Flushes every stream, waits for the I/O thread, and returns the total
    /// number of bytes written.
    pub fn finish(mut self) -> Result<u64> {
        self.shutdown()
            .map_err(|_| anyhow::anyhow!("multi-stream I/O thread failed"))?;
        Ok(self.bytes_written)
    }
}

impl<T: Serial> Drop for MultiStreamWriter<T> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::read_all;

    #[test]
    fn test_multi_write() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths: Vec<PathBuf> = (0..7).map(|i| dir.path().join(format!("s{}", i))).collect();
        let mut writer = MultiStreamWriter::<u16>::new(&paths, 8, 2)?;
        for round in 0..500u16 {
            for stream in 0..7 {
                writer.write_to(stream, round * 7 + stream as u16);
            }
        }
        writer.finish()?;
        for (stream, path) in paths.iter().enumerate() {
            let values = read_all::<u16>(path)?;
            assert_eq!(values.len(), 500);
            assert!(values
                .iter()
                .enumerate()
                .all(|(round, &v)| v == round as u16 * 7 + stream as u16));
        }
        Ok(())
    }
}
