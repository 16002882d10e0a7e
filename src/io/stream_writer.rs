/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::{items_per_buffer, DEFAULT_BUF_BYTES, DEFAULT_N_BUFFERS};
use crate::ints::Serial;
use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

/// An asynchronous writer of packed `T` elements.
///
/// [`push`](StreamWriter::push) appends to the current buffer and blocks only
/// when every buffer of the pool is waiting to be written. Dropping the
/// writer flushes the tail buffer; prefer [`finish`](StreamWriter::finish),
/// which also surfaces I/O-thread failures and returns the byte count.
pub struct StreamWriter<T: Serial> {
    buf: Vec<T>,
    items_per_buf: usize,
    full_tx: Option<Sender<Vec<T>>>,
    empty_rx: Receiver<Vec<T>>,
    io_thread: Option<JoinHandle<()>>,
    bytes_written: u64,
    path: PathBuf,
}

impl<T: Serial> StreamWriter<T> {
    /// Creates a writer over `path` with the default buffer budget.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_buffers(path, DEFAULT_BUF_BYTES, DEFAULT_N_BUFFERS)
    }

    /// Creates a writer over `path` with `total_buf_bytes` of buffer space
    /// split over `n_buffers` buffers.
    pub fn with_buffers(
        path: impl AsRef<Path>,
        total_buf_bytes: usize,
        n_buffers: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let mut file =
            File::create(&path).with_context(|| format!("Could not create {}", path.display()))?;
        let items_per_buf = items_per_buffer(total_buf_bytes, T::BYTES, n_buffers);

        let (full_tx, full_rx) = unbounded::<Vec<T>>();
        let (empty_tx, empty_rx) = unbounded::<Vec<T>>();
        // The writer itself holds one buffer of the pool.
        for _ in 1..n_buffers.max(2) {
            empty_tx.send(Vec::with_capacity(items_per_buf)).unwrap();
        }

        let thread_path = path.clone();
        let io_thread = std::thread::spawn(move || {
            let mut scratch = vec![0u8; items_per_buf * T::BYTES];
            for mut buf in full_rx {
                let filled = buf.len() * T::BYTES;
                for (value, chunk) in buf.iter().zip(scratch.chunks_exact_mut(T::BYTES)) {
                    value.store_le(chunk);
                }
                file.write_all(&scratch[..filled]).unwrap_or_else(|err| {
                    panic!("I/O error writing {}: {}", thread_path.display(), err)
                });
                buf.clear();
                if empty_tx.send(buf).is_err() {
                    break;
                }
            }
        });

        Ok(StreamWriter {
            buf: Vec::with_capacity(items_per_buf),
            items_per_buf,
            full_tx: Some(full_tx),
            empty_rx,
            io_thread: Some(io_thread),
            bytes_written: 0,
            path,
        })
    }

    /// Appends a single element.
    #[inline]
    pub fn push(&mut self, value: T) {
        self.buf.push(value);
        self.bytes_written += T::BYTES as u64;
        if self.buf.len() == self.items_per_buf {
            self.swap_buffers();
        }
    }

    /// Appends a slice of elements.
    pub fn push_all(&mut self, values: &[T]) {
        for &value in values {
            self.push(value);
        }
    }

    /// Total bytes pushed so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn swap_buffers(&mut self) {
        let next = self
            .empty_rx
            .recv()
            .unwrap_or_else(|_| panic!("I/O thread for {} terminated", self.path.display()));
        let full = std::mem::replace(&mut self.buf, next);
        self.full_tx
            .as_ref()
            .unwrap()
            .send(full)
            .unwrap_or_else(|_| panic!("I/O thread for {} terminated", self.path.display()));
    }

    fn shutdown(&mut self) -> std::thread::Result<()> {
        if let Some(full_tx) = self.full_tx.take() {
            if !self.buf.is_empty() {
                let tail = std::mem::take(&mut self.buf);
                // Channel disconnection can only mean the I/O thread died;
                // the join below reports it.
                let _ = full_tx.send(tail);
            }
            drop(full_tx);
        }
        match self.io_thread.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }

    /// Flushes the tail buffer, waits for the I/O thread, and returns the
    /// number of bytes written.
    pub fn finish(mut self) -> Result<u64> {
        self.shutdown()
            .map_err(|_| anyhow::anyhow!("I/O thread for {} failed", self.path.display()))?;
        Ok(self.bytes_written)
    }
}

impl<T: Serial> Drop for StreamWriter<T> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::read_all;

    #[test]
    fn test_write_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stream");
        // A buffer of a single item forces constant buffer traffic.
        let mut writer = StreamWriter::<u32>::with_buffers(&path, 4, 2)?;
        for i in 0..10_000u32 {
            writer.push(i.wrapping_mul(2654435761));
        }
        assert_eq!(writer.finish()?, 40_000);
        let values = read_all::<u32>(&path)?;
        assert_eq!(values.len(), 10_000);
        assert!(values
            .iter()
            .enumerate()
            .all(|(i, &v)| v == (i as u32).wrapping_mul(2654435761)));
        Ok(())
    }

    #[test]
    fn test_empty_stream() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty");
        let writer = StreamWriter::<u8>::new(&path)?;
        assert_eq!(writer.finish()?, 0);
        assert_eq!(crate::utils::file_size(&path)?, 0);
        Ok(())
    }
}
