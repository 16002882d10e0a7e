/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use super::{items_per_buffer, DEFAULT_BUF_BYTES, DEFAULT_N_BUFFERS};
use crate::ints::Serial;
use anyhow::{ensure, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

/// An asynchronous reader of packed `T` elements, back to front: the first
/// [`read`](BackwardStreamReader::read) yields the last element of the file.
pub struct BackwardStreamReader<T: Serial> {
    buf: Vec<T>,
    pos: usize,
    full_rx: Receiver<Vec<T>>,
    empty_tx: Option<Sender<Vec<T>>>,
    io_thread: Option<JoinHandle<()>>,
    bytes_read: u64,
    finished: bool,
    path: PathBuf,
}

impl<T: Serial> BackwardStreamReader<T> {
    /// Creates a backward reader over `path` with the default buffer budget.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_buffers(path, DEFAULT_BUF_BYTES, DEFAULT_N_BUFFERS)
    }

    /// Creates a backward reader over `path` with `total_buf_bytes` of buffer
    /// space split over `n_buffers` buffers.
    pub fn with_buffers(
        path: impl AsRef<Path>,
        total_buf_bytes: usize,
        n_buffers: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let mut file =
            File::open(&path).with_context(|| format!("Could not open {}", path.display()))?;
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
        let items_per_buf = items_per_buffer(total_buf_bytes, T::BYTES, n_buffers);

        let (full_tx, full_rx) = unbounded::<Vec<T>>();
        let (empty_tx, empty_rx) = unbounded::<Vec<T>>();
        for _ in 0..n_buffers.max(2) {
            empty_tx.send(Vec::with_capacity(items_per_buf)).unwrap();
        }

        let thread_path = path.clone();
        let io_thread = std::thread::spawn(move || {
            let mut scratch = vec![0u8; items_per_buf * T::BYTES];
            let mut remaining = len;
            while remaining > 0 {
                let Ok(mut buf) = empty_rx.recv() else { break };
                let take = remaining.min(scratch.len() as u64) as usize;
                file.seek(SeekFrom::Start(remaining - take as u64))
                    .and_then(|_| file.read_exact(&mut scratch[..take]))
                    .unwrap_or_else(|err| {
                        panic!("I/O error reading {}: {}", thread_path.display(), err)
                    });
                buf.clear();
                // Reverse element order so the consumer sees the file from
                // its end towards its beginning.
                buf.extend(scratch[..take].chunks_exact(T::BYTES).rev().map(T::load_le));
                if full_tx.send(buf).is_err() {
                    break;
                }
                remaining -= take as u64;
            }
        });

        Ok(BackwardStreamReader {
            buf: Vec::new(),
            pos: 0,
            full_rx,
            empty_tx: Some(empty_tx),
            io_thread: Some(io_thread),
            bytes_read: 0,
            finished: false,
            path,
        })
    }

    fn refill(&mut self) {
        match self.full_rx.recv() {
            Ok(next) => {
                let old = std::mem::replace(&mut self.buf, next);
                self.pos = 0;
                if let Some(empty_tx) = &self.empty_tx {
                    let _ = empty_tx.send(old);
                }
            }
            Err(_) => self.finished = true,
        }
    }

    /// Consumes and returns the next element (the one closest to the end of
    /// the file among those not yet read).
    #[inline]
    pub fn read(&mut self) -> T {
        if self.pos == self.buf.len() {
            self.refill();
            assert!(!self.finished, "{}: read past end", self.path.display());
        }
        let value = self.buf[self.pos];
        self.pos += 1;
        self.bytes_read += T::BYTES as u64;
        value
    }

    /// Returns true iff the whole file has been consumed.
    pub fn is_empty(&mut self) -> bool {
        if self.pos < self.buf.len() {
            return false;
        }
        if !self.finished {
            self.refill();
        }
        self.finished && self.pos == self.buf.len()
    }

    /// Total bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<T: Serial> Drop for BackwardStreamReader<T> {
    fn drop(&mut self) {
        self.empty_tx.take();
        while self.full_rx.try_recv().is_ok() {}
        if let Some(handle) = self.io_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::StreamWriter;

    #[test]
    fn test_backward_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stream");
        let mut writer = StreamWriter::<u32>::with_buffers(&path, 48, 2)?;
        for i in 0..3000u32 {
            writer.push(i);
        }
        writer.finish()?;

        let mut reader = BackwardStreamReader::<u32>::with_buffers(&path, 48, 2)?;
        for i in (0..3000u32).rev() {
            assert!(!reader.is_empty());
            assert_eq!(reader.read(), i);
        }
        assert!(reader.is_empty());
        Ok(())
    }

    #[test]
    fn test_backward_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty");
        StreamWriter::<u32>::new(&path)?.finish()?;
        let mut reader = BackwardStreamReader::<u32>::new(&path)?;
        assert!(reader.is_empty());
        Ok(())
    }
}
