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
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

/// An asynchronous reader of packed `T` elements, front to back.
///
/// [`read`](StreamReader::read) blocks only while the I/O thread has not yet
/// refilled any buffer; reading past the end of the file is a logic error and
/// panics.
pub struct StreamReader<T: Serial> {
    buf: Vec<T>,
    pos: usize,
    full_rx: Receiver<Vec<T>>,
    empty_tx: Option<Sender<Vec<T>>>,
    io_thread: Option<JoinHandle<()>>,
    bytes_read: u64,
    finished: bool,
    path: PathBuf,
}

/// Reads whole elements from `file` into `buf` through `scratch`, stopping at
/// the buffer capacity or end of file. Panics on I/O errors or on a trailing
/// fragment of an element.
fn fill_buffer<T: Serial>(file: &mut File, scratch: &mut [u8], buf: &mut Vec<T>, path: &Path) {
    let mut filled = 0;
    while filled < scratch.len() {
        match file.read(&mut scratch[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) => panic!("I/O error reading {}: {}", path.display(), err),
        }
    }
    assert!(
        filled % T::BYTES == 0,
        "{}: trailing fragment of {} bytes",
        path.display(),
        filled % T::BYTES
    );
    buf.clear();
    buf.extend(scratch[..filled].chunks_exact(T::BYTES).map(T::load_le));
}

impl<T: Serial> StreamReader<T> {
    /// Creates a reader over `path` with the default buffer budget.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_buffers(path, DEFAULT_BUF_BYTES, DEFAULT_N_BUFFERS)
    }

    /// Creates a reader over `path` with `total_buf_bytes` of buffer space
    /// split over `n_buffers` buffers.
    pub fn with_buffers(
        path: impl AsRef<Path>,
        total_buf_bytes: usize,
        n_buffers: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let mut file =
            File::open(&path).with_context(|| format!("Could not open {}", path.display()))?;
        let items_per_buf = items_per_buffer(total_buf_bytes, T::BYTES, n_buffers);

        let (full_tx, full_rx) = unbounded::<Vec<T>>();
        let (empty_tx, empty_rx) = unbounded::<Vec<T>>();
        for _ in 0..n_buffers.max(2) {
            empty_tx.send(Vec::with_capacity(items_per_buf)).unwrap();
        }

        let thread_path = path.clone();
        let io_thread = std::thread::spawn(move || {
            let mut scratch = vec![0u8; items_per_buf * T::BYTES];
            for mut buf in empty_rx {
                fill_buffer(&mut file, &mut scratch, &mut buf, &thread_path);
                if buf.is_empty() || full_tx.send(buf).is_err() {
                    break;
                }
            }
        });

        Ok(StreamReader {
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

    /// Returns the next element without consuming it.
    pub fn peek(&mut self) -> T {
        if self.pos == self.buf.len() {
            self.refill();
            assert!(!self.finished, "{}: peek past end", self.path.display());
        }
        self.buf[self.pos]
    }

    /// Consumes and returns the next element.
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

    /// Returns true iff the whole file has been consumed. May block until the
    /// I/O thread has made progress.
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

impl<T: Serial> Drop for StreamReader<T> {
    fn drop(&mut self) {
        self.empty_tx.take();
        // Unblock the I/O thread if it is waiting to hand over a buffer.
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
    use crate::ints::U40;

    #[test]
    fn test_read_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stream");
        let mut writer = StreamWriter::<U40>::with_buffers(&path, 64, 2)?;
        for i in 0..5000u64 {
            writer.push(U40::from(i * 3));
        }
        writer.finish()?;

        let mut reader = StreamReader::<U40>::with_buffers(&path, 64, 2)?;
        for i in 0..5000u64 {
            assert!(!reader.is_empty());
            assert_eq!(reader.peek().to_u64(), i * 3);
            assert_eq!(reader.read().to_u64(), i * 3);
        }
        assert!(reader.is_empty());
        assert_eq!(reader.bytes_read(), 25_000);
        Ok(())
    }

    #[test]
    fn test_empty_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty");
        StreamWriter::<u16>::new(&path)?.finish()?;
        let mut reader = StreamReader::<u16>::new(&path)?;
        assert!(reader.is_empty());
        Ok(())
    }
}
