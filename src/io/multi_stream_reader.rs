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
use std::io::Read;
use std::path::PathBuf;
use std::thread::JoinHandle;

/// An asynchronous reader over `k` logical streams sharing one I/O thread.
///
/// Each stream owns two buffers: one being consumed and one being prefetched
/// by the I/O thread, so [`read_from`](MultiStreamReader::read_from) blocks
/// only when the prefetch has not completed yet.
pub struct MultiStreamReader<T: Serial> {
    bufs: Vec<(Vec<T>, usize)>,
    req_tx: Option<Sender<(usize, Vec<T>)>>,
    resp_rx: Vec<Receiver<Vec<T>>>,
    io_thread: Option<JoinHandle<()>>,
    bytes_read: u64,
}

impl<T: Serial> MultiStreamReader<T> {
    /// Creates one logical stream per path, each with two buffers of
    /// `buf_bytes_per_stream` bytes.
    pub fn new(paths: &[PathBuf], buf_bytes_per_stream: usize) -> Result<Self> {
        let items_per_buf = items_per_buffer(buf_bytes_per_stream, T::BYTES, 2);
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push((
                File::open(path).with_context(|| format!("Could not open {}", path.display()))?,
                path.clone(),
            ));
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
                let (file, path) = &mut files[stream];
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
                // An empty buffer marks end of file for that stream.
                if resp_tx[stream].send(buf).is_err() {
                    break;
                }
            }
        });

        // Prefetch the first buffer of every stream.
        for stream in 0..paths.len() {
            req_tx
                .send((stream, Vec::with_capacity(items_per_buf)))
                .unwrap();
        }

        Ok(MultiStreamReader {
            bufs: (0..paths.len()).map(|_| (Vec::new(), 0)).collect(),
            req_tx: Some(req_tx),
            resp_rx,
            io_thread: Some(io_thread),
            bytes_read: 0,
        })
    }

    /// Number of logical streams.
    pub fn n_streams(&self) -> usize {
        self.bufs.len()
    }

    /// Consumes and returns the next element of the `stream`-th stream.
    /// Reading past the end of a stream panics.
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
            // Recycle the drained buffer as the next prefetch request.
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

impl<T: Serial> Drop for MultiStreamReader<T> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MultiStreamWriter;

    #[test]
    fn test_multi_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths: Vec<PathBuf> = (0..5).map(|i| dir.path().join(format!("s{}", i))).collect();
        let mut writer = MultiStreamWriter::<u32>::new(&paths, 16, 2)?;
        for stream in 0..5usize {
            for i in 0..(100 * (stream as u32 + 1)) {
                writer.write_to(stream, i * 5 + stream as u32);
            }
        }
        writer.finish()?;

        let mut reader = MultiStreamReader::<u32>::new(&paths, 16)?;
        // Interleave reads across streams.
        for i in 0..100u32 {
            for stream in 0..5usize {
                assert_eq!(reader.read_from(stream), i * 5 + stream as u32);
            }
        }
        for stream in 1..5usize {
            for i in 100..(100 * (stream as u32 + 1)) {
                assert_eq!(reader.read_from(stream), i * 5 + stream as u32);
            }
        }
        Ok(())
    }
}
