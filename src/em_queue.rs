/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! A FIFO queue that is unbounded on disk and bounded in RAM.
//!
//! [`EmQueue`] is the storage of the external-memory radix heap: each bucket
//! of the heap is one queue, and all queues of a heap draw their fixed-size
//! RAM pages from one shared [`RamQueuePool`], which bounds the total RAM no
//! matter how skewed the bucket sizes are. A queue spills full pages to its
//! own file only when the pool runs dry, and bypasses the disk entirely when
//! the consumer keeps up with the producer.

use crate::ints::Serial;
use anyhow::Result;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A fixed-capacity circular buffer of `T`.
pub struct RamQueue<T: Serial> {
    data: Vec<T>,
    beg: usize,
    end: usize,
    len: usize,
}

impl<T: Serial> RamQueue<T> {
    pub fn new(capacity: usize) -> Self {
        RamQueue {
            data: vec![T::default(); capacity.max(1)],
            beg: 0,
            end: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    pub fn clear(&mut self) {
        self.beg = 0;
        self.end = 0;
        self.len = 0;
    }

    #[inline]
    pub fn push(&mut self, value: T) {
        self.data[self.end] = value;
        self.end += 1;
        if self.end == self.data.len() {
            self.end = 0;
        }
        self.len += 1;
    }

    #[inline]
    pub fn front(&self) -> T {
        self.data[self.beg]
    }

    #[inline]
    pub fn pop(&mut self) -> T {
        let value = self.data[self.beg];
        self.beg += 1;
        if self.beg == self.data.len() {
            self.beg = 0;
        }
        self.len -= 1;
        value
    }

    /// Appends the queue content to `file` through `scratch`.
    fn write_to_file(&self, file: &mut File, scratch: &mut [u8]) -> std::io::Result<()> {
        let capacity = self.data.len();
        let mut beg = self.beg;
        let mut left = self.len;
        while left > 0 {
            let run = left.min(capacity - beg);
            for (value, chunk) in self.data[beg..beg + run]
                .iter()
                .zip(scratch.chunks_exact_mut(T::BYTES))
            {
                value.store_le(chunk);
            }
            file.write_all(&scratch[..run * T::BYTES])?;
            left -= run;
            beg += run;
            if beg == capacity {
                beg = 0;
            }
        }
        Ok(())
    }

    /// Refills the queue to capacity from `file`.
    fn read_from_file(&mut self, file: &mut File, scratch: &mut [u8]) -> std::io::Result<()> {
        self.clear();
        let capacity = self.data.len();
        file.read_exact(&mut scratch[..capacity * T::BYTES])?;
        for (value, chunk) in self
            .data
            .iter_mut()
            .zip(scratch.chunks_exact(T::BYTES))
        {
            *value = T::load_le(chunk);
        }
        self.len = capacity;
        Ok(())
    }

    /// Moves items from the front of `other` into the free space of `self`.
    fn refill(&mut self, other: &mut RamQueue<T>) {
        let capacity = self.data.len();
        while self.len < capacity && other.len > 0 {
            let can_take = capacity - self.len.max(self.end);
            let other_run = (other.data.len() - other.beg).min(other.len);
            let to_move = can_take.min(other_run);
            let (dst, src) = (self.end, other.beg);
            self.data[dst..dst + to_move].copy_from_slice(&other.data[src..src + to_move]);
            self.len += to_move;
            self.end += to_move;
            if self.end == capacity {
                self.end = 0;
            }
            other.len -= to_move;
            other.beg += to_move;
            if other.beg == other.data.len() {
                other.beg = 0;
            }
        }
    }

    /// Swaps the items of `self` with the trailing items of `other`, leaving
    /// `other` as the concatenation of `self`'s items and its own leading
    /// items. Requires `other` to have at least `self.len()` items.
    fn swap_refill(&mut self, other: &mut RamQueue<T>) {
        let mut end = self.end;
        for _ in 0..self.len {
            end = if end > 0 { end - 1 } else { self.data.len() - 1 };
            other.end = if other.end > 0 {
                other.end - 1
            } else {
                other.data.len() - 1
            };
            std::mem::swap(&mut self.data[end], &mut other.data[other.end]);
        }
        other.beg = other.end;
    }
}

/// The pool of free RAM pages shared by all queues of one radix heap, plus
/// the staging buffer used to serialize pages for spill I/O.
pub struct RamQueuePool<T: Serial> {
    free: Vec<RamQueue<T>>,
    items_per_queue: usize,
    scratch: Vec<u8>,
}

impl<T: Serial> RamQueuePool<T> {
    /// Creates a pool of `n_queues` free pages of `items_per_queue` slots.
    pub fn new(items_per_queue: usize, n_queues: usize) -> Self {
        let items_per_queue = items_per_queue.max(1);
        RamQueuePool {
            free: (0..n_queues)
                .map(|_| RamQueue::new(items_per_queue))
                .collect(),
            items_per_queue,
            scratch: vec![0u8; items_per_queue * T::BYTES],
        }
    }

    pub fn items_per_queue(&self) -> usize {
        self.items_per_queue
    }
}

/// A FIFO of `T` spilling to one file. Pop order is: head page, then spilled
/// pages in file order, then pending full pages, then the tail page.
///
/// The spill file is opened lazily: a radix heap holds one queue per bucket
/// and most buckets never spill, so eager opens would pin thousands of file
/// descriptors for nothing.
pub struct EmQueue<T: Serial> {
    path: PathBuf,
    file: Option<File>,
    /// Items written to the file since the last reset.
    file_size: u64,
    /// Items already read back from the file.
    file_head: u64,
    head: Option<RamQueue<T>>,
    tail: Option<RamQueue<T>>,
    full: VecDeque<RamQueue<T>>,
    len: u64,
    io_volume: u64,
}

impl<T: Serial> EmQueue<T> {
    /// Creates an empty queue spilling to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        EmQueue {
            path: path.as_ref().to_owned(),
            file: None,
            file_size: 0,
            file_head: 0,
            head: None,
            tail: None,
            full: VecDeque::new(),
            len: 0,
            io_volume: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Spill traffic in bytes, reads and writes summed.
    pub fn io_volume(&self) -> u64 {
        self.io_volume
    }

    fn file(&mut self) -> &mut File {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)
                .unwrap_or_else(|err| {
                    panic!("Could not create {}: {}", self.path.display(), err)
                });
            self.file = Some(file);
        }
        self.file.as_mut().unwrap()
    }

    /// Appends the oldest pending full page to the spill file and returns it,
    /// emptied, for reuse.
    fn flush_front_full(&mut self, pool: &mut RamQueuePool<T>) -> RamQueue<T> {
        let mut queue = self.full.pop_front().expect("no full page to flush");
        let offset = self.file_size * T::BYTES as u64;
        let path = self.path.clone();
        let file = self.file();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| queue.write_to_file(file, &mut pool.scratch))
            .unwrap_or_else(|err| panic!("I/O error writing {}: {}", path.display(), err));
        self.io_volume += (queue.len() * T::BYTES) as u64;
        self.file_size += queue.len() as u64;
        queue.clear();
        queue
    }

    fn get_free_ram_queue(&mut self, pool: &mut RamQueuePool<T>) -> RamQueue<T> {
        if let Some(queue) = pool.free.pop() {
            queue
        } else if !self.full.is_empty() {
            self.flush_front_full(pool)
        } else {
            RamQueue::new(pool.items_per_queue)
        }
    }

    /// Appends a value.
    ///
    /// The tail page is never left full: a filled tail either moves its
    /// content into the head page (bypassing the disk when the file is
    /// drained and nothing else is pending) or joins the full-page queue.
    pub fn push(&mut self, pool: &mut RamQueuePool<T>, value: T) {
        if self.tail.is_none() {
            self.tail = Some(self.get_free_ram_queue(pool));
        }
        let tail = self.tail.as_mut().unwrap();
        tail.push(value);
        if tail.is_full() {
            let head_can_take = self
                .head
                .as_ref()
                .map(|head| !head.is_full())
                .unwrap_or(false);
            if self.file_head == self.file_size && self.full.is_empty() && head_can_take {
                let mut tail = self.tail.take().unwrap();
                let head = self.head.as_mut().unwrap();
                if 2 * head.len() <= pool.items_per_queue {
                    head.swap_refill(&mut tail);
                    std::mem::swap(head, &mut tail);
                    if tail.is_empty() {
                        pool.free.push(tail);
                    } else {
                        self.tail = Some(tail);
                    }
                } else {
                    head.refill(&mut tail);
                    if tail.is_empty() {
                        pool.free.push(tail);
                    } else {
                        self.tail = Some(tail);
                    }
                }
            } else {
                self.full.push_back(self.tail.take().unwrap());
            }
        }
        self.len += 1;
    }

    /// Makes sure the head page holds the next value to pop.
    fn load_head(&mut self, pool: &mut RamQueuePool<T>) {
        if self.head.as_ref().map(|h| h.is_empty()).unwrap_or(true) {
            if let Some(head) = self.head.take() {
                if self.file_head == self.file_size {
                    pool.free.push(head);
                } else {
                    self.head = Some(head);
                }
            }
            if self.file_head == self.file_size {
                // The next item is in RAM.
                self.head = Some(match self.full.pop_front() {
                    Some(queue) => queue,
                    None => self.tail.take().expect("pop from an empty queue"),
                });
            } else {
                // The next item is on disk.
                let mut head = match self.head.take() {
                    Some(head) => head,
                    None => self.get_free_ram_queue(pool),
                };
                let offset = self.file_head * T::BYTES as u64;
                let path = self.path.clone();
                let file = self.file();
                file.seek(SeekFrom::Start(offset))
                    .and_then(|_| head.read_from_file(file, &mut pool.scratch))
                    .unwrap_or_else(|err| {
                        panic!("I/O error reading {}: {}", path.display(), err)
                    });
                self.io_volume += (head.len() * T::BYTES) as u64;
                self.file_head += head.len() as u64;
                self.head = Some(head);
            }
        }
    }

    /// Returns the oldest value without removing it.
    pub fn front(&mut self, pool: &mut RamQueuePool<T>) -> T {
        self.load_head(pool);
        self.head.as_ref().unwrap().front()
    }

    /// Removes and returns the oldest value.
    pub fn pop(&mut self, pool: &mut RamQueuePool<T>) -> T {
        self.load_head(pool);
        self.len -= 1;
        self.head.as_mut().unwrap().pop()
    }

    /// Truncates the spill file of a drained queue, reclaiming disk space.
    pub fn reset_file(&mut self) {
        if self.file_size > 0 {
            if let Some(file) = &self.file {
                file.set_len(0).unwrap_or_else(|err| {
                    panic!("I/O error truncating {}: {}", self.path.display(), err)
                });
            }
            self.file_size = 0;
            self.file_head = 0;
        }
    }

    /// Returns the queue's RAM pages to the pool; the queue must be empty.
    pub fn release_pages(&mut self, pool: &mut RamQueuePool<T>) {
        debug_assert!(self.is_empty());
        for mut queue in self
            .head
            .take()
            .into_iter()
            .chain(self.tail.take())
            .chain(std::mem::take(&mut self.full))
        {
            queue.clear();
            pool.free.push(queue);
        }
    }
}

impl<T: Serial> Drop for EmQueue<T> {
    fn drop(&mut self) {
        crate::utils::file_delete_if_exists(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::VecDeque;

    #[test]
    fn test_randomized_trace_against_vecdeque() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut rng = StdRng::seed_from_u64(0xF1F0);
        for (items_per_queue, pool_queues) in [(1, 0), (1, 2), (3, 1), (8, 4), (64, 2)] {
            let mut pool = RamQueuePool::<u64>::new(items_per_queue, pool_queues);
            let mut queue = EmQueue::<u64>::new(dir.path().join(format!(
                "queue.{}.{}",
                items_per_queue, pool_queues
            )));
            let mut oracle = VecDeque::new();
            for step in 0..20_000u64 {
                match rng.random_range(0..3) {
                    0 | 1 => {
                        queue.push(&mut pool, step);
                        oracle.push_back(step);
                    }
                    _ => {
                        if let Some(expected) = oracle.pop_front() {
                            assert_eq!(queue.front(&mut pool), expected);
                            assert_eq!(queue.pop(&mut pool), expected);
                        } else {
                            assert!(queue.is_empty());
                        }
                    }
                }
                assert_eq!(queue.len(), oracle.len() as u64);
                if queue.is_empty() && rng.random_bool(0.1) {
                    queue.reset_file();
                }
            }
            while let Some(expected) = oracle.pop_front() {
                assert_eq!(queue.pop(&mut pool), expected);
            }
            assert!(queue.is_empty());
        }
        Ok(())
    }

    #[test]
    fn test_spill_and_drain() -> Result<()> {
        let dir = tempfile::tempdir()?;
        // A single tiny page and an empty pool force constant spills.
        let mut pool = RamQueuePool::<u16>::new(2, 0);
        let mut queue = EmQueue::<u16>::new(dir.path().join("spill"));
        for i in 0..10_000u16 {
            queue.push(&mut pool, i);
        }
        assert!(queue.io_volume() > 0);
        for i in 0..10_000u16 {
            assert_eq!(queue.pop(&mut pool), i);
        }
        assert!(queue.is_empty());
        Ok(())
    }
}
