/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The external-memory monotone priority queue coordinating every induction
//! pass.
//!
//! Level structure and operations are those of
//! [`RadixHeap`](crate::radix_heap::RadixHeap), but each bucket is an
//! [`EmQueue`] whose pages spill to a temp file, and all buckets share one
//! [`RamQueuePool`]: the heap holds any number of items while using a fixed
//! amount of RAM. Spill traffic is accounted and reported through
//! [`io_volume`](EmRadixHeap::io_volume).

use crate::em_queue::{EmQueue, RamQueuePool};
use crate::ints::{Serial, UInt};
use anyhow::Result;
use std::path::Path;

const NIL: u64 = u64::MAX;

/// An external-memory monotone priority queue over `(key, value)` pairs.
pub struct EmRadixHeap<K: UInt, V: Serial> {
    len: u64,
    key_lower_bound: u64,
    bottom_level_queue_ptr: u64,
    min_compare_ptr: u64,
    bottom_level_radix: u64,

    queue_min: Vec<u64>,
    bin_len_to_level: Vec<u64>,
    level_mask: Vec<u64>,
    sum_of_radix_logs: Vec<u64>,
    sum_of_radixes: Vec<u64>,
    level_ptr: Vec<u64>,

    queues: Vec<EmQueue<(K, V)>>,
    pool: RamQueuePool<(K, V)>,
}

impl<K: UInt, V: Serial> EmRadixHeap<K, V> {
    /// Creates a heap with the given digit schedule (most-significant digit
    /// first), spilling to temp files derived from `base`, with a RAM budget
    /// of roughly `ram_bytes` for its page pool.
    pub fn new(radix_logs: &[u64], base: impl AsRef<Path>, ram_bytes: u64) -> Result<Self> {
        let radix_logs_sum: u64 = radix_logs.iter().sum();
        assert!(radix_logs_sum > 0, "empty radix log schedule");
        assert!(radix_logs_sum <= 64);
        let n_levels = radix_logs.len();

        let mut level_mask = vec![0u64; n_levels];
        for (i, mask) in level_mask.iter_mut().enumerate() {
            *mask = (1u64 << radix_logs[n_levels - 1 - i]) - 1;
        }

        let mut bin_len_to_level = vec![0u64; radix_logs_sum as usize + 1];
        let mut ptr = 0;
        for (level, &log) in radix_logs.iter().rev().enumerate() {
            for _ in 0..log {
                ptr += 1;
                bin_len_to_level[ptr] = level as u64;
            }
        }

        let mut sum_of_radix_logs = vec![0u64; n_levels];
        let mut sum = 0;
        for (i, slot) in sum_of_radix_logs.iter_mut().enumerate() {
            *slot = sum;
            sum += radix_logs[n_levels - 1 - i];
        }

        let mut sum_of_radixes = vec![0u64; n_levels + 1];
        let mut level_ptr = vec![0u64; n_levels];
        let mut radixes = 0;
        for i in 0..n_levels {
            sum_of_radixes[i] = radixes - i as u64;
            level_ptr[i] = sum_of_radixes[i] + 1;
            radixes += 1u64 << radix_logs[n_levels - 1 - i];
        }
        sum_of_radixes[n_levels] = radixes - n_levels as u64;

        let queue_count = radixes - (n_levels as u64 - 1);
        let pair_bytes = <(K, V)>::BYTES as u64;
        let items_per_ram_queue =
            (ram_bytes / (3 * queue_count * pair_bytes)).clamp(4, 1 << 20) as usize;

        let mut queues = Vec::with_capacity(queue_count as usize);
        for _ in 0..queue_count {
            queues.push(EmQueue::new(crate::utils::temp_file_name(base.as_ref())));
        }

        Ok(EmRadixHeap {
            len: 0,
            key_lower_bound: 0,
            bottom_level_queue_ptr: 0,
            min_compare_ptr: 0,
            bottom_level_radix: 1u64 << radix_logs[n_levels - 1],
            queue_min: vec![NIL; queue_count as usize],
            bin_len_to_level,
            level_mask,
            sum_of_radix_logs,
            sum_of_radixes,
            level_ptr,
            queues,
            pool: RamQueuePool::new(items_per_ram_queue, 2 * queue_count as usize),
        })
    }

    #[inline]
    fn queue_id(&self, key: u64) -> u64 {
        if key == self.key_lower_bound {
            return key & (self.bottom_level_radix - 1);
        }
        let level =
            self.bin_len_to_level[64 - (key ^ self.key_lower_bound).leading_zeros() as usize];
        let bucket = (key >> self.sum_of_radix_logs[level as usize]) & self.level_mask[level as usize];
        self.sum_of_radixes[level as usize] + bucket
    }

    /// Inserts `(key, value)`. The key must not be below the current lower
    /// bound.
    pub fn push(&mut self, key: K, value: V) {
        let key_u64 = key.to_u64();
        assert!(
            key_u64 >= self.key_lower_bound,
            "em radix heap: key {} below the lower bound {}",
            key_u64,
            self.key_lower_bound
        );
        self.len += 1;
        let queue = self.queue_id(key_u64);
        self.queues[queue as usize].push(&mut self.pool, (key, value));
        self.queue_min[queue as usize] = self.queue_min[queue as usize].min(key_u64);
        self.min_compare_ptr = self.min_compare_ptr.min(queue);
    }

    /// Returns true iff a minimum exists and it is at most `key`.
    pub fn min_compare(&mut self, key: K) -> bool {
        if self.is_empty() {
            return false;
        }
        let key_u64 = key.to_u64();
        if !self.queues[self.min_compare_ptr as usize].is_empty() {
            return self.queue_min[self.min_compare_ptr as usize] <= key_u64;
        }
        let queue = self.queue_id(key_u64);
        while self.min_compare_ptr != queue
            && self.queues[self.min_compare_ptr as usize].is_empty()
        {
            self.min_compare_ptr += 1;
        }
        !self.queues[self.min_compare_ptr as usize].is_empty()
            && self.queue_min[self.min_compare_ptr as usize] <= key_u64
    }

    /// Removes and returns the pair with the smallest key; extracted keys
    /// are non-decreasing over the heap's lifetime.
    pub fn extract_min(&mut self) -> (K, V) {
        assert!(!self.is_empty(), "extract_min on an empty em radix heap");
        if self.queues[self.bottom_level_queue_ptr as usize].is_empty() {
            self.redistribute();
        }
        let queue = self.bottom_level_queue_ptr as usize;
        let item = self.queues[queue].pop(&mut self.pool);
        if self.queues[queue].is_empty() {
            self.queues[queue].reset_file();
        }
        self.len -= 1;
        item
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Spill traffic in bytes, over all bucket queues.
    pub fn io_volume(&self) -> u64 {
        self.queues.iter().map(EmQueue::io_volume).sum()
    }

    fn redistribute(&mut self) {
        while self.bottom_level_queue_ptr < self.bottom_level_radix
            && self.queues[self.bottom_level_queue_ptr as usize].is_empty()
        {
            self.queue_min[self.bottom_level_queue_ptr as usize] = NIL;
            self.bottom_level_queue_ptr += 1;
        }

        if self.bottom_level_queue_ptr < self.bottom_level_radix {
            self.key_lower_bound = self.queue_min[self.bottom_level_queue_ptr as usize];
        } else {
            let mut level = 1usize;
            loop {
                assert!(level < self.level_ptr.len(), "non-empty heap with all queues empty");
                while self.level_ptr[level] < self.sum_of_radixes[level + 1] + 1
                    && self.queues[self.level_ptr[level] as usize].is_empty()
                {
                    self.level_ptr[level] += 1;
                }
                if self.level_ptr[level] == self.sum_of_radixes[level + 1] + 1 {
                    self.level_ptr[level] = self.sum_of_radixes[level] + 1;
                    level += 1;
                } else {
                    break;
                }
            }

            let queue = self.level_ptr[level];
            self.key_lower_bound = self.queue_min[queue as usize];

            // Every element lands in a strictly lower queue because its high
            // digits now match the lower bound.
            while !self.queues[queue as usize].is_empty() {
                let item = self.queues[queue as usize].pop(&mut self.pool);
                let new_queue = self.queue_id(item.0.to_u64());
                debug_assert!(new_queue < queue);
                self.queues[new_queue as usize].push(&mut self.pool, item);
                self.queue_min[new_queue as usize] =
                    self.queue_min[new_queue as usize].min(item.0.to_u64());
            }
            self.queues[queue as usize].reset_file();
            self.queues[queue as usize].release_pages(&mut self.pool);
            self.bottom_level_queue_ptr = self.queue_id(self.key_lower_bound);
            self.queue_min[queue as usize] = NIL;
        }
        self.min_compare_ptr = self.bottom_level_queue_ptr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radix_heap::radix_logs_for_bits;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_monotone_extractions_with_spill() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut rng = StdRng::seed_from_u64(0xCAFE);
        // A 1-byte RAM budget clamps the pool to its minimum page size and
        // forces heavy spilling.
        for ram in [1u64, 1 << 10, 1 << 20] {
            let mut heap =
                EmRadixHeap::<u16, u64>::new(&radix_logs_for_bits(16, 10), dir.path().join("h"), ram)?;
            let mut last_key = 0u64;
            let mut pending = 5000u64;
            let mut n_extracted = 0u64;
            while n_extracted < 5000 {
                if pending > 0 && (heap.is_empty() || rng.random_bool(0.7)) {
                    let key = rng.random_range(last_key..=u16::MAX as u64);
                    heap.push(key as u16, rng.random());
                    pending -= 1;
                } else {
                    assert!(heap.min_compare(u16::MAX));
                    let (key, _) = heap.extract_min();
                    assert!((key as u64) >= last_key);
                    last_key = key as u64;
                    n_extracted += 1;
                }
            }
            assert!(heap.is_empty());
        }
        Ok(())
    }

    #[test]
    fn test_sorted_drain() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut rng = StdRng::seed_from_u64(3);
        let mut heap =
            EmRadixHeap::<u8, u32>::new(&radix_logs_for_bits(8, 3), dir.path().join("h"), 1)?;
        let mut keys: Vec<u8> = (0..3000).map(|_| rng.random()).collect();
        for (i, &key) in keys.iter().enumerate() {
            heap.push(key, i as u32);
        }
        assert!(heap.io_volume() > 0);
        keys.sort_unstable();
        for &expected in &keys {
            assert_eq!(heap.extract_min().0, expected);
        }
        assert!(heap.is_empty());
        Ok(())
    }
}
