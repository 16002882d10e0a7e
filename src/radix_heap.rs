/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The in-RAM monotone priority queue used by the block preprocessors.
//!
//! A radix heap is a bucket queue whose bucket index depends on the highest
//! bit in which a key differs from the current lower bound. The digit
//! schedule `radix_logs` (most-significant digit first) splits the key bits
//! into levels; each level holds one FIFO bucket per digit value, and all
//! buckets share a single slab of fixed-size pages threaded through a free
//! list, so an element never moves in memory when its bucket changes: only
//! page ids do.
//!
//! The heap is monotone: keys passed to [`push`](RadixHeap::push) must not be
//! smaller than the key of the last extraction, and
//! [`extract_min`](RadixHeap::extract_min) returns non-decreasing keys.

use crate::ints::UInt;

const NIL: u64 = u64::MAX;

#[derive(Clone, Copy)]
struct QueueHeader {
    head_page: u64,
    tail_page: u64,
    head_ptr: u64,
    tail_ptr: u64,
}

/// Number of bits needed to represent `max_value` (at least one).
pub fn bits_for(max_value: u64) -> u64 {
    (64 - max_value.leading_zeros() as u64).max(1)
}

/// Digit schedule covering `bits` key bits with digits of at most
/// `max_radix_log` bits, most-significant digit first.
pub fn radix_logs_for_bits(bits: u64, max_radix_log: u64) -> Vec<u64> {
    let mut logs = Vec::new();
    let mut covered = 0;
    while covered < bits {
        let log = max_radix_log.min(bits - covered);
        logs.push(log);
        covered += log;
    }
    logs
}

/// A monotone priority queue over `(key, value)` pairs, bounded by the
/// `max_items` capacity given at construction.
pub struct RadixHeap<K: UInt, V: Copy + Default> {
    len: u64,
    key_lower_bound: u64,
    bottom_level_queue_ptr: u64,
    min_compare_ptr: u64,
    bottom_level_radix: u64,
    page_size: u64,

    /// Smallest key currently stored in each queue.
    queue_min: Vec<u64>,

    // Lookup tables used to compute bucket ids.
    bin_len_to_level: Vec<u64>,
    level_mask: Vec<u64>,
    sum_of_radix_logs: Vec<u64>,
    sum_of_radixes: Vec<u64>,

    /// Per-level scan pointers used to locate the smallest non-empty queue.
    level_ptr: Vec<u64>,

    // The page slab and the free list threaded through `page_next`.
    empty_pages_head: u64,
    page_next: Vec<u64>,
    pages: Vec<(K, V)>,
    headers: Vec<QueueHeader>,
}

impl<K: UInt, V: Copy + Default> RadixHeap<K, V> {
    /// Creates a heap with the given digit schedule (most-significant digit
    /// first) and room for `max_items` simultaneous items.
    pub fn new(radix_logs: &[u64], max_items: u64, page_size: u64) -> Self {
        let radix_logs_sum: u64 = radix_logs.iter().sum();
        assert!(radix_logs_sum > 0, "empty radix log schedule");
        assert!(radix_logs_sum <= 64);
        let n_levels = radix_logs.len();
        let page_size = page_size.max(1);

        // Level 0 is the least-significant digit.
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
        let n_pages = max_items / page_size + 2 * queue_count;

        let mut page_next = vec![0u64; n_pages as usize];
        for (i, next) in page_next.iter_mut().enumerate() {
            *next = if i as u64 + 1 != n_pages {
                i as u64 + 1
            } else {
                NIL
            };
        }

        RadixHeap {
            len: 0,
            key_lower_bound: 0,
            bottom_level_queue_ptr: 0,
            min_compare_ptr: 0,
            bottom_level_radix: 1u64 << radix_logs[n_levels - 1],
            page_size,
            queue_min: vec![NIL; queue_count as usize],
            bin_len_to_level,
            level_mask,
            sum_of_radix_logs,
            sum_of_radixes,
            level_ptr,
            empty_pages_head: 0,
            page_next,
            pages: vec![<(K, V)>::default(); (n_pages * page_size) as usize],
            headers: vec![
                QueueHeader {
                    head_page: NIL,
                    tail_page: NIL,
                    head_ptr: 0,
                    tail_ptr: 0,
                };
                queue_count as usize
            ],
        }
    }

    #[inline]
    fn queue_is_empty(&self, queue: u64) -> bool {
        let header = &self.headers[queue as usize];
        header.tail_page == NIL
            || (header.tail_page == header.head_page && header.tail_ptr == header.head_ptr)
    }

    #[inline]
    fn queue_front(&self, queue: u64) -> (K, V) {
        let header = &self.headers[queue as usize];
        self.pages[(header.tail_page * self.page_size + header.tail_ptr) as usize]
    }

    fn queue_pop(&mut self, queue: u64) {
        let header = &mut self.headers[queue as usize];
        header.tail_ptr += 1;
        if header.tail_ptr == self.page_size {
            let next_tail = self.page_next[header.tail_page as usize];
            self.page_next[header.tail_page as usize] = self.empty_pages_head;
            self.empty_pages_head = header.tail_page;
            header.tail_page = next_tail;
            header.tail_ptr = 0;
        } else if header.tail_ptr == header.head_ptr && header.tail_page == header.head_page {
            self.page_next[header.tail_page as usize] = self.empty_pages_head;
            self.empty_pages_head = header.tail_page;
            header.tail_page = NIL;
            header.head_page = NIL;
        }
    }

    fn queue_push(&mut self, queue: u64, item: (K, V)) {
        let mut header = self.headers[queue as usize];
        if header.head_page == NIL {
            assert!(self.empty_pages_head != NIL, "radix heap capacity exceeded");
            header.head_page = self.empty_pages_head;
            self.empty_pages_head = self.page_next[header.head_page as usize];
            self.page_next[header.head_page as usize] = NIL;
            header.tail_page = header.head_page;
            header.head_ptr = 0;
            header.tail_ptr = 0;
        }

        self.pages[(header.head_page * self.page_size + header.head_ptr) as usize] = item;
        header.head_ptr += 1;
        if header.head_ptr == self.page_size {
            assert!(self.empty_pages_head != NIL, "radix heap capacity exceeded");
            let new_head = self.empty_pages_head;
            self.empty_pages_head = self.page_next[new_head as usize];
            self.page_next[new_head as usize] = NIL;
            self.page_next[header.head_page as usize] = new_head;
            header.head_page = new_head;
            header.head_ptr = 0;
        }
        self.headers[queue as usize] = header;
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
            "radix heap: key {} below the lower bound {}",
            key_u64,
            self.key_lower_bound
        );
        self.len += 1;
        let queue = self.queue_id(key_u64);
        self.queue_push(queue, (key, value));
        self.queue_min[queue as usize] = self.queue_min[queue as usize].min(key_u64);
        self.min_compare_ptr = self.min_compare_ptr.min(queue);
    }

    /// Returns true iff a minimum exists and it is at most `key`. Advances
    /// the auxiliary scan pointer but leaves the heap logically unchanged.
    pub fn min_compare(&mut self, key: K) -> bool {
        if self.is_empty() {
            return false;
        }
        let key_u64 = key.to_u64();
        if !self.queue_is_empty(self.min_compare_ptr) {
            return self.queue_min[self.min_compare_ptr as usize] <= key_u64;
        }
        let queue = self.queue_id(key_u64);
        while self.min_compare_ptr != queue && self.queue_is_empty(self.min_compare_ptr) {
            self.min_compare_ptr += 1;
        }
        !self.queue_is_empty(self.min_compare_ptr)
            && self.queue_min[self.min_compare_ptr as usize] <= key_u64
    }

    /// Removes and returns the pair with the smallest key; extracted keys are
    /// non-decreasing over the heap's lifetime.
    pub fn extract_min(&mut self) -> (K, V) {
        assert!(!self.is_empty(), "extract_min on an empty radix heap");
        if self.queue_is_empty(self.bottom_level_queue_ptr) {
            self.redistribute();
        }
        let (key, value) = self.queue_front(self.bottom_level_queue_ptr);
        self.queue_pop(self.bottom_level_queue_ptr);
        self.len -= 1;
        (key, value)
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn redistribute(&mut self) {
        while self.bottom_level_queue_ptr < self.bottom_level_radix
            && self.queue_is_empty(self.bottom_level_queue_ptr)
        {
            self.queue_min[self.bottom_level_queue_ptr as usize] = NIL;
            self.bottom_level_queue_ptr += 1;
        }

        if self.bottom_level_queue_ptr < self.bottom_level_radix {
            self.key_lower_bound = self.queue_min[self.bottom_level_queue_ptr as usize];
        } else {
            // Locate the leftmost non-empty queue above the bottom level.
            let mut level = 1usize;
            loop {
                assert!(level < self.level_ptr.len(), "non-empty heap with all queues empty");
                while self.level_ptr[level] < self.sum_of_radixes[level + 1] + 1
                    && self.queue_is_empty(self.level_ptr[level])
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
            while !self.queue_is_empty(queue) {
                let item = self.queue_front(queue);
                self.queue_pop(queue);
                let new_queue = self.queue_id(item.0.to_u64());
                self.queue_push(new_queue, item);
                self.queue_min[new_queue as usize] =
                    self.queue_min[new_queue as usize].min(item.0.to_u64());
            }
            self.bottom_level_queue_ptr = self.queue_id(self.key_lower_bound);
            self.queue_min[queue as usize] = NIL;
        }
        self.min_compare_ptr = self.bottom_level_queue_ptr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_monotone_extractions() {
        let mut rng = StdRng::seed_from_u64(0xBEE);
        for radix_logs in [vec![8u64], vec![2, 3, 3], vec![1; 8], vec![4, 4]] {
            for page_size in [1u64, 4, 64] {
                let mut heap = RadixHeap::<u8, u64>::new(&radix_logs, 512, page_size);
                let mut pending = 512u64;
                let mut last_key = 0u64;
                let mut n_extracted = 0u64;
                let mut pushed = 0u64;
                while n_extracted < 512 {
                    if pending > 0 && (heap.is_empty() || rng.random_bool(0.6)) {
                        let key = rng.random_range(last_key..256);
                        heap.push(key as u8, pushed);
                        pushed += 1;
                        pending -= 1;
                    } else {
                        let (key, _) = heap.extract_min();
                        assert!(key as u64 >= last_key);
                        last_key = key as u64;
                        n_extracted += 1;
                    }
                }
                assert!(heap.is_empty());
            }
        }
    }

    #[test]
    fn test_matches_sorted_order() {
        let mut rng = StdRng::seed_from_u64(42);
        let radix_logs = radix_logs_for_bits(16, 10);
        let mut heap = RadixHeap::<u16, u32>::new(&radix_logs, 2000, 4);
        let mut keys: Vec<u16> = (0..2000).map(|_| rng.random()).collect();
        for (i, &key) in keys.iter().enumerate() {
            heap.push(key, i as u32);
        }
        keys.sort_unstable();
        for &expected in &keys {
            assert!(heap.min_compare(expected));
            let (key, _) = heap.extract_min();
            assert_eq!(key, expected);
        }
        assert!(heap.is_empty());
    }

    #[test]
    fn test_min_compare_is_exact() {
        let mut heap = RadixHeap::<u8, ()>::new(&[3, 3, 2], 16, 1);
        assert!(!heap.min_compare(255));
        heap.push(7, ());
        heap.push(19, ());
        assert!(!heap.min_compare(6));
        assert!(heap.min_compare(7));
        assert_eq!(heap.extract_min().0, 7);
        assert!(!heap.min_compare(18));
        assert!(heap.min_compare(19));
        assert_eq!(heap.extract_min().0, 19);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_fifo_within_equal_keys() {
        let mut heap = RadixHeap::<u8, u32>::new(&[4, 4], 64, 2);
        for i in 0..20 {
            heap.push(5, i);
        }
        for i in 0..20 {
            assert_eq!(heap.extract_min(), (5, i));
        }
    }
}
