/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The in-memory block preprocessor of the final (suffix) stage.
//!
//! Unlike the substring stage, the final stage starts from ground truth: the
//! lexicographically sorted minus-star positions of each induce block, as
//! produced by the recursion and the lex↔text permutation. Each block replays
//! the two global suffix passes locally (the plus pass seeded by the block's
//! minus-stars in reverse lexicographic order, the minus pass seeded by the
//! plus-star heads) and records the streams the external-memory passes will
//! consume. `next_block_leftmost_minus_star_plus_rank` pins down where the
//! chain entering through the right boundary sits among the block's own
//! seeds.

use crate::ints::{Serial, UInt};
use crate::io::{BitStreamWriter, StreamWriter};
use crate::radix_heap::{bits_for, radix_logs_for_bits, RadixHeap};
use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

/// The per-induce-block temp files produced for the final stage.
pub(crate) struct SuffixStreams {
    pub plus_pos: Vec<PathBuf>,
    pub plus_type: Vec<PathBuf>,
    pub plus_symbols: Vec<PathBuf>,
    pub minus_pos: Vec<PathBuf>,
    pub minus_type: Vec<PathBuf>,
    pub minus_symbols: Vec<PathBuf>,
}

impl SuffixStreams {
    pub fn new(base: &Path, n_blocks: u64) -> Self {
        let n = n_blocks as usize;
        SuffixStreams {
            plus_pos: crate::utils::temp_file_names(base, n),
            plus_type: crate::utils::temp_file_names(base, n),
            plus_symbols: crate::utils::temp_file_names(base, n),
            minus_pos: crate::utils::temp_file_names(base, n),
            minus_type: crate::utils::temp_file_names(base, n),
            minus_symbols: crate::utils::temp_file_names(base, n),
        }
    }
}

const MINUS: bool = false;
const PLUS: bool = true;

struct Block<C> {
    beg: u64,
    end: u64,
    ext_beg: u64,
    symbols: Vec<C>,
    types: Vec<bool>,
}

impl<C: UInt> Block<C> {
    #[inline]
    fn symbol(&self, pos: u64) -> u64 {
        self.symbols[(pos - self.ext_beg) as usize].to_u64()
    }

    #[inline]
    fn is_plus(&self, pos: u64) -> bool {
        self.types[(pos - self.ext_beg) as usize]
    }

    fn is_minus_star(&self, pos: u64) -> bool {
        pos > 0 && !self.is_plus(pos) && self.is_plus(pos - 1)
    }

    fn is_plus_star(&self, pos: u64) -> bool {
        pos > 0 && self.is_plus(pos) && !self.is_plus(pos - 1)
    }

    fn load(
        file: &mut File,
        path: &Path,
        text_length: u64,
        beg: u64,
        end: u64,
        carry: bool,
    ) -> Result<Self> {
        let ext_beg = beg.saturating_sub(1);
        let ext_end = (end + 1).min(text_length);
        let symbols: Vec<C> = crate::utils::read_range(file, path, ext_beg, ext_end)?;
        let mut types = vec![MINUS; symbols.len()];
        let idx = |pos: u64| (pos - ext_beg) as usize;
        if end < text_length {
            types[idx(end)] = carry;
        }
        for pos in (ext_beg..end).rev() {
            types[idx(pos)] = if pos == text_length - 1 {
                MINUS
            } else if symbols[idx(pos)] < symbols[idx(pos + 1)] {
                PLUS
            } else if symbols[idx(pos)] > symbols[idx(pos + 1)] {
                MINUS
            } else {
                types[idx(pos + 1)]
            };
        }
        Ok(Block {
            beg,
            end,
            ext_beg,
            symbols,
            types,
        })
    }
}

struct PlusSuffixSim {
    /// Absolute positions of the block's plus suffixes in touch order
    /// (descending suffix rank).
    positions: Vec<u64>,
    type_bits: Vec<bool>,
    symbols: Vec<u64>,
    /// Plus-star heads in ascending suffix rank (the minus pass seeds).
    star_positions_ascending: Vec<u64>,
}

/// Replays the final plus pass inside one block. `seeds_desc` holds the
/// block's minus-star positions in descending lexicographic order, with the
/// boundary pseudo-seed (`pos == end`) already inserted at its rank.
fn plus_suffix_sim<C: UInt>(
    block: &Block<C>,
    text_length: u64,
    sigma: u64,
    seeds_desc: &[u64],
) -> PlusSuffixSim {
    let radix_logs = radix_logs_for_bits(bits_for(sigma.saturating_sub(1)), 10);
    let mut heap =
        RadixHeap::<u64, u64>::new(&radix_logs, block.end - block.beg + 2, 256);
    let inv = |c: u64| sigma - 1 - c;

    let mut out = PlusSuffixSim {
        positions: Vec::new(),
        type_bits: Vec::new(),
        symbols: Vec::new(),
        star_positions_ascending: Vec::new(),
    };

    // The boundary chain of a plus-typed boundary suffix enters ahead of its
    // key class.
    if block.end < text_length && block.is_plus(block.end - 1) && block.is_plus(block.end) {
        heap.push(inv(block.symbol(block.end)), block.end);
    }

    let mut seed_idx = 0usize;
    for cur_char in (0..sigma).rev() {
        while !heap.is_empty() && heap.min_compare(inv(cur_char)) {
            let (_, pos) = heap.extract_min();
            if pos == block.end {
                heap.push(inv(block.symbol(pos - 1)), pos - 1);
                continue;
            }
            out.positions.push(pos);
            let is_star = block.is_plus_star(pos);
            out.type_bits.push(is_star);
            if is_star {
                out.star_positions_ascending.push(pos);
            } else if pos > 0 {
                out.symbols.push(block.symbol(pos - 1));
                if pos > block.beg {
                    heap.push(inv(block.symbol(pos - 1)), pos - 1);
                }
            }
        }
        while seed_idx < seeds_desc.len()
            && block.symbol(seeds_desc[seed_idx]) == cur_char
        {
            let pos = seeds_desc[seed_idx];
            seed_idx += 1;
            if pos == block.end {
                // Boundary minus-star: only its chain enters the block.
                heap.push(inv(block.symbol(pos - 1)), pos - 1);
                continue;
            }
            out.symbols.push(block.symbol(pos - 1));
            if pos > block.beg {
                heap.push(inv(block.symbol(pos - 1)), pos - 1);
            }
        }
    }
    debug_assert!(heap.is_empty() && seed_idx == seeds_desc.len());
    out.star_positions_ascending.reverse();
    out
}

struct MinusSuffixSim {
    /// In-block offsets of the block's minus suffixes in touch order
    /// (ascending suffix rank).
    offsets: Vec<u64>,
    type_bits: Vec<bool>,
    symbols: Vec<u64>,
}

/// Replays the final minus pass inside one block, seeded by the block's
/// plus-star heads in ascending rank order.
fn minus_suffix_sim<C: UInt>(
    block: &Block<C>,
    text_length: u64,
    sigma: u64,
    plus_stars_ascending: &[u64],
) -> MinusSuffixSim {
    let radix_logs = radix_logs_for_bits(bits_for(sigma.saturating_sub(1)), 10);
    let mut heap =
        RadixHeap::<u64, u64>::new(&radix_logs, block.end - block.beg + 2, 256);

    let mut seeds: Vec<u64> = plus_stars_ascending.to_vec();
    if block.end < text_length && !block.is_plus(block.end - 1) {
        if !block.is_plus(block.end) {
            heap.push(block.symbol(block.end), block.end);
        } else {
            // Boundary plus-star: ahead of its key class among the seeds.
            let key = block.symbol(block.end);
            let at = seeds
                .iter()
                .position(|&s| block.symbol(s) >= key)
                .unwrap_or(seeds.len());
            seeds.insert(at, block.end);
        }
    }
    if block.end == text_length {
        // The last suffix of the text seeds the global minus pass directly.
        heap.push(block.symbol(text_length - 1), text_length - 1);
    }

    let mut out = MinusSuffixSim {
        offsets: Vec::new(),
        type_bits: Vec::new(),
        symbols: Vec::new(),
    };
    let mut seed_idx = 0usize;
    let mut cur_symbol = 0u64;
    while seed_idx < seeds.len() || !heap.is_empty() {
        while !heap.is_empty() && heap.min_compare(cur_symbol) {
            let (_, pos) = heap.extract_min();
            if pos == block.end {
                heap.push(block.symbol(pos - 1), pos - 1);
                continue;
            }
            out.offsets.push(pos - block.beg);
            let is_star = block.is_minus_star(pos);
            out.type_bits.push(is_star);
            if !is_star && pos > 0 {
                out.symbols.push(block.symbol(pos - 1));
                if pos > block.beg {
                    heap.push(block.symbol(pos - 1), pos - 1);
                }
            }
        }
        while seed_idx < seeds.len() && block.symbol(seeds[seed_idx]) == cur_symbol {
            let pos = seeds[seed_idx];
            seed_idx += 1;
            if pos == block.end {
                heap.push(block.symbol(pos - 1), pos - 1);
                continue;
            }
            out.symbols.push(block.symbol(pos - 1));
            if pos > block.beg {
                heap.push(block.symbol(pos - 1), pos - 1);
            }
        }
        cur_symbol += 1;
    }
    out
}

/// Runs the final-stage block preprocessor, consuming the per-block
/// lex-sorted minus-star position files and producing the per-block suffix
/// streams plus the seed count targets.
#[allow(clippy::too_many_arguments)]
pub(crate) fn im_induce_suffixes<C: UInt, O: UInt>(
    text_alphabet_size: u64,
    text_length: u64,
    max_block_size: u64,
    next_block_leftmost_minus_star_plus_rank: &[u64],
    text_filename: &Path,
    init_minus_pos_filenames: &[PathBuf],
    streams: &SuffixStreams,
    block_count_targets: &mut [u64],
    total_io_volume: &mut u64,
) -> Result<()> {
    let n_blocks = text_length.div_ceil(max_block_size);
    let mut file = File::open(text_filename)
        .with_context(|| format!("Could not open {}", text_filename.display()))?;
    let mut io_volume = 0u64;
    let mut carry = MINUS;

    for block_id in (0..n_blocks).rev() {
        let beg = block_id * max_block_size;
        let end = (beg + max_block_size).min(text_length);
        let block = Block::<C>::load(&mut file, text_filename, text_length, beg, end, carry)?;
        io_volume += (block.symbols.len() * C::BYTES) as u64;

        // The block's minus-stars, ascending lexicographic, as absolute
        // positions.
        let lex_ms: Vec<u64> = crate::utils::read_all::<O>(
            &init_minus_pos_filenames[block_id as usize],
        )?
        .into_iter()
        .map(|offset| beg + offset.to_u64())
        .collect();
        io_volume += (lex_ms.len() * O::BYTES) as u64;

        // Seed count target: the rank at which the block's first position is
        // consumed in the reverse-lexicographic seed order.
        block_count_targets[block_id as usize] = match lex_ms.iter().position(|&pos| pos == beg) {
            Some(at) => (lex_ms.len() - at) as u64,
            None => u64::MAX,
        };

        // Reverse-lexicographic seeds with the boundary pseudo-seed (if the
        // boundary suffix is a minus-star) inserted at its published rank.
        let mut seeds_desc: Vec<u64> = lex_ms.iter().rev().copied().collect();
        if end < text_length && block.is_plus(end - 1) && !block.is_plus(end) {
            let rank = next_block_leftmost_minus_star_plus_rank[block_id as usize];
            assert!(rank != u64::MAX, "missing boundary rank for block {}", block_id);
            let at = (lex_ms.len() as u64 - rank.min(lex_ms.len() as u64)) as usize;
            seeds_desc.insert(at, end);
        }

        let plus = plus_suffix_sim(&block, text_length, text_alphabet_size, &seeds_desc);
        let minus = minus_suffix_sim(
            &block,
            text_length,
            text_alphabet_size,
            &plus.star_positions_ascending,
        );

        let mut plus_pos = StreamWriter::<O>::new(&streams.plus_pos[block_id as usize])?;
        for &pos in &plus.positions {
            plus_pos.push(O::from_u64(pos));
        }
        io_volume += plus_pos.finish()?;

        let mut plus_type = BitStreamWriter::new(&streams.plus_type[block_id as usize])?;
        for &bit in &plus.type_bits {
            plus_type.push(bit);
        }
        io_volume += plus_type.finish()?;

        let mut plus_symbols = StreamWriter::<C>::new(&streams.plus_symbols[block_id as usize])?;
        for &symbol in &plus.symbols {
            plus_symbols.push(C::from_u64(symbol));
        }
        io_volume += plus_symbols.finish()?;

        let mut minus_pos = StreamWriter::<O>::new(&streams.minus_pos[block_id as usize])?;
        for &offset in &minus.offsets {
            minus_pos.push(O::from_u64(offset));
        }
        io_volume += minus_pos.finish()?;

        let mut minus_type = BitStreamWriter::new(&streams.minus_type[block_id as usize])?;
        for &bit in &minus.type_bits {
            minus_type.push(bit);
        }
        io_volume += minus_type.finish()?;

        let mut minus_symbols = StreamWriter::<C>::new(&streams.minus_symbols[block_id as usize])?;
        for &symbol in &minus.symbols {
            minus_symbols.push(C::from_u64(symbol));
        }
        io_volume += minus_symbols.finish()?;

        crate::utils::file_delete(&init_minus_pos_filenames[block_id as usize])?;
        carry = block.is_plus(beg);
    }

    *total_io_volume += io_volume;
    Ok(())
}
