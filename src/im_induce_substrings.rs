/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The in-memory block preprocessor of the substring stage.
//!
//! Induce blocks are processed right to left. For each block the preprocessor
//! loads the block symbols (plus one symbol of context on each side),
//! classifies positions with the standard reverse sweep (the type of the
//! block's first position is carried to the block on the left to resolve
//! equal runs straddling the boundary) and then replays, inside the block,
//! the exact induction the external-memory passes will run globally: a
//! stable FIFO radix-heap induction of the plus-side items followed by one of
//! the minus-side items, with the chain entering through the right boundary
//! seeded ahead of the block's own items in its key class.
//!
//! The per-block streams record, in touch order, exactly what the
//! external-memory inducers will consume when an extracted item points into
//! the block: type bits, preceding symbols, and in-block offsets of the
//! minus-star heads. `block_count_target` marks the touch rank of the block's
//! first position, which is how the global passes know that an induced
//! predecessor crosses into the previous block.

use crate::ints::{Serial, UInt};
use crate::io::{BitStreamWriter, StreamWriter};
use crate::radix_heap::{bits_for, radix_logs_for_bits, RadixHeap};
use crate::utils::read_range;
use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

/// The per-induce-block temp files produced for the substring stage.
pub(crate) struct SubstringStreams {
    pub plus_symbols: Vec<PathBuf>,
    pub plus_type: Vec<PathBuf>,
    pub minus_pos: Vec<PathBuf>,
    pub minus_type: Vec<PathBuf>,
    pub minus_symbols: Vec<PathBuf>,
}

impl SubstringStreams {
    pub fn new(base: &Path, n_blocks: u64) -> Self {
        let n = n_blocks as usize;
        SubstringStreams {
            plus_symbols: crate::utils::temp_file_names(base, n),
            plus_type: crate::utils::temp_file_names(base, n),
            minus_pos: crate::utils::temp_file_names(base, n),
            minus_type: crate::utils::temp_file_names(base, n),
            minus_symbols: crate::utils::temp_file_names(base, n),
        }
    }
}

const MINUS: bool = false;
const PLUS: bool = true;

/// One block with its one-symbol context on each side and the suffix types of
/// every loaded position.
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

    /// Loads block `[beg, end)` of the text and classifies positions
    /// `[max(beg-1, 0), min(end+1, n))`; `carry` is the type of position
    /// `end`, known from the block on the right.
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
        let symbols: Vec<C> = read_range(file, path, ext_beg, ext_end)?;
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

/// Output of the plus-side simulation of one block.
struct PlusSim {
    type_bits: Vec<bool>,
    symbols: Vec<u64>,
    /// Plus-star heads in touch (reverse lexicographic) order.
    star_positions: Vec<u64>,
    target: u64,
}

/// Replays the plus-side induction restricted to one block. Touch order is
/// the order in which the global plus pass will consume the block's streams.
fn plus_sim<C: UInt>(block: &Block<C>, text_length: u64, sigma: u64) -> PlusSim {
    let radix_logs = radix_logs_for_bits(bits_for(sigma.saturating_sub(1)), 10);
    let mut heap =
        RadixHeap::<u64, u64>::new(&radix_logs, block.end - block.beg + 2, 256);

    // Continuations are pushed with their key shifted up by one so that plus
    // items with head `c` drain after the minus-star seeds with head `c + 1`
    // and before the seeds with head `c`. No plus item can start with the
    // largest symbol, so the shift cannot overflow.
    let seed_key = |c: u64| sigma - 1 - c;
    let chain_key = |c: u64| sigma - 1 - (c + 1);

    // The chain entering through the right boundary is seeded first, ahead of
    // the block's own items of its key class.
    if block.end < text_length && block.is_plus(block.end - 1) {
        let key = if block.is_plus(block.end) {
            chain_key(block.symbol(block.end))
        } else {
            seed_key(block.symbol(block.end))
        };
        heap.push(key, block.end);
    }
    for pos in (block.beg..block.end).rev() {
        if block.is_minus_star(pos) {
            heap.push(seed_key(block.symbol(pos)), pos);
        }
    }

    let mut out = PlusSim {
        type_bits: Vec::new(),
        symbols: Vec::new(),
        star_positions: Vec::new(),
        target: 0,
    };
    let mut count = 0u64;
    while !heap.is_empty() {
        let (_, pos) = heap.extract_min();
        if pos == block.end {
            // Boundary pseudo-item: only its chain enters the block.
            heap.push(chain_key(block.symbol(pos - 1)), pos - 1);
            continue;
        }
        count += 1;
        if pos == block.beg {
            out.target = count;
        }
        if !block.is_plus(pos) {
            // A minus-star seed: its predecessor is a plus continuation.
            out.symbols.push(block.symbol(pos - 1));
            if pos > block.beg {
                heap.push(chain_key(block.symbol(pos - 1)), pos - 1);
            }
        } else {
            let is_star = block.is_plus_star(pos);
            out.type_bits.push(is_star);
            if is_star {
                out.star_positions.push(pos);
            } else if pos > 0 {
                out.symbols.push(block.symbol(pos - 1));
                if pos > block.beg {
                    heap.push(chain_key(block.symbol(pos - 1)), pos - 1);
                }
            }
        }
    }
    out
}

/// Output of the minus-side simulation of one block.
struct MinusSim {
    type_bits: Vec<bool>,
    symbols: Vec<u64>,
    /// In-block offsets of the minus-star heads in touch (lexicographic)
    /// order.
    star_offsets: Vec<u64>,
    target: u64,
}

/// Replays the minus-side induction restricted to one block, seeded by the
/// block's plus-star heads in lexicographic order (the reversed plus-side
/// emission order).
fn minus_sim<C: UInt>(
    block: &Block<C>,
    text_length: u64,
    sigma: u64,
    plus_stars: &[u64],
) -> MinusSim {
    let radix_logs = radix_logs_for_bits(bits_for(sigma.saturating_sub(1)), 10);
    let mut heap =
        RadixHeap::<u64, u64>::new(&radix_logs, block.end - block.beg + 2, 256);

    // Seeds in lexicographic order: the block's plus-star heads, with the
    // boundary plus-star (if any) ahead of its key class.
    let mut seeds: Vec<u64> = plus_stars.to_vec();
    if block.end < text_length && !block.is_plus(block.end - 1) {
        if !block.is_plus(block.end) {
            // The entering chain continues a minus run: seed it directly.
            heap.push(block.symbol(block.end), block.end);
        } else {
            let key = block.symbol(block.end);
            let at = seeds
                .iter()
                .position(|&s| block.symbol(s) >= key)
                .unwrap_or(seeds.len());
            seeds.insert(at, block.end);
        }
    }

    let mut out = MinusSim {
        type_bits: Vec::new(),
        symbols: Vec::new(),
        star_offsets: Vec::new(),
        target: 0,
    };
    let mut count = 0u64;
    let mut seed_idx = 0usize;
    let mut last_pending = block.end == text_length && text_length > 0;
    let mut cur_symbol = 0u64;

    macro_rules! touch {
        ($pos:expr) => {{
            let pos: u64 = $pos;
            count += 1;
            if pos == block.beg {
                out.target = count;
            }
            let is_star = block.is_minus_star(pos);
            out.type_bits.push(is_star);
            if is_star {
                out.star_offsets.push(pos - block.beg);
            } else if pos > 0 {
                out.symbols.push(block.symbol(pos - 1));
                if pos > block.beg {
                    heap.push(block.symbol(pos - 1), pos - 1);
                }
            }
        }};
    }

    while last_pending || seed_idx < seeds.len() || !heap.is_empty() {
        // The last suffix of the text is never pushed by anyone: it is
        // touched ahead of the heap drains of its own symbol class.
        if last_pending && cur_symbol == block.symbol(text_length - 1) {
            last_pending = false;
            touch!(text_length - 1);
        }
        while !heap.is_empty() && heap.min_compare(cur_symbol) {
            let (_, pos) = heap.extract_min();
            if pos == block.end {
                heap.push(block.symbol(pos - 1), pos - 1);
                continue;
            }
            touch!(pos);
        }
        while seed_idx < seeds.len() && block.symbol(seeds[seed_idx]) == cur_symbol {
            let pos = seeds[seed_idx];
            seed_idx += 1;
            if pos == block.end {
                // Boundary plus-star: only its chain enters the block.
                heap.push(block.symbol(pos - 1), pos - 1);
                continue;
            }
            count += 1;
            if pos == block.beg {
                out.target = count;
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

/// Runs the block preprocessor over the whole text, writing the per-block
/// streams and filling the two `block_count_target` vectors.
#[allow(clippy::too_many_arguments)]
pub(crate) fn im_induce_substrings<C: UInt, BO: UInt>(
    text_alphabet_size: u64,
    text_length: u64,
    max_block_size: u64,
    text_filename: &Path,
    streams: &SubstringStreams,
    plus_block_count_targets: &mut [u64],
    minus_block_count_targets: &mut [u64],
    total_io_volume: &mut u64,
) -> Result<()> {
    let n_blocks = text_length.div_ceil(max_block_size);
    assert!(
        BO::MAX >= max_block_size - 1,
        "block offset type too narrow for block size {}",
        max_block_size
    );

    let mut file = File::open(text_filename)
        .with_context(|| format!("Could not open {}", text_filename.display()))?;
    let mut io_volume = 0u64;
    let mut carry = MINUS;

    for block_id in (0..n_blocks).rev() {
        let beg = block_id * max_block_size;
        let end = (beg + max_block_size).min(text_length);
        let block = Block::<C>::load(&mut file, text_filename, text_length, beg, end, carry)?;
        io_volume += (block.symbols.len() * C::BYTES) as u64;

        let plus = plus_sim(&block, text_length, text_alphabet_size);
        plus_block_count_targets[block_id as usize] = plus.target;

        // The minus pass is seeded by the plus-star heads in lexicographic
        // order, which is the reverse of the plus-side touch order.
        let ascending_stars: Vec<u64> = plus.star_positions.iter().rev().copied().collect();
        let minus = minus_sim(&block, text_length, text_alphabet_size, &ascending_stars);
        minus_block_count_targets[block_id as usize] = minus.target;

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

        let mut minus_pos = StreamWriter::<BO>::new(&streams.minus_pos[block_id as usize])?;
        for &offset in &minus.star_offsets {
            minus_pos.push(BO::from_u64(offset));
        }
        io_volume += minus_pos.finish()?;

        carry = block.is_plus(beg);
    }

    *total_io_volume += io_volume;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &[u8]) -> Vec<bool> {
        let n = text.len();
        let mut types = vec![MINUS; n];
        for i in (0..n.saturating_sub(1)).rev() {
            types[i] = match text[i].cmp(&text[i + 1]) {
                std::cmp::Ordering::Less => PLUS,
                std::cmp::Ordering::Greater => MINUS,
                std::cmp::Ordering::Equal => types[i + 1],
            };
        }
        types
    }

    #[test]
    fn test_type_carry_across_blocks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("text");
        // Long equal runs straddling every block boundary.
        let text: Vec<u8> = b"aaaabaaaabbbbabbbb".to_vec();
        crate::utils::write_all(&path, &text)?;
        let expected = classify(&text);

        let mut file = File::open(&path)?;
        let mut carry = MINUS;
        let max_block_size = 4u64;
        let n = text.len() as u64;
        for block_id in (0..n.div_ceil(max_block_size)).rev() {
            let beg = block_id * max_block_size;
            let end = (beg + max_block_size).min(n);
            let block = Block::<u8>::load(&mut file, &path, n, beg, end, carry)?;
            for pos in beg..end {
                assert_eq!(block.is_plus(pos), expected[pos as usize], "pos {}", pos);
            }
            carry = block.is_plus(beg);
        }
        Ok(())
    }

    #[test]
    fn test_single_block_touch_order() -> Result<()> {
        // With one block the plus simulation must touch the plus-star heads
        // in reverse lexicographic order of their substrings.
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("text");
        let text = b"abracadabra".to_vec();
        crate::utils::write_all(&path, &text)?;
        let mut file = File::open(&path)?;
        let n = text.len() as u64;
        let block = Block::<u8>::load(&mut file, &path, n, 0, n, MINUS)?;
        let plus = plus_sim(&block, n, 256);
        // Plus-star substrings: 5 -> "ada", 3 -> "aca", 7 -> "abr";
        // reverse lexicographic order is ada, aca, abr.
        assert_eq!(plus.star_positions, vec![5, 3, 7]);
        let minus = minus_sim(
            &block,
            n,
            256,
            &plus.star_positions.iter().rev().copied().collect::<Vec<_>>(),
        );
        // Minus-star heads 2, 4, 6, 9 ("ra", "ca", "da", "ra") in
        // lexicographic order: 4, 6, then the equal pair 9, 2 in the order
        // the induction reaches them.
        assert_eq!(minus.star_offsets, vec![4, 6, 9, 2]);
        Ok(())
    }
}
