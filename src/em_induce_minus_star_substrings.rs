/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The external-memory minus-star substring inducer and namer, plus the
//! driver chaining the whole substring stage of one recursion level
//! (block preprocessing → plus-star pass → minus-star pass).
//!
//! The minus pass walks symbols from lowest to highest, draining the radix
//! heap one class at a time and interleaving, per symbol, the batch of
//! plus-star substrings produced by the plus pass (read backward, so they
//! arrive in forward lexicographic order). Each emitted minus-star substring
//! carries a name, a running counter of distinct-substring events, and is
//! routed to the permute block of its text position, which distributes the
//! `(text_offset, name)` pairs for the recursive-text builder as a side
//! effect of the induction.
//!
//! Two variants select by alphabet size. For small alphabets a σ-sized
//! timestamp array decides whether a pushed predecessor opens a new
//! equivalence class, and the heap value is a block id with one
//! difference bit. For large alphabets the σ-sized table is replaced by an
//! explicit tail name carried through the heap.

use crate::em_induce_plus_star_substrings::{em_induce_plus_star_substrings, stream_buf_bytes};
use crate::em_radix_heap::EmRadixHeap;
use crate::im_induce_substrings::{im_induce_substrings, SubstringStreams};
use crate::ints::{Serial, UInt};
use crate::io::{
    BackwardBitStreamReader, BackwardStreamReader, MultiBitStreamReader, MultiStreamReader,
    MultiStreamWriter, StreamWriter,
};
use crate::radix_heap::{bits_for, radix_logs_for_bits};
use anyhow::Result;
use log::debug;
use std::path::{Path, PathBuf};

/// Alphabets up to this size use the timestamp-array naming variant.
const SMALL_ALPHABET_MAX: u64 = 2_000_000;

/// Writes the per-symbol count file, ascending symbols with run-length
/// bucket compaction; the file always ends up with exactly σ entries so the
/// final plus pass can walk it backward from the largest symbol.
struct CountFile<O: UInt> {
    writer: StreamWriter<O>,
    sigma: u64,
    prev_head_char: u64,
    cur_bucket_size: u64,
    empty: bool,
}

impl<O: UInt> CountFile<O> {
    fn new(path: &Path, sigma: u64) -> Result<Self> {
        Ok(CountFile {
            writer: StreamWriter::new(path)?,
            sigma,
            prev_head_char: 0,
            cur_bucket_size: 0,
            empty: true,
        })
    }

    fn add(&mut self, head_char: u64) {
        if self.empty || head_char != self.prev_head_char {
            if !self.empty {
                self.writer.push(O::from_u64(self.cur_bucket_size));
            }
            for _ in self.prev_head_char + !self.empty as u64..head_char {
                self.writer.push(O::from_u64(0));
            }
            self.cur_bucket_size = 0;
            self.prev_head_char = head_char;
            self.empty = false;
        }
        self.cur_bucket_size += 1;
    }

    fn finish(mut self) -> Result<u64> {
        let mut written = 0;
        if !self.empty {
            self.writer.push(O::from_u64(self.cur_bucket_size));
            written = self.prev_head_char + 1;
        }
        for _ in written..self.sigma {
            self.writer.push(O::from_u64(0));
        }
        self.writer.finish()
    }
}

/// The readers shared by both naming variants.
struct MinusStageInputs<C: UInt, O: UInt, BO: UInt, BI: UInt> {
    plus_pos: BackwardStreamReader<BI>,
    plus_count: BackwardStreamReader<O>,
    plus_diff: BackwardBitStreamReader,
    minus_type: MultiBitStreamReader,
    minus_pos: MultiStreamReader<BO>,
    symbols: MultiStreamReader<C>,
}

impl<C: UInt, O: UInt, BO: UInt, BI: UInt> MinusStageInputs<C, O, BO, BI> {
    #[allow(clippy::too_many_arguments)]
    fn open(
        ram_use: u64,
        n_blocks: u64,
        plus_pos_filename: &Path,
        plus_count_filename: &Path,
        plus_diff_filename: &Path,
        streams: &SubstringStreams,
    ) -> Result<Self> {
        let buf_bytes = stream_buf_bytes(ram_use, n_blocks);
        Ok(MinusStageInputs {
            plus_pos: BackwardStreamReader::new(plus_pos_filename)?,
            plus_count: BackwardStreamReader::new(plus_count_filename)?,
            plus_diff: BackwardBitStreamReader::new(plus_diff_filename)?,
            minus_type: MultiBitStreamReader::new(&streams.minus_type, buf_bytes)?,
            minus_pos: MultiStreamReader::new(&streams.minus_pos, buf_bytes)?,
            symbols: MultiStreamReader::new(&streams.minus_symbols, buf_bytes)?,
        })
    }

    fn bytes_read(&self) -> u64 {
        self.plus_pos.bytes_read()
            + self.plus_count.bytes_read()
            + self.plus_diff.bytes_read()
            + self.minus_type.bytes_read()
            + self.minus_pos.bytes_read()
            + self.symbols.bytes_read()
    }
}

/// Small-alphabet variant: σ-sized symbol timestamps, heap values are block
/// ids with one difference bit.
#[allow(clippy::too_many_arguments)]
fn em_induce_minus_star_substrings_small_alphabet<C, O, BO, BI, XBI>(
    text_length: u64,
    max_block_size: u64,
    text_alphabet_size: u64,
    ram_use: u64,
    max_permute_block_size: u64,
    last_text_symbol: u64,
    minus_block_count_targets: &[u64],
    mut inputs: MinusStageInputs<C, O, BO, BI>,
    tempfile_base: &Path,
    output_count_filename: &Path,
    output_pos_filenames: &[PathBuf],
    total_io_volume: &mut u64,
) -> Result<u64>
where
    C: UInt,
    O: UInt,
    BO: UInt,
    BI: UInt,
    XBI: UInt,
{
    let n_blocks = text_length.div_ceil(max_block_size);
    let msb_bit = 1u64 << (8 * XBI::BYTES - 1);
    assert!(msb_bit > n_blocks - 1, "extended block id type too narrow");

    let radix_logs = radix_logs_for_bits(bits_for(text_alphabet_size.saturating_sub(1)), 10);
    let mut heap: EmRadixHeap<u64, XBI> = EmRadixHeap::new(&radix_logs, tempfile_base, ram_use)?;

    let n_permute_blocks = text_length.div_ceil(max_permute_block_size);
    let mut pos_writer = MultiStreamWriter::<O>::new(
        output_pos_filenames,
        stream_buf_bytes(ram_use, n_permute_blocks),
        4,
    )?;
    let mut count_writer = CountFile::<O>::new(output_count_filename, text_alphabet_size)?;

    let mut block_count = vec![0u64; n_blocks as usize];
    let mut symbol_timestamps = vec![0u64; text_alphabet_size as usize];
    let mut was_extract_min = false;
    let mut was_plus_substring = false;
    let mut empty_output = true;
    let mut cur_substring_name = 0u64;
    let mut cur_substring_name_snapshot = 0u64;
    let mut diff_items_written = 0u64;
    let mut current_timestamp = 0u64;
    let mut cur_symbol = 0u64;

    while cur_symbol <= last_text_symbol
        || !inputs.plus_count.is_empty()
        || !heap.is_empty()
    {
        // The last suffix of the text is never induced by anyone: simulate
        // its extraction ahead of its own symbol class.
        if cur_symbol == last_text_symbol {
            let block_id = (text_length - 1) / max_block_size;
            cur_substring_name += was_extract_min as u64;
            current_timestamp += 1;
            was_extract_min = true;
            block_count[block_id as usize] += 1;
            let at_block_beg =
                block_count[block_id as usize] == minus_block_count_targets[block_id as usize];

            let is_star = inputs.minus_type.read_from(block_id as usize);
            if block_id > 0 || !at_block_beg {
                if !is_star {
                    let prev_char = inputs.symbols.read_from(block_id as usize).to_u64();
                    let mut heap_value = block_id - at_block_beg as u64;
                    if symbol_timestamps[prev_char as usize] != current_timestamp {
                        heap_value |= msb_bit;
                    }
                    heap.push(prev_char, XBI::from_u64(heap_value));
                    symbol_timestamps[prev_char as usize] = current_timestamp;
                } else {
                    if empty_output || cur_substring_name_snapshot != cur_substring_name {
                        diff_items_written += 1;
                    }
                    count_writer.add(cur_symbol);
                    let head_pos = block_id * max_block_size
                        + inputs.minus_pos.read_from(block_id as usize).to_u64();
                    let permute_block = (head_pos / max_permute_block_size) as usize;
                    pos_writer.write_to(permute_block, O::from_u64(head_pos));
                    pos_writer.write_to(permute_block, O::from_u64(diff_items_written - 1));
                    cur_substring_name_snapshot = cur_substring_name;
                    empty_output = false;
                }
            }
        }

        // Drain the heap class of the current symbol.
        while !heap.is_empty() && heap.min_compare(cur_symbol) {
            let (head_char, value) = heap.extract_min();
            let value = value.to_u64();
            let is_different = value & msb_bit != 0;
            let block_id = value & !msb_bit;

            cur_substring_name += (was_extract_min && is_different) as u64;
            if is_different {
                current_timestamp += 1;
            }
            was_extract_min = true;
            block_count[block_id as usize] += 1;
            let at_block_beg =
                block_count[block_id as usize] == minus_block_count_targets[block_id as usize];

            let is_star = inputs.minus_type.read_from(block_id as usize);
            if block_id > 0 || !at_block_beg {
                if !is_star {
                    let prev_char = inputs.symbols.read_from(block_id as usize).to_u64();
                    let mut heap_value = block_id - at_block_beg as u64;
                    if symbol_timestamps[prev_char as usize] != current_timestamp {
                        heap_value |= msb_bit;
                    }
                    heap.push(prev_char, XBI::from_u64(heap_value));
                    symbol_timestamps[prev_char as usize] = current_timestamp;
                } else {
                    if empty_output || cur_substring_name_snapshot != cur_substring_name {
                        diff_items_written += 1;
                    }
                    count_writer.add(head_char);
                    let head_pos = block_id * max_block_size
                        + inputs.minus_pos.read_from(block_id as usize).to_u64();
                    let permute_block = (head_pos / max_permute_block_size) as usize;
                    pos_writer.write_to(permute_block, O::from_u64(head_pos));
                    pos_writer.write_to(permute_block, O::from_u64(diff_items_written - 1));
                    cur_substring_name_snapshot = cur_substring_name;
                    empty_output = false;
                }
            }
        }

        // Induce from the plus-star substrings with this head symbol.
        let plus_substring_count = if inputs.plus_count.is_empty() {
            0
        } else {
            inputs.plus_count.read().to_u64()
        };
        for _ in 0..plus_substring_count {
            let block_id = inputs.plus_pos.read().to_u64();
            block_count[block_id as usize] += 1;
            let at_block_beg =
                block_count[block_id as usize] == minus_block_count_targets[block_id as usize];

            if !was_plus_substring || inputs.plus_diff.read() {
                current_timestamp += 1;
            }
            was_plus_substring = true;
            let prev_char = inputs.symbols.read_from(block_id as usize).to_u64();
            let mut heap_value = block_id - at_block_beg as u64;
            if symbol_timestamps[prev_char as usize] != current_timestamp {
                heap_value |= msb_bit;
            }
            heap.push(prev_char, XBI::from_u64(heap_value));
            symbol_timestamps[prev_char as usize] = current_timestamp;
        }

        cur_symbol += 1;
    }

    *total_io_volume += heap.io_volume() + inputs.bytes_read() + pos_writer.bytes_written();
    *total_io_volume += count_writer.writer.bytes_written();
    pos_writer.finish()?;
    count_writer.finish()?;
    Ok(diff_items_written)
}

/// Large-alphabet variant: explicit tail names in the heap value instead of
/// the σ-sized timestamp table.
#[allow(clippy::too_many_arguments)]
fn em_induce_minus_star_substrings_large_alphabet<C, O, BO, BI, XBI>(
    text_length: u64,
    max_block_size: u64,
    text_alphabet_size: u64,
    ram_use: u64,
    max_permute_block_size: u64,
    last_text_symbol: u64,
    minus_block_count_targets: &[u64],
    mut inputs: MinusStageInputs<C, O, BO, BI>,
    tempfile_base: &Path,
    output_count_filename: &Path,
    output_pos_filenames: &[PathBuf],
    total_io_volume: &mut u64,
) -> Result<u64>
where
    C: UInt,
    O: UInt,
    BO: UInt,
    BI: UInt,
    XBI: UInt,
{
    let n_blocks = text_length.div_ceil(max_block_size);
    let tail_minus_bit = 1u64 << (8 * XBI::BYTES - 1);
    assert!(tail_minus_bit > n_blocks - 1, "extended block id type too narrow");

    let radix_logs = radix_logs_for_bits(bits_for(text_alphabet_size.saturating_sub(1)), 10);
    let mut heap: EmRadixHeap<u64, (XBI, O)> =
        EmRadixHeap::new(&radix_logs, tempfile_base, ram_use)?;

    let n_permute_blocks = text_length.div_ceil(max_permute_block_size);
    let mut pos_writer = MultiStreamWriter::<O>::new(
        output_pos_filenames,
        stream_buf_bytes(ram_use, n_permute_blocks),
        4,
    )?;
    let mut count_writer = CountFile::<O>::new(output_count_filename, text_alphabet_size)?;

    let mut block_count = vec![0u64; n_blocks as usize];
    let mut was_extract_min = false;
    let mut was_plus_name = false;
    let mut empty_output = true;
    let mut is_prev_tail_minus = false;
    let mut is_prev_tail_name_defined = false;
    let mut prev_head_char = 0u64;
    let mut prev_tail_name = 0u64;
    let mut diff_substrings = 0u64;
    let mut diff_snapshot = 0u64;
    let mut diff_items_written = 0u64;
    let mut cur_plus_name = 0u64;
    let mut cur_symbol = 0u64;

    // Handles one extracted (or simulated) minus item.
    macro_rules! process {
        ($head_char:expr, $block_id:expr, $tail_name:expr, $is_tail_minus:expr, $name_defined:expr) => {{
            let head_char: u64 = $head_char;
            let block_id: u64 = $block_id;
            let tail_name: u64 = $tail_name;
            let is_tail_minus: bool = $is_tail_minus;

            if !was_extract_min
                || !is_prev_tail_name_defined
                || is_prev_tail_minus != is_tail_minus
                || prev_head_char != head_char
                || prev_tail_name != tail_name
            {
                diff_substrings += 1;
            }
            was_extract_min = true;

            block_count[block_id as usize] += 1;
            let at_block_beg =
                block_count[block_id as usize] == minus_block_count_targets[block_id as usize];

            let is_star = inputs.minus_type.read_from(block_id as usize);
            if block_id > 0 || !at_block_beg {
                if !is_star {
                    let prev_char = inputs.symbols.read_from(block_id as usize).to_u64();
                    let prev_block = block_id - at_block_beg as u64;
                    heap.push(
                        prev_char,
                        (
                            XBI::from_u64(prev_block | tail_minus_bit),
                            O::from_u64(diff_substrings - 1),
                        ),
                    );
                } else {
                    if empty_output || diff_snapshot != diff_substrings {
                        diff_items_written += 1;
                    }
                    count_writer.add(head_char);
                    let head_pos = block_id * max_block_size
                        + inputs.minus_pos.read_from(block_id as usize).to_u64();
                    let permute_block = (head_pos / max_permute_block_size) as usize;
                    pos_writer.write_to(permute_block, O::from_u64(head_pos));
                    pos_writer.write_to(permute_block, O::from_u64(diff_items_written - 1));
                    diff_snapshot = diff_substrings;
                    empty_output = false;
                }
            }

            prev_head_char = head_char;
            prev_tail_name = tail_name;
            is_prev_tail_minus = is_tail_minus;
            is_prev_tail_name_defined = $name_defined;
        }};
    }

    while cur_symbol <= last_text_symbol
        || !inputs.plus_count.is_empty()
        || !heap.is_empty()
    {
        if cur_symbol == last_text_symbol {
            let block_id = (text_length - 1) / max_block_size;
            process!(cur_symbol, block_id, 0, true, false);
        }

        while !heap.is_empty() && heap.min_compare(cur_symbol) {
            let (head_char, (ext, tail_name)) = heap.extract_min();
            let ext = ext.to_u64();
            let is_tail_minus = ext & tail_minus_bit != 0;
            let block_id = ext & !tail_minus_bit;
            process!(head_char, block_id, tail_name.to_u64(), is_tail_minus, true);
        }

        let plus_substring_count = if inputs.plus_count.is_empty() {
            0
        } else {
            inputs.plus_count.read().to_u64()
        };
        for _ in 0..plus_substring_count {
            let block_id = inputs.plus_pos.read().to_u64();
            block_count[block_id as usize] += 1;
            let at_block_beg =
                block_count[block_id as usize] == minus_block_count_targets[block_id as usize];

            if was_plus_name && inputs.plus_diff.read() {
                cur_plus_name += 1;
            }
            was_plus_name = true;
            let prev_char = inputs.symbols.read_from(block_id as usize).to_u64();
            let prev_block = block_id - at_block_beg as u64;
            heap.push(
                prev_char,
                (XBI::from_u64(prev_block), O::from_u64(cur_plus_name)),
            );
        }

        cur_symbol += 1;
    }

    *total_io_volume += heap.io_volume() + inputs.bytes_read() + pos_writer.bytes_written();
    *total_io_volume += count_writer.writer.bytes_written();
    pos_writer.finish()?;
    count_writer.finish()?;
    Ok(diff_items_written)
}

/// Runs the whole substring stage of one recursion level and returns the
/// number of distinct minus-star substring names.
///
/// Produces, per permute block, the lexicographically sorted
/// `(text_offset, name)` pairs of the minus-star substrings, and the
/// per-symbol minus-star count file consumed by the final induction.
#[allow(clippy::too_many_arguments)]
pub(crate) fn em_induce_minus_star_substrings<C: UInt, O: UInt>(
    text_length: u64,
    text_alphabet_size: u64,
    max_block_size: u64,
    ram_use: u64,
    max_permute_block_size: u64,
    text_filename: &Path,
    tempfile_base: &Path,
    output_count_filename: &Path,
    output_pos_filenames: &[PathBuf],
    total_io_volume: &mut u64,
) -> Result<u64> {
    let n_blocks = text_length.div_ceil(max_block_size);
    macro_rules! dispatch {
        ($bo:ty, $bi:ty) => {
            substring_stage::<C, O, $bo, $bi>(
                text_length,
                text_alphabet_size,
                max_block_size,
                ram_use,
                max_permute_block_size,
                text_filename,
                tempfile_base,
                output_count_filename,
                output_pos_filenames,
                total_io_volume,
            )
        };
        ($bo:ty) => {
            if n_blocks <= 1 << 8 {
                dispatch!($bo, u8)
            } else if n_blocks <= 1 << 16 {
                dispatch!($bo, u16)
            } else {
                dispatch!($bo, u64)
            }
        };
    }
    if max_block_size <= 1 << 32 {
        dispatch!(u32)
    } else {
        dispatch!(u64)
    }
}

#[allow(clippy::too_many_arguments)]
fn substring_stage<C: UInt, O: UInt, BO: UInt, BI: UInt>(
    text_length: u64,
    text_alphabet_size: u64,
    max_block_size: u64,
    ram_use: u64,
    max_permute_block_size: u64,
    text_filename: &Path,
    tempfile_base: &Path,
    output_count_filename: &Path,
    output_pos_filenames: &[PathBuf],
    total_io_volume: &mut u64,
) -> Result<u64> {
    let n_blocks = text_length.div_ceil(max_block_size);
    debug!(
        "substring stage: length {}, alphabet {}, {} block(s) of {}",
        text_length, text_alphabet_size, n_blocks, max_block_size
    );

    // Internal-memory preprocessing of blocks.
    let streams = SubstringStreams::new(tempfile_base, n_blocks);
    let mut plus_block_count_targets = vec![0u64; n_blocks as usize];
    let mut minus_block_count_targets = vec![0u64; n_blocks as usize];
    im_induce_substrings::<C, BO>(
        text_alphabet_size,
        text_length,
        max_block_size,
        text_filename,
        &streams,
        &mut plus_block_count_targets,
        &mut minus_block_count_targets,
        total_io_volume,
    )?;

    // Induce the plus-star substrings.
    let plus_pos_filename = crate::utils::temp_file_name(tempfile_base);
    let plus_diff_filename = crate::utils::temp_file_name(tempfile_base);
    let plus_count_filename = crate::utils::temp_file_name(tempfile_base);
    em_induce_plus_star_substrings::<C, O, BI>(
        text_length,
        max_block_size,
        text_alphabet_size,
        ram_use,
        &plus_block_count_targets,
        text_filename,
        &plus_pos_filename,
        &plus_diff_filename,
        &plus_count_filename,
        &streams.plus_type,
        &streams.plus_symbols,
        tempfile_base,
        total_io_volume,
    )?;
    for path in streams.plus_type.iter().chain(&streams.plus_symbols) {
        crate::utils::file_delete(path)?;
    }

    let last_text_symbol = crate::utils::read_at::<C>(text_filename, text_length - 1)?.to_u64();

    // Induce and name the minus-star substrings.
    let inputs = MinusStageInputs::<C, O, BO, BI>::open(
        ram_use,
        n_blocks,
        &plus_pos_filename,
        &plus_count_filename,
        &plus_diff_filename,
        &streams,
    )?;
    let small_alphabet = text_alphabet_size <= SMALL_ALPHABET_MAX;
    macro_rules! minus_dispatch {
        ($variant:ident, $xbi:ty) => {
            $variant::<C, O, BO, BI, $xbi>(
                text_length,
                max_block_size,
                text_alphabet_size,
                ram_use,
                max_permute_block_size,
                last_text_symbol,
                &minus_block_count_targets,
                inputs,
                tempfile_base,
                output_count_filename,
                output_pos_filenames,
                total_io_volume,
            )
        };
        ($variant:ident) => {
            if n_blocks <= 1 << 14 {
                minus_dispatch!($variant, u16)
            } else {
                minus_dispatch!($variant, u64)
            }
        };
    }
    let n_names = if small_alphabet {
        minus_dispatch!(em_induce_minus_star_substrings_small_alphabet)?
    } else {
        minus_dispatch!(em_induce_minus_star_substrings_large_alphabet)?
    };

    crate::utils::file_delete(&plus_pos_filename)?;
    crate::utils::file_delete(&plus_diff_filename)?;
    crate::utils::file_delete(&plus_count_filename)?;
    for path in streams
        .minus_type
        .iter()
        .chain(&streams.minus_pos)
        .chain(&streams.minus_symbols)
    {
        crate::utils::file_delete(path)?;
    }

    Ok(n_names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ints::U40;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn suffix_types(text: &[u8]) -> Vec<bool> {
        let n = text.len();
        let mut is_plus = vec![false; n];
        for i in (0..n.saturating_sub(1)).rev() {
            is_plus[i] = match text[i].cmp(&text[i + 1]) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Greater => false,
                std::cmp::Ordering::Equal => is_plus[i + 1],
            };
        }
        is_plus
    }

    fn minus_stars(text: &[u8]) -> Vec<u64> {
        let is_plus = suffix_types(text);
        (1..text.len())
            .filter(|&i| !is_plus[i] && is_plus[i - 1])
            .map(|i| i as u64)
            .collect()
    }

    /// The substring of a minus-star position: up to and including the next
    /// minus-star, or to the end of the text.
    fn star_substring(text: &[u8], stars: &[u64], pos: u64) -> Vec<u8> {
        let end = stars
            .iter()
            .find(|&&s| s > pos)
            .map(|&s| s as usize + 1)
            .unwrap_or(text.len());
        text[pos as usize..end].to_vec()
    }

    fn check_naming(text: &[u8], sigma: u64, ram_use: u64, max_permute_block_size: u64) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("stage");
        let text_path = dir.path().join("text");
        crate::utils::write_all(&text_path, text).unwrap();

        let text_length = text.len() as u64;
        let n_permute_blocks = text_length.div_ceil(max_permute_block_size);
        let pos_filenames = crate::utils::temp_file_names(&base, n_permute_blocks as usize);
        let count_filename = crate::utils::temp_file_name(&base);
        let max_block_size = (text_length / 3).max(1);
        let mut io_volume = 0;
        let n_names = em_induce_minus_star_substrings::<u8, U40>(
            text_length,
            sigma,
            max_block_size,
            ram_use,
            max_permute_block_size,
            &text_path,
            &base,
            &count_filename,
            &pos_filenames,
            &mut io_volume,
        )
        .unwrap();

        let stars = minus_stars(text);
        let mut seen: Vec<(u64, u64)> = Vec::new();
        for (permute_block, path) in pos_filenames.iter().enumerate() {
            let pairs = crate::utils::read_all::<U40>(path).unwrap();
            assert_eq!(pairs.len() % 2, 0);
            let mut prev: Option<Vec<u8>> = None;
            for pair in pairs.chunks_exact(2) {
                let (pos, name) = (pair[0].to_u64(), pair[1].to_u64());
                // Partition: every pair sits in the permute block of its
                // position, in ascending substring order.
                assert_eq!(pos / max_permute_block_size, permute_block as u64);
                assert!(stars.contains(&pos));
                let substring = star_substring(text, &stars, pos);
                if let Some(prev) = prev {
                    assert!(prev <= substring);
                }
                prev = Some(substring);
                seen.push((pos, name));
            }
        }
        assert_eq!(seen.len(), stars.len());

        // Naming: names are order-isomorphic to the substrings.
        for &(pos_a, name_a) in &seen {
            for &(pos_b, name_b) in &seen {
                let sub_a = star_substring(text, &stars, pos_a);
                let sub_b = star_substring(text, &stars, pos_b);
                assert_eq!(sub_a.cmp(&sub_b), name_a.cmp(&name_b), "positions {} and {}", pos_a, pos_b);
            }
        }
        let mut names: Vec<u64> = seen.iter().map(|&(_, name)| name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len() as u64, n_names);

        // Count consistency: one entry per symbol, counting the minus-star
        // head symbols.
        let counts = crate::utils::read_all::<U40>(&count_filename).unwrap();
        assert_eq!(counts.len() as u64, sigma);
        for (symbol, count) in counts.iter().enumerate() {
            let expected = stars
                .iter()
                .filter(|&&pos| text[pos as usize] as u64 == symbol as u64)
                .count() as u64;
            assert_eq!(count.to_u64(), expected, "symbol {}", symbol);
        }
    }

    #[test]
    fn test_naming_partition_counts() {
        check_naming(b"mississippi", 256, 1 << 10, 4);
        check_naming(b"abracadabra", 256, 64, 5);
        check_naming(b"aaaaaaa", 256, 64, 3);
        let mut rng = StdRng::seed_from_u64(0x9A3);
        for _ in 0..10 {
            let n = rng.random_range(2..400);
            let sigma = [2u64, 6, 256][rng.random_range(0..3)];
            let text: Vec<u8> = (0..n).map(|_| rng.random_range(0..sigma) as u8).collect();
            let permute = rng.random_range(1..=n as u64);
            check_naming(&text, sigma, rng.random_range(40..2048), permute);
        }
    }
}
