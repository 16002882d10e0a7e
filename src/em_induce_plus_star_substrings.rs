/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The external-memory plus-star substring inducer.
//!
//! A backward scan of the text seeds the radix heap with every minus-star
//! position; the induction then walks symbols from highest to lowest (keys
//! are inverted, `σ-1-c`, since the heap only extracts minima) and drains one
//! key class at a time. Plus continuations are pushed with their key shifted
//! up by one, so plus items with head `c` drain together with, and after,
//! the minus-star seeds with head `c+1`: a plus substring is smaller than
//! every minus-star substring with the same head, and a substring that is a
//! proper prefix of another ranks above it in this pass.
//!
//! Output, in reverse lexicographic order of the plus-star substrings: the
//! block id of each substring, one difference bit per emission after the
//! first, and the per-symbol count file that drives the minus pass batches.

use crate::em_radix_heap::EmRadixHeap;
use crate::ints::{Serial, UInt};
use crate::io::{
    BackwardStreamReader, BitStreamWriter, MultiBitStreamReader, MultiStreamReader, StreamWriter,
};
use crate::radix_heap::{bits_for, radix_logs_for_bits};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Per-stream buffer bytes for a fan of `n_streams` logical streams under a
/// RAM budget, clamped to sane bounds.
pub(crate) fn stream_buf_bytes(ram_use: u64, n_streams: u64) -> usize {
    (ram_use / (8 * n_streams.max(1))).clamp(1 << 12, 1 << 18) as usize
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn em_induce_plus_star_substrings<C: UInt, O: UInt, BI: UInt>(
    text_length: u64,
    max_block_size: u64,
    text_alphabet_size: u64,
    ram_use: u64,
    plus_block_count_targets: &[u64],
    text_filename: &Path,
    output_pos_filename: &Path,
    output_diff_filename: &Path,
    output_count_filename: &Path,
    plus_type_filenames: &[PathBuf],
    plus_symbols_filenames: &[PathBuf],
    tempfile_base: &Path,
    total_io_volume: &mut u64,
) -> Result<()> {
    let n_blocks = text_length.div_ceil(max_block_size);
    // The extended block id carries two flag bits next to the block id.
    if n_blocks <= (1u64 << 14) {
        em_induce_plus_star_substrings_ext::<C, O, BI, u16>(
            text_length,
            max_block_size,
            text_alphabet_size,
            ram_use,
            plus_block_count_targets,
            text_filename,
            output_pos_filename,
            output_diff_filename,
            output_count_filename,
            plus_type_filenames,
            plus_symbols_filenames,
            tempfile_base,
            total_io_volume,
        )
    } else {
        em_induce_plus_star_substrings_ext::<C, O, BI, u64>(
            text_length,
            max_block_size,
            text_alphabet_size,
            ram_use,
            plus_block_count_targets,
            text_filename,
            output_pos_filename,
            output_diff_filename,
            output_count_filename,
            plus_type_filenames,
            plus_symbols_filenames,
            tempfile_base,
            total_io_volume,
        )
    }
}

#[allow(clippy::too_many_arguments)]
fn em_induce_plus_star_substrings_ext<C: UInt, O: UInt, BI: UInt, XBI: UInt>(
    text_length: u64,
    max_block_size: u64,
    text_alphabet_size: u64,
    ram_use: u64,
    plus_block_count_targets: &[u64],
    text_filename: &Path,
    output_pos_filename: &Path,
    output_diff_filename: &Path,
    output_count_filename: &Path,
    plus_type_filenames: &[PathBuf],
    plus_symbols_filenames: &[PathBuf],
    tempfile_base: &Path,
    total_io_volume: &mut u64,
) -> Result<()> {
    let n_blocks = text_length.div_ceil(max_block_size);
    let sigma = text_alphabet_size;
    let head_plus_bit = 1u64 << (8 * XBI::BYTES - 1);
    let tail_plus_bit = head_plus_bit >> 1;
    let block_mask = tail_plus_bit - 1;

    assert!(text_length > 0, "empty text");
    assert!(BI::MAX >= n_blocks - 1, "block id type too narrow");
    assert!(tail_plus_bit > n_blocks - 1, "extended block id type too narrow");
    assert!(C::MAX >= sigma - 1, "char type too narrow for alphabet");
    assert!(O::MAX >= text_length, "text offset type too narrow");

    let radix_logs = radix_logs_for_bits(bits_for(sigma.saturating_sub(1)), 10);
    let mut heap: EmRadixHeap<u64, (XBI, O)> =
        EmRadixHeap::new(&radix_logs, tempfile_base, ram_use)?;

    // Seed the heap with every minus-star position, scanning the text
    // backward and classifying on the fly. Seeds with equal head symbols keep
    // their descending text order in the bucket FIFO.
    {
        let mut text_reader = BackwardStreamReader::<C>::new(text_filename)?;
        let mut succ_symbol = text_reader.read().to_u64();
        let mut succ_is_plus = false;
        for pos in (0..text_length - 1).rev() {
            let symbol = text_reader.read().to_u64();
            let is_plus =
                symbol < succ_symbol || (symbol == succ_symbol && succ_is_plus);
            if is_plus && !succ_is_plus {
                // Position pos + 1 is a minus star.
                let block_id = (pos + 1) / max_block_size;
                heap.push(
                    sigma - 1 - succ_symbol,
                    (XBI::from_u64(block_id), O::from_u64(0)),
                );
            }
            succ_symbol = symbol;
            succ_is_plus = is_plus;
        }
        *total_io_volume += text_reader.bytes_read();
    }

    let buf_bytes = stream_buf_bytes(ram_use, n_blocks);
    let mut plus_type_reader = MultiBitStreamReader::new(plus_type_filenames, buf_bytes)?;
    let mut symbols_reader = MultiStreamReader::<C>::new(plus_symbols_filenames, buf_bytes)?;
    let mut pos_writer = StreamWriter::<BI>::new(output_pos_filename)?;
    let mut diff_writer = BitStreamWriter::new(output_diff_filename)?;
    let mut count_writer = StreamWriter::<O>::new(output_count_filename)?;

    let mut block_count = vec![0u64; n_blocks as usize];
    let mut empty_output = true;
    let mut was_extract_min = false;
    let mut is_prev_head_plus = false;
    let mut is_prev_tail_plus = false;
    let mut prev_head_char = 0u64;
    let mut prev_tail_name = 0u64;
    let mut diff_substrings = 0u64;
    let mut diff_snapshot = 0u64;
    let mut prev_written_head_char = 0u64;
    let mut cur_bucket_size = 0u64;

    while !heap.is_empty() {
        let (key, (ext, tail_name)) = heap.extract_min();
        let ext = ext.to_u64();
        let is_head_plus = ext & head_plus_bit != 0;
        let is_tail_plus = ext & tail_plus_bit != 0;
        let block_id = ext & block_mask;
        let tail_name = tail_name.to_u64();
        let head_char = sigma - 1 - key - is_head_plus as u64;

        block_count[block_id as usize] += 1;
        let head_pos_at_block_beg =
            block_count[block_id as usize] == plus_block_count_targets[block_id as usize];

        if is_head_plus {
            // Distinct-substring counter over consecutive extractions.
            if !was_extract_min
                || !is_prev_head_plus
                || is_prev_tail_plus != is_tail_plus
                || prev_head_char != head_char
                || prev_tail_name != tail_name
            {
                diff_substrings += 1;
            }

            let is_star = plus_type_reader.read_from(block_id as usize);
            if block_id > 0 || !head_pos_at_block_beg {
                if !is_star {
                    let prev_char = symbols_reader.read_from(block_id as usize).to_u64();
                    let prev_block = block_id - head_pos_at_block_beg as u64;
                    heap.push(
                        sigma - 1 - (prev_char + 1),
                        (
                            XBI::from_u64(prev_block | head_plus_bit | tail_plus_bit),
                            O::from_u64(diff_substrings - 1),
                        ),
                    );
                } else {
                    let is_next_diff = empty_output || diff_snapshot != diff_substrings;
                    if !empty_output {
                        diff_writer.push(is_next_diff);
                    }
                    pos_writer.push(BI::from_u64(block_id));

                    // Per-symbol counts, head symbols descending.
                    if empty_output || head_char != prev_written_head_char {
                        if !empty_output {
                            count_writer.push(O::from_u64(cur_bucket_size));
                            for _ in head_char + 1..prev_written_head_char {
                                count_writer.push(O::from_u64(0));
                            }
                        }
                        cur_bucket_size = 0;
                        prev_written_head_char = head_char;
                    }
                    cur_bucket_size += 1;

                    diff_snapshot = diff_substrings;
                    empty_output = false;
                }
            }
        } else {
            // A minus-star seed: its predecessor starts a plus chain, and the
            // seed's head symbol becomes the chain's tail name.
            let prev_char = symbols_reader.read_from(block_id as usize).to_u64();
            let prev_block = block_id - head_pos_at_block_beg as u64;
            heap.push(
                sigma - 1 - (prev_char + 1),
                (
                    XBI::from_u64(prev_block | head_plus_bit),
                    O::from_u64(head_char),
                ),
            );
        }

        was_extract_min = true;
        is_prev_head_plus = is_head_plus;
        is_prev_tail_plus = is_tail_plus;
        prev_head_char = head_char;
        prev_tail_name = tail_name;
    }

    if !empty_output {
        count_writer.push(O::from_u64(cur_bucket_size));
        for _ in 0..prev_written_head_char {
            count_writer.push(O::from_u64(0));
        }
    }

    *total_io_volume += heap.io_volume()
        + plus_type_reader.bytes_read()
        + symbols_reader.bytes_read()
        + pos_writer.bytes_written()
        + diff_writer.bytes_written()
        + count_writer.bytes_written();
    pos_writer.finish()?;
    diff_writer.finish()?;
    count_writer.finish()?;
    Ok(())
}
