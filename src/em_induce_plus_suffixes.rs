/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The plus pass of the final suffix induction.
//!
//! Walks symbols from highest to lowest with inverted keys. Seeds arrive as
//! per-symbol batches of lexicographically sorted minus-star suffixes (block
//! ids read backward through the multi-part stream, counts from the σ-entry
//! minus-star count file); every drained item is a plus suffix, written out
//! with an is-star bit and counted per head symbol for the minus pass.

use crate::em_induce_plus_star_substrings::stream_buf_bytes;
use crate::em_radix_heap::EmRadixHeap;
use crate::im_induce_suffixes::SuffixStreams;
use crate::ints::UInt;
use crate::io::{
    BackwardMultipartReader, BackwardStreamReader, BitStreamWriter, MultiBitStreamReader,
    MultiStreamReader, StreamWriter,
};
use crate::radix_heap::{bits_for, radix_logs_for_bits};
use anyhow::Result;
use std::path::Path;

#[allow(clippy::too_many_arguments)]
pub(crate) fn em_induce_plus_suffixes<C: UInt, O: UInt, BI: UInt>(
    text_alphabet_size: u64,
    text_length: u64,
    max_block_size: u64,
    ram_use: u64,
    minus_pos_n_parts: usize,
    block_count_targets: &[u64],
    output_pos_filename: &Path,
    output_type_filename: &Path,
    output_count_filename: &Path,
    minus_pos_base: &Path,
    minus_count_filename: &Path,
    streams: &SuffixStreams,
    tempfile_base: &Path,
    total_io_volume: &mut u64,
) -> Result<()> {
    let n_blocks = text_length.div_ceil(max_block_size);
    let sigma = text_alphabet_size;
    assert!(BI::MAX >= n_blocks - 1, "block id type too narrow");

    let radix_logs = radix_logs_for_bits(bits_for(sigma.saturating_sub(1)), 10);
    let mut heap: EmRadixHeap<u64, BI> = EmRadixHeap::new(&radix_logs, tempfile_base, ram_use)?;

    // Lex-sorted minus-star suffixes, highest first.
    let mut minus_pos_reader =
        BackwardMultipartReader::<u16>::new(minus_pos_base, minus_pos_n_parts)?;
    let mut minus_count_reader = BackwardStreamReader::<O>::new(minus_count_filename)?;

    let buf_bytes = stream_buf_bytes(ram_use, n_blocks);
    let mut plus_pos_reader = MultiStreamReader::<O>::new(&streams.plus_pos, buf_bytes)?;
    let mut plus_type_reader = MultiBitStreamReader::new(&streams.plus_type, buf_bytes)?;
    let mut symbols_reader = MultiStreamReader::<C>::new(&streams.plus_symbols, buf_bytes)?;

    let mut output_pos_writer = StreamWriter::<O>::new(output_pos_filename)?;
    let mut output_type_writer = BitStreamWriter::new(output_type_filename)?;
    let mut output_count_writer = StreamWriter::<O>::new(output_count_filename)?;

    let mut block_count = vec![0u64; n_blocks as usize];
    let mut empty_output = true;
    let mut prev_written_head_char = 0u64;
    let mut cur_bucket_size = 0u64;

    for cur_char in (0..sigma).rev() {
        // Process the plus suffixes with this head symbol.
        while !heap.is_empty() && heap.min_compare(sigma - 1 - cur_char) {
            let (_, block_id) = heap.extract_min();
            let block_id = block_id.to_u64();
            let pos = plus_pos_reader.read_from(block_id as usize).to_u64();
            output_pos_writer.push(O::from_u64(pos));
            let is_star = plus_type_reader.read_from(block_id as usize);
            output_type_writer.push(is_star);

            // Per-symbol counts of plus suffixes, head symbols descending.
            if empty_output || cur_char != prev_written_head_char {
                if !empty_output {
                    output_count_writer.push(O::from_u64(cur_bucket_size));
                    for _ in cur_char + 1..prev_written_head_char {
                        output_count_writer.push(O::from_u64(0));
                    }
                }
                cur_bucket_size = 0;
                prev_written_head_char = cur_char;
            }
            cur_bucket_size += 1;
            empty_output = false;

            if pos > 0 && !is_star {
                let prev_char = symbols_reader.read_from(block_id as usize).to_u64();
                let prev_block = block_id - (block_id * max_block_size == pos) as u64;
                heap.push(sigma - 1 - prev_char, BI::from_u64(prev_block));
            }
        }

        // Seed from the minus-star suffixes with this head symbol.
        let minus_suffix_count = if minus_count_reader.is_empty() {
            0
        } else {
            minus_count_reader.read().to_u64()
        };
        for _ in 0..minus_suffix_count {
            let block_id = minus_pos_reader.read()? as u64;
            block_count[block_id as usize] += 1;
            let at_block_beg =
                block_count[block_id as usize] == block_count_targets[block_id as usize];
            let prev_block = block_id - at_block_beg as u64;
            let prev_char = symbols_reader.read_from(block_id as usize).to_u64();
            heap.push(sigma - 1 - prev_char, BI::from_u64(prev_block));
        }
    }
    assert!(heap.is_empty(), "plus pass left items in the heap");

    if !empty_output {
        output_count_writer.push(O::from_u64(cur_bucket_size));
        for _ in 0..prev_written_head_char {
            output_count_writer.push(O::from_u64(0));
        }
    }

    *total_io_volume += heap.io_volume()
        + minus_pos_reader.bytes_read()
        + minus_count_reader.bytes_read()
        + plus_pos_reader.bytes_read()
        + plus_type_reader.bytes_read()
        + symbols_reader.bytes_read()
        + output_pos_writer.bytes_written()
        + output_type_writer.bytes_written()
        + output_count_writer.bytes_written();
    output_pos_writer.finish()?;
    output_type_writer.finish()?;
    output_count_writer.finish()?;
    Ok(())
}
