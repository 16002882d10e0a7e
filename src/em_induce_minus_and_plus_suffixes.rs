/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The final suffix induction: the minus pass that writes the suffix array,
//! and the driver chaining the whole final stage of one recursion level
//! (block preprocessing → plus pass → minus pass).
//!
//! The minus pass walks symbols from lowest to highest, seeded with the last
//! suffix of the text, draining minus suffixes from the heap and interleaving
//! the per-symbol batches of plus suffixes produced by the plus pass (read
//! backward, so they arrive in ascending rank order). Each processed suffix
//! is handed to an [`SaSink`]: the top level writes a flat suffix array
//! file, while recursive calls distribute positions into the caller's
//! permute blocks together with a stream of permute-block ids.

use crate::em_induce_plus_star_substrings::stream_buf_bytes;
use crate::em_induce_plus_suffixes::em_induce_plus_suffixes;
use crate::em_radix_heap::EmRadixHeap;
use crate::im_induce_suffixes::{im_induce_suffixes, SuffixStreams};
use crate::ints::UInt;
use crate::io::{
    BackwardBitStreamReader, BackwardStreamReader, MultiBitStreamReader, MultiStreamReader,
    MultiStreamWriter, StreamWriter,
};
use crate::radix_heap::{bits_for, radix_logs_for_bits};
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Where the final induction sends the sorted suffixes.
pub(crate) trait SaSink {
    fn write(&mut self, pos: u64);
    fn bytes_written(&self) -> u64;
    fn finish(self) -> Result<u64>
    where
        Self: Sized;
}

/// Writes a flat suffix array file (the top level of the recursion).
pub(crate) struct FileSink<O: UInt> {
    writer: StreamWriter<O>,
}

impl<O: UInt> FileSink<O> {
    pub fn new(path: &Path) -> Result<Self> {
        Ok(FileSink {
            writer: StreamWriter::new(path)?,
        })
    }
}

impl<O: UInt> SaSink for FileSink<O> {
    #[inline]
    fn write(&mut self, pos: u64) {
        self.writer.push(O::from_u64(pos));
    }

    fn bytes_written(&self) -> u64 {
        self.writer.bytes_written()
    }

    fn finish(self) -> Result<u64> {
        self.writer.finish()
    }
}

/// Distributes suffixes into the caller's permute blocks (recursive calls):
/// for each suffix, its permute-block id goes to one stream and its offset
/// within the block's span to the block's own file.
pub(crate) struct PermuteBlockSink<O: UInt> {
    /// Exclusive prefix sums of the caller's per-permute-block counts.
    block_ends: Vec<u64>,
    pos_writer: MultiStreamWriter<O>,
    id_writer: StreamWriter<u16>,
}

impl<O: UInt> PermuteBlockSink<O> {
    pub fn new(
        block_count: &[u64],
        pos_filenames: &[PathBuf],
        block_ids_filename: &Path,
        buf_bytes_per_stream: usize,
    ) -> Result<Self> {
        let mut block_ends = Vec::with_capacity(block_count.len());
        let mut sum = 0;
        for &count in block_count {
            sum += count;
            block_ends.push(sum);
        }
        Ok(PermuteBlockSink {
            block_ends,
            pos_writer: MultiStreamWriter::new(pos_filenames, buf_bytes_per_stream, 4)?,
            id_writer: StreamWriter::new(block_ids_filename)?,
        })
    }
}

impl<O: UInt> SaSink for PermuteBlockSink<O> {
    fn write(&mut self, pos: u64) {
        let block = self.block_ends.partition_point(|&end| end <= pos);
        let block_beg = if block == 0 {
            0
        } else {
            self.block_ends[block - 1]
        };
        self.id_writer.push(block as u16);
        self.pos_writer.write_to(block, O::from_u64(pos - block_beg));
    }

    fn bytes_written(&self) -> u64 {
        self.pos_writer.bytes_written() + self.id_writer.bytes_written()
    }

    fn finish(self) -> Result<u64> {
        Ok(self.pos_writer.finish()? + self.id_writer.finish()?)
    }
}

/// The minus pass: drains minus suffixes by ascending symbol, interleaving
/// the plus-suffix batches, and hands every suffix to the sink in rank order.
#[allow(clippy::too_many_arguments)]
fn em_minus_pass<C: UInt, O: UInt, BI: UInt, S: SaSink>(
    text_alphabet_size: u64,
    text_length: u64,
    max_block_size: u64,
    ram_use: u64,
    last_text_symbol: u64,
    plus_pos_filename: &Path,
    plus_type_filename: &Path,
    plus_count_filename: &Path,
    streams: &SuffixStreams,
    tempfile_base: &Path,
    sink: &mut S,
    total_io_volume: &mut u64,
) -> Result<()> {
    let n_blocks = text_length.div_ceil(max_block_size);
    assert!(BI::MAX >= n_blocks - 1, "block id type too narrow");
    assert!(C::MAX >= text_alphabet_size - 1, "char type too narrow for alphabet");
    assert!(O::MAX >= text_length, "text offset type too narrow");

    let radix_logs = radix_logs_for_bits(bits_for(text_alphabet_size.saturating_sub(1)), 10);
    let mut heap: EmRadixHeap<u64, BI> = EmRadixHeap::new(&radix_logs, tempfile_base, ram_use)?;

    let mut plus_pos_reader = BackwardStreamReader::<O>::new(plus_pos_filename)?;
    let mut plus_type_reader = BackwardBitStreamReader::new(plus_type_filename)?;
    let mut plus_count_reader = BackwardStreamReader::<O>::new(plus_count_filename)?;

    let buf_bytes = stream_buf_bytes(ram_use, n_blocks);
    let mut minus_pos_reader = MultiStreamReader::<O>::new(&streams.minus_pos, buf_bytes)?;
    let mut minus_type_reader = MultiBitStreamReader::new(&streams.minus_type, buf_bytes)?;
    let mut symbols_reader = MultiStreamReader::<C>::new(&streams.minus_symbols, buf_bytes)?;

    // The last suffix of the text seeds the induction.
    heap.push(last_text_symbol, BI::from_u64((text_length - 1) / max_block_size));

    let mut cur_symbol = 0u64;
    while !plus_count_reader.is_empty() || !heap.is_empty() {
        // Process the minus suffixes with this head symbol.
        while !heap.is_empty() && heap.min_compare(cur_symbol) {
            let (_, block_id) = heap.extract_min();
            let block_id = block_id.to_u64();
            let block_beg = block_id * max_block_size;
            let pos = block_beg + minus_pos_reader.read_from(block_id as usize).to_u64();
            let is_star = minus_type_reader.read_from(block_id as usize);
            sink.write(pos);

            if pos > 0 && !is_star {
                let prev_char = symbols_reader.read_from(block_id as usize).to_u64();
                let prev_block = block_id - (block_beg == pos) as u64;
                heap.push(prev_char, BI::from_u64(prev_block));
            }
        }

        // Process the plus suffixes with this head symbol.
        if !plus_count_reader.is_empty() {
            let plus_suffix_count = plus_count_reader.read().to_u64();
            for _ in 0..plus_suffix_count {
                let pos = plus_pos_reader.read().to_u64();
                sink.write(pos);
                if plus_type_reader.read() {
                    let block_id = pos / max_block_size;
                    let prev_block = block_id - (block_id * max_block_size == pos) as u64;
                    let prev_char = symbols_reader.read_from(block_id as usize).to_u64();
                    heap.push(prev_char, BI::from_u64(prev_block));
                }
            }
        }

        cur_symbol += 1;
    }

    *total_io_volume += heap.io_volume()
        + plus_pos_reader.bytes_read()
        + plus_type_reader.bytes_read()
        + plus_count_reader.bytes_read()
        + minus_pos_reader.bytes_read()
        + minus_type_reader.bytes_read()
        + symbols_reader.bytes_read()
        + sink.bytes_written();
    Ok(())
}

/// Runs the whole final stage of one recursion level: block preprocessing,
/// the plus pass, and the minus pass writing the suffix array through
/// `sink`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn em_induce_minus_and_plus_suffixes<C: UInt, O: UInt, S: SaSink>(
    text_alphabet_size: u64,
    text_length: u64,
    max_block_size: u64,
    ram_use: u64,
    minus_pos_n_parts: usize,
    next_block_leftmost_minus_star_plus_rank: &[u64],
    tempfile_base: &Path,
    text_filename: &Path,
    minus_pos_base: &Path,
    minus_count_filename: &Path,
    init_minus_pos_filenames: &[PathBuf],
    sink: S,
    total_io_volume: &mut u64,
) -> Result<()> {
    let n_blocks = text_length.div_ceil(max_block_size);
    macro_rules! dispatch {
        ($bi:ty) => {
            final_stage::<C, O, $bi, S>(
                text_alphabet_size,
                text_length,
                max_block_size,
                ram_use,
                minus_pos_n_parts,
                next_block_leftmost_minus_star_plus_rank,
                tempfile_base,
                text_filename,
                minus_pos_base,
                minus_count_filename,
                init_minus_pos_filenames,
                sink,
                total_io_volume,
            )
        };
    }
    if n_blocks <= 1 << 8 {
        dispatch!(u8)
    } else if n_blocks <= 1 << 16 {
        dispatch!(u16)
    } else {
        dispatch!(u64)
    }
}

#[allow(clippy::too_many_arguments)]
fn final_stage<C: UInt, O: UInt, BI: UInt, S: SaSink>(
    text_alphabet_size: u64,
    text_length: u64,
    max_block_size: u64,
    ram_use: u64,
    minus_pos_n_parts: usize,
    next_block_leftmost_minus_star_plus_rank: &[u64],
    tempfile_base: &Path,
    text_filename: &Path,
    minus_pos_base: &Path,
    minus_count_filename: &Path,
    init_minus_pos_filenames: &[PathBuf],
    mut sink: S,
    total_io_volume: &mut u64,
) -> Result<()> {
    let n_blocks = text_length.div_ceil(max_block_size);
    let last_text_symbol =
        crate::utils::read_at::<C>(text_filename, text_length - 1)?.to_u64();

    let streams = SuffixStreams::new(tempfile_base, n_blocks);
    let mut block_count_targets = vec![u64::MAX; n_blocks as usize];
    im_induce_suffixes::<C, O>(
        text_alphabet_size,
        text_length,
        max_block_size,
        next_block_leftmost_minus_star_plus_rank,
        text_filename,
        init_minus_pos_filenames,
        &streams,
        &mut block_count_targets,
        total_io_volume,
    )?;

    let plus_pos_filename = crate::utils::temp_file_name(tempfile_base);
    let plus_type_filename = crate::utils::temp_file_name(tempfile_base);
    let plus_count_filename = crate::utils::temp_file_name(tempfile_base);
    em_induce_plus_suffixes::<C, O, BI>(
        text_alphabet_size,
        text_length,
        max_block_size,
        ram_use,
        minus_pos_n_parts,
        &block_count_targets,
        &plus_pos_filename,
        &plus_type_filename,
        &plus_count_filename,
        minus_pos_base,
        minus_count_filename,
        &streams,
        tempfile_base,
        total_io_volume,
    )?;
    crate::utils::file_delete(minus_count_filename)?;
    for path in streams
        .plus_pos
        .iter()
        .chain(&streams.plus_type)
        .chain(&streams.plus_symbols)
    {
        crate::utils::file_delete(path)?;
    }

    em_minus_pass::<C, O, BI, S>(
        text_alphabet_size,
        text_length,
        max_block_size,
        ram_use,
        last_text_symbol,
        &plus_pos_filename,
        &plus_type_filename,
        &plus_count_filename,
        &streams,
        tempfile_base,
        &mut sink,
        total_io_volume,
    )?;
    sink.finish()?;

    crate::utils::file_delete(&plus_pos_filename)?;
    crate::utils::file_delete(&plus_type_filename)?;
    crate::utils::file_delete(&plus_count_filename)?;
    for path in streams
        .minus_pos
        .iter()
        .chain(&streams.minus_type)
        .chain(&streams.minus_symbols)
    {
        crate::utils::file_delete(path)?;
    }
    Ok(())
}
