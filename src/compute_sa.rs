/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The recursion controller: RAM budgets, the recursive-text builder, the
//! lex↔text permutation around the recursive call, and the entry point.
//!
//! One level of recursion runs: substring stage (naming the minus-star
//! substrings) → recursive text → recursive call on the names → permutation
//! of the returned ranks from lex to text order over induce blocks → final
//! suffix induction. The level's `char_type` is fixed by the caller; the
//! recursive level's is chosen at runtime as the smallest width holding
//! `n_names - 1` and dispatched to monomorphized code.

use crate::em_induce_minus_and_plus_suffixes::{
    em_induce_minus_and_plus_suffixes, FileSink, PermuteBlockSink, SaSink,
};
use crate::em_induce_minus_star_substrings::em_induce_minus_star_substrings;
use crate::em_induce_plus_star_substrings::stream_buf_bytes;
use crate::ints::{Serial, UInt};
use crate::io::{MultiStreamReader, MultipartWriter, StreamReader, StreamWriter};
use crate::utils::{file_delete, file_size, temp_file_name, temp_file_names};
use anyhow::{ensure, Context, Result};
use dsi_progress_logger::prelude::*;
use log::info;
use std::path::{Path, PathBuf};

/// Permute-block and induce-block id streams are 16-bit.
const MAX_STREAM_BLOCKS: u64 = 1 << 16;

/// Statistics of a finished run.
#[derive(Debug, Clone, Copy)]
pub struct SaStats {
    /// Length of the input text in symbols.
    pub text_length: u64,
    /// Total I/O volume over all stages and levels, in bytes.
    pub total_io_volume: u64,
}

/// RAM budget split of one recursion level.
struct Budget {
    max_permute_block_size: u64,
    max_block_size: u64,
    is_small_alphabet: bool,
}

impl Budget {
    /// Closed-form block sizes: the permute pass keeps a dense name array
    /// plus a bitmap per position, the block preprocessor a block of symbols
    /// plus the bucket structures (and, for small alphabets, a σ-sized
    /// offset table).
    fn new<C: UInt, O: UInt>(ram_use: u64, text_alphabet_size: u64) -> Self {
        let offset_bytes = O::BYTES as f64;
        let char_bytes = C::BYTES as f64;
        let max_permute_block_size = ((ram_use as f64) / (offset_bytes + 0.125)).max(1.0) as u64;

        let sigma_table = text_alphabet_size * O::BYTES as u64;
        let (max_block_size, is_small_alphabet) = if sigma_table <= ram_use / 2 {
            let left = (ram_use - sigma_table) as f64;
            (
                (left / (offset_bytes + char_bytes + 0.25)).max(1.0) as u64,
                true,
            )
        } else {
            (
                (ram_use as f64 / (3.0 * char_bytes + 2.0 * offset_bytes + 0.25)).max(1.0) as u64,
                false,
            )
        };
        Budget {
            max_permute_block_size,
            max_block_size,
            is_small_alphabet,
        }
    }
}

/// Builds the recursive text over the substring names and, per permute
/// block, the text-ordered list of in-block minus-star offsets. Consumes and
/// deletes the lex-sorted `(text_offset, name)` streams. Returns the length
/// of the recursive text.
fn create_recursive_text<RC: UInt, O: UInt>(
    text_length: u64,
    max_permute_block_size: u64,
    lex_sorted_filenames: &[PathBuf],
    text_sorted_filenames: &[PathBuf],
    recursive_text_filename: &Path,
    total_io_volume: &mut u64,
) -> Result<u64> {
    let n_permute_blocks = text_length.div_ceil(max_permute_block_size);
    let mut pl = ProgressLogger::default();
    pl.display_memory(true).item_name("block");
    pl.start("Creating the recursive text...");

    let mut used = vec![0u64; (max_permute_block_size as usize).div_ceil(64)];
    let mut names = vec![O::default(); max_permute_block_size as usize];
    let mut text_writer = StreamWriter::<RC>::new(recursive_text_filename)?;
    let mut io_volume = 0u64;
    let mut new_text_length = 0u64;

    for permute_block_id in 0..n_permute_blocks {
        let block_beg = permute_block_id * max_permute_block_size;
        let block_end = (block_beg + max_permute_block_size).min(text_length);
        used.fill(0);

        // Scatter the names into text order.
        let mut reader =
            StreamReader::<O>::new(&lex_sorted_filenames[permute_block_id as usize])?;
        while !reader.is_empty() {
            let offset = (reader.read().to_u64() - block_beg) as usize;
            names[offset] = reader.read();
            used[offset >> 6] |= 1 << (offset & 63);
        }
        io_volume += reader.bytes_read();
        drop(reader);

        let mut pos_writer =
            StreamWriter::<O>::new(&text_sorted_filenames[permute_block_id as usize])?;
        for offset in 0..(block_end - block_beg) as usize {
            if used[offset >> 6] & (1 << (offset & 63)) != 0 {
                pos_writer.push(O::from_u64(offset as u64));
                text_writer.push(RC::from_u64(names[offset].to_u64()));
                new_text_length += 1;
            }
        }
        io_volume += pos_writer.finish()?;
        file_delete(&lex_sorted_filenames[permute_block_id as usize])?;
        pl.light_update();
    }

    io_volume += text_writer.finish()?;
    *total_io_volume += io_volume;
    pl.done();
    Ok(new_text_length)
}

/// Permutes the lex-sorted minus-star suffixes from the recursion's
/// permute-block partition into the induce-block partition of this level,
/// emitting the induce-block-id multipart stream and recording, for each
/// induce block, the rank at which the next block's leftmost minus-star
/// sits. Returns the number of parts of the block-id stream.
#[allow(clippy::too_many_arguments)]
fn permute_minus_star_suffixes<O: UInt>(
    text_length: u64,
    max_block_size: u64,
    max_permute_block_size: u64,
    ram_use: u64,
    next_block_leftmost_minus_star_plus_rank: &mut [u64],
    tempfile_base: &Path,
    lex_sorted_recursive_filenames: &[PathBuf],
    lex_sorted_recursive_block_ids_filename: &Path,
    text_sorted_filenames: &[PathBuf],
    lex_sorted_minus_star_filenames: &[PathBuf],
    block_ids_base: &Path,
    total_io_volume: &mut u64,
) -> Result<usize> {
    let n_permute_blocks = text_length.div_ceil(max_permute_block_size);
    let n_blocks = text_length.div_ceil(max_block_size);
    let mut io_volume = 0u64;
    info!("Permuting minus-star suffixes from text to lex order");

    // First pass, per permute block: map the recursive ranks through the
    // text-ordered offset array.
    let temp_filenames = temp_file_names(tempfile_base, n_permute_blocks as usize);
    let mut text_sorted = vec![O::default(); max_permute_block_size as usize];
    for permute_block_id in 0..n_permute_blocks as usize {
        let n_suffixes =
            file_size(&text_sorted_filenames[permute_block_id])? / O::BYTES as u64;
        let loaded = crate::utils::read_all::<O>(&text_sorted_filenames[permute_block_id])?;
        text_sorted[..loaded.len()].copy_from_slice(&loaded);
        io_volume += n_suffixes * O::BYTES as u64;

        let mut rank_reader =
            StreamReader::<O>::new(&lex_sorted_recursive_filenames[permute_block_id])?;
        let mut offset_writer = StreamWriter::<O>::new(&temp_filenames[permute_block_id])?;
        while !rank_reader.is_empty() {
            let rank = rank_reader.read().to_u64() as usize;
            offset_writer.push(text_sorted[rank]);
        }
        io_volume += rank_reader.bytes_read() + offset_writer.finish()?;
        file_delete(&text_sorted_filenames[permute_block_id])?;
        file_delete(&lex_sorted_recursive_filenames[permute_block_id])?;
    }
    drop(text_sorted);

    // Second pass: fuse the per-permute-block streams through the
    // permute-block-id sequence and redistribute into induce blocks.
    let buf_bytes = stream_buf_bytes(ram_use, n_permute_blocks + n_blocks);
    let mut block_ids_reader =
        StreamReader::<u16>::new(lex_sorted_recursive_block_ids_filename)?;
    let mut offsets_reader = MultiStreamReader::<O>::new(&temp_filenames, buf_bytes)?;
    let mut pos_writer =
        crate::io::MultiStreamWriter::<O>::new(lex_sorted_minus_star_filenames, buf_bytes, 4)?;
    let max_part_size = (text_length / 10).max(1 << 20);
    let mut block_ids_writer = MultipartWriter::<u16>::new(block_ids_base, max_part_size)?;

    let mut leftmost_item_in_block = vec![u64::MAX; n_blocks as usize];
    let mut items_written_to_block = vec![0u64; n_blocks as usize];
    while !block_ids_reader.is_empty() {
        let permute_block_id = block_ids_reader.read() as u64;
        let permute_block_beg = permute_block_id * max_permute_block_size;
        let offset = offsets_reader.read_from(permute_block_id as usize).to_u64();
        let pos = permute_block_beg + offset;
        let block_id = pos / max_block_size;
        let block_offset = pos - block_id * max_block_size;
        pos_writer.write_to(block_id as usize, O::from_u64(block_offset));
        block_ids_writer.push(block_id as u16)?;
        items_written_to_block[block_id as usize] += 1;
        if block_id > 0 && block_offset < leftmost_item_in_block[block_id as usize] {
            leftmost_item_in_block[block_id as usize] = block_offset;
            next_block_leftmost_minus_star_plus_rank[block_id as usize - 1] =
                items_written_to_block[block_id as usize - 1];
        }
    }

    io_volume += block_ids_reader.bytes_read()
        + offsets_reader.bytes_read()
        + pos_writer.bytes_written()
        + block_ids_writer.bytes_written();
    *total_io_volume += io_volume;
    pos_writer.finish()?;
    let (n_parts, _) = block_ids_writer.finish()?;

    file_delete(lex_sorted_recursive_block_ids_filename)?;
    for path in &temp_filenames {
        file_delete(path)?;
    }
    Ok(n_parts)
}

/// Recursion base case: sorts the (tiny) recursive text in memory and
/// distributes the ranks into the caller's permute blocks.
fn naive_compute_sa<RC: UInt, O: UInt>(
    block_count: &[u64],
    text_filename: &Path,
    block_ids_filename: &Path,
    pos_filenames: &[PathBuf],
    total_io_volume: &mut u64,
) -> Result<()> {
    let text = crate::utils::read_all::<RC>(text_filename)?;
    let sa = crate::naive::naive_sa(&text);
    let mut sink = PermuteBlockSink::<O>::new(block_count, pos_filenames, block_ids_filename, 1 << 16)?;
    for &pos in &sa {
        sink.write(pos);
    }
    *total_io_volume += sink.bytes_written() + (text.len() * RC::BYTES) as u64;
    sink.finish()?;
    file_delete(text_filename)?;
    Ok(())
}

/// Computes the suffix array of one recursion level, delivering the sorted
/// suffixes through `sink`.
#[allow(clippy::too_many_arguments)]
fn compute_sa_level<C: UInt, O: UInt, S: SaSink>(
    text_length: u64,
    ram_use: u64,
    text_alphabet_size: u64,
    tempfile_base: &Path,
    text_filename: &Path,
    delete_text: bool,
    sink: S,
    recursion_level: u64,
    total_io_volume: &mut u64,
) -> Result<()> {
    let budget = Budget::new::<C, O>(ram_use, text_alphabet_size);
    let max_permute_block_size = budget.max_permute_block_size;
    let max_block_size = budget.max_block_size;
    let n_permute_blocks = text_length.div_ceil(max_permute_block_size);
    let n_blocks = text_length.div_ceil(max_block_size);
    ensure!(
        n_permute_blocks <= MAX_STREAM_BLOCKS && n_blocks <= MAX_STREAM_BLOCKS,
        "RAM budget too small for a text of {} symbols: {} permute blocks, {} induce blocks",
        text_length,
        n_permute_blocks,
        n_blocks
    );
    assert!(O::MAX >= text_length, "text offset type too narrow");
    assert!(
        C::MAX >= text_alphabet_size - 1,
        "char type too narrow for alphabet"
    );

    info!(
        "Entering recursion level {}: length {}, alphabet {}, block size {}, permute block size {}, small alphabet: {}",
        recursion_level,
        text_length,
        text_alphabet_size,
        max_block_size,
        max_permute_block_size,
        budget.is_small_alphabet
    );

    // Induce and name the minus-star substrings of this level.
    let lex_sorted_filenames = temp_file_names(tempfile_base, n_permute_blocks as usize);
    let minus_star_count_filename = temp_file_name(tempfile_base);
    let n_names = em_induce_minus_star_substrings::<C, O>(
        text_length,
        text_alphabet_size,
        max_block_size,
        ram_use,
        max_permute_block_size,
        text_filename,
        tempfile_base,
        &minus_star_count_filename,
        &lex_sorted_filenames,
        total_io_volume,
    )?;

    // Minus-star population of each permute block, from the pair streams.
    let mut block_count = vec![0u64; n_permute_blocks as usize];
    for (count, path) in block_count.iter_mut().zip(&lex_sorted_filenames) {
        *count = file_size(path)? / (2 * O::BYTES as u64);
    }

    let text_sorted_filenames = temp_file_names(tempfile_base, n_permute_blocks as usize);
    let lex_sorted_recursive_filenames = temp_file_names(tempfile_base, n_permute_blocks as usize);
    let lex_sorted_recursive_block_ids_filename = temp_file_name(tempfile_base);

    // Build the recursive text over the names and solve it, with the
    // smallest alphabet width that holds the names.
    macro_rules! recurse {
        ($rc:ty) => {{
            let recursive_text_filename = temp_file_name(tempfile_base);
            let new_text_length = create_recursive_text::<$rc, O>(
                text_length,
                max_permute_block_size,
                &lex_sorted_filenames,
                &text_sorted_filenames,
                &recursive_text_filename,
                total_io_volume,
            )?;
            if new_text_length <= 1 {
                naive_compute_sa::<$rc, O>(
                    &block_count,
                    &recursive_text_filename,
                    &lex_sorted_recursive_block_ids_filename,
                    &lex_sorted_recursive_filenames,
                    total_io_volume,
                )?;
            } else {
                let recursive_sink = PermuteBlockSink::<O>::new(
                    &block_count,
                    &lex_sorted_recursive_filenames,
                    &lex_sorted_recursive_block_ids_filename,
                    stream_buf_bytes(ram_use, n_permute_blocks),
                )?;
                compute_sa_level::<$rc, O, PermuteBlockSink<O>>(
                    new_text_length,
                    ram_use,
                    n_names,
                    tempfile_base,
                    &recursive_text_filename,
                    true,
                    recursive_sink,
                    recursion_level + 1,
                    total_io_volume,
                )?;
            }
        }};
    }
    if n_names <= 1 << 8 {
        recurse!(u8)
    } else if n_names <= 1 << 16 {
        recurse!(u16)
    } else if n_names <= 1 << 24 {
        recurse!(crate::ints::U24)
    } else if n_names <= 1 << 32 {
        recurse!(u32)
    } else if n_names <= 1 << 40 {
        recurse!(crate::ints::U40)
    } else {
        recurse!(u64)
    }

    // Permute the lex-sorted minus-star suffixes into induce blocks.
    let mut next_block_leftmost_minus_star_plus_rank = vec![u64::MAX; n_blocks as usize];
    let lex_sorted_minus_star_filenames = temp_file_names(tempfile_base, n_blocks as usize);
    let block_ids_base = temp_file_name(tempfile_base);
    let minus_pos_n_parts = permute_minus_star_suffixes::<O>(
        text_length,
        max_block_size,
        max_permute_block_size,
        ram_use,
        &mut next_block_leftmost_minus_star_plus_rank,
        tempfile_base,
        &lex_sorted_recursive_filenames,
        &lex_sorted_recursive_block_ids_filename,
        &text_sorted_filenames,
        &lex_sorted_minus_star_filenames,
        &block_ids_base,
        total_io_volume,
    )?;

    // Final induction: write the suffix array through the sink.
    em_induce_minus_and_plus_suffixes::<C, O, S>(
        text_alphabet_size,
        text_length,
        max_block_size,
        ram_use,
        minus_pos_n_parts,
        &next_block_leftmost_minus_star_plus_rank,
        tempfile_base,
        text_filename,
        &block_ids_base,
        &minus_star_count_filename,
        &lex_sorted_minus_star_filenames,
        sink,
        total_io_volume,
    )?;

    if delete_text {
        file_delete(text_filename)?;
    }
    info!("Exiting recursion level {}", recursion_level);
    Ok(())
}

/// Computes the suffix array of the text stored in `text_filename` (packed
/// little-endian symbols of width `C::BYTES` over the alphabet
/// `[0, text_alphabet_size)`) and writes it to `output_filename` as packed
/// little-endian offsets of width `O::BYTES`, using roughly `ram_use` bytes
/// of RAM for the algorithmic structures.
pub fn em_compute_sa<C: UInt, O: UInt>(
    ram_use: u64,
    text_alphabet_size: u64,
    text_filename: impl AsRef<Path>,
    output_filename: impl AsRef<Path>,
) -> Result<SaStats> {
    let text_filename = text_filename.as_ref();
    let output_filename = output_filename.as_ref();
    let text_bytes = file_size(text_filename)?;
    ensure!(
        text_bytes % C::BYTES as u64 == 0,
        "{}: length {} is not a multiple of the symbol width {}",
        text_filename.display(),
        text_bytes,
        C::BYTES
    );
    let text_length = text_bytes / C::BYTES as u64;
    let ram_use = ram_use.max(1);

    info!(
        "Input: {} ({} symbols), output: {}, RAM budget: {}",
        text_filename.display(),
        text_length,
        output_filename.display(),
        ram_use
    );

    let mut total_io_volume = 0u64;
    if text_length == 0 {
        StreamWriter::<O>::new(output_filename)?.finish()?;
        return Ok(SaStats {
            text_length,
            total_io_volume,
        });
    }

    let start = std::time::Instant::now();
    let sink = FileSink::<O>::new(output_filename)
        .with_context(|| format!("Could not create {}", output_filename.display()))?;
    compute_sa_level::<C, O, FileSink<O>>(
        text_length,
        ram_use,
        text_alphabet_size,
        output_filename,
        text_filename,
        false,
        sink,
        0,
        &mut total_io_volume,
    )?;

    info!(
        "Computation finished in {:.2?}; I/O volume: {:.2} bytes/symbol",
        start.elapsed(),
        total_io_volume as f64 / text_length as f64
    );
    Ok(SaStats {
        text_length,
        total_io_volume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ints::U40;

    /// The recursive text has one name per minus-star position, and the
    /// text-sorted streams list exactly the in-block minus-star offsets in
    /// text order.
    #[test]
    fn test_recursive_text_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let text = b"mississippimississippi";
        let text_path = dir.path().join("text");
        crate::utils::write_all(&text_path, text.as_slice())?;
        let base = dir.path().join("base");

        let text_length = text.len() as u64;
        let max_permute_block_size = 5u64;
        let n_permute_blocks = text_length.div_ceil(max_permute_block_size);
        let lex_sorted = temp_file_names(&base, n_permute_blocks as usize);
        let text_sorted = temp_file_names(&base, n_permute_blocks as usize);
        let count_filename = temp_file_name(&base);
        let recursive_text_filename = temp_file_name(&base);
        let mut io_volume = 0;
        em_induce_minus_star_substrings::<u8, U40>(
            text_length,
            256,
            7,
            1 << 10,
            max_permute_block_size,
            &text_path,
            &base,
            &count_filename,
            &lex_sorted,
            &mut io_volume,
        )?;
        let new_text_length = create_recursive_text::<u8, U40>(
            text_length,
            max_permute_block_size,
            &lex_sorted,
            &text_sorted,
            &recursive_text_filename,
            &mut io_volume,
        )?;

        // Direct classification: minus-stars of "mississippi..." are the
        // positions of every 's'-run start and the 'p' before 'i'.
        let mut is_plus = vec![false; text.len()];
        for i in (0..text.len() - 1).rev() {
            is_plus[i] = match text[i].cmp(&text[i + 1]) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Greater => false,
                std::cmp::Ordering::Equal => is_plus[i + 1],
            };
        }
        let stars: Vec<u64> = (1..text.len())
            .filter(|&i| !is_plus[i] && is_plus[i - 1])
            .map(|i| i as u64)
            .collect();

        assert_eq!(new_text_length, stars.len() as u64);
        assert_eq!(
            crate::utils::file_size(&recursive_text_filename)?,
            new_text_length
        );
        let mut rebuilt = Vec::new();
        for (permute_block, path) in text_sorted.iter().enumerate() {
            let block_beg = permute_block as u64 * max_permute_block_size;
            let offsets = crate::utils::read_all::<U40>(path)?;
            let mut prev = None;
            for offset in &offsets {
                let pos = block_beg + offset.to_u64();
                assert!(prev < Some(pos));
                prev = Some(pos);
                rebuilt.push(pos);
            }
        }
        rebuilt.sort_unstable();
        assert_eq!(rebuilt, stars);
        Ok(())
    }
}
