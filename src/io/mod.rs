/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Asynchronous streamed I/O.
//!
//! Every abstraction in this module pairs the calling (algorithm) thread with
//! one dedicated I/O thread. The two sides exchange ownership of fixed-size
//! buffers over [`crossbeam_channel`] channels: the algorithm side blocks
//! only when every buffer of the pool is in flight (writers) or none has been
//! refilled yet (readers). No lock is held while a buffer is being read from
//! or written to disk.
//!
//! Elements are serialized through [`Serial`](crate::ints::Serial), so files
//! contain packed little-endian images regardless of the host. Bit streams
//! pack bits LSB-first into bytes and close with a single trailer byte that
//! records how many bits of the final data byte are valid; backward bit
//! readers use it to locate the last bit.
//!
//! I/O errors are fatal: the I/O thread panics with a message naming the
//! file, and the algorithm side panics as soon as it notices the missing
//! thread. The pipeline has no transactional recovery model.

mod backward_bit_stream_reader;
mod backward_multi_stream_reader;
mod backward_multipart_reader;
mod backward_stream_reader;
mod bit_stream_reader;
mod bit_stream_writer;
mod multi_bit_stream_reader;
mod multi_bit_stream_writer;
mod multi_stream_reader;
mod multi_stream_writer;
mod multipart_writer;
mod stream_reader;
mod stream_writer;

pub use backward_bit_stream_reader::BackwardBitStreamReader;
pub use backward_multi_stream_reader::{BackwardMultiBitStreamReader, BackwardMultiStreamReader};
pub use backward_multipart_reader::BackwardMultipartReader;
pub use backward_stream_reader::BackwardStreamReader;
pub use bit_stream_reader::BitStreamReader;
pub use bit_stream_writer::BitStreamWriter;
pub use multi_bit_stream_reader::MultiBitStreamReader;
pub use multi_bit_stream_writer::MultiBitStreamWriter;
pub use multi_stream_reader::MultiStreamReader;
pub use multi_stream_writer::MultiStreamWriter;
pub use multipart_writer::MultipartWriter;
pub use stream_reader::StreamReader;
pub use stream_writer::StreamWriter;

/// Default total buffer budget of a single-stream writer or reader.
pub(crate) const DEFAULT_BUF_BYTES: usize = 2 << 20;
/// Default number of buffers circulating per stream object.
pub(crate) const DEFAULT_N_BUFFERS: usize = 4;

/// Computes the per-buffer item count for a total byte budget split over
/// `n_buffers` buffers of `item_bytes`-wide elements.
pub(crate) fn items_per_buffer(total_bytes: usize, item_bytes: usize, n_buffers: usize) -> usize {
    std::cmp::max(1, total_bytes / (item_bytes * n_buffers.max(1)))
}
