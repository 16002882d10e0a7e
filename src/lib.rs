/*
 * SPDX-FileCopyrightText: 2025 Inria
 * SPDX-FileCopyrightText: 2025 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

#![doc = include_str!("../README.md")]
#![deny(unstable_features)]
#![deny(trivial_casts)]
#![deny(unconditional_recursion)]
#![deny(clippy::empty_loop)]
#![deny(unreachable_code)]
#![deny(unreachable_patterns)]
#![deny(unused_macro_rules)]
#![deny(unused_doc_comments)]

pub mod em_queue;
pub mod em_radix_heap;
pub mod ints;
pub mod io;
pub mod naive;
pub mod radix_heap;
pub mod utils;

mod compute_sa;
mod em_induce_minus_and_plus_suffixes;
mod em_induce_minus_star_substrings;
mod em_induce_plus_star_substrings;
mod em_induce_plus_suffixes;
mod im_induce_substrings;
mod im_induce_suffixes;

pub use compute_sa::{em_compute_sa, SaStats};

/// Prelude module to import everything from this crate
pub mod prelude {
    pub use crate::em_compute_sa;
    pub use crate::ints::{Serial, UInt, U24, U40, U48};
    pub use crate::SaStats;
}
