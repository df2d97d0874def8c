// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! # Donated page tracking
//!
//! ## Key types
//!
//! - `PageRange` is a run of contiguous 4kB pages with explicit grow/shrink/split operations.
//! - `PageRangeSet` is an ordered, always-coalesced set of disjoint `PageRange`s. Lookups,
//!   insertions and removals are logarithmic in the number of ranges, so a guest holding
//!   gigabytes of mostly-contiguous 4kB pages costs a handful of entries.
//! - `DonatedPages` maps each recipient domain to the `PageRangeSet` of pages lent to it.
//! - `TlbVersion` tracks the progress of TLB shootdowns.

#![no_std]

extern crate alloc;

/// Tracks which pages are lent to which domain.
pub mod donated;
mod page_range;
/// Coalescing sets of page ranges.
pub mod range_set;
/// Implements a `TlbVersion` type, used for tracking the progress of TLB shootdowns.
pub mod tlb_version;

pub use donated::DonatedPages;
pub use donated::Error as DonationError;
pub use donated::Result as DonationResult;
pub use page_range::PageRange;
pub use range_set::Error as RangeError;
pub use range_set::Result as RangeResult;
pub use range_set::PageRangeSet;
pub use tlb_version::TlbVersion;

#[cfg(test)]
#[macro_use]
extern crate std;
