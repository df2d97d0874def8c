// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! # Second-level (EPT) page table management.
//!
//! ## Key types
//!
//! - `EptMap` is the four-level hierarchy translating one domain's guest physical addresses to
//!   host physical addresses at 4kB, 2MB or 1GB granularity.
//! - `EptPerms` and `x86_pages::MemType` are the attributes of a leaf.
//! - `EptLevel` describes one level of the hierarchy.
//!
//! ## Ownership
//!
//! An `EptMap` owns every table page in its hierarchy. Leaf pages are never owned: they are host
//! memory shared with the domain on the other end of the translation. Unmapping a leaf removes
//! access but leaves the tables in place; releasing it also frees tables that become empty.
#![no_std]

extern crate alloc;

// Include std when running unit tests.
#[cfg(test)]
#[macro_use]
extern crate std;

/// Interfaces to build and manage EPT hierarchies for domains.
pub mod ept;
mod page_table;
/// Provides access to the fields of an EPT entry.
mod pte;
/// Provides low-level cache and TLB management functions.
pub mod tlb;

pub use ept::{EptMap, Translation};
pub use page_table::Error as PageTableError;
pub use page_table::Result as PageTableResult;
pub use page_table::{EptLevel, PageTableLevel, ENTRIES_PER_PAGE};
pub use pte::{EptFieldBits, EptPerms};
