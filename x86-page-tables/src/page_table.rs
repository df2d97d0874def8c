// Copyright (c) 2021 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use static_assertions::const_assert_eq;
use x86_pages::{PageSize, ENTRIES_PER_TABLE};

use crate::pte::Pte;

pub const ENTRIES_PER_PAGE: usize = ENTRIES_PER_TABLE as usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The guest or host address is not aligned to the requested page size.
    Misaligned,
    /// The address is above the range translatable with a 4-level walk.
    OutOfBounds,
    /// A huge leaf sits where a table was required.
    LeafEntryNotTable,
    /// A table sits where a leaf was required.
    TableEntryNotLeaf,
    /// There is no present translation for the address.
    NotMapped,
}
pub type Result<T> = core::result::Result<T, Error>;

/// Defines the structure of a multi-level page table.
pub trait PageTableLevel: Sized + Clone + Copy + PartialEq {
    /// Returns the page size of leaf pages mapped by this page table level, or `None` if this
    /// level can only point to tables.
    fn leaf_page_size(&self) -> Option<PageSize>;

    /// Returns the next level (in order of decreasing page size) in the hierarchy. Returns `None`
    /// if this is a leaf level.
    fn next(&self) -> Option<Self>;

    /// Returns the position of the table index selected from the input address at this level.
    fn addr_shift(&self) -> u64;

    /// Returns if this is a leaf level.
    fn is_leaf(&self) -> bool {
        self.next().is_none()
    }

    /// Returns the index into a table at this level selected by `addr`.
    fn index(&self, addr: u64) -> usize {
        ((addr >> self.addr_shift()) as usize) & (ENTRIES_PER_PAGE - 1)
    }
}

/// The four levels of an EPT hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EptLevel {
    Pml4,
    Pdpt,
    Pd,
    Pt,
}

impl EptLevel {
    /// Returns the level whose leaves are `size` pages.
    pub fn for_page_size(size: PageSize) -> Self {
        match size {
            PageSize::Size4k => EptLevel::Pt,
            PageSize::Size2M => EptLevel::Pd,
            PageSize::Size1G => EptLevel::Pdpt,
        }
    }
}

impl PageTableLevel for EptLevel {
    fn leaf_page_size(&self) -> Option<PageSize> {
        match self {
            EptLevel::Pml4 => None,
            EptLevel::Pdpt => Some(PageSize::Size1G),
            EptLevel::Pd => Some(PageSize::Size2M),
            EptLevel::Pt => Some(PageSize::Size4k),
        }
    }

    fn next(&self) -> Option<Self> {
        match self {
            EptLevel::Pml4 => Some(EptLevel::Pdpt),
            EptLevel::Pdpt => Some(EptLevel::Pd),
            EptLevel::Pd => Some(EptLevel::Pt),
            EptLevel::Pt => None,
        }
    }

    fn addr_shift(&self) -> u64 {
        match self {
            EptLevel::Pml4 => 39,
            EptLevel::Pdpt => 30,
            EptLevel::Pd => 21,
            EptLevel::Pt => 12,
        }
    }
}

/// One page worth of entries at any level of the hierarchy.
#[repr(C, align(4096))]
pub(crate) struct TablePage {
    entries: [Pte; ENTRIES_PER_PAGE],
}

const_assert_eq!(core::mem::size_of::<TablePage>(), PageSize::Size4k as usize);

impl TablePage {
    pub fn new() -> Self {
        Self {
            entries: [Pte::default(); ENTRIES_PER_PAGE],
        }
    }

    /// Returns the physical address of this table. Hypervisor heap memory is identity mapped.
    pub fn phys_addr(&self) -> u64 {
        self as *const Self as u64
    }

    pub fn entry(&self, index: usize) -> Pte {
        self.entries[index]
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut Pte {
        &mut self.entries[index]
    }

    /// Returns true if no entry in the table holds any state.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.bits() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_indices() {
        let addr = (3 << 39) | (5 << 30) | (7 << 21) | (9 << 12) | 0x123;
        assert_eq!(EptLevel::Pml4.index(addr), 3);
        assert_eq!(EptLevel::Pdpt.index(addr), 5);
        assert_eq!(EptLevel::Pd.index(addr), 7);
        assert_eq!(EptLevel::Pt.index(addr), 9);
        assert!(EptLevel::Pt.is_leaf());
        assert_eq!(EptLevel::for_page_size(PageSize::Size2M), EptLevel::Pd);
        assert_eq!(EptLevel::Pml4.leaf_page_size(), None);
    }
}
