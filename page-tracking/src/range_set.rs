// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use alloc::collections::BTreeMap;
use x86_pages::{AddressSpace, PageAddr, PageSize};

use crate::PageRange;

const PAGE_SIZE: u64 = PageSize::Size4k as u64;

/// Errors from manipulating a `PageRangeSet`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The page is not part of any range in the set.
    NotTracked(u64),
}

pub type Result<T> = core::result::Result<T, Error>;

/// An ordered set of disjoint, coalesced page ranges keyed by start address.
///
/// No two ranges in the set are ever adjacent: inserting a page that touches a neighbouring range
/// extends it, and inserting a page that bridges two ranges merges them. All operations are
/// logarithmic in the number of ranges rather than the number of pages.
#[derive(Clone, Debug, Default)]
pub struct PageRangeSet {
    ranges: BTreeMap<u64, PageRange>,
}

impl PageRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the range holding `addr`, if any.
    pub fn find<AS: AddressSpace>(&self, addr: PageAddr<AS>) -> Option<&PageRange> {
        self.find_raw(addr.bits())
    }

    /// Returns true if `addr` is part of some range.
    pub fn contains<AS: AddressSpace>(&self, addr: PageAddr<AS>) -> bool {
        self.find_raw(addr.bits()).is_some()
    }

    /// Adds the page at `addr`. Returns false, leaving the set unchanged, if it was already present.
    pub fn insert<AS: AddressSpace>(&mut self, addr: PageAddr<AS>) -> bool {
        let addr = addr.bits();
        if self.find_raw(addr).is_some() {
            return false;
        }

        let upper = self.ranges.remove(&(addr + PAGE_SIZE));
        let lower_key = self
            .ranges
            .range(..addr)
            .next_back()
            .filter(|(_, r)| r.adjoins_above(addr))
            .map(|(k, _)| *k);
        if let Some(lower) = lower_key.and_then(|k| self.ranges.get_mut(&k)) {
            lower.grow_up();
            if let Some(upper) = upper {
                lower.absorb(upper);
            }
        } else if let Some(mut upper) = upper {
            upper.grow_down();
            self.ranges.insert(upper.start(), upper);
        } else {
            self.ranges.insert(addr, PageRange::new(addr, 1));
        }
        true
    }

    /// Removes the page at `addr`, shrinking or splitting the range that holds it.
    pub fn remove<AS: AddressSpace>(&mut self, addr: PageAddr<AS>) -> Result<()> {
        let addr = addr.bits();
        let range = *self.find_raw(addr).ok_or(Error::NotTracked(addr))?;
        let start = range.start();
        if range.count() == 1 {
            self.ranges.remove(&start);
        } else if range.is_top(addr) {
            if let Some(r) = self.ranges.get_mut(&start) {
                r.shrink_top();
            }
        } else if range.is_bottom(addr) {
            let mut r = range;
            r.shrink_bottom();
            self.ranges.remove(&start);
            self.ranges.insert(r.start(), r);
        } else {
            let (lower, upper) = range.split(addr);
            self.ranges.insert(lower.start(), lower);
            self.ranges.insert(upper.start(), upper);
        }
        Ok(())
    }

    /// Iterates over the ranges in address order.
    pub fn iter(&self) -> impl Iterator<Item = &PageRange> {
        self.ranges.values()
    }

    /// Returns the number of ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the number of pages across all ranges.
    pub fn page_count(&self) -> u64 {
        self.ranges.values().map(|r| r.count()).sum()
    }

    fn find_raw(&self, addr: u64) -> Option<&PageRange> {
        self.ranges
            .range(..=addr)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;
    use x86_pages::{GuestPageAddr, RawAddr};

    fn page(n: u64) -> GuestPageAddr {
        PageAddr::new(RawAddr::guest(0x100_0000 + n * PAGE_SIZE)).unwrap()
    }

    fn ranges(set: &PageRangeSet) -> Vec<(u64, u64)> {
        set.iter()
            .map(|r| ((r.start() - 0x100_0000) / PAGE_SIZE, r.count()))
            .collect()
    }

    fn assert_coalesced(set: &PageRangeSet) {
        let all: Vec<&PageRange> = set.iter().collect();
        for pair in all.windows(2) {
            assert!(pair[0].limit() < pair[1].start(), "{:?} touches {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn split_merge_round_trip() {
        let mut set = PageRangeSet::new();
        assert!(set.insert(page(0)));
        assert!(set.insert(page(1)));
        assert!(set.insert(page(2)));
        assert_eq!(ranges(&set), vec![(0, 3)]);

        set.remove(page(1)).unwrap();
        assert_eq!(ranges(&set), vec![(0, 1), (2, 1)]);

        assert!(set.insert(page(1)));
        assert_eq!(ranges(&set), vec![(0, 3)]);
    }

    #[test]
    fn insert_extends_either_side() {
        let mut set = PageRangeSet::new();
        set.insert(page(10));
        set.insert(page(9));
        set.insert(page(11));
        assert_eq!(ranges(&set), vec![(9, 3)]);
        assert!(!set.insert(page(10)));
        assert_eq!(set.page_count(), 3);
        assert_eq!(set.find(page(11)).map(|r| r.count()), Some(3));
        assert!(set.find(page(12)).is_none());
        assert!(set.find(page(8)).is_none());
    }

    #[test]
    fn remove_cases() {
        let mut set = PageRangeSet::new();
        for n in 0..5 {
            set.insert(page(n));
        }
        set.insert(page(20));

        set.remove(page(20)).unwrap();
        assert_eq!(ranges(&set), vec![(0, 5)]);
        set.remove(page(4)).unwrap();
        assert_eq!(ranges(&set), vec![(0, 4)]);
        set.remove(page(0)).unwrap();
        assert_eq!(ranges(&set), vec![(1, 3)]);
        set.remove(page(2)).unwrap();
        assert_eq!(ranges(&set), vec![(1, 1), (3, 1)]);
        assert_eq!(
            set.remove(page(2)),
            Err(Error::NotTracked(page(2).bits()))
        );
        assert_eq!(ranges(&set), vec![(1, 1), (3, 1)]);
    }

    #[test]
    fn coalescing_invariant_holds() {
        let mut set = PageRangeSet::new();
        let mut inserted = 0;
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            if set.insert(page(seed % 512)) {
                inserted += 1;
            }
            assert_coalesced(&set);
            assert_eq!(set.page_count(), inserted);
        }
        for n in 0..512 {
            assert!(set.contains(page(n)) == (set.remove(page(n)).is_ok()));
            assert_coalesced(&set);
        }
        assert!(set.is_empty());
    }
}
