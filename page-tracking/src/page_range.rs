// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use x86_pages::{GuestPageAddr, PageAddr, PageSize, RawAddr};

const PAGE_SIZE: u64 = PageSize::Size4k as u64;

/// A run of `count` contiguous 4kB pages starting at `start`.
///
/// Positional predicates (`is_top`, `is_middle`, `is_bottom`) classify a page inside the range;
/// adjacency predicates (`adjoins_above`, `adjoins_below`) classify a page just outside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRange {
    start: u64,
    count: u64,
}

impl PageRange {
    /// Creates a range of `count` pages at `start`. `start` must be 4kB aligned and `count`
    /// non-zero.
    pub fn new(start: u64, count: u64) -> Self {
        assert!(PageSize::Size4k.is_aligned(start));
        assert!(count > 0);
        Self { start, count }
    }

    /// Returns the address of the first page.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Returns the number of pages in the range.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the address one past the last byte of the range.
    pub fn limit(&self) -> u64 {
        self.start + self.count * PAGE_SIZE
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.limit()
    }

    /// Returns true if `addr` is the last page of the range.
    pub fn is_top(&self, addr: u64) -> bool {
        addr + PAGE_SIZE == self.limit()
    }

    /// Returns true if `addr` is the first page of the range.
    pub fn is_bottom(&self, addr: u64) -> bool {
        addr == self.start
    }

    /// Returns true if `addr` is strictly inside the range.
    pub fn is_middle(&self, addr: u64) -> bool {
        self.contains(addr) && !self.is_top(addr) && !self.is_bottom(addr)
    }

    /// Returns true if `addr` is the page just past the end of the range.
    pub fn adjoins_above(&self, addr: u64) -> bool {
        addr == self.limit()
    }

    /// Returns true if `addr` is the page just before the start of the range.
    pub fn adjoins_below(&self, addr: u64) -> bool {
        addr + PAGE_SIZE == self.start
    }

    /// Extends the range by one page at the top.
    pub fn grow_up(&mut self) {
        self.count += 1;
    }

    /// Extends the range by one page at the bottom.
    pub fn grow_down(&mut self) {
        self.start -= PAGE_SIZE;
        self.count += 1;
    }

    /// Drops the top page. The range must hold more than one page.
    pub fn shrink_top(&mut self) {
        assert!(self.count > 1);
        self.count -= 1;
    }

    /// Drops the bottom page. The range must hold more than one page.
    pub fn shrink_bottom(&mut self) {
        assert!(self.count > 1);
        self.start += PAGE_SIZE;
        self.count -= 1;
    }

    /// Appends `upper`, which must start at this range's limit.
    pub fn absorb(&mut self, upper: PageRange) {
        assert_eq!(upper.start, self.limit());
        self.count += upper.count;
    }

    /// Splits the range around the interior page `addr`, returning the ranges below and above it.
    /// `addr` itself belongs to neither.
    pub fn split(self, addr: u64) -> (PageRange, PageRange) {
        assert!(self.is_middle(addr));
        let lower = PageRange::new(self.start, (addr - self.start) / PAGE_SIZE);
        let upper_start = addr + PAGE_SIZE;
        let upper = PageRange::new(upper_start, (self.limit() - upper_start) / PAGE_SIZE);
        (lower, upper)
    }

    /// Iterates over every page in the range.
    pub fn pages(&self) -> impl Iterator<Item = GuestPageAddr> {
        PageAddr::new(RawAddr::guest(self.start))
            .and_then(|start| start.iter_from_with_size(PageSize::Size4k))
            .into_iter()
            .flatten()
            .take(self.count as usize)
    }
}
