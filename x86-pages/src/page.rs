// Copyright (c) 2021 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use crate::{AddressSpace, GuestPhys, HostPhys};

// 52-bit physical addresses.
const PFN_SHIFT: u64 = 12;
const PFN_BITS: u64 = 40;
const PFN_MASK: u64 = (1 << PFN_BITS) - 1;

/// Number of 4kB pages covered by a 2MB page (and of 2MB pages covered by a 1GB page).
pub const ENTRIES_PER_TABLE: u64 = 512;

/// Translation granularities supported by second-level paging.
#[repr(u64)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PageSize {
    Size4k = 4 * 1024,
    Size2M = 2 * 1024 * 1024,
    Size1G = 1024 * 1024 * 1024,
}

impl PageSize {
    /// Returns `val` divided by 4kB, rounded up.
    pub const fn num_4k_pages(val: u64) -> u64 {
        (val + PageSize::Size4k as u64 - 1) / (PageSize::Size4k as u64)
    }

    /// Checks if the given quantity is aligned to this page size.
    pub const fn is_aligned(&self, val: u64) -> bool {
        (val & (*self as u64 - 1)) == 0
    }

    /// Rounds up the quantity to the nearest multiple of this page size.
    pub const fn round_up(&self, val: u64) -> u64 {
        (val + *self as u64 - 1) & !(*self as u64 - 1)
    }

    /// Rounds down the quantity to the nearest multiple of this page size.
    pub const fn round_down(&self, val: u64) -> u64 {
        val & !(*self as u64 - 1)
    }

    /// Returns if the size is a huge page (> 4kB) size.
    pub fn is_huge(&self) -> bool {
        !matches!(*self, PageSize::Size4k)
    }

    /// Returns the page size one level down in the translation hierarchy, if any.
    pub fn next_smaller(&self) -> Option<PageSize> {
        match *self {
            PageSize::Size4k => None,
            PageSize::Size2M => Some(PageSize::Size4k),
            PageSize::Size1G => Some(PageSize::Size2M),
        }
    }
}

/// A raw address in an address space.
#[derive(Copy, Clone, Debug)]
pub struct RawAddr<AS: AddressSpace>(u64, AS);

impl<AS: AddressSpace> RawAddr<AS> {
    pub fn new(addr: u64, address_space: AS) -> Self {
        Self(addr, address_space)
    }

    /// Returns the inner 64 address.
    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Returns the address space for the address.
    pub fn address_space(&self) -> AS {
        self.1
    }

    /// Returns the address incremented by the given number of bytes.
    /// Returns None if the result would overflow.
    pub fn checked_increment(&self, increment: u64) -> Option<Self> {
        let addr = self.0.checked_add(increment)?;
        Some(Self(addr, self.1))
    }
}

impl RawAddr<HostPhys> {
    pub fn host(addr: u64) -> Self {
        Self(addr, HostPhys)
    }
}

impl RawAddr<GuestPhys> {
    pub fn guest(addr: u64) -> Self {
        Self(addr, GuestPhys)
    }
}

/// Convenience type aliases for host-physical and guest-physical addresses.
pub type HostPhysAddr = RawAddr<HostPhys>;
pub type GuestPhysAddr = RawAddr<GuestPhys>;

impl<AS: AddressSpace> From<PageAddr<AS>> for RawAddr<AS> {
    fn from(p: PageAddr<AS>) -> RawAddr<AS> {
        p.addr
    }
}

impl<AS: AddressSpace> PartialEq for RawAddr<AS> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<AS: AddressSpace> Eq for RawAddr<AS> {}

impl<AS: AddressSpace> PartialOrd for RawAddr<AS> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<AS: AddressSpace> Ord for RawAddr<AS> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

/// An address of a Page in an address space. It is guaranteed to be aligned to a page boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageAddr<AS: AddressSpace> {
    addr: RawAddr<AS>,
}

pub type HostPageAddr = PageAddr<HostPhys>;
pub type GuestPageAddr = PageAddr<GuestPhys>;

impl<AS: AddressSpace> PageAddr<AS> {
    /// Creates a 4kB-aligned `PageAddr` from a `RawAddr`, returning `None` if the address isn't
    /// aligned.
    pub fn new(addr: RawAddr<AS>) -> Option<Self> {
        Self::with_alignment(addr, PageSize::Size4k)
    }

    /// Creates a `PageAddr` from a `RawAddr`, returns `None` if the address isn't aligned to the
    /// requested page size.
    pub fn with_alignment(addr: RawAddr<AS>, alignment: PageSize) -> Option<Self> {
        if alignment.is_aligned(addr.bits()) {
            Some(PageAddr { addr })
        } else {
            None
        }
    }

    /// Same as `with_alignment`, but rounding down to the nearest multiple of the page size.
    pub fn with_round_down(addr: RawAddr<AS>, alignment: PageSize) -> Self {
        Self {
            addr: RawAddr::new(alignment.round_down(addr.bits()), addr.address_space()),
        }
    }

    /// Gets the raw bits of the page address.
    pub fn bits(&self) -> u64 {
        self.addr.0
    }

    /// Returns if this address is aligned to the given page size.
    pub fn is_aligned(&self, alignment: PageSize) -> bool {
        alignment.is_aligned(self.addr.0)
    }

    /// Iterates from this address in `page_size` chunks, if this address is properly aligned.
    pub fn iter_from_with_size(&self, page_size: PageSize) -> Option<PageAddrIter<AS>> {
        PageAddrIter::new(*self, page_size)
    }

    /// Gets the pfn of the page address.
    pub fn pfn(&self) -> Pfn<AS> {
        Pfn::new((self.addr.0 >> PFN_SHIFT) & PFN_MASK, self.addr.1)
    }

    /// Adds `n` `page_size`-sized pages to the current address if the address is properly aligned.
    pub fn checked_add_pages_with_size(&self, n: u64, page_size: PageSize) -> Option<Self> {
        n.checked_mul(page_size as u64)
            .and_then(|inc| self.addr.checked_increment(inc))
            .and_then(|addr| Self::with_alignment(addr, page_size))
    }
}

/// Generate page addresses for the given size. 4096, 8192, 12288, ... until the end of u64's range
pub struct PageAddrIter<AS: AddressSpace> {
    next: Option<PageAddr<AS>>,
    increment: PageSize,
}

impl<AS: AddressSpace> PageAddrIter<AS> {
    pub fn new(start: PageAddr<AS>, increment: PageSize) -> Option<Self> {
        let next = PageAddr::with_alignment(RawAddr::from(start), increment)?;
        Some(Self {
            next: Some(next),
            increment,
        })
    }
}

impl<AS: AddressSpace> Iterator for PageAddrIter<AS> {
    type Item = PageAddr<AS>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.next;
        if let Some(n) = self.next {
            self.next = n.checked_add_pages_with_size(1, self.increment);
        }
        next
    }
}

/// The page number of a page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Pfn<AS: AddressSpace>(u64, AS);

impl<AS: AddressSpace> Pfn<AS> {
    pub fn new(bits: u64, address_space: AS) -> Self {
        Pfn(bits, address_space)
    }

    /// Returns the raw bits of the page number.
    pub fn bits(&self) -> u64 {
        self.0
    }
}

impl Pfn<HostPhys> {
    /// Creates a host PFN from raw bits.
    pub fn host(bits: u64) -> Self {
        Pfn(bits, HostPhys)
    }
}

pub type HostPfn = Pfn<HostPhys>;

impl<AS: AddressSpace> From<PageAddr<AS>> for Pfn<AS> {
    fn from(page: PageAddr<AS>) -> Pfn<AS> {
        Pfn(page.addr.0 >> PFN_SHIFT, page.addr.1)
    }
}
