// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use alloc::collections::BTreeMap;
use x86_pages::{DomainId, GuestPageAddr};

use crate::PageRangeSet;

/// Errors related to tracking donated pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The page is already on loan to the given domain.
    AlreadyDonated(DomainId),
    /// The page is not on loan to the given domain.
    NotDonated(DomainId),
    /// Nothing is on loan to the given domain.
    NoDonations(DomainId),
}

/// Holds the result of donation tracking operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Pages a donor domain has lent out, grouped by recipient.
///
/// A page is tracked for at most one recipient at a time. Recipients with nothing on loan have no
/// entry. Callers wrap this in the donor's lock.
#[derive(Debug, Default)]
pub struct DonatedPages {
    by_recipient: BTreeMap<DomainId, PageRangeSet>,
}

impl DonatedPages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the domain `addr` is on loan to, if any.
    pub fn recipient_of(&self, addr: GuestPageAddr) -> Option<DomainId> {
        self.by_recipient
            .iter()
            .find(|(_, set)| set.contains(addr))
            .map(|(id, _)| *id)
    }

    /// Returns true if `addr` is on loan to any domain.
    pub fn is_donated(&self, addr: GuestPageAddr) -> bool {
        self.recipient_of(addr).is_some()
    }

    /// Returns true if `addr` is on loan to `recipient`.
    pub fn is_donated_to(&self, recipient: DomainId, addr: GuestPageAddr) -> bool {
        self.by_recipient
            .get(&recipient)
            .map_or(false, |set| set.contains(addr))
    }

    /// Returns true if anything is on loan to `recipient`.
    pub fn has_donations(&self, recipient: DomainId) -> bool {
        self.by_recipient.contains_key(&recipient)
    }

    /// Returns the ranges on loan to `recipient`.
    pub fn donations_to(&self, recipient: DomainId) -> Option<&PageRangeSet> {
        self.by_recipient.get(&recipient)
    }

    /// Records `addr` as lent to `recipient`.
    pub fn add(&mut self, recipient: DomainId, addr: GuestPageAddr) -> Result<()> {
        if let Some(owner) = self.recipient_of(addr) {
            return Err(Error::AlreadyDonated(owner));
        }
        self.by_recipient
            .entry(recipient)
            .or_default()
            .insert(addr);
        Ok(())
    }

    /// Forgets that `addr` was lent to `recipient`.
    pub fn remove(&mut self, recipient: DomainId, addr: GuestPageAddr) -> Result<()> {
        let set = self
            .by_recipient
            .get_mut(&recipient)
            .ok_or(Error::NotDonated(recipient))?;
        set.remove(addr).map_err(|_| Error::NotDonated(recipient))?;
        if set.is_empty() {
            self.by_recipient.remove(&recipient);
        }
        Ok(())
    }

    /// Removes and returns everything lent to `recipient`.
    pub fn take(&mut self, recipient: DomainId) -> Result<PageRangeSet> {
        self.by_recipient
            .remove(&recipient)
            .ok_or(Error::NoDonations(recipient))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x86_pages::{PageAddr, RawAddr};

    fn page(addr: u64) -> GuestPageAddr {
        PageAddr::new(RawAddr::guest(addr)).unwrap()
    }

    #[test]
    fn single_recipient_per_page() {
        let mut donated = DonatedPages::new();
        let a = DomainId::new(1);
        let b = DomainId::new(2);
        donated.add(a, page(0x5000)).unwrap();
        assert_eq!(donated.add(a, page(0x5000)), Err(Error::AlreadyDonated(a)));
        assert_eq!(donated.add(b, page(0x5000)), Err(Error::AlreadyDonated(a)));
        assert!(donated.is_donated_to(a, page(0x5000)));
        assert!(!donated.is_donated_to(b, page(0x5000)));
        assert_eq!(donated.recipient_of(page(0x5000)), Some(a));
        assert_eq!(donated.donations_to(a).map(|s| s.page_count()), Some(1));
    }

    #[test]
    fn remove_and_take() {
        let mut donated = DonatedPages::new();
        let a = DomainId::new(1);
        donated.add(a, page(0x5000)).unwrap();
        donated.add(a, page(0x6000)).unwrap();
        assert_eq!(
            donated.remove(DomainId::new(3), page(0x5000)),
            Err(Error::NotDonated(DomainId::new(3)))
        );
        assert_eq!(donated.remove(a, page(0x7000)), Err(Error::NotDonated(a)));
        donated.remove(a, page(0x5000)).unwrap();
        assert!(donated.has_donations(a));
        donated.remove(a, page(0x6000)).unwrap();
        assert!(!donated.has_donations(a));
        assert_eq!(donated.take(a).unwrap_err(), Error::NoDonations(a));

        donated.add(a, page(0x9000)).unwrap();
        let set = donated.take(a).unwrap();
        assert_eq!(set.page_count(), 1);
        assert!(!donated.is_donated(page(0x9000)));
    }
}
