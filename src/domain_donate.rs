// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Lending root domain pages to guests.
//!
//! A donated page leaves the root domain's identity map before it shows up in the guest, and the
//! removal is shot down on every CPU in between, so no CPU can reach the page from both domains
//! at once. A page is tracked for one guest at a time and only comes back to the root once that
//! guest is gone. No invalidation is needed on the way back since a not-present entry is never
//! cached.
//!
//! The root's donation lock is held from the "already donated?" check through the guest mapping,
//! so racing donations of the same page are serialized. If the guest mapping fails, a page this
//! call took from the root goes straight back to the root's identity map. Other CPUs may
//! be parked in a shootdown by the lock holder; the lock is therefore only ever taken with a
//! bounded number of attempts on the donate and reclaim paths.

use alloc::vec::Vec;
use log::{debug, error};
use page_tracking::{DonatedPages, DonationError, PageRange};
use sync::MutexGuard;
use x86_page_tables::{EptMap, EptPerms, PageTableError, Translation};
use x86_pages::{
    DomainId, GuestPageAddr, GuestPhysAddr, HostPageAddr, MemType, PageAddr, PageSize, RawAddr,
};

use crate::domain::{Domain, Error, Result};
use crate::domains::DomainRegistry;

fn host_page(gpa: GuestPageAddr) -> HostPageAddr {
    PageAddr::with_round_down(RawAddr::host(gpa.bits()), PageSize::Size4k)
}

fn root_page(gpa: GuestPhysAddr) -> GuestPageAddr {
    PageAddr::with_round_down(gpa, PageSize::Size4k)
}

impl Domain {
    fn lock_donated(&self) -> Result<MutexGuard<'_, DonatedPages>> {
        let attempts = self.platform.config().shootdown_spins;
        sync::try_lock_bounded(&self.donated, attempts).ok_or_else(|| {
            debug!("{}: donation lock contended", self.id);
            Error::Again
        })
    }

    // Looks up the root translation of `page`, which must be an identity mapping.
    fn resolve_identity(&self, ept: &EptMap, page: GuestPageAddr) -> Result<Translation> {
        let Some(translation) = ept.translate(page.into()) else {
            error!("{}: no translation for gpa {:#x}", self.id, page.bits());
            return Err(Error::Resolution(PageTableError::NotMapped));
        };
        if translation.hpa.bits() != page.bits() {
            error!(
                "{}: gpa {:#x} maps to hpa {:#x}, not identity mapped",
                self.id,
                page.bits(),
                translation.hpa.bits()
            );
            return Err(Error::NotIdentityMapped {
                gpa: page.into(),
                hpa: translation.hpa,
            });
        }
        Ok(translation)
    }

    /// Installs the root domain's page at `hpa` into this domain at `gpa`, through the PV domain
    /// if there is one.
    fn install_root_page(
        &self,
        gpa: GuestPageAddr,
        hpa: HostPageAddr,
        perms: EptPerms,
        mem_type: MemType,
    ) -> Result<()> {
        match self.pv_domain() {
            Some(pv) => pv
                .add_root_page(gpa, hpa, perms, mem_type)
                .map_err(Error::Xen),
            None => self
                .ept
                .lock()
                .map(gpa, hpa, PageSize::Size4k, perms, mem_type)
                .map_err(Error::Paging),
        }
    }

    /// Moves the root page containing `root_gpa` into `guest` at `guest_gpa`.
    ///
    /// The page is removed from the root's identity map (splitting a 1GB or 2MB leaf first if
    /// need be) under a shootdown and recorded as lent to `guest`. Donating a page that is
    /// already lent to `guest` only redoes the guest mapping. A page taken from the root by this
    /// call is returned to it if the guest mapping fails.
    ///
    /// Returns `Error::Again` if the shootdown or the donation lock couldn't be completed; the
    /// caller should retry. Panics if `self` isn't the root domain.
    pub fn donate_root_page(
        &self,
        root_gpa: GuestPhysAddr,
        guest: &Domain,
        guest_gpa: GuestPageAddr,
        perms: EptPerms,
        mem_type: MemType,
    ) -> Result<()> {
        assert!(self.id.is_root(), "{}: only the root domain donates", self.id);
        assert!(guest.id != self.id, "{}: donation to self", self.id);
        let page = root_page(root_gpa);

        let mut donated = self.lock_donated()?;
        let newly_donated = match donated.recipient_of(page) {
            Some(owner) if owner != guest.id => {
                return Err(Error::AlreadyDonated { owner, gpa: page });
            }
            Some(_) => false,
            None => {
                self.unmap_for_donation(page)?;
                donated
                    .add(guest.id, page)
                    .map_err(|e| match e {
                        DonationError::AlreadyDonated(owner) => {
                            Error::AlreadyDonated { owner, gpa: page }
                        }
                        _ => Error::PageNotDonated {
                            guest: guest.id,
                            gpa: page,
                        },
                    })?;
                true
            }
        };

        let installed = guest.install_root_page(guest_gpa, host_page(page), perms, mem_type);
        if let Err(e) = installed {
            if newly_donated {
                error!(
                    "{}: returning gpa {:#x} after failed install in {}: {:?}",
                    self.id,
                    page.bits(),
                    guest.id,
                    e
                );
                let _ = donated.remove(guest.id, page);
                self.map_4k_rwe(page, host_page(page));
            }
            return Err(e);
        }
        Ok(())
    }

    // Removes `page` from the root's identity map, shooting the old translation down everywhere.
    fn unmap_for_donation(&self, page: GuestPageAddr) -> Result<()> {
        let mut ept = self.ept.lock();
        let translation = self.resolve_identity(&ept, page)?;

        let shootdown = self.platform.shootdown().begin().map_err(|_| {
            debug!("{}: shootdown for gpa {:#x} must be retried", self.id, page.bits());
            Error::Again
        })?;
        let mut size = translation.size;
        while size.is_huge() {
            ept.split(page.into(), size).map_err(Error::Paging)?;
            size = size.next_smaller().unwrap_or(PageSize::Size4k);
        }
        let unmapped = ept.unmap(page.into()).map_err(Error::Paging)?;
        debug_assert_eq!(unmapped, PageSize::Size4k);
        shootdown.end();
        Ok(())
    }

    /// Maps the root page at `root_gpa` into this domain at `this_gpa` without taking it away
    /// from `root`.
    pub fn share_root_page(
        &self,
        root: &Domain,
        root_gpa: GuestPhysAddr,
        this_gpa: GuestPageAddr,
        perms: EptPerms,
        mem_type: MemType,
    ) -> Result<()> {
        assert!(root.id.is_root(), "{}: pages are only shared from the root", root.id);
        let page = root_page(root_gpa);
        let hpa = {
            let ept = root.ept.lock();
            let Some(translation) = ept.translate(page.into()) else {
                error!("{}: no translation for shared gpa {:#x}", root.id, page.bits());
                return Err(Error::Resolution(PageTableError::NotMapped));
            };
            PageAddr::with_round_down(translation.hpa, PageSize::Size4k)
        };
        self.install_root_page(this_gpa, hpa, perms, mem_type)
    }

    /// Returns the root page containing `root_gpa` from the destroyed domain `guest` to the root's
    /// identity map.
    pub fn reclaim_root_page(
        &self,
        domains: &DomainRegistry,
        guest: DomainId,
        root_gpa: GuestPhysAddr,
    ) -> Result<()> {
        if !self.id.is_root() {
            return Err(Error::NotRootDomain);
        }
        if domains.contains(guest) {
            return Err(Error::GuestAlive(guest));
        }
        let page = root_page(root_gpa);
        let mut donated = self.lock_donated()?;
        donated
            .remove(guest, page)
            .map_err(|_| Error::PageNotDonated { guest, gpa: page })?;
        self.map_4k_rwe(page, host_page(page));
        Ok(())
    }

    /// Returns every page lent to the destroyed domain `guest` to the root's identity map.
    pub fn reclaim_root_pages(&self, domains: &DomainRegistry, guest: DomainId) -> Result<()> {
        if !self.id.is_root() {
            return Err(Error::NotRootDomain);
        }
        if domains.contains(guest) {
            return Err(Error::GuestAlive(guest));
        }
        let mut donated = self.lock_donated()?;
        let ranges = donated.take(guest).map_err(|_| Error::NoDonations(guest))?;
        for page in ranges.iter().flat_map(|r| r.pages()) {
            self.map_4k_rwe(page, host_page(page));
        }
        Ok(())
    }

    /// Returns true if the root page containing `gpa` is lent to any guest.
    pub fn page_already_donated(&self, gpa: GuestPhysAddr) -> bool {
        self.donated.lock().is_donated(root_page(gpa))
    }

    /// Returns true if the root page containing `gpa` is lent to `guest`.
    pub fn page_already_donated_to(&self, guest: DomainId, gpa: GuestPhysAddr) -> bool {
        self.donated.lock().is_donated_to(guest, root_page(gpa))
    }

    /// Returns true if any root page is lent to `guest`.
    pub fn donated_pages_to_guest(&self, guest: DomainId) -> bool {
        self.donated.lock().has_donations(guest)
    }

    /// Returns the ranges of root pages lent to `guest`, lowest first.
    pub fn donated_ranges(&self, guest: DomainId) -> Vec<PageRange> {
        self.donated
            .lock()
            .donations_to(guest)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}
