// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Boundary with the Xen PVH domain layer.
//!
//! A domain flagged as Xen PVH keeps its guest memory in a PV domain object owned by that layer.
//! Pages shared or donated to such a domain are installed through `PvDomain::add_root_page`
//! instead of the domain's own EPT.

use alloc::sync::Arc;
use x86_page_tables::EptPerms;
use x86_pages::{DomainId, GuestPageAddr, HostPageAddr, MemType};

use crate::domain_info::DomainInfo;

/// Xen's identifier for a PV domain.
pub type XenDomId = u16;

/// Errors reported by the PV domain layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The PV layer couldn't allocate the domain or its tables.
    ResourcesExhausted,
    /// The root page couldn't be added to the PV domain's physmap.
    MapFailed(GuestPageAddr),
}

/// Holds the result of PV domain operations.
pub type Result<T> = core::result::Result<T, Error>;

/// A PV domain created for one of our domains.
pub trait PvDomain: Send + Sync {
    fn domid(&self) -> XenDomId;

    /// Maps the root domain's page at `hpa` into this PV domain's physmap at `gpa`.
    /// Called with the root domain's donation lock held, so it must not donate or reclaim pages.
    fn add_root_page(
        &self,
        gpa: GuestPageAddr,
        hpa: HostPageAddr,
        perms: EptPerms,
        mem_type: MemType,
    ) -> Result<()>;
}

/// The PV domain layer.
pub trait XenDomains: Send + Sync {
    /// Creates the PV domain backing `owner`.
    fn create(&self, owner: DomainId, info: &DomainInfo) -> Result<Arc<dyn PvDomain>>;

    /// Tears down a PV domain returned by `create()`.
    fn destroy(&self, domid: XenDomId);

    /// Shows or hides the Xen platform PCI device from the root domain.
    fn set_platform_pci(&self, enabled: bool);
}

/// A domain's PV domain together with the layer that must eventually destroy it.
pub(crate) struct PvHandle {
    layer: Arc<dyn XenDomains>,
    domain: Arc<dyn PvDomain>,
}

impl PvHandle {
    pub fn create(layer: &Arc<dyn XenDomains>, owner: DomainId, info: &DomainInfo) -> Result<Self> {
        let domain = layer.create(owner, info)?;
        Ok(Self {
            layer: layer.clone(),
            domain,
        })
    }

    pub fn domain(&self) -> &dyn PvDomain {
        self.domain.as_ref()
    }
}

impl Drop for PvHandle {
    fn drop(&mut self) {
        self.layer.destroy(self.domain.domid());
    }
}
