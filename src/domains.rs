// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use alloc::sync::Arc;
use alloc::vec::Vec;
use log::info;
use sync::Mutex;
use x86_pages::DomainId;

use crate::domain::{Domain, Error, Result};
use crate::domain_info::DomainInfo;
use crate::platform::Platform;

/// Tracks every live domain. The root domain is always the first one added and the last one
/// removed.
#[derive(Default)]
pub struct DomainRegistry {
    domains: Mutex<Vec<Arc<Domain>>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates domain `id` and adds it to the registry.
    pub fn create(
        &self,
        platform: &Arc<Platform>,
        id: DomainId,
        info: DomainInfo,
    ) -> Result<Arc<Domain>> {
        self.check_new(&self.domains.lock(), id)?;
        // Setting up the root identity map takes a while; don't hold the lock for it.
        let domain = Arc::new(Domain::new(platform.clone(), id, info)?);
        self.add(domain.clone())?;
        Ok(domain)
    }

    fn check_new(&self, domains: &[Arc<Domain>], id: DomainId) -> Result<()> {
        if domains.iter().any(|d| d.id() == id) {
            return Err(Error::DuplicateDomain(id));
        }
        if !id.is_root() && !domains.iter().any(|d| d.id().is_root()) {
            return Err(Error::RootDomainMissing);
        }
        Ok(())
    }

    /// Adds an already constructed `domain`.
    pub fn add(&self, domain: Arc<Domain>) -> Result<()> {
        let mut domains = self.domains.lock();
        self.check_new(&domains, domain.id())?;
        domains.try_reserve(1).map_err(|_| Error::AllocError)?;
        domains.push(domain);
        Ok(())
    }

    /// Returns the domain with the given ID.
    pub fn get(&self, id: DomainId) -> Option<Arc<Domain>> {
        self.domains.lock().iter().find(|d| d.id() == id).cloned()
    }

    /// Returns true if domain `id` is still alive.
    pub fn contains(&self, id: DomainId) -> bool {
        self.domains.lock().iter().any(|d| d.id() == id)
    }

    pub fn len(&self) -> usize {
        self.domains.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.lock().is_empty()
    }

    /// Removes the domain with the given ID if there are no outstanding references to it.
    pub fn remove(&self, id: DomainId) -> Result<()> {
        // Pull the last reference out of the vector first so the final drop, which may tear down
        // a PV domain, doesn't happen under the lock.
        let domain = {
            let mut domains = self.domains.lock();
            let index = domains
                .iter()
                .position(|d| d.id() == id)
                .ok_or(Error::UnknownDomain(id))?;
            if id.is_root() && domains.len() > 1 {
                return Err(Error::DomainInUse(id));
            }
            // Sound since new references are only handed out under the lock.
            if Arc::strong_count(&domains[index]) != 1 {
                return Err(Error::DomainInUse(id));
            }
            domains.remove(index)
        };
        drop(domain);
        info!("{}: destroyed", id);
        Ok(())
    }
}
