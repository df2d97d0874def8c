// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::core::DmaRemapper;
use super::error::{Error, Result};

/// Stable handle to a remapping unit in an `IommuRegistry`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IommuId(usize);

impl IommuId {
    /// Creates a handle from a raw registry index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw index of this handle.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Every DMA remapping unit in the system, registered at boot. Units are never removed, so a
/// handle stays valid for the life of the registry.
#[derive(Default)]
pub struct IommuRegistry {
    units: Vec<Arc<dyn DmaRemapper>>,
}

impl IommuRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `unit`, returning its handle.
    pub fn add(&mut self, unit: Arc<dyn DmaRemapper>) -> Result<IommuId> {
        self.units.try_reserve(1).map_err(|_| Error::AllocError)?;
        self.units.push(unit);
        Ok(IommuId(self.units.len() - 1))
    }

    /// Returns the unit registered under `id`.
    pub fn get(&self, id: IommuId) -> Result<&Arc<dyn DmaRemapper>> {
        self.units.get(id.0).ok_or(Error::UnknownIommu(id))
    }

    /// Iterates over the handles of all registered units.
    pub fn ids(&self) -> impl Iterator<Item = IommuId> {
        (0..self.units.len()).map(IommuId)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
