// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

/// `DomainId` identifies a domain managed by the hypervisor.
/// 0 = root (privileged) domain
/// 1..u64::max = guest domains
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId {
    id: u64,
}

impl DomainId {
    const ROOT: u64 = 0;

    /// Creates a new DomainId with the given raw value.
    pub const fn new(id: u64) -> Self {
        Self { id }
    }

    /// Returns the ID of the root domain.
    pub const fn root() -> Self {
        Self { id: Self::ROOT }
    }

    /// Returns true if this is the root domain.
    pub fn is_root(&self) -> bool {
        self.id == Self::ROOT
    }

    /// Returns the raw value of the DomainId.
    pub fn raw(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "dom{}", self.id)
    }
}

/// `AddressSpace` identifies the address space that a raw address is in.
pub trait AddressSpace: Clone + Copy + fmt::Debug {}

/// Represents the host (i.e. "actual") physical address space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HostPhys;

impl AddressSpace for HostPhys {}

/// Represents the guest physical address space of some domain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct GuestPhys;

impl AddressSpace for GuestPhys {}
