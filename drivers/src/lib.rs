// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! # Hardware drivers

#![no_std]

extern crate alloc;

// For testing use the std crate.
#[cfg(test)]
#[macro_use]
extern crate std;

/// Provides the driver for VT-d DMA remapping units and the registry they are reached through.
pub mod iommu;
/// Provides PCI addressing and the registry of devices known to the hypervisor.
pub mod pci;
