// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use super::IommuId;

/// Errors resulting from interacting with the IOMMU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// IOMMU register set is misaligned.
    MisalignedRegisters,
    /// The IOTLB registers lie outside the register page.
    InvalidIotlbOffset(u64),
    /// Missing required 4-level second-level translation support.
    MissingSecondLevelSupport,
    /// The unit did not acknowledge a command in time.
    HardwareTimeout(&'static str),
    /// No unit is registered under the given ID.
    UnknownIommu(IommuId),
    /// Failed to allocate memory for the registry.
    AllocError,
}

/// Holds results for IOMMU operations.
pub type Result<T> = core::result::Result<T, Error>;
