// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use super::{Address, PciDeviceId};

/// Errors resulting from managing the PCI device registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A device with the same requester ID is already registered.
    DuplicateAddress(Address),
    /// No device is registered under the given ID.
    UnknownDevice(PciDeviceId),
    /// Failed to allocate memory for the registry.
    AllocError,
}

/// Holds results for PCI operations.
pub type Result<T> = core::result::Result<T, Error>;
