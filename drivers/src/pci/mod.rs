// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

mod address;
mod device;
mod error;

pub use address::{Address, AddressComponent, Bus, DevFn, Device, Function};
pub use device::{PciDevice, PciDeviceId, PciRegistry};
pub use error::Error as PciError;
pub use error::Result as PciResult;
