// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use alloc::vec::Vec;

use super::address::{Address, Bus};
use super::error::{Error, Result};
use crate::iommu::IommuId;

/// Stable handle to a device in a `PciRegistry`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PciDeviceId(usize);

impl PciDeviceId {
    /// Returns the raw index of this handle.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A PCI function discovered at boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PciDevice {
    address: Address,
    iommu: IommuId,
    passthru: bool,
}

impl PciDevice {
    /// Creates a device at `address` translated by `iommu`. `passthru` marks devices reserved for
    /// direct assignment to a guest domain.
    pub fn new(address: Address, iommu: IommuId, passthru: bool) -> Self {
        Self {
            address,
            iommu,
            passthru,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Returns the remapping unit whose scope covers this device.
    pub fn iommu(&self) -> IommuId {
        self.iommu
    }

    pub fn is_passthru(&self) -> bool {
        self.passthru
    }
}

/// Every PCI function known to the hypervisor. Devices are registered once at boot and referred
/// to by `PciDeviceId` afterwards; domains hold handles, never the devices themselves.
#[derive(Debug, Default)]
pub struct PciRegistry {
    devices: Vec<PciDevice>,
}

impl PciRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `device`, returning its handle.
    pub fn add(&mut self, device: PciDevice) -> Result<PciDeviceId> {
        if self.find(device.address()).is_some() {
            return Err(Error::DuplicateAddress(device.address()));
        }
        self.devices
            .try_reserve(1)
            .map_err(|_| Error::AllocError)?;
        self.devices.push(device);
        Ok(PciDeviceId(self.devices.len() - 1))
    }

    /// Returns the device registered under `id`.
    pub fn get(&self, id: PciDeviceId) -> Result<&PciDevice> {
        self.devices.get(id.0).ok_or(Error::UnknownDevice(id))
    }

    /// Looks up the device with requester ID `address`.
    pub fn find(&self, address: Address) -> Option<PciDeviceId> {
        self.devices
            .iter()
            .position(|d| d.address() == address)
            .map(PciDeviceId)
    }

    /// Iterates over every device reserved for passthrough.
    pub fn passthru_devices(&self) -> impl Iterator<Item = PciDeviceId> + '_ {
        self.devices
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_passthru())
            .map(|(i, _)| PciDeviceId(i))
    }

    /// Returns true if the function at `address` is reserved for passthrough.
    pub fn is_passthru(&self, address: Address) -> bool {
        self.devices
            .iter()
            .any(|d| d.is_passthru() && d.address() == address)
    }

    /// Returns true if any function on `bus` is reserved for passthrough.
    pub fn bus_has_passthru(&self, bus: Bus) -> bool {
        self.devices
            .iter()
            .any(|d| d.is_passthru() && d.address().bus() == bus)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookups() {
        let mut pci = PciRegistry::new();
        let iommu = IommuId::new(0);
        let nic = Address::try_from_components(3, 0, 0).unwrap();
        let disk = Address::try_from_components(3, 1, 0).unwrap();
        let host = Address::try_from_components(0, 2, 0).unwrap();
        let nic_id = pci.add(PciDevice::new(nic, iommu, true)).unwrap();
        pci.add(PciDevice::new(disk, iommu, false)).unwrap();
        pci.add(PciDevice::new(host, iommu, false)).unwrap();
        assert_eq!(
            pci.add(PciDevice::new(nic, iommu, false)),
            Err(Error::DuplicateAddress(nic))
        );

        assert_eq!(pci.len(), 3);
        assert_eq!(pci.find(nic), Some(nic_id));
        assert_eq!(pci.get(nic_id).unwrap().address(), nic);
        assert!(pci.is_passthru(nic));
        assert!(!pci.is_passthru(disk));
        assert!(pci.bus_has_passthru(nic.bus()));
        assert!(!pci.bus_has_passthru(host.bus()));
        assert_eq!(pci.passthru_devices().collect::<Vec<_>>(), vec![nic_id]);
        assert!(pci.get(PciDeviceId(7)).is_err());
    }
}
