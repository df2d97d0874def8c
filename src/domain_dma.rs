// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! DMA remapping for a domain's devices.
//!
//! A domain's IOMMU set holds the remapping units translating DMA from its devices. Units walk the
//! domain's EPT directly, so the EPT has to be told whether every unit snoops CPU caches while
//! walking and whether every unit honours snoop control.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use drivers::iommu::{DmaContext, DmaRemapper, IommuId};
use drivers::pci::{Address, Bus, DevFn};
use log::info;
use x86_pages::{GuestPageAddr, PageSize};

use crate::domain::{Domain, Error, Result};

// Page-selective invalidation orders for the two flush granularities.
const ORDER_4K: u32 = 0;
const ORDER_2M: u32 = 9;

impl Domain {
    /// Adds `iommu` to the units translating this domain's DMA. Adding a unit twice is a no-op.
    pub fn add_iommu(&self, iommu: IommuId) {
        self.iommu_set.lock().insert(iommu);
    }

    pub fn remove_iommu(&self, iommu: IommuId) {
        self.iommu_set.lock().remove(&iommu);
    }

    /// Returns the units translating this domain's DMA.
    pub fn iommus(&self) -> Vec<IommuId> {
        self.iommu_set.lock().iter().copied().collect()
    }

    /// Returns true once `prepare_iommus()` has run.
    pub fn dma_map_ready(&self) -> bool {
        self.dma_map_ready.load(Ordering::Acquire)
    }

    pub fn iommu_coherent(&self) -> bool {
        self.ept.lock().iommu_coherent()
    }

    pub fn iommu_snoop_ctl(&self) -> bool {
        self.ept.lock().iommu_snoop_ctl()
    }

    /// Returns how many times this domain's EPT has been flushed for non-coherent units.
    pub fn ept_table_flushes(&self) -> u64 {
        self.ept.lock().table_flushes()
    }

    /// Collects the units of every assigned device into the IOMMU set and configures the EPT for
    /// the least capable unit in the set, including units added before this call. If any unit
    /// walks without snooping, the whole EPT is flushed since entries written before now may
    /// still sit in the CPU caches.
    pub fn prepare_iommus(&self) -> Result<()> {
        for dev in self.pci_devices() {
            let iommu = self.platform.pci().get(dev).map_err(Error::Pci)?.iommu();
            self.add_iommu(iommu);
        }
        let units = self.iommu_units()?;
        let coherent = units.iter().all(|unit| unit.coherent());
        let snoop_ctl = units.iter().all(|unit| unit.snoop_control());

        {
            let mut ept = self.ept.lock();
            ept.set_iommu_coherence(coherent);
            ept.set_iommu_snoop_ctl(snoop_ctl);
            if !coherent {
                ept.flush_tables();
                info!(
                    "{}: flushed EPT tables: coherent={}, snoop_ctl={}",
                    self.id, coherent, snoop_ctl
                );
            }
        }

        self.dma_map_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Returns the unit in this domain's IOMMU set whose scope covers every device not claimed
    /// by another unit.
    pub fn find_catchall_iommu(&self) -> Option<IommuId> {
        let ids = self.iommus();
        ids.into_iter().find(|&id| {
            self.platform
                .iommus()
                .get(id)
                .map_or(false, |unit| unit.is_catchall())
        })
    }

    /// Points the remapping units at this domain's EPT for its devices and turns remapping on.
    ///
    /// The root domain gets every function behind the catch-all unit except those reserved for
    /// passthrough, plus its own devices behind other units. Guests get only their own devices.
    ///
    /// Panics if called before `prepare_iommus()`.
    pub fn map_dma(&self) -> Result<()> {
        assert!(
            self.dma_map_ready(),
            "{}: DMA mapped before IOMMUs were prepared",
            self.id
        );
        if self.id.is_root() {
            self.map_root_dma()
        } else {
            self.map_guest_dma()
        }
    }

    fn map_root_dma(&self) -> Result<()> {
        let pci = self.platform.pci();
        let catchall = self
            .find_catchall_iommu()
            .unwrap_or_else(|| panic!("{}: no catch-all IOMMU", self.id));
        let catchall = self.platform.iommus().get(catchall).map_err(Error::Iommu)?;
        let ctx = self.dma_context()?;

        for bus in Bus::all() {
            if !pci.bus_has_passthru(bus) {
                catchall.map_bus(bus, &ctx).map_err(Error::Iommu)?;
                continue;
            }
            for devfn in DevFn::all() {
                let addr = Address::from_devfn(bus, devfn);
                if pci.is_passthru(addr) {
                    continue;
                }
                catchall.map_device(addr, &ctx).map_err(Error::Iommu)?;
            }
        }

        for (addr, unit) in self.device_units()? {
            if !unit.is_catchall() {
                unit.map_device(addr, &ctx).map_err(Error::Iommu)?;
            }
        }

        self.enable_remapping()
    }

    fn map_guest_dma(&self) -> Result<()> {
        let ctx = self.dma_context()?;
        for (addr, unit) in self.device_units()? {
            unit.map_device(addr, &ctx).map_err(Error::Iommu)?;
        }
        self.enable_remapping()
    }

    fn enable_remapping(&self) -> Result<()> {
        for unit in self.iommu_units()? {
            if unit.remapping_enabled() {
                continue;
            }
            unit.enable_remapping().map_err(Error::Iommu)?;
        }
        Ok(())
    }

    /// Invalidates every IOTLB entry tagged with this domain.
    pub fn flush_iotlb(&self) -> Result<()> {
        let tag = self.dma_tag()?;
        for unit in self.iommu_units()? {
            unit.flush_iotlb_domain(tag).map_err(Error::Iommu)?;
        }
        Ok(())
    }

    /// Invalidates IOTLB entries for the 4KB page at `gpa`.
    pub fn flush_iotlb_page_4k(&self, gpa: GuestPageAddr) -> Result<()> {
        self.flush_iotlb_range(gpa, ORDER_4K)
    }

    /// Invalidates IOTLB entries for the 2MB range at `gpa`.
    pub fn flush_iotlb_page_2m(&self, gpa: GuestPageAddr) -> Result<()> {
        assert!(
            gpa.is_aligned(PageSize::Size2M),
            "{}: unaligned 2MB IOTLB flush at {:#x}",
            self.id,
            gpa.bits()
        );
        self.flush_iotlb_range(gpa, ORDER_2M)
    }

    // Units without page-selective invalidation of `order` pages fall back to a domain flush.
    fn flush_iotlb_range(&self, gpa: GuestPageAddr, order: u32) -> Result<()> {
        let tag = self.dma_tag()?;
        for unit in self.iommu_units()? {
            let result = match unit.psi_max_order() {
                Some(max) if order <= max => unit.flush_iotlb_pages(tag, gpa.bits(), order),
                _ => unit.flush_iotlb_domain(tag),
            };
            result.map_err(Error::Iommu)?;
        }
        Ok(())
    }

    fn dma_tag(&self) -> Result<u16> {
        u16::try_from(self.id.raw()).map_err(|_| Error::DomainTagOverflow(self.id))
    }

    fn dma_context(&self) -> Result<DmaContext> {
        let tag = self.dma_tag()?;
        Ok(DmaContext::new(tag, self.ept.lock().root_phys()))
    }

    // Snapshot of the IOMMU set so that no lock is held while the units are programmed.
    fn iommu_units(&self) -> Result<Vec<Arc<dyn DmaRemapper>>> {
        self.iommus()
            .into_iter()
            .map(|id| self.platform.iommus().get(id).cloned().map_err(Error::Iommu))
            .collect()
    }

    fn device_units(&self) -> Result<Vec<(Address, Arc<dyn DmaRemapper>)>> {
        self.pci_devices()
            .into_iter()
            .map(|dev| {
                let dev = self.platform.pci().get(dev).map_err(Error::Pci)?;
                let unit = self
                    .platform
                    .iommus()
                    .get(dev.iommu())
                    .map_err(Error::Iommu)?;
                Ok((dev.address(), unit.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::domain_info::{DomainFlag, DomainInfo};
    use crate::test_stubs::{IommuCall, PlatformBuilder};
    use drivers::iommu::IommuId;
    use drivers::pci::{Address, Bus, DevFn};
    use std::vec::Vec;
    use x86_pages::*;

    fn gpa(addr: u64) -> GuestPageAddr {
        PageAddr::new(RawAddr::guest(addr)).unwrap()
    }

    #[test]
    fn iommu_set_is_a_set() {
        let (platform, domains) = PlatformBuilder::new()
            .iommu(true, true, None, true)
            .iommu(true, true, None, false)
            .build_with_root();
        let guest = domains
            .create(&platform, DomainId::new(1), DomainInfo::guest(64))
            .unwrap();
        assert!(guest.iommus().is_empty());
        guest.add_iommu(IommuId::new(1));
        guest.add_iommu(IommuId::new(1));
        guest.add_iommu(IommuId::new(0));
        assert_eq!(guest.iommus(), vec![IommuId::new(0), IommuId::new(1)]);
        guest.remove_iommu(IommuId::new(0));
        guest.remove_iommu(IommuId::new(0));
        assert_eq!(guest.iommus(), vec![IommuId::new(1)]);
        // The root domain starts out with every unit.
        let root = domains.get(DomainId::root()).unwrap();
        assert_eq!(root.iommus().len(), 2);
    }

    fn passthrough_guest(coherent: [bool; 3]) -> (u64, bool, bool) {
        let (platform, domains) = PlatformBuilder::new()
            .iommu(coherent[0], true, None, true)
            .iommu(coherent[1], true, None, false)
            .iommu(coherent[2], false, None, false)
            .device((1, 0, 0), 0, true)
            .device((2, 0, 0), 1, true)
            .device((3, 0, 0), 2, true)
            .build_with_root();
        let info = DomainInfo::guest(64).with_flags(DomainFlag::PassthroughDev);
        let guest = domains.create(&platform, DomainId::new(1), info).unwrap();
        assert!(!guest.dma_map_ready());
        guest.prepare_iommus().unwrap();
        assert!(guest.dma_map_ready());
        assert_eq!(guest.iommus().len(), 3);
        (
            guest.ept_table_flushes(),
            guest.iommu_coherent(),
            guest.iommu_snoop_ctl(),
        )
    }

    #[test]
    fn capabilities_are_reduced() {
        assert_eq!(passthrough_guest([true, true, false]), (1, false, false));
        assert_eq!(passthrough_guest([true, true, true]), (0, true, false));
    }

    #[test]
    fn no_devices_is_coherent() {
        let (platform, domains) = PlatformBuilder::new().build_with_root();
        let guest = domains
            .create(&platform, DomainId::new(1), DomainInfo::guest(64))
            .unwrap();
        guest.prepare_iommus().unwrap();
        assert!(guest.iommu_coherent());
        assert!(guest.iommu_snoop_ctl());
        assert_eq!(guest.ept_table_flushes(), 0);
    }

    #[test]
    fn root_catchall_capabilities_apply() {
        let (platform, domains) = PlatformBuilder::new()
            .iommu(false, false, None, true)
            .build_with_root();
        let root = domains.get(DomainId::root()).unwrap();
        assert!(root.pci_devices().is_empty());
        root.prepare_iommus().unwrap();
        assert!(!root.iommu_coherent());
        assert!(!root.iommu_snoop_ctl());
        assert_eq!(root.ept_table_flushes(), 1);

        // A unit added by hand before preparing counts too.
        let guest = domains
            .create(&platform, DomainId::new(1), DomainInfo::guest(64))
            .unwrap();
        guest.add_iommu(IommuId::new(0));
        guest.prepare_iommus().unwrap();
        assert!(!guest.iommu_coherent());
        assert_eq!(guest.ept_table_flushes(), 1);
    }

    #[test]
    #[should_panic]
    fn map_dma_requires_prepare() {
        let (platform, domains) = PlatformBuilder::new()
            .iommu(true, true, None, true)
            .build_with_root();
        let guest = domains
            .create(&platform, DomainId::new(1), DomainInfo::guest(64))
            .unwrap();
        let _ = guest.map_dma();
    }

    #[test]
    fn guest_dma_maps_own_devices() {
        let (platform, domains, units) = PlatformBuilder::new()
            .iommu(true, true, None, true)
            .iommu(true, true, Some(9), false)
            .device((3, 1, 0), 1, true)
            .build_with_units();
        domains
            .create(&platform, DomainId::root(), Default::default())
            .unwrap();
        let info = DomainInfo::guest(64).with_flags(DomainFlag::PassthroughDev);
        let guest = domains.create(&platform, DomainId::new(5), info).unwrap();
        guest.prepare_iommus().unwrap();
        guest.map_dma().unwrap();

        let addr = Address::try_from_components(3, 1, 0).unwrap();
        assert_eq!(
            units[1].calls(),
            vec![
                IommuCall::MapDevice(addr, 5, guest.eptp() & !0xfff),
                IommuCall::Enable
            ]
        );
        assert!(units[0].calls().is_empty());
    }

    #[test]
    fn root_dma_skips_passthrough_devices() {
        let (platform, domains, units) = PlatformBuilder::new()
            .iommu(true, true, None, true)
            .iommu(true, true, None, false)
            .device((0, 2, 0), 0, false)
            .device((3, 1, 0), 1, true)
            .device((7, 0, 0), 1, false)
            .build_with_units();
        let root = domains
            .create(&platform, DomainId::root(), Default::default())
            .unwrap();
        let own = platform
            .pci()
            .find(Address::try_from_components(7, 0, 0).unwrap())
            .unwrap();
        root.assign_pci_device(own).unwrap();
        root.prepare_iommus().unwrap();
        root.map_dma().unwrap();

        let slpt = root.eptp() & !0xfff;
        let calls = units[0].calls();
        let passthru = Address::try_from_components(3, 1, 0).unwrap();
        // Every bus but bus 3 is mapped whole.
        let buses: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                IommuCall::MapBus(bus, 0, root_phys) if *root_phys == slpt => Some(*bus),
                _ => None,
            })
            .collect();
        assert_eq!(buses.len(), 255);
        assert!(!buses.contains(&Bus::try_from(3u32).unwrap()));
        // Bus 3 is mapped function by function, skipping the passthrough device.
        let funcs: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                IommuCall::MapDevice(addr, 0, _) => Some(*addr),
                _ => None,
            })
            .collect();
        assert_eq!(funcs.len(), DevFn::all().count() - 1);
        assert!(funcs.iter().all(|a| a.bus() == Bus::try_from(3u32).unwrap()));
        assert!(!funcs.contains(&passthru));
        assert_eq!(calls.last(), Some(&IommuCall::Enable));

        // The root's own device behind the second unit is mapped there.
        let own_addr = Address::try_from_components(7, 0, 0).unwrap();
        assert_eq!(
            units[1].calls(),
            vec![IommuCall::MapDevice(own_addr, 0, slpt), IommuCall::Enable]
        );
    }

    #[test]
    fn page_flushes_fall_back_without_psi() {
        let (platform, domains, units) = PlatformBuilder::new()
            .iommu(true, true, None, true)
            .iommu(true, true, Some(9), false)
            .iommu(true, true, Some(0), false)
            .build_with_units();
        domains
            .create(&platform, DomainId::root(), Default::default())
            .unwrap();
        let guest = domains
            .create(&platform, DomainId::new(2), DomainInfo::guest(64))
            .unwrap();
        for i in 0..3 {
            guest.add_iommu(IommuId::new(i));
        }

        guest.flush_iotlb_page_4k(gpa(0x5000)).unwrap();
        guest.flush_iotlb_page_2m(gpa(0x40_0000)).unwrap();
        guest.flush_iotlb().unwrap();

        assert_eq!(
            units[0].calls(),
            vec![
                IommuCall::FlushDomain(2),
                IommuCall::FlushDomain(2),
                IommuCall::FlushDomain(2)
            ]
        );
        assert_eq!(
            units[1].calls(),
            vec![
                IommuCall::FlushPages(2, 0x5000, 0),
                IommuCall::FlushPages(2, 0x40_0000, 9),
                IommuCall::FlushDomain(2)
            ]
        );
        assert_eq!(
            units[2].calls(),
            vec![
                IommuCall::FlushPages(2, 0x5000, 0),
                IommuCall::FlushDomain(2),
                IommuCall::FlushDomain(2)
            ]
        );
    }
}
