// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Stand-ins for the CPUs, remapping units and PV layer the domain code drives.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use drivers::iommu::{DmaContext, DmaRemapper, IommuId, IommuRegistry, IommuResult};
use drivers::pci::{Address, Bus, PciDevice, PciRegistry};
use sync::Mutex;
use x86_page_tables::EptPerms;
use x86_pages::{DomainId, GuestPageAddr, HostPageAddr, MemType};

use crate::config::HypConfig;
use crate::domain_info::DomainInfo;
use crate::domains::DomainRegistry;
use crate::platform::Platform;
use crate::shootdown::CpuOps;
use crate::xen::{PvDomain, Result as XenResult, XenDomId, XenDomains};

/// Identity-map limit of the root domain in tests.
pub const ROOT_LIMIT: u64 = 64 << 20;

std::thread_local! {
    static CURRENT_CPU: Cell<usize> = Cell::new(0);
}

/// CPUs whose index is per test thread. Threads run as CPU 0 unless inside `run_as()`.
pub struct MockCpu {
    pending_ipis: Vec<AtomicBool>,
    invepts: Vec<AtomicUsize>,
    ipis_sent: AtomicUsize,
}

impl MockCpu {
    pub fn new(cpus: usize) -> Arc<Self> {
        Arc::new(Self {
            pending_ipis: (0..cpus).map(|_| AtomicBool::new(false)).collect(),
            invepts: (0..cpus).map(|_| AtomicUsize::new(0)).collect(),
            ipis_sent: AtomicUsize::new(0),
        })
    }

    /// Runs `f` on the calling thread as CPU `id`.
    pub fn run_as<R>(&self, id: usize, f: impl FnOnce() -> R) -> R {
        let prev = CURRENT_CPU.with(|c| c.replace(id));
        let ret = f();
        CURRENT_CPU.with(|c| c.set(prev));
        ret
    }

    /// Consumes a pending shootdown IPI for CPU `id`.
    pub fn take_ipi(&self, id: usize) -> bool {
        self.pending_ipis[id].swap(false, Ordering::AcqRel)
    }

    pub fn invepts(&self, id: usize) -> usize {
        self.invepts[id].load(Ordering::Acquire)
    }

    pub fn ipis_sent(&self) -> usize {
        self.ipis_sent.load(Ordering::Acquire)
    }
}

impl CpuOps for MockCpu {
    fn this_cpu(&self) -> usize {
        CURRENT_CPU.with(|c| c.get())
    }

    fn online_cpus(&self) -> usize {
        self.invepts.len()
    }

    fn send_shootdown_ipi(&self, cpu: usize) {
        self.ipis_sent.fetch_add(1, Ordering::AcqRel);
        self.pending_ipis[cpu].store(true, Ordering::Release);
    }

    fn invept(&self) {
        self.invepts[self.this_cpu()].fetch_add(1, Ordering::AcqRel);
    }
}

/// A remapping unit operation, with the domain tag and table root it was given.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IommuCall {
    MapBus(Bus, u16, u64),
    MapDevice(Address, u16, u64),
    FlushDomain(u16),
    FlushPages(u16, u64, u32),
    Enable,
}

/// A remapping unit that records what it is asked to do.
pub struct MockIommu {
    coherent: bool,
    snoop_control: bool,
    psi_max_order: Option<u32>,
    catchall: bool,
    enabled: AtomicBool,
    calls: Mutex<Vec<IommuCall>>,
}

impl MockIommu {
    pub fn new(coherent: bool, snoop_control: bool, psi: Option<u32>, catchall: bool) -> Self {
        Self {
            coherent,
            snoop_control,
            psi_max_order: psi,
            catchall,
            enabled: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<IommuCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: IommuCall) -> IommuResult<()> {
        self.calls.lock().push(call);
        Ok(())
    }
}

impl DmaRemapper for MockIommu {
    fn coherent(&self) -> bool {
        self.coherent
    }

    fn snoop_control(&self) -> bool {
        self.snoop_control
    }

    fn psi_max_order(&self) -> Option<u32> {
        self.psi_max_order
    }

    fn is_catchall(&self) -> bool {
        self.catchall
    }

    fn remapping_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn enable_remapping(&self) -> IommuResult<()> {
        self.enabled.store(true, Ordering::Release);
        self.record(IommuCall::Enable)
    }

    fn map_bus(&self, bus: Bus, ctx: &DmaContext) -> IommuResult<()> {
        self.record(IommuCall::MapBus(bus, ctx.domain_tag(), ctx.slpt_root()))
    }

    fn map_device(&self, address: Address, ctx: &DmaContext) -> IommuResult<()> {
        self.record(IommuCall::MapDevice(
            address,
            ctx.domain_tag(),
            ctx.slpt_root(),
        ))
    }

    fn flush_iotlb_domain(&self, domain_tag: u16) -> IommuResult<()> {
        self.record(IommuCall::FlushDomain(domain_tag))
    }

    fn flush_iotlb_pages(&self, domain_tag: u16, addr: u64, order: u32) -> IommuResult<()> {
        self.record(IommuCall::FlushPages(domain_tag, addr, order))
    }
}

type RootPage = (u64, u64, EptPerms, MemType);

/// A PV domain that records the root pages added to it.
pub struct MockPvDomain {
    domid: XenDomId,
    pages: Mutex<Vec<RootPage>>,
}

impl PvDomain for MockPvDomain {
    fn domid(&self) -> XenDomId {
        self.domid
    }

    fn add_root_page(
        &self,
        gpa: GuestPageAddr,
        hpa: HostPageAddr,
        perms: EptPerms,
        mem_type: MemType,
    ) -> XenResult<()> {
        self.pages
            .lock()
            .push((gpa.bits(), hpa.bits(), perms, mem_type));
        Ok(())
    }
}

/// A PV layer handing out domain IDs from 1, or the ID in `DomainInfo` for the root domain.
#[derive(Default)]
pub struct MockXen {
    next_domid: AtomicU16,
    live: Mutex<BTreeMap<XenDomId, Arc<MockPvDomain>>>,
    platform_pci: Mutex<Option<bool>>,
}

impl MockXen {
    pub fn live_domains(&self) -> usize {
        self.live.lock().len()
    }

    pub fn platform_pci(&self) -> Option<bool> {
        *self.platform_pci.lock()
    }

    pub fn root_pages(&self, domid: XenDomId) -> Vec<RootPage> {
        self.live
            .lock()
            .get(&domid)
            .map(|d| d.pages.lock().clone())
            .unwrap_or_default()
    }
}

impl XenDomains for MockXen {
    fn create(&self, owner: DomainId, info: &DomainInfo) -> XenResult<Arc<dyn PvDomain>> {
        let domid = if owner.is_root() {
            info.xen_domid
        } else {
            self.next_domid.fetch_add(1, Ordering::AcqRel) + 1
        };
        let domain = Arc::new(MockPvDomain {
            domid,
            pages: Mutex::new(Vec::new()),
        });
        self.live.lock().insert(domid, domain.clone());
        Ok(domain)
    }

    fn destroy(&self, domid: XenDomId) {
        self.live.lock().remove(&domid);
    }

    fn set_platform_pci(&self, enabled: bool) {
        *self.platform_pci.lock() = Some(enabled);
    }
}

/// Builds a single-CPU `Platform` from mock remapping units and PCI devices.
pub struct PlatformBuilder {
    cmdline: String,
    iommus: Vec<Arc<MockIommu>>,
    devices: Vec<((u32, u32, u32), usize, bool)>,
}

impl PlatformBuilder {
    pub fn new() -> Self {
        Self {
            cmdline: String::new(),
            iommus: Vec::new(),
            devices: Vec::new(),
        }
    }

    pub fn cmdline(mut self, cmdline: &str) -> Self {
        self.cmdline = String::from(cmdline);
        self
    }

    pub fn iommu(mut self, coherent: bool, snoop: bool, psi: Option<u32>, catchall: bool) -> Self {
        self.iommus
            .push(Arc::new(MockIommu::new(coherent, snoop, psi, catchall)));
        self
    }

    /// Adds the device at `(bus, dev, func)` behind the `iommu`th unit.
    pub fn device(mut self, bdf: (u32, u32, u32), iommu: usize, passthru: bool) -> Self {
        self.devices.push((bdf, iommu, passthru));
        self
    }

    fn platform(self, xen: Option<Arc<dyn XenDomains>>) -> (Arc<Platform>, Vec<Arc<MockIommu>>) {
        let mut config = HypConfig::from(self.cmdline.as_str());
        config.max_phys_addr = ROOT_LIMIT;

        let mut iommus = IommuRegistry::new();
        for unit in self.iommus.iter() {
            iommus.add(unit.clone()).unwrap();
        }
        let mut pci = PciRegistry::new();
        for ((bus, dev, func), iommu, passthru) in self.devices {
            let address = Address::try_from_components(bus, dev, func).unwrap();
            pci.add(PciDevice::new(address, IommuId::new(iommu), passthru))
                .unwrap();
        }
        let platform = Platform::new(config, MockCpu::new(1), pci, iommus, xen);
        (Arc::new(platform), self.iommus)
    }

    pub fn build(self) -> (Arc<Platform>, DomainRegistry) {
        let (platform, _) = self.platform(None);
        (platform, DomainRegistry::new())
    }

    /// Builds the platform and creates the root domain on it.
    pub fn build_with_root(self) -> (Arc<Platform>, DomainRegistry) {
        let (platform, domains) = self.build();
        domains
            .create(&platform, DomainId::root(), DomainInfo::default())
            .unwrap();
        (platform, domains)
    }

    /// Builds the platform, also returning its remapping units.
    pub fn build_with_units(self) -> (Arc<Platform>, DomainRegistry, Vec<Arc<MockIommu>>) {
        let (platform, units) = self.platform(None);
        (platform, DomainRegistry::new(), units)
    }

    /// Builds the platform with a PV layer.
    pub fn build_with_xen(self) -> (Arc<Platform>, DomainRegistry, Arc<MockXen>) {
        let xen = Arc::new(MockXen::default());
        let (platform, _) = self.platform(Some(xen.clone()));
        (platform, DomainRegistry::new(), xen)
    }
}
