// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use alloc::collections::{BTreeSet, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::AtomicBool;
use drivers::iommu::{IommuError, IommuId};
use drivers::pci::{PciDeviceId, PciError};
use flagset::FlagSet;
use log::info;
use page_tracking::DonatedPages;
use sync::Mutex;
use x86_page_tables::{EptMap, PageTableError, Translation};
use x86_pages::{DomainId, GuestPageAddr, GuestPhysAddr, HostPhysAddr};

use crate::domain_info::{DomainFlag, DomainInfo, DomainOrigin, ExecMode};
use crate::e820::E820Entry;
use crate::platform::Platform;
use crate::regs::{DomainReg, DomainRegs};
use crate::uart::{UartAssignment, UartState};
use crate::xen::{Error as XenError, PvDomain, PvHandle, XenDomId};

/// Xen domain ID the root domain's PV shadow domain is created with.
const ROOT_XEN_DOMID: XenDomId = 0;

/// Domain-related errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A shootdown or the donation lock couldn't be completed this attempt; retry from the top.
    Again,
    /// The operation may only be performed by the root domain.
    NotRootDomain,
    /// The guest must be destroyed before its pages are reclaimed.
    GuestAlive(DomainId),
    /// The page isn't on loan to the guest.
    PageNotDonated { guest: DomainId, gpa: GuestPageAddr },
    /// The page is already on loan to another guest.
    AlreadyDonated { owner: DomainId, gpa: GuestPageAddr },
    /// Nothing is on loan to the guest.
    NoDonations(DomainId),
    UnknownDomain(DomainId),
    DuplicateDomain(DomainId),
    /// Guest domains can only be created once the root domain exists.
    RootDomainMissing,
    /// The domain is still referenced and can't be destroyed.
    DomainInUse(DomainId),
    /// The domain ID doesn't fit in an IOMMU domain tag.
    DomainTagOverflow(DomainId),
    /// A root guest physical address has no translation.
    Resolution(PageTableError),
    /// A root page donation was requested for a page that isn't identity mapped.
    NotIdentityMapped { gpa: GuestPhysAddr, hpa: HostPhysAddr },
    Paging(PageTableError),
    Iommu(IommuError),
    Pci(PciError),
    Xen(XenError),
    /// The domain needs a PV domain but no PV layer was registered.
    PvUnavailable,
    InvalidUartPort(u16),
    InvalidE820Range { base: u64, end: u64 },
    AllocError,
}

impl Error {
    /// Returns true if the caller should retry the operation that failed.
    pub fn is_retry(&self) -> bool {
        matches!(self, Error::Again)
    }
}

/// Holds the result of domain operations.
pub type Result<T> = core::result::Result<T, Error>;

/// A domain: the root (privileged) domain or one of the guests it creates.
///
/// A domain exclusively owns its EPT hierarchy and, for the root domain, the record of which of
/// its pages are on loan to which guest. PCI devices and remapping units are referred to by
/// handle into the platform registries.
pub struct Domain {
    pub(crate) id: DomainId,
    pub(crate) info: DomainInfo,
    pub(crate) platform: Arc<Platform>,
    pub(crate) ept: Mutex<EptMap>,
    pub(crate) pci_devs: Mutex<VecDeque<PciDeviceId>>,
    // Never held across a call into a remapping unit.
    pub(crate) iommu_set: Mutex<BTreeSet<IommuId>>,
    pub(crate) dma_map_ready: AtomicBool,
    // Held across a whole donation or reclaim, EPT update included.
    pub(crate) donated: Mutex<DonatedPages>,
    regs: Mutex<DomainRegs>,
    uart: Mutex<UartState>,
    e820: Mutex<Vec<E820Entry>>,
    pub(crate) pv: Option<PvHandle>,
}

impl Domain {
    /// Creates and sets up domain `id`. The root domain gets an identity map of all physical
    /// memory; guests start with an empty address space.
    pub(crate) fn new(platform: Arc<Platform>, id: DomainId, info: DomainInfo) -> Result<Self> {
        let mut uart = UartState::default();
        if let Some(port) = info.uart {
            if !uart.set_port(port) {
                return Err(Error::InvalidUartPort(port));
            }
        }
        if let Some(port) = info.pt_uart {
            uart.set_pt_port(port);
        }

        let mut domain = Self {
            id,
            info,
            platform,
            ept: Mutex::new(EptMap::new()),
            pci_devs: Mutex::new(VecDeque::new()),
            iommu_set: Mutex::new(BTreeSet::new()),
            dma_map_ready: AtomicBool::new(false),
            donated: Mutex::new(DonatedPages::new()),
            regs: Mutex::new(DomainRegs::default()),
            uart: Mutex::new(uart),
            e820: Mutex::new(Vec::new()),
            pv: None,
        };
        if id.is_root() {
            domain.setup_root()?;
        } else {
            domain.setup_guest()?;
        }
        info!(
            "{}: created, {:?} execution, {} MB",
            id,
            domain.exec_mode(),
            domain.info.ram_mb
        );
        Ok(domain)
    }

    fn setup_root(&mut self) -> Result<()> {
        let platform = self.platform.clone();
        let config = platform.config();
        self.ept
            .get_mut()
            .identity_map(config.max_phys_addr)
            .map_err(Error::Paging)?;
        info!("{}: identity mapped [0, {:#x})", self.id, config.max_phys_addr);

        // Every remapping unit translates DMA for the root domain until devices are handed out.
        self.iommu_set.get_mut().extend(platform.iommus().ids());

        if config.enable_winpv {
            let xen = platform.xen().ok_or(Error::PvUnavailable)?;
            self.info.ram_mb = config.max_phys_addr >> 20;
            self.info.origin = DomainOrigin::Root;
            self.info.xen_domid = ROOT_XEN_DOMID;
            self.info.flags = FlagSet::from(DomainFlag::ExecXenPvh);
            self.pv = Some(PvHandle::create(xen, self.id, &self.info).map_err(Error::Xen)?);
            xen.set_platform_pci(!config.disable_xen_pfd);
        }
        Ok(())
    }

    fn setup_guest(&mut self) -> Result<()> {
        let platform = self.platform.clone();
        if self.info.is_xen_dom() {
            let xen = platform.xen().ok_or(Error::PvUnavailable)?;
            self.pv = Some(PvHandle::create(xen, self.id, &self.info).map_err(Error::Xen)?);
        } else if self.info.has_passthrough_dev() && platform.config().pci_passthru {
            let devs = self.pci_devs.get_mut();
            for dev in platform.pci().passthru_devices() {
                devs.try_reserve(1).map_err(|_| Error::AllocError)?;
                devs.push_front(dev);
            }
        }
        Ok(())
    }

    pub fn id(&self) -> DomainId {
        self.id
    }

    pub fn info(&self) -> &DomainInfo {
        &self.info
    }

    pub fn exec_mode(&self) -> ExecMode {
        self.info.exec_mode()
    }

    /// Returns true if this domain's memory is managed by a Xen PV domain.
    pub fn is_xen_dom(&self) -> bool {
        self.pv.is_some()
    }

    /// Returns the PV domain backing this domain, if any.
    pub fn pv_domain(&self) -> Option<&dyn PvDomain> {
        self.pv.as_ref().map(|pv| pv.domain())
    }

    /// Returns the EPT pointer to load into this domain's VMCSs.
    pub fn eptp(&self) -> u64 {
        self.ept.lock().eptp()
    }

    /// Returns the translation of `gpa` in this domain's EPT.
    pub fn translate(&self, gpa: GuestPhysAddr) -> Option<Translation> {
        self.ept.lock().translate(gpa)
    }

    /// Hands a PCI device to this domain. The most recently assigned device comes first.
    pub fn assign_pci_device(&self, dev: PciDeviceId) -> Result<()> {
        self.platform.pci().get(dev).map_err(Error::Pci)?;
        let mut devs = self.pci_devs.lock();
        devs.try_reserve(1).map_err(|_| Error::AllocError)?;
        devs.push_front(dev);
        Ok(())
    }

    /// Returns the PCI devices assigned to this domain.
    pub fn pci_devices(&self) -> Vec<PciDeviceId> {
        self.pci_devs.lock().iter().copied().collect()
    }

    pub fn reg(&self, reg: DomainReg) -> u64 {
        self.regs.lock().reg(reg)
    }

    pub fn set_reg(&self, reg: DomainReg, val: u64) {
        self.regs.lock().set_reg(reg, val);
    }

    /// Emulates the legacy COM port at `port` for this domain.
    pub fn set_uart(&self, port: u16) -> Result<()> {
        if self.uart.lock().set_port(port) {
            Ok(())
        } else {
            Err(Error::InvalidUartPort(port))
        }
    }

    /// Passes the host UART at `port` through to this domain.
    pub fn set_pt_uart(&self, port: u16) {
        self.uart.lock().set_pt_port(port);
    }

    pub fn uart_assignment(&self) -> UartAssignment {
        self.uart.lock().assignment()
    }

    /// Records output the domain wrote to its emulated UART.
    pub fn uart_write(&self, bytes: &[u8]) -> usize {
        self.uart.lock().write(bytes)
    }

    /// Copies captured UART output into `buf`, returning the number of bytes copied.
    pub fn dump_uart(&self, buf: &mut [u8]) -> usize {
        self.uart.lock().dump(buf)
    }

    /// Appends `[base, end)` to the memory map given to this domain at boot.
    pub fn add_e820_entry(&self, base: u64, end: u64, kind: u32) -> Result<()> {
        let entry = E820Entry::new(base, end, kind).ok_or(Error::InvalidE820Range { base, end })?;
        let mut e820 = self.e820.lock();
        e820.try_reserve(1).map_err(|_| Error::AllocError)?;
        e820.push(entry);
        Ok(())
    }

    pub fn e820(&self) -> Vec<E820Entry> {
        self.e820.lock().clone()
    }
}
