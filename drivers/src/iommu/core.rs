// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use log::{debug, info};
use sync::Mutex;
use tock_registers::fields::FieldValue;
use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::LocalRegisterCopy;

use super::context::{DeviceContexts, DmaContext};
use super::error::{Error, Result};
use super::registers::*;
use crate::pci::{Address, Bus};

// SAGAW bit for 48-bit, 4-level second-level tables.
const SAGAW_4LEVEL: u64 = 1 << 2;
// Upper bound on status polls before a command is considered lost.
const POLL_SPINS: usize = 1 << 20;

/// Operations a domain needs from a DMA remapping unit.
///
/// Implemented by `VtdUnit` for real hardware; the domain layer only ever sees this trait so
/// units can be substituted in tests.
pub trait DmaRemapper: Send + Sync {
    /// Returns true if the unit's page walks snoop processor caches.
    fn coherent(&self) -> bool;

    /// Returns true if the unit honors the snoop bit in second-level leaf entries.
    fn snoop_control(&self) -> bool;

    /// Returns the largest page-selective invalidation order (log2 of the number of 4kB pages),
    /// or `None` if page-selective invalidation is not supported.
    fn psi_max_order(&self) -> Option<u32>;

    /// Returns true if the unit's scope includes every device not claimed by another unit.
    fn is_catchall(&self) -> bool;

    /// Returns true if DMA remapping is enabled.
    fn remapping_enabled(&self) -> bool;

    /// Turns on DMA remapping. Devices without a present context entry are blocked from then on.
    fn enable_remapping(&self) -> Result<()>;

    /// Subjects every device function on `bus` to `ctx`.
    fn map_bus(&self, bus: Bus, ctx: &DmaContext) -> Result<()>;

    /// Subjects the device function at `address` to `ctx`.
    fn map_device(&self, address: Address, ctx: &DmaContext) -> Result<()>;

    /// Invalidates every IOTLB entry tagged with `domain_tag`.
    fn flush_iotlb_domain(&self, domain_tag: u16) -> Result<()>;

    /// Invalidates the IOTLB entries tagged with `domain_tag` covering the naturally aligned
    /// block of `1 << order` 4kB pages at `addr`.
    fn flush_iotlb_pages(&self, domain_tag: u16, addr: u64, order: u32) -> Result<()>;
}

/// A VT-d DMA remapping hardware unit.
pub struct VtdUnit {
    registers: &'static VtdRegisters,
    iotlb: &'static IotlbRegisters,
    catchall: bool,
    // Also serializes command submission.
    contexts: Mutex<DeviceContexts>,
}

impl VtdUnit {
    /// Creates a driver for the unit whose registers are at `base`. `catchall` is set for the unit
    /// reported with an include-all device scope.
    ///
    /// # Safety
    ///
    /// `base` must be the address of a VT-d register page that nothing else accesses for the
    /// lifetime of the returned unit.
    pub unsafe fn new(base: u64, catchall: bool) -> Result<Self> {
        if base % REGISTER_PAGE_SIZE != 0 {
            return Err(Error::MisalignedRegisters);
        }
        let registers = &*(base as *const VtdRegisters);
        if registers.capability.read(Capability::Sagaw) & SAGAW_4LEVEL == 0 {
            return Err(Error::MissingSecondLevelSupport);
        }
        let iotlb_offset = registers.ext_capability.read(ExtCapability::IotlbRegOffset) * 16;
        if iotlb_offset < 0x30
            || iotlb_offset + core::mem::size_of::<IotlbRegisters>() as u64 > REGISTER_PAGE_SIZE
        {
            return Err(Error::InvalidIotlbOffset(iotlb_offset));
        }
        let iotlb = &*((base + iotlb_offset) as *const IotlbRegisters);
        Ok(Self {
            registers,
            iotlb,
            catchall,
            contexts: Mutex::new(DeviceContexts::new()),
        })
    }

    /// Returns the architecture version of this unit.
    pub fn version(&self) -> u32 {
        self.registers.version.get()
    }

    fn poll(&self, what: &'static str, done: impl Fn() -> bool) -> Result<()> {
        for _ in 0..POLL_SPINS {
            if done() {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        Err(Error::HardwareTimeout(what))
    }

    // GCMD bits other than the one-shot command being issued must mirror the current status, or
    // writing the command would turn those features off.
    fn global_command(&self, command: FieldValue<u32, GlobalCommand::Register>) {
        let mut cmd = LocalRegisterCopy::<u32, GlobalCommand::Register>::new(0);
        if self
            .registers
            .global_status
            .is_set(GlobalStatus::TranslationEnableStatus)
        {
            cmd.modify(GlobalCommand::TranslationEnable::SET);
        }
        cmd.modify(command);
        self.registers.global_command.set(cmd.get());
    }

    fn invalidate_context_cache(&self) -> Result<()> {
        self.registers
            .context_command
            .write(ContextCommand::Invalidate::SET + ContextCommand::Granularity::Global);
        self.poll("context cache invalidation", || {
            !self
                .registers
                .context_command
                .is_set(ContextCommand::Invalidate)
        })
    }

    fn invalidate_iotlb(&self, request: FieldValue<u64, IotlbCommand::Register>) -> Result<()> {
        self.iotlb.iotlb_command.write(
            request
                + IotlbCommand::Invalidate::SET
                + IotlbCommand::DrainReads::SET
                + IotlbCommand::DrainWrites::SET,
        );
        self.poll("iotlb invalidation", || {
            !self.iotlb.iotlb_command.is_set(IotlbCommand::Invalidate)
        })
    }

    // Context entries may be cached once translation is on.
    fn sync_contexts(&self) -> Result<()> {
        if self.remapping_enabled() {
            self.invalidate_context_cache()?;
            self.invalidate_iotlb(IotlbCommand::Granularity::Global)?;
        }
        Ok(())
    }
}

impl DmaRemapper for VtdUnit {
    fn coherent(&self) -> bool {
        self.registers
            .ext_capability
            .is_set(ExtCapability::Coherency)
    }

    fn snoop_control(&self) -> bool {
        self.registers
            .ext_capability
            .is_set(ExtCapability::SnoopControl)
    }

    fn psi_max_order(&self) -> Option<u32> {
        self.registers
            .capability
            .is_set(Capability::PageSelectiveInvalidation)
            .then(|| self.registers.capability.read(Capability::Mamv) as u32)
    }

    fn is_catchall(&self) -> bool {
        self.catchall
    }

    fn remapping_enabled(&self) -> bool {
        self.registers
            .global_status
            .is_set(GlobalStatus::TranslationEnableStatus)
    }

    fn enable_remapping(&self) -> Result<()> {
        let contexts = self.contexts.lock();
        if self.remapping_enabled() {
            return Ok(());
        }
        self.registers
            .root_table_address
            .set(contexts.root_phys());
        self.global_command(GlobalCommand::SetRootTablePointer::SET);
        self.poll("root table pointer", || {
            self.registers
                .global_status
                .is_set(GlobalStatus::RootTablePointerStatus)
        })?;
        self.invalidate_context_cache()?;
        self.invalidate_iotlb(IotlbCommand::Granularity::Global)?;
        self.global_command(GlobalCommand::TranslationEnable::SET);
        self.poll("translation enable", || self.remapping_enabled())?;
        info!("vt-d: DMA remapping enabled (version {:#x})", self.version());
        Ok(())
    }

    fn map_bus(&self, bus: Bus, ctx: &DmaContext) -> Result<()> {
        let mut contexts = self.contexts.lock();
        contexts.set_bus(bus, ctx);
        debug!("vt-d: bus {} -> tag {}", bus, ctx.domain_tag());
        self.sync_contexts()
    }

    fn map_device(&self, address: Address, ctx: &DmaContext) -> Result<()> {
        let mut contexts = self.contexts.lock();
        contexts.set_device(address, ctx);
        debug!("vt-d: device {} -> tag {}", address, ctx.domain_tag());
        self.sync_contexts()
    }

    fn flush_iotlb_domain(&self, domain_tag: u16) -> Result<()> {
        let _serialize = self.contexts.lock();
        self.invalidate_iotlb(
            IotlbCommand::Granularity::Domain + IotlbCommand::DomainId.val(domain_tag as u64),
        )
    }

    fn flush_iotlb_pages(&self, domain_tag: u16, addr: u64, order: u32) -> Result<()> {
        let _serialize = self.contexts.lock();
        self.iotlb.invalidate_address.write(
            InvalidateAddress::Address.val(addr >> 12)
                + InvalidateAddress::AddressMask.val(order as u64),
        );
        self.invalidate_iotlb(
            IotlbCommand::Granularity::Page + IotlbCommand::DomainId.val(domain_tag as u64),
        )
    }
}

// `VtdUnit` holds `UnsafeCell`s for register access. Commands are serialized by the `contexts`
// lock which allows the unit to be shared and sent between threads.
unsafe impl Send for VtdUnit {}
unsafe impl Sync for VtdUnit {}
