// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use static_assertions::const_assert_eq;

use crate::pci::{Address, Bus};

const TABLE_ENTRIES: usize = 256;

// Root entry: bit 0 present, bits 63:12 context-table pointer.
const RE_PRESENT: u64 = 1 << 0;
// Context entry low word: bit 0 present, bits 3:2 translation type (0 = untranslated requests
// only), bits 63:12 second-level page-table pointer.
const CE_PRESENT: u64 = 1 << 0;
// Context entry high word: bits 2:0 address width, bits 23:8 domain ID.
const CE_AW_4LEVEL: u64 = 2;
const CE_DID_SHIFT: u64 = 8;
const ADDR_MASK: u64 = !0xfff;

/// The translation a device's DMA is subject to: the tag its IOTLB entries are recorded under and
/// the root of the second-level hierarchy to walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaContext {
    domain_tag: u16,
    slpt_root: u64,
}

impl DmaContext {
    /// Creates a context walking the 4-level table at `slpt_root` (which must be 4kB aligned),
    /// tagged with `domain_tag`.
    pub fn new(domain_tag: u16, slpt_root: u64) -> Self {
        assert_eq!(slpt_root & !ADDR_MASK, 0);
        Self {
            domain_tag,
            slpt_root,
        }
    }

    /// Returns the IOTLB domain tag.
    pub fn domain_tag(&self) -> u16 {
        self.domain_tag
    }

    /// Returns the physical address of the second-level root table.
    pub fn slpt_root(&self) -> u64 {
        self.slpt_root
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub(crate) struct ContextEntry {
    lo: u64,
    hi: u64,
}

impl ContextEntry {
    fn new(ctx: &DmaContext) -> Self {
        Self {
            lo: (ctx.slpt_root() & ADDR_MASK) | CE_PRESENT,
            hi: ((ctx.domain_tag() as u64) << CE_DID_SHIFT) | CE_AW_4LEVEL,
        }
    }

    pub fn present(&self) -> bool {
        self.lo & CE_PRESENT != 0
    }

    /// Returns the context programmed in this entry, if present.
    pub fn context(&self) -> Option<DmaContext> {
        self.present().then(|| DmaContext {
            domain_tag: ((self.hi >> CE_DID_SHIFT) & 0xffff) as u16,
            slpt_root: self.lo & ADDR_MASK,
        })
    }
}

#[repr(C, align(4096))]
struct ContextTable {
    entries: [ContextEntry; TABLE_ENTRIES],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct RootEntry {
    lo: u64,
    _hi: u64,
}

#[repr(C, align(4096))]
struct RootTable {
    entries: [RootEntry; TABLE_ENTRIES],
}

const_assert_eq!(core::mem::size_of::<ContextTable>(), 4096);
const_assert_eq!(core::mem::size_of::<RootTable>(), 4096);

/// The root table of a remapping unit and the per-bus context tables it points to. Context
/// tables are allocated the first time a device on their bus is mapped.
pub(crate) struct DeviceContexts {
    root: Box<RootTable>,
    buses: BTreeMap<u32, Box<ContextTable>>,
}

impl DeviceContexts {
    pub fn new() -> Self {
        Self {
            root: Box::new(RootTable {
                entries: [RootEntry::default(); TABLE_ENTRIES],
            }),
            buses: BTreeMap::new(),
        }
    }

    /// Returns the physical address of the root table. Hypervisor heap memory is identity mapped.
    pub fn root_phys(&self) -> u64 {
        self.root.as_ref() as *const RootTable as u64
    }

    /// Points every device function on `bus` at `ctx`.
    pub fn set_bus(&mut self, bus: Bus, ctx: &DmaContext) {
        let table = self.context_table(bus);
        table.entries.fill(ContextEntry::new(ctx));
    }

    /// Points the device function at `address` at `ctx`.
    pub fn set_device(&mut self, address: Address, ctx: &DmaContext) {
        let table = self.context_table(address.bus());
        table.entries[address.devfn().bits() as usize] = ContextEntry::new(ctx);
    }

    /// Returns the entry for `address`.
    pub fn entry(&self, address: Address) -> ContextEntry {
        self.buses
            .get(&address.bus().bits())
            .map(|t| t.entries[address.devfn().bits() as usize])
            .unwrap_or_default()
    }

    fn context_table(&mut self, bus: Bus) -> &mut ContextTable {
        let root_entry = &mut self.root.entries[bus.bits() as usize];
        let table = self.buses.entry(bus.bits()).or_insert_with(|| {
            Box::new(ContextTable {
                entries: [ContextEntry::default(); TABLE_ENTRIES],
            })
        });
        root_entry.lo = (table.as_ref() as *const ContextTable as u64) | RE_PRESENT;
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_and_device_entries() {
        let mut contexts = DeviceContexts::new();
        let root_ctx = DmaContext::new(1, 0x10_0000);
        let guest_ctx = DmaContext::new(5, 0x20_0000);
        let bus = Bus::try_from(2u32).unwrap();
        contexts.set_bus(bus, &root_ctx);
        let dev = Address::try_from_components(2, 3, 1).unwrap();
        contexts.set_device(dev, &guest_ctx);

        assert_eq!(contexts.entry(dev).context(), Some(guest_ctx));
        let sibling = Address::try_from_components(2, 3, 0).unwrap();
        assert_eq!(contexts.entry(sibling).context(), Some(root_ctx));
        let other_bus = Address::try_from_components(4, 0, 0).unwrap();
        assert!(!contexts.entry(other_bus).present());
        assert_eq!(contexts.root.entries[2].lo & RE_PRESENT, RE_PRESENT);
        assert_eq!(contexts.root.entries[4].lo, 0);
        assert_eq!(contexts.root_phys() & 0xfff, 0);
    }
}
