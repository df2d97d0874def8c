// Copyright (c) 2021 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use arrayvec::ArrayVec;
use x86_pages::*;

use crate::page_table::{EptLevel, Error, PageTableLevel, Result, TablePage, ENTRIES_PER_PAGE};
use crate::pte::{EptFieldBit, EptFieldBits, EptPerms, Pte};
use crate::tlb;

// Guest physical addresses translatable by a 4-level walk.
const MAX_GPA: u64 = 1 << 48;
// EPTP bits 5:3 hold the page-walk length minus one.
const EPTP_WALK_LENGTH_SHIFT: u64 = 3;
const EPTP_WALK_LENGTH: u64 = 4;
const PTE_SIZE: u64 = core::mem::size_of::<u64>() as u64;

/// Location of a single entry: the physical address of the table holding it, the index within
/// that table and the level of the table.
#[derive(Clone, Copy, Debug)]
struct EntrySlot {
    table: u64,
    index: usize,
    level: EptLevel,
}

type WalkPath = ArrayVec<EntrySlot, 4>;

fn pfn_of(phys: u64) -> HostPfn {
    Pfn::host(phys >> 12)
}

/// A present leaf translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Translation {
    pub hpa: HostPhysAddr,
    pub size: PageSize,
    pub perms: Option<EptPerms>,
    pub mem_type: Option<MemType>,
    pub snoop: bool,
}

/// A four-level EPT hierarchy translating one domain's guest physical addresses.
///
/// All table pages are owned by the map. The root table is allocated on creation and lives as
/// long as the map; intermediate tables are allocated on demand by `map()` and `split()` and
/// freed by `release()` once they no longer hold any entry.
///
/// When the IOMMUs walking this hierarchy are not cache coherent, every entry write is followed
/// by a flush of the cache line holding it.
pub struct EptMap {
    root: Box<TablePage>,
    tables: BTreeMap<u64, Box<TablePage>>,
    iommu_coherent: bool,
    iommu_snoop_ctl: bool,
    table_flushes: u64,
}

impl Default for EptMap {
    fn default() -> Self {
        Self::new()
    }
}

impl EptMap {
    /// Creates an empty address space.
    pub fn new() -> Self {
        Self {
            root: Box::new(TablePage::new()),
            tables: BTreeMap::new(),
            iommu_coherent: true,
            iommu_snoop_ctl: false,
            table_flushes: 0,
        }
    }

    /// Returns the physical address of the PML4 table.
    pub fn root_phys(&self) -> u64 {
        self.root.phys_addr()
    }

    /// Returns the EPT pointer for this hierarchy: write-back paging-structure accesses, a 4-level
    /// walk, and the PML4 frame.
    pub fn eptp(&self) -> u64 {
        self.root_phys()
            | ((EPTP_WALK_LENGTH - 1) << EPTP_WALK_LENGTH_SHIFT)
            | MemType::WriteBack.encoding()
    }

    /// Returns the number of table pages in the hierarchy, root included.
    pub fn table_count(&self) -> usize {
        self.tables.len() + 1
    }

    /// Records whether every IOMMU walking this hierarchy snoops CPU caches.
    pub fn set_iommu_coherence(&mut self, coherent: bool) {
        self.iommu_coherent = coherent;
    }

    /// Records whether every IOMMU walking this hierarchy supports snoop control. Leaves written
    /// afterwards carry the SNP bit.
    pub fn set_iommu_snoop_ctl(&mut self, snoop_ctl: bool) {
        self.iommu_snoop_ctl = snoop_ctl;
    }

    pub fn iommu_coherent(&self) -> bool {
        self.iommu_coherent
    }

    pub fn iommu_snoop_ctl(&self) -> bool {
        self.iommu_snoop_ctl
    }

    /// Returns how many times the full hierarchy has been flushed from the CPU caches.
    pub fn table_flushes(&self) -> u64 {
        self.table_flushes
    }

    /// Maps `gpa` to `hpa` with a `size` leaf, replacing any leaf of the same size already there.
    pub fn map(
        &mut self,
        gpa: GuestPageAddr,
        hpa: HostPageAddr,
        size: PageSize,
        perms: EptPerms,
        mem_type: MemType,
    ) -> Result<()> {
        if !gpa.is_aligned(size) || !hpa.is_aligned(size) {
            return Err(Error::Misaligned);
        }
        if gpa.bits() >= MAX_GPA {
            return Err(Error::OutOfBounds);
        }
        let level = EptLevel::for_page_size(size);
        let slot = self.walk_alloc(gpa.bits(), level)?;
        let existing = self.read(slot);
        if existing.present() && !existing.leaf(level.is_leaf()) {
            return Err(Error::TableEntryNotLeaf);
        }
        let mut pte = Pte::default();
        pte.set(hpa.pfn(), &self.leaf_status(perms, mem_type, level));
        self.write(slot, pte);
        Ok(())
    }

    /// Removes all access to the leaf covering `gpa`, keeping the tables above it. Returns the
    /// size of the leaf that was unmapped.
    pub fn unmap(&mut self, gpa: GuestPhysAddr) -> Result<PageSize> {
        let slot = self.leaf_slot(gpa.bits()).ok_or(Error::NotMapped)?;
        let mut pte = self.read(slot);
        pte.invalidate();
        self.write(slot, pte);
        slot.level.leaf_page_size().ok_or(Error::TableEntryNotLeaf)
    }

    /// Clears the leaf covering `gpa`, mapped or unmapped, and frees every table on its branch
    /// that is left empty.
    pub fn release(&mut self, gpa: GuestPhysAddr) -> Result<()> {
        let path = self.walk(gpa.bits());
        let leaf = *path.last().ok_or(Error::NotMapped)?;
        if self.read(leaf).bits() == 0 {
            return Err(Error::NotMapped);
        }
        self.write(leaf, Pte::default());
        for pair in path.windows(2).rev() {
            let (parent, child) = (pair[0], pair[1]);
            if !self.table(child.table).map_or(false, |t| t.is_empty()) {
                break;
            }
            self.tables.remove(&child.table);
            self.write(parent, Pte::default());
        }
        Ok(())
    }

    /// Maps `[0, limit)` one-to-one with read-write-execute, write-back 2MB leaves.
    pub fn identity_map(&mut self, limit: u64) -> Result<()> {
        if !PageSize::Size2M.is_aligned(limit) {
            return Err(Error::Misaligned);
        }
        let mut addr = 0;
        while addr < limit {
            let gpa = PageAddr::with_alignment(RawAddr::guest(addr), PageSize::Size2M)
                .ok_or(Error::Misaligned)?;
            let hpa = PageAddr::with_alignment(RawAddr::host(addr), PageSize::Size2M)
                .ok_or(Error::Misaligned)?;
            self.map(gpa, hpa, PageSize::Size2M, EptPerms::RWX, MemType::WriteBack)?;
            addr += PageSize::Size2M as u64;
        }
        Ok(())
    }

    /// Replaces the `size` leaf covering `gpa` with a table of next-smaller leaves mapping the same
    /// host range with the same attributes. Already-split ranges are left alone.
    ///
    /// The caller is responsible for invalidating cached translations of the old leaf.
    pub fn split(&mut self, gpa: GuestPhysAddr, size: PageSize) -> Result<()> {
        let child_size = size.next_smaller().ok_or(Error::TableEntryNotLeaf)?;
        let level = EptLevel::for_page_size(size);
        let slot = self
            .walk(gpa.bits())
            .iter()
            .copied()
            .find(|s| s.level == level)
            .ok_or(Error::NotMapped)?;
        let pte = self.read(slot);
        if !pte.present() {
            return Err(Error::NotMapped);
        }
        if !pte.leaf(level.is_leaf()) {
            return Ok(());
        }

        let mut status = pte.status();
        if child_size == PageSize::Size4k {
            status.clear_bit(EptFieldBit::LargePage);
        }
        let pages_per_child = child_size as u64 / PageSize::Size4k as u64;
        let mut table = Box::new(TablePage::new());
        for i in 0..ENTRIES_PER_PAGE {
            let pfn = Pfn::host(pte.pfn().bits() + i as u64 * pages_per_child);
            table.entry_mut(i).set(pfn, &status);
        }
        let table_addr = table.phys_addr();
        if !self.iommu_coherent {
            tlb::clflush_range(table_addr, PageSize::Size4k as u64);
        }
        self.tables.insert(table_addr, table);

        let mut entry = Pte::default();
        entry.set_table(pfn_of(table_addr));
        self.write(slot, entry);
        Ok(())
    }

    /// Returns the present leaf translation of `gpa`, if any.
    pub fn translate(&self, gpa: GuestPhysAddr) -> Option<Translation> {
        let slot = self.leaf_slot(gpa.bits())?;
        let pte = self.read(slot);
        let size = slot.level.leaf_page_size()?;
        let offset = gpa.bits() & (size as u64 - 1);
        let status = pte.status();
        Some(Translation {
            hpa: RawAddr::host((pte.pfn().bits() << 12) + offset),
            size,
            perms: status.perms(),
            mem_type: status.mem_type(),
            snoop: EptFieldBit::Snoop.is_set(status.bits()),
        })
    }

    /// Writes every table page back from the CPU caches.
    pub fn flush_tables(&mut self) {
        tlb::clflush_range(self.root.phys_addr(), PageSize::Size4k as u64);
        for addr in self.tables.keys() {
            tlb::clflush_range(*addr, PageSize::Size4k as u64);
        }
        self.table_flushes += 1;
    }

    fn leaf_status(&self, perms: EptPerms, mem_type: MemType, level: EptLevel) -> EptFieldBits {
        let mut status = EptFieldBits::leaf_with_perms(perms, mem_type);
        if !level.is_leaf() {
            status.set_bit(EptFieldBit::LargePage);
        }
        if self.iommu_snoop_ctl {
            status.set_bit(EptFieldBit::Snoop);
        }
        status
    }

    fn table(&self, addr: u64) -> Option<&TablePage> {
        if addr == self.root.phys_addr() {
            Some(&self.root)
        } else {
            self.tables.get(&addr).map(|t| t.as_ref())
        }
    }

    fn table_mut(&mut self, addr: u64) -> Option<&mut TablePage> {
        if addr == self.root.phys_addr() {
            Some(&mut self.root)
        } else {
            self.tables.get_mut(&addr).map(|t| t.as_mut())
        }
    }

    fn read(&self, slot: EntrySlot) -> Pte {
        self.table(slot.table)
            .map(|t| t.entry(slot.index))
            .unwrap_or_default()
    }

    fn write(&mut self, slot: EntrySlot, pte: Pte) {
        let coherent = self.iommu_coherent;
        if let Some(table) = self.table_mut(slot.table) {
            *table.entry_mut(slot.index) = pte;
            if !coherent {
                tlb::clflush_range(slot.table + slot.index as u64 * PTE_SIZE, PTE_SIZE);
            }
        }
    }

    // Descends through present table entries; the last slot is the first entry that isn't one.
    fn walk(&self, gpa: u64) -> WalkPath {
        let mut path = WalkPath::new();
        let mut table = self.root.phys_addr();
        let mut level = EptLevel::Pml4;
        loop {
            let slot = EntrySlot {
                table,
                index: level.index(gpa),
                level,
            };
            path.push(slot);
            let pte = self.read(slot);
            match level.next() {
                Some(next) if pte.present() && !pte.leaf(false) => {
                    table = pte.pfn().bits() << 12;
                    level = next;
                }
                _ => break,
            }
        }
        path
    }

    fn leaf_slot(&self, gpa: u64) -> Option<EntrySlot> {
        let slot = *self.walk(gpa).last()?;
        let pte = self.read(slot);
        (pte.present() && pte.leaf(slot.level.is_leaf()) && slot.level.leaf_page_size().is_some())
            .then_some(slot)
    }

    // Walks to the entry for `gpa` at `target`, allocating missing tables on the way.
    fn walk_alloc(&mut self, gpa: u64, target: EptLevel) -> Result<EntrySlot> {
        let mut table = self.root.phys_addr();
        let mut level = EptLevel::Pml4;
        loop {
            let slot = EntrySlot {
                table,
                index: level.index(gpa),
                level,
            };
            if level == target {
                return Ok(slot);
            }
            let next = level.next().ok_or(Error::OutOfBounds)?;
            let pte = self.read(slot);
            if pte.present() && !pte.leaf(false) {
                table = pte.pfn().bits() << 12;
            } else if pte.present() {
                return Err(Error::LeafEntryNotTable);
            } else {
                table = self.alloc_table();
                let mut entry = Pte::default();
                entry.set_table(pfn_of(table));
                self.write(slot, entry);
            }
            level = next;
        }
    }

    fn alloc_table(&mut self) -> u64 {
        let table = Box::new(TablePage::new());
        let addr = table.phys_addr();
        if !self.iommu_coherent {
            tlb::clflush_range(addr, PageSize::Size4k as u64);
        }
        self.tables.insert(addr, table);
        addr
    }
}
