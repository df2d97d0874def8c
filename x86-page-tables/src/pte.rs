// Copyright (c) 2021 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use x86_pages::{HostPfn, MemType, Pfn};

// EPT entries hold a 4kB-aligned host physical address in bits 51:12.
const ADDR_SHIFT: u64 = 12;
const ADDR_MASK: u64 = ((1 << 52) - 1) & !((1 << ADDR_SHIFT) - 1);
// The memory type of a leaf lives in bits 5:3.
const MEMTYPE_SHIFT: u64 = 3;
const MEMTYPE_MASK: u64 = 0x7 << MEMTYPE_SHIFT;

/// Bits from an EPT entry.
#[derive(Copy, Clone)]
pub enum EptFieldBit {
    Read = 0,
    Write = 1,
    Execute = 2,
    LargePage = 7,
    // Honored by VT-d second-level walks when the remapping unit supports snoop control.
    Snoop = 11,
}

impl EptFieldBit {
    pub const fn shift(&self) -> u64 {
        *self as u64
    }

    pub const fn mask(&self) -> u64 {
        1 << self.shift()
    }

    pub const fn is_set(&self, val: u64) -> bool {
        val & self.mask() != 0
    }
}

/// Access permissions for a leaf entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EptPerms {
    R = EptFieldBit::Read.mask() as isize,
    RW = (EptFieldBit::Read.mask() | EptFieldBit::Write.mask()) as isize,
    RWX = (EptFieldBit::Read.mask() | EptFieldBit::Write.mask() | EptFieldBit::Execute.mask())
        as isize,
}

impl EptPerms {
    fn from_bits(bits: u64) -> Option<Self> {
        match bits & MASK_RWX {
            b if b == EptPerms::R as u64 => Some(EptPerms::R),
            b if b == EptPerms::RW as u64 => Some(EptPerms::RW),
            b if b == EptPerms::RWX as u64 => Some(EptPerms::RWX),
            _ => None,
        }
    }
}

const MASK_RWX: u64 =
    EptFieldBit::Read.mask() | EptFieldBit::Write.mask() | EptFieldBit::Execute.mask();

/// Represents an EPT entry in memory.
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub(crate) struct Pte(u64);

impl Pte {
    /// Writes a leaf mapping of the frame `pfn` with the config bits in `status`.
    pub fn set(&mut self, pfn: HostPfn, status: &EptFieldBits) {
        self.0 = (pfn.bits() << ADDR_SHIFT) | status.bits;
    }

    /// Points this entry at the next-level table in frame `pfn`. Non-leaf entries grant all
    /// access; permissions are enforced at the leaf.
    pub fn set_table(&mut self, pfn: HostPfn) {
        self.0 = (pfn.bits() << ADDR_SHIFT) | MASK_RWX;
    }

    /// Returns the raw bits the make up the PTE.
    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Returns `true` if the entry grants any access. EPT has no dedicated valid bit.
    pub fn present(&self) -> bool {
        self.0 & MASK_RWX != 0
    }

    /// Returns `true` if the entry maps a page rather than a table, given the level it sits at.
    pub fn leaf(&self, leaf_level: bool) -> bool {
        leaf_level || EptFieldBit::LargePage.is_set(self.0)
    }

    /// Removes all access while keeping the target frame and attributes.
    pub fn invalidate(&mut self) {
        self.0 &= !MASK_RWX;
    }

    /// Returns the pfn of this entry.
    pub fn pfn(&self) -> HostPfn {
        Pfn::host((self.0 & ADDR_MASK) >> ADDR_SHIFT)
    }

    /// Returns the leaf attributes of this entry without the target frame.
    pub fn status(&self) -> EptFieldBits {
        EptFieldBits {
            bits: self.0 & !ADDR_MASK,
        }
    }
}

/// The status bits that define EPT entry state.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct EptFieldBits {
    bits: u64,
}

impl EptFieldBits {
    /// Returns the raw bits that make up the entry status.
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Sets the given bit.
    pub fn set_bit(&mut self, bit: EptFieldBit) {
        self.bits |= bit.mask();
    }

    /// Clears the given bit.
    pub fn clear_bit(&mut self, bit: EptFieldBit) {
        self.bits &= !bit.mask();
    }

    /// Creates a new status for a leaf entry with the given `perms` and memory type.
    pub fn leaf_with_perms(perms: EptPerms, mem_type: MemType) -> Self {
        Self {
            bits: perms as u64 | (mem_type.encoding() << MEMTYPE_SHIFT),
        }
    }

    /// Returns the access permissions, if the status describes a present leaf.
    pub fn perms(&self) -> Option<EptPerms> {
        EptPerms::from_bits(self.bits)
    }

    /// Returns the memory type of a leaf.
    pub fn mem_type(&self) -> Option<MemType> {
        MemType::from_encoding((self.bits & MEMTYPE_MASK) >> MEMTYPE_SHIFT)
    }
}
