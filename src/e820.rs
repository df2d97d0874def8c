// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use static_assertions::const_assert_eq;

pub const E820_TYPE_RAM: u32 = 1;
pub const E820_TYPE_RESERVED: u32 = 2;
pub const E820_TYPE_ACPI: u32 = 3;
pub const E820_TYPE_NVS: u32 = 4;
pub const E820_TYPE_UNUSABLE: u32 = 5;

/// One entry of the BIOS-style memory map handed to a guest at boot. Laid out exactly as the
/// guest's boot protocol expects it.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct E820Entry {
    pub addr: u64,
    pub size: u64,
    pub kind: u32,
}

const_assert_eq!(core::mem::size_of::<E820Entry>(), 20);

impl E820Entry {
    /// Creates an entry covering `[base, end)`, or `None` if the range is empty or inverted.
    pub fn new(base: u64, end: u64, kind: u32) -> Option<Self> {
        let size = end.checked_sub(base).filter(|&size| size > 0)?;
        Some(Self {
            addr: base,
            size,
            kind,
        })
    }

    pub fn end(&self) -> u64 {
        self.addr + self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ranges() {
        let entry = E820Entry::new(0x10_0000, 0x4000_0000, E820_TYPE_RAM).unwrap();
        let size = entry.size;
        assert_eq!(size, 0x3ff0_0000);
        assert_eq!(entry.end(), 0x4000_0000);
        assert!(E820Entry::new(0x2000, 0x1000, E820_TYPE_RESERVED).is_none());
        assert!(E820Entry::new(0x2000, 0x2000, E820_TYPE_RESERVED).is_none());
    }
}
