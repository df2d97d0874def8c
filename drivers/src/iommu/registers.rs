// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use static_assertions::const_assert;
use tock_registers::register_bitfields;
use tock_registers::registers::{ReadOnly, ReadWrite};

// VT-d remapping unit register definitions; see the Intel VT-d specification, chapter 11.

register_bitfields![u64,
    pub Capability [
        NumDomains OFFSET(0) NUMBITS(3),
        RequiredWriteBufferFlush OFFSET(4) NUMBITS(1),
        // Supported adjusted guest address widths; bit 2 is the 48-bit, 4-level walk.
        Sagaw OFFSET(8) NUMBITS(5),
        Mgaw OFFSET(16) NUMBITS(6),
        PageSelectiveInvalidation OFFSET(39) NUMBITS(1),
        // Maximum address mask value for page-selective invalidation.
        Mamv OFFSET(48) NUMBITS(6),
    ],

    pub ExtCapability [
        // Page walks snoop processor caches.
        Coherency OFFSET(0) NUMBITS(1),
        QueuedInvalidation OFFSET(1) NUMBITS(1),
        PassThrough OFFSET(6) NUMBITS(1),
        SnoopControl OFFSET(7) NUMBITS(1),
        // Offset of the IOTLB registers, in 16-byte units.
        IotlbRegOffset OFFSET(8) NUMBITS(10),
    ],

    pub ContextCommand [
        DomainId OFFSET(0) NUMBITS(16) [],
        Granularity OFFSET(61) NUMBITS(2) [
            Global = 1,
            Domain = 2,
            Device = 3,
        ],
        Invalidate OFFSET(63) NUMBITS(1) [],
    ],

    pub IotlbCommand [
        DomainId OFFSET(32) NUMBITS(16) [],
        DrainWrites OFFSET(48) NUMBITS(1) [],
        DrainReads OFFSET(49) NUMBITS(1) [],
        Granularity OFFSET(60) NUMBITS(2) [
            Global = 1,
            Domain = 2,
            Page = 3,
        ],
        Invalidate OFFSET(63) NUMBITS(1) [],
    ],

    pub InvalidateAddress [
        AddressMask OFFSET(0) NUMBITS(6),
        InvalidationHint OFFSET(6) NUMBITS(1),
        Address OFFSET(12) NUMBITS(52),
    ],
];

register_bitfields![u32,
    pub GlobalCommand [
        SetRootTablePointer OFFSET(30) NUMBITS(1),
        TranslationEnable OFFSET(31) NUMBITS(1),
    ],

    pub GlobalStatus [
        RootTablePointerStatus OFFSET(30) NUMBITS(1),
        TranslationEnableStatus OFFSET(31) NUMBITS(1),
    ],
];

/// The remapping unit register page.
#[repr(C)]
pub struct VtdRegisters {
    pub version: ReadOnly<u32>,
    _reserved0: u32,
    pub capability: ReadOnly<u64, Capability::Register>,
    pub ext_capability: ReadOnly<u64, ExtCapability::Register>,
    pub global_command: ReadWrite<u32, GlobalCommand::Register>,
    pub global_status: ReadOnly<u32, GlobalStatus::Register>,
    pub root_table_address: ReadWrite<u64>,
    pub context_command: ReadWrite<u64, ContextCommand::Register>,
    // Fault recording, interrupt remapping and the IOTLB registers, which we reach through
    // `IotlbRegisters` at the offset reported in ECAP.
    _reserved1: [u64; 506],
}

/// The IOTLB invalidation register pair.
#[repr(C)]
pub struct IotlbRegisters {
    pub invalidate_address: ReadWrite<u64, InvalidateAddress::Register>,
    pub iotlb_command: ReadWrite<u64, IotlbCommand::Register>,
}

/// Size of the register page.
pub const REGISTER_PAGE_SIZE: u64 = 4096;

fn _assert_register_layout() {
    const_assert!(core::mem::size_of::<VtdRegisters>() == REGISTER_PAGE_SIZE as usize);
    const_assert!(core::mem::size_of::<IotlbRegisters>() == 16);
}
