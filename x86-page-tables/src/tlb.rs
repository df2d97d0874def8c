// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Low-level EPT cache management operations.

#[cfg(target_arch = "x86_64")]
use core::arch::asm;

/// Size of the cache line flushed by a single CLFLUSH.
pub const CACHE_LINE_SIZE: u64 = 64;

#[repr(C)]
struct InveptDescriptor {
    eptp: u64,
    reserved: u64,
}

const INVEPT_SINGLE_CONTEXT: u64 = 1;
const INVEPT_ALL_CONTEXTS: u64 = 2;

/// Executes an INVEPT instruction.
///
/// If `eptp` is not None only translations derived from the given EPT pointer are invalidated,
/// otherwise translations for all EPT pointers are invalidated.
///
/// # Safety
///
/// Must be executed in VMX root operation.
#[cfg(target_arch = "x86_64")]
pub unsafe fn invept(eptp: Option<u64>) {
    let (kind, desc) = match eptp {
        Some(eptp) => (INVEPT_SINGLE_CONTEXT, InveptDescriptor { eptp, reserved: 0 }),
        None => (INVEPT_ALL_CONTEXTS, InveptDescriptor { eptp: 0, reserved: 0 }),
    };
    asm!("invept {0}, [{1}]", in(reg) kind, in(reg) &desc, options(nostack));
}

/// Flushes the cache lines covering `[addr, addr + len)` so that non-coherent agents (i.e. an
/// IOMMU walking these tables) observe the latest contents.
pub fn clflush_range(addr: u64, len: u64) {
    let start = addr & !(CACHE_LINE_SIZE - 1);
    let mut line = start;
    while line < addr + len {
        clflush(line);
        line += CACHE_LINE_SIZE;
    }
    #[cfg(target_arch = "x86_64")]
    // Safety: MFENCE only orders memory accesses.
    unsafe {
        asm!("mfence", options(nostack));
    }
}

fn clflush(_line: u64) {
    #[cfg(target_arch = "x86_64")]
    // Safety: CLFLUSH has no architectural side effects beyond write-back and invalidation of
    // the cache line, and callers only pass addresses of memory they own.
    unsafe {
        asm!("clflush [{0}]", in(reg) _line, options(nostack));
    }
}
