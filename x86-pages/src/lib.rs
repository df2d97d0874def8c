// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! # x86 page types
//!
//! - `PageSize` enumerates the translation granularities supported by second-level paging.
//! - `RawAddr` and `PageAddr` are addresses tagged with the address space (host-physical or
//!   guest-physical) they belong to.
//! - `DomainId` names the domain that owns an address space. Domain 0 is the root domain.
//! - `MemType` is the memory type programmed into a second-level leaf entry.
#![no_std]

// For testing use the std crate.
#[cfg(test)]
#[macro_use]
extern crate std;

mod domain_id;
mod memory_type;
mod page;

pub use domain_id::{AddressSpace, DomainId, GuestPhys, HostPhys};
pub use memory_type::MemType;
pub use page::*;
