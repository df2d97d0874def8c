// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! # Domain management for an x86 VT-x hypervisor
//!
//! A domain is the unit of isolation: the single root domain, which starts out owning all of
//! physical memory through an identity-mapped EPT, and the guest domains it creates.
//!
//! ## Key types
//!
//! - `Platform` holds what every domain shares: the boot `HypConfig`, the CPUs, the EPT
//!   `Shootdown` state, and the PCI devices and DMA remapping units found at boot.
//! - `DomainRegistry` tracks the live domains and enforces that the root is created first.
//! - `Domain` owns one EPT hierarchy. The root domain additionally records which of its pages are
//!   on loan to which guest; donating a page removes it from the root's identity map under a
//!   cross-CPU shootdown before the guest can reach it.
//!
//! DMA from devices assigned to a domain is translated by the same EPT hierarchy, so a domain
//! reduces the capabilities of the remapping units it spans before handing them its tables.

#![no_std]

extern crate alloc;

// For testing use the std crate.
#[cfg(test)]
#[macro_use]
extern crate std;

mod config;
mod domain;
mod domain_dma;
mod domain_donate;
mod domain_info;
mod domain_map;
mod domains;
mod e820;
mod platform;
mod regs;
mod shootdown;
mod uart;
mod xen;

#[cfg(test)]
mod test_stubs;

pub use config::{HypConfig, DEFAULT_MAX_PHYS_ADDR, DEFAULT_SHOOTDOWN_SPINS};
pub use domain::{Domain, Error, Result};
pub use domain_info::{DomainFlag, DomainInfo, DomainOrigin, ExecMode};
pub use domains::DomainRegistry;
pub use e820::*;
pub use platform::{init_logging, Platform};
pub use regs::{DomainReg, DomainRegs, NUM_DOMAIN_REGS};
pub use shootdown::Error as ShootdownError;
pub use shootdown::{ActiveShootdown, CpuOps, Shootdown};
pub use uart::{UartAssignment, COM_PORTS, UART_BUFFER_SIZE};
pub use xen::Error as XenError;
pub use xen::{PvDomain, XenDomId, XenDomains};
