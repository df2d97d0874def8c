// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use flagset::{flags, FlagSet};

use crate::xen::XenDomId;

flags! {
    /// Static properties of a domain, fixed at creation.
    pub enum DomainFlag: u32 {
        /// The domain runs as a Xen PVH guest.
        ExecXenPvh = 1 << 0,
        /// The domain wants the platform's passthrough PCI devices.
        PassthroughDev = 1 << 1,
        /// The domain's console is a hypervisor console rather than a UART.
        Hvc = 1 << 2,
        /// The domain is a Xen stub service VM.
        Xsvm = 1 << 3,
    }
}

/// How a domain's vCPUs execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    Native,
    XenPvh,
}

/// Who asked for a domain to be created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DomainOrigin {
    /// Created by the hypervisor itself on behalf of the root domain.
    Root,
    /// Created at the request of the root domain's toolstack.
    #[default]
    Guest,
}

/// Construction descriptor for a domain.
///
/// The boot image, initrd and command line that accompany a creation request stay with the
/// caller; only these static properties are copied into the domain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainInfo {
    pub ram_mb: u64,
    pub origin: DomainOrigin,
    pub flags: FlagSet<DomainFlag>,
    /// Legacy COM port emulated for the domain.
    pub uart: Option<u16>,
    /// Host UART port passed straight through to the domain.
    pub pt_uart: Option<u16>,
    pub xen_domid: XenDomId,
    /// Wall-clock time at creation, for the PV shared-info page.
    pub wc_sec: u64,
    pub wc_nsec: u64,
    pub tsc_khz: u64,
}

impl DomainInfo {
    /// Returns a descriptor for a native guest with `ram_mb` megabytes of memory.
    pub fn guest(ram_mb: u64) -> Self {
        Self {
            ram_mb,
            ..Self::default()
        }
    }

    /// Returns `self` with `flags` added.
    pub fn with_flags(mut self, flags: impl Into<FlagSet<DomainFlag>>) -> Self {
        self.flags |= flags.into();
        self
    }

    pub fn exec_mode(&self) -> ExecMode {
        if self.flags.contains(DomainFlag::ExecXenPvh) {
            ExecMode::XenPvh
        } else {
            ExecMode::Native
        }
    }

    /// Returns true if the domain's memory is managed by a Xen PV domain.
    pub fn is_xen_dom(&self) -> bool {
        self.exec_mode() == ExecMode::XenPvh
    }

    pub fn has_passthrough_dev(&self) -> bool {
        self.flags.contains(DomainFlag::PassthroughDev)
    }

    pub fn ram_bytes(&self) -> u64 {
        self.ram_mb << 20
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_select_exec_mode() {
        let info = DomainInfo::guest(256);
        assert_eq!(info.exec_mode(), ExecMode::Native);
        assert_eq!(info.ram_bytes(), 256 << 20);
        assert!(!info.has_passthrough_dev());

        let info = info.with_flags(DomainFlag::ExecXenPvh | DomainFlag::PassthroughDev);
        assert_eq!(info.exec_mode(), ExecMode::XenPvh);
        assert!(info.is_xen_dom());
        assert!(info.has_passthrough_dev());
        assert_eq!(info.origin, DomainOrigin::Guest);
    }
}
