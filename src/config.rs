// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use log::{warn, LevelFilter};
use x86_pages::PageSize;

/// Identity-map limit for the root domain when the command line doesn't give one.
pub const DEFAULT_MAX_PHYS_ADDR: u64 = 512 << 30;

/// Number of polls a shootdown initiator makes before giving up on the other CPUs.
pub const DEFAULT_SHOOTDOWN_SPINS: usize = 1 << 20;

const OPTION_PREFIX: &str = "microv.";

/// Global hypervisor switches, parsed once from the boot command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HypConfig {
    /// End of the root domain's identity map. Always 2MB aligned.
    pub max_phys_addr: u64,
    /// Give the root domain a Xen PVH shadow domain.
    pub enable_winpv: bool,
    /// Hide the Xen platform PCI device from the root domain.
    pub disable_xen_pfd: bool,
    /// Allow PCI devices to be passed through to guest domains.
    pub pci_passthru: bool,
    /// Bound on shootdown acknowledgement polls and on contended donation-lock attempts.
    pub shootdown_spins: usize,
    pub log_level: LevelFilter,
}

impl Default for HypConfig {
    fn default() -> Self {
        Self {
            max_phys_addr: DEFAULT_MAX_PHYS_ADDR,
            enable_winpv: false,
            disable_xen_pfd: false,
            pci_passthru: true,
            shootdown_spins: DEFAULT_SHOOTDOWN_SPINS,
            log_level: LevelFilter::Info,
        }
    }
}

fn parse_u64(val: &str) -> Option<u64> {
    match val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => val.parse().ok(),
    }
}

fn parse_switch(val: Option<&str>) -> Option<bool> {
    match val {
        None | Some("on") | Some("1") | Some("true") => Some(true),
        Some("off") | Some("0") | Some("false") => Some(false),
        _ => None,
    }
}

impl HypConfig {
    fn apply(&mut self, key: &str, val: Option<&str>) -> bool {
        match key {
            "max_phys_addr" => match val.and_then(parse_u64) {
                Some(addr) if addr > 0 => {
                    self.max_phys_addr = PageSize::Size2M.round_up(addr);
                    true
                }
                _ => false,
            },
            "winpv" => parse_switch(val).map(|v| self.enable_winpv = v).is_some(),
            "xen_pfd" => parse_switch(val)
                .map(|v| self.disable_xen_pfd = !v)
                .is_some(),
            "pci_passthru" => parse_switch(val).map(|v| self.pci_passthru = v).is_some(),
            "shootdown_spins" => match val.and_then(parse_u64) {
                Some(spins) if spins > 0 => {
                    self.shootdown_spins = spins as usize;
                    true
                }
                _ => false,
            },
            "loglevel" => val
                .and_then(|v| v.parse::<LevelFilter>().ok())
                .map(|level| self.log_level = level)
                .is_some(),
            _ => false,
        }
    }
}

impl From<&str> for HypConfig {
    /// Parses `microv.<option>[=<value>]` words out of a boot command line. Words without the
    /// prefix belong to the root domain's kernel and are skipped.
    fn from(cmdline: &str) -> Self {
        let mut config = Self::default();
        for word in cmdline.split_whitespace() {
            let Some(option) = word.strip_prefix(OPTION_PREFIX) else {
                continue;
            };
            let (key, val) = match option.split_once('=') {
                Some((key, val)) => (key, Some(val)),
                None => (option, None),
            };
            if !config.apply(key, val) {
                warn!("ignoring command line option {word}");
            }
        }
        config
    }
}
