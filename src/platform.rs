// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use alloc::sync::Arc;
use drivers::iommu::IommuRegistry;
use drivers::pci::PciRegistry;
use hyp_utils::print::{Console, ConsoleDriver};
use log::SetLoggerError;

use crate::config::HypConfig;
use crate::shootdown::{CpuOps, Shootdown};
use crate::xen::XenDomains;

/// Machine-wide state every domain refers to: the boot configuration, the CPUs, the PCI devices
/// and remapping units discovered at boot, and the PV domain layer if there is one.
pub struct Platform {
    config: HypConfig,
    cpu: Arc<dyn CpuOps>,
    shootdown: Shootdown,
    pci: PciRegistry,
    iommus: IommuRegistry,
    xen: Option<Arc<dyn XenDomains>>,
}

impl Platform {
    pub fn new(
        config: HypConfig,
        cpu: Arc<dyn CpuOps>,
        pci: PciRegistry,
        iommus: IommuRegistry,
        xen: Option<Arc<dyn XenDomains>>,
    ) -> Self {
        let shootdown = Shootdown::new(cpu.clone(), config.shootdown_spins);
        Self {
            config,
            cpu,
            shootdown,
            pci,
            iommus,
            xen,
        }
    }

    pub fn config(&self) -> &HypConfig {
        &self.config
    }

    pub fn cpu(&self) -> &dyn CpuOps {
        self.cpu.as_ref()
    }

    /// Returns the EPT shootdown state. The shootdown IPI handler calls `handle_ipi()` on it.
    pub fn shootdown(&self) -> &Shootdown {
        &self.shootdown
    }

    pub fn pci(&self) -> &PciRegistry {
        &self.pci
    }

    pub fn iommus(&self) -> &IommuRegistry {
        &self.iommus
    }

    pub fn xen(&self) -> Option<&Arc<dyn XenDomains>> {
        self.xen.as_ref()
    }
}

/// Routes console output to `driver` and installs the console logger at the configured level.
pub fn init_logging(
    config: &HypConfig,
    driver: &'static dyn ConsoleDriver,
) -> core::result::Result<(), SetLoggerError> {
    Console::set_driver(driver);
    hyp_utils::logger::init(config.log_level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;
    use std::vec::Vec;
    use sync::Mutex;

    struct CaptureDriver {
        out: Mutex<Vec<u8>>,
    }

    impl ConsoleDriver for CaptureDriver {
        fn write_bytes(&self, bytes: &[u8]) {
            self.out.lock().extend_from_slice(bytes);
        }
    }

    static CAPTURE: CaptureDriver = CaptureDriver {
        out: Mutex::new(Vec::new()),
    };

    #[test]
    fn logging_follows_command_line() {
        let config = HypConfig::from("microv.loglevel=warn");
        init_logging(&config, &CAPTURE).unwrap();
        log::warn!("dom7: uart port taken");
        log::info!("dom7: created");
        let out = String::from_utf8(CAPTURE.out.lock().clone()).unwrap();
        assert!(out.contains("[WARN ] dom7: uart port taken\n"));
        assert!(!out.contains("dom7: created"));
        assert!(init_logging(&config, &CAPTURE).is_err());
    }
}
