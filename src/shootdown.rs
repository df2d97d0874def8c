// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Cross-CPU EPT shootdown.
//!
//! The initiator claims the single in-flight slot, moves the system to a new `TlbVersion` and
//! sends an IPI to every other online CPU. Each target acknowledges the new version and parks
//! until the initiator releases it. Once every target is parked the initiator may change
//! mappings; releasing the targets makes each of them invalidate its EPT-derived translations
//! before resuming.
//!
//! The initiator never waits without bound: if the slot is taken or a target doesn't park in
//! time, `begin()` backs out and reports `Error::Again`.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use log::debug;
use page_tracking::TlbVersion;

/// Processor operations the shootdown relies on.
pub trait CpuOps: Send + Sync {
    /// Returns the index of the calling CPU.
    fn this_cpu(&self) -> usize;

    /// Returns the number of CPUs brought online. CPU indices are `0..online_cpus()`.
    fn online_cpus(&self) -> usize;

    /// Sends the shootdown IPI to `cpu`, whose handler must call `Shootdown::handle_ipi()`.
    fn send_shootdown_ipi(&self, cpu: usize);

    /// Invalidates every EPT-derived translation cached by the calling CPU, i.e.
    /// `x86_page_tables::tlb::invept(None)` in VMX root operation.
    fn invept(&self);
}

/// Shootdown errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Another shootdown is in flight or a CPU didn't respond; start over.
    Again,
}

/// Holds the result of shootdown operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Shootdown state shared by all CPUs.
pub struct Shootdown {
    cpu: Arc<dyn CpuOps>,
    spins: usize,
    in_flight: AtomicBool,
    // Version of the most recent shootdown to begin.
    requested: AtomicU64,
    // Version up to which parked CPUs have been let go.
    released: AtomicU64,
    // Latest version each CPU has parked for.
    acks: Vec<AtomicU64>,
}

impl Shootdown {
    /// Creates the shootdown state for the CPUs `cpu` reports online. `spins` bounds how long
    /// an initiator waits for the other CPUs to park.
    pub fn new(cpu: Arc<dyn CpuOps>, spins: usize) -> Self {
        let acks = (0..cpu.online_cpus()).map(|_| AtomicU64::new(0)).collect();
        Self {
            cpu,
            spins: spins.max(1),
            in_flight: AtomicBool::new(false),
            requested: AtomicU64::new(TlbVersion::new().raw()),
            released: AtomicU64::new(TlbVersion::new().raw()),
            acks,
        }
    }

    /// Returns the version of the most recent shootdown.
    pub fn version(&self) -> TlbVersion {
        TlbVersion::from_raw(self.requested.load(Ordering::Acquire))
    }

    /// Parks every other online CPU. On success the caller may change mappings that other CPUs
    /// could have cached; the returned guard ends the shootdown when dropped.
    pub fn begin(&self) -> Result<ActiveShootdown<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("shootdown already in flight");
            return Err(Error::Again);
        }

        let version = self.version().increment();
        self.requested.store(version.raw(), Ordering::Release);
        let me = self.cpu.this_cpu();
        let others = || (0..self.acks.len()).filter(move |&cpu| cpu != me);
        for cpu in others() {
            self.cpu.send_shootdown_ipi(cpu);
        }

        let all_parked = || {
            others().all(|cpu| {
                TlbVersion::from_raw(self.acks[cpu].load(Ordering::Acquire)).reached(version)
            })
        };
        let mut parked = all_parked();
        for _ in 0..self.spins {
            if parked {
                break;
            }
            core::hint::spin_loop();
            parked = all_parked();
        }
        if !parked {
            debug!("shootdown {} timed out", version.raw());
            self.release(version);
            return Err(Error::Again);
        }

        Ok(ActiveShootdown {
            shootdown: self,
            version,
            ended: false,
        })
    }

    /// Target-CPU side of the handshake, called from the shootdown IPI handler. Parks until the
    /// initiator is done and then invalidates this CPU's cached translations.
    pub fn handle_ipi(&self) {
        let target = self.version();
        if self.released_version().reached(target) {
            // The initiator already gave up on or finished this shootdown.
            return;
        }
        let me = self.cpu.this_cpu();
        if let Some(ack) = self.acks.get(me) {
            ack.fetch_max(target.raw(), Ordering::AcqRel);
        }
        while !self.released_version().reached(target) {
            core::hint::spin_loop();
        }
        self.cpu.invept();
    }

    fn released_version(&self) -> TlbVersion {
        TlbVersion::from_raw(self.released.load(Ordering::Acquire))
    }

    fn release(&self, version: TlbVersion) {
        self.released.fetch_max(version.raw(), Ordering::AcqRel);
        self.in_flight.store(false, Ordering::Release);
    }
}

/// An in-flight shootdown: every other online CPU is parked until this is ended or dropped.
pub struct ActiveShootdown<'a> {
    shootdown: &'a Shootdown,
    version: TlbVersion,
    ended: bool,
}

impl ActiveShootdown<'_> {
    pub fn version(&self) -> TlbVersion {
        self.version
    }

    /// Releases the parked CPUs and invalidates the calling CPU's cached translations.
    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.shootdown.release(self.version);
        self.shootdown.cpu.invept();
    }
}

impl Drop for ActiveShootdown<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::MockCpu;
    use std::thread;

    fn shootdown(cpu: &Arc<MockCpu>, spins: usize) -> Arc<Shootdown> {
        Arc::new(Shootdown::new(cpu.clone(), spins))
    }

    #[test]
    fn single_cpu() {
        let cpu = MockCpu::new(1);
        let sd = shootdown(&cpu, 16);
        let active = sd.begin().unwrap();
        assert_eq!(active.version().raw(), 1);
        assert_eq!(sd.begin().err(), Some(Error::Again));
        active.end();
        assert_eq!(cpu.invepts(0), 1);
        let active = sd.begin().unwrap();
        assert_eq!(active.version().raw(), 2);
        drop(active);
        assert_eq!(cpu.invepts(0), 2);
        assert_eq!(cpu.ipis_sent(), 0);
    }

    #[test]
    fn unresponsive_cpu_forces_retry() {
        let cpu = MockCpu::new(2);
        let sd = shootdown(&cpu, 64);
        assert_eq!(sd.begin().err(), Some(Error::Again));
        assert_eq!(cpu.ipis_sent(), 1);
        // A late IPI for the abandoned shootdown returns without parking.
        cpu.run_as(1, || sd.handle_ipi());
        assert_eq!(cpu.invepts(1), 0);
        // The slot was released.
        assert_eq!(sd.begin().err(), Some(Error::Again));
        assert_eq!(sd.version().raw(), 2);
    }

    #[test]
    fn targets_park_and_invalidate() {
        let cpu = MockCpu::new(4);
        let sd = shootdown(&cpu, 1 << 30);
        let stop = Arc::new(AtomicBool::new(false));
        let workers: Vec<_> = (1..4)
            .map(|id| {
                let (cpu, sd, stop) = (cpu.clone(), sd.clone(), stop.clone());
                thread::spawn(move || {
                    cpu.run_as(id, || {
                        while !stop.load(Ordering::Acquire) {
                            if cpu.take_ipi(id) {
                                sd.handle_ipi();
                            }
                            thread::yield_now();
                        }
                    })
                })
            })
            .collect();

        for round in 1..=3 {
            let active = loop {
                match sd.begin() {
                    Ok(active) => break active,
                    Err(Error::Again) => thread::yield_now(),
                }
            };
            // Every target is parked and hasn't invalidated yet.
            for id in 1..4 {
                assert_eq!(cpu.invepts(id), round - 1);
            }
            active.end();
            for id in 1..4 {
                while cpu.invepts(id) < round {
                    thread::yield_now();
                }
            }
        }

        stop.store(true, Ordering::Release);
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(cpu.invepts(0), 3);
    }
}
