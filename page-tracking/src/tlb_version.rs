// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

/// A TLB version number.
///
/// Every EPT shootdown moves the system to a new version. A CPU that has invalidated its cached
/// translations acknowledges the version it did so at, and the shootdown initiator waits until
/// every participating CPU has acknowledged the version it started.
///
/// Versions are stored in atomics as raw `u64`s; a 64-bit counter does not wrap in practice.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TlbVersion(u64);

impl TlbVersion {
    /// Creates a new TLB version number, starting from 0.
    pub fn new() -> Self {
        TlbVersion(0)
    }

    /// Increments this TLB version number.
    pub fn increment(self) -> Self {
        TlbVersion(self.0 + 1)
    }

    /// Rebuilds a version from its raw value.
    pub fn from_raw(raw: u64) -> Self {
        TlbVersion(raw)
    }

    /// Returns the raw value of this version.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Returns true if a CPU that acknowledged `self` has caught up with a shootdown at `target`.
    pub fn reached(&self, target: TlbVersion) -> bool {
        *self >= target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering() {
        let v = TlbVersion::new();
        let next = v.increment();
        assert!(next.reached(next));
        assert!(!v.reached(next));
        assert_eq!(TlbVersion::from_raw(next.raw()), next);
    }
}
