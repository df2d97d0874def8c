// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

/// Memory type of a second-level translation, encoded as in the IA32_PAT / EPT memory type field.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemType {
    /// Uncacheable. Used for MMIO.
    Uncacheable = 0,
    /// Write-combining. Used for framebuffers.
    WriteCombining = 1,
    /// Write-back. Ordinary RAM.
    WriteBack = 6,
}

impl MemType {
    /// Returns the 3-bit hardware encoding of this memory type.
    pub fn encoding(&self) -> u64 {
        *self as u64
    }

    /// Decodes a hardware memory type, returning `None` for types the hypervisor never programs.
    pub fn from_encoding(bits: u64) -> Option<Self> {
        match bits {
            0 => Some(MemType::Uncacheable),
            1 => Some(MemType::WriteCombining),
            6 => Some(MemType::WriteBack),
            _ => None,
        }
    }
}

impl fmt::Display for MemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match &self {
            MemType::Uncacheable => write!(f, "UC"),
            MemType::WriteCombining => write!(f, "WC"),
            MemType::WriteBack => write!(f, "WB"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodings() {
        assert_eq!(MemType::WriteBack.encoding(), 6);
        assert_eq!(MemType::from_encoding(1), Some(MemType::WriteCombining));
        assert_eq!(MemType::from_encoding(4), None);
    }
}
