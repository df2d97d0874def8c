// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Initial architectural register state of a domain's boot vCPU.

/// Index of a register in `DomainRegs`.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DomainReg {
    Rax = 0,
    Rbx,
    Rcx,
    Rdx,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Rip,
    Rsp,
    GdtBase,
    GdtLimit,
    IdtBase,
    IdtLimit,
    Cr0,
    Cr3,
    Cr4,
    Ia32Efer,
    Ia32Pat,
    EsSelector,
    EsBase,
    EsLimit,
    EsAccessRights,
    CsSelector,
    CsBase,
    CsLimit,
    CsAccessRights,
    SsSelector,
    SsBase,
    SsLimit,
    SsAccessRights,
    DsSelector,
    DsBase,
    DsLimit,
    DsAccessRights,
    FsSelector,
    FsBase,
    FsLimit,
    FsAccessRights,
    GsSelector,
    GsBase,
    GsLimit,
    GsAccessRights,
    TrSelector,
    TrBase,
    TrLimit,
    TrAccessRights,
    LdtrSelector,
    LdtrBase,
    LdtrLimit,
    LdtrAccessRights,
}

/// Number of registers held in `DomainRegs`.
pub const NUM_DOMAIN_REGS: usize = DomainReg::LdtrAccessRights as usize + 1;

impl DomainReg {
    /// Segment registers, in VMCS field order.
    pub const SEGMENTS: [DomainReg; 8] = [
        DomainReg::EsSelector,
        DomainReg::CsSelector,
        DomainReg::SsSelector,
        DomainReg::DsSelector,
        DomainReg::FsSelector,
        DomainReg::GsSelector,
        DomainReg::TrSelector,
        DomainReg::LdtrSelector,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        use DomainReg::*;
        let index = match raw {
            0 => Rax,
            1 => Rbx,
            2 => Rcx,
            3 => Rdx,
            4 => Rbp,
            5 => Rsi,
            6 => Rdi,
            7 => R8,
            8 => R9,
            9 => R10,
            10 => R11,
            11 => R12,
            12 => R13,
            13 => R14,
            14 => R15,
            15 => Rip,
            16 => Rsp,
            17 => GdtBase,
            18 => GdtLimit,
            19 => IdtBase,
            20 => IdtLimit,
            21 => Cr0,
            22 => Cr3,
            23 => Cr4,
            24 => Ia32Efer,
            25 => Ia32Pat,
            26 => EsSelector,
            27 => EsBase,
            28 => EsLimit,
            29 => EsAccessRights,
            30 => CsSelector,
            31 => CsBase,
            32 => CsLimit,
            33 => CsAccessRights,
            34 => SsSelector,
            35 => SsBase,
            36 => SsLimit,
            37 => SsAccessRights,
            38 => DsSelector,
            39 => DsBase,
            40 => DsLimit,
            41 => DsAccessRights,
            42 => FsSelector,
            43 => FsBase,
            44 => FsLimit,
            45 => FsAccessRights,
            46 => GsSelector,
            47 => GsBase,
            48 => GsLimit,
            49 => GsAccessRights,
            50 => TrSelector,
            51 => TrBase,
            52 => TrLimit,
            53 => TrAccessRights,
            54 => LdtrSelector,
            55 => LdtrBase,
            56 => LdtrLimit,
            57 => LdtrAccessRights,
            _ => {
                return None;
            }
        };
        Some(index)
    }

    /// Returns the base register of the segment whose selector is `self`.
    pub fn segment_base(self) -> Option<DomainReg> {
        Self::SEGMENTS
            .contains(&self)
            .then(|| Self::from_raw(self as u32 + 1))
            .flatten()
    }
}

/// Flat register file the toolstack fills in before a domain's first vCPU runs. Values are
/// stored as given; nothing here checks them for architectural consistency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainRegs([u64; NUM_DOMAIN_REGS]);

impl Default for DomainRegs {
    fn default() -> Self {
        Self([0; NUM_DOMAIN_REGS])
    }
}

impl DomainRegs {
    /// Returns the value of the given register.
    pub fn reg(&self, reg: DomainReg) -> u64 {
        self.0[reg as usize]
    }

    /// Sets the value of the given register.
    pub fn set_reg(&mut self, reg: DomainReg, val: u64) {
        self.0[reg as usize] = val;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_indices_round_trip() {
        for raw in 0..NUM_DOMAIN_REGS as u32 {
            assert_eq!(DomainReg::from_raw(raw).unwrap() as u32, raw);
        }
        assert!(DomainReg::from_raw(NUM_DOMAIN_REGS as u32).is_none());
        assert_eq!(NUM_DOMAIN_REGS, 58);
    }

    #[test]
    fn registers_are_independent() {
        let mut regs = DomainRegs::default();
        regs.set_reg(DomainReg::Rip, 0x10_0000);
        regs.set_reg(DomainReg::Cr3, 0x20_0000);
        regs.set_reg(DomainReg::LdtrAccessRights, 0x82);
        assert_eq!(regs.reg(DomainReg::Rip), 0x10_0000);
        assert_eq!(regs.reg(DomainReg::Cr3), 0x20_0000);
        assert_eq!(regs.reg(DomainReg::LdtrAccessRights), 0x82);
        assert_eq!(regs.reg(DomainReg::Rsp), 0);
        assert_eq!(
            DomainReg::CsSelector.segment_base(),
            Some(DomainReg::CsBase)
        );
        assert_eq!(DomainReg::CsBase.segment_base(), None);
    }
}
