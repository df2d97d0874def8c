// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Fixed-attribute mapping helpers for a domain's EPT.
//!
//! Callers pick one of a small set of intents (size, access, memory type) instead of building
//! attribute combinations themselves. Addresses must be aligned to the mapping size and must not
//! collide with a mapping of a different size; anything else is a caller bug and panics.

use x86_page_tables::EptPerms;
use x86_pages::{GuestPageAddr, GuestPhysAddr, HostPageAddr, MemType, PageSize};

use crate::domain::{Domain, Error, Result};

macro_rules! fixed_mapping {
    ($name:ident, $size:ident, $perms:ident, $mem_type:ident) => {
        #[doc = concat!(
                    "Maps `gpa` to `hpa` with a ",
                    stringify!($size),
                    " ",
                    stringify!($perms),
                    " ",
                    stringify!($mem_type),
                    " leaf."
                )]
        pub fn $name(&self, gpa: GuestPageAddr, hpa: HostPageAddr) {
            self.map_fixed(gpa, hpa, PageSize::$size, EptPerms::$perms, MemType::$mem_type);
        }
    };
}

impl Domain {
    fn map_fixed(
        &self,
        gpa: GuestPageAddr,
        hpa: HostPageAddr,
        size: PageSize,
        perms: EptPerms,
        mem_type: MemType,
    ) {
        if let Err(e) = self.ept.lock().map(gpa, hpa, size, perms, mem_type) {
            panic!(
                "{}: failed to map {:#x} -> {:#x} ({:?} {:?}): {:?}",
                self.id,
                gpa.bits(),
                hpa.bits(),
                size,
                perms,
                e
            );
        }
    }

    fixed_mapping!(map_1g_r, Size1G, R, WriteBack);
    fixed_mapping!(map_2m_r, Size2M, R, WriteBack);
    fixed_mapping!(map_4k_r, Size4k, R, WriteBack);
    fixed_mapping!(map_1g_rw, Size1G, RW, WriteBack);
    fixed_mapping!(map_2m_rw, Size2M, RW, WriteBack);
    fixed_mapping!(map_4k_rw, Size4k, RW, WriteBack);
    fixed_mapping!(map_4k_rw_wc, Size4k, RW, WriteCombining);
    fixed_mapping!(map_4k_rw_uc, Size4k, RW, Uncacheable);
    fixed_mapping!(map_1g_rwe, Size1G, RWX, WriteBack);
    fixed_mapping!(map_2m_rwe, Size2M, RWX, WriteBack);
    fixed_mapping!(map_4k_rwe, Size4k, RWX, WriteBack);

    /// Removes access through the leaf covering `gpa`. Table pages are kept for a later remap.
    pub fn unmap(&self, gpa: GuestPhysAddr) -> Result<PageSize> {
        self.ept.lock().unmap(gpa).map_err(Error::Paging)
    }

    /// Clears the leaf covering `gpa` and frees the tables left empty by doing so.
    pub fn release(&self, gpa: GuestPhysAddr) -> Result<()> {
        self.ept.lock().release(gpa).map_err(Error::Paging)
    }
}

#[cfg(test)]
mod tests {
    use crate::domain_info::DomainInfo;
    use crate::test_stubs::PlatformBuilder;
    use x86_page_tables::{EptPerms, PageTableError};
    use x86_pages::*;

    fn gpa(addr: u64) -> GuestPageAddr {
        PageAddr::new(RawAddr::guest(addr)).unwrap()
    }

    fn hpa(addr: u64) -> HostPageAddr {
        PageAddr::new(RawAddr::host(addr)).unwrap()
    }

    #[test]
    fn fixed_attributes() {
        let (platform, domains) = PlatformBuilder::new().build_with_root();
        let guest = domains
            .create(&platform, DomainId::new(1), DomainInfo::guest(64))
            .unwrap();
        guest.map_1g_r(gpa(1 << 30), hpa(3 << 30));
        guest.map_2m_rw(gpa(0x20_0000), hpa(0x80_0000));
        guest.map_4k_rw_wc(gpa(0x1000), hpa(0xfee0_0000));
        guest.map_4k_rw_uc(gpa(0x2000), hpa(0xfec0_0000));
        guest.map_4k_rwe(gpa(0x3000), hpa(0x5000));

        let t = guest.translate(RawAddr::guest((1 << 30) + 0x1234)).unwrap();
        assert_eq!(t.hpa.bits(), (3 << 30) + 0x1234);
        assert_eq!((t.size, t.perms), (PageSize::Size1G, Some(EptPerms::R)));
        let t = guest.translate(RawAddr::guest(0x20_0000)).unwrap();
        assert_eq!((t.size, t.perms), (PageSize::Size2M, Some(EptPerms::RW)));
        let t = guest.translate(RawAddr::guest(0x1000)).unwrap();
        assert_eq!(t.mem_type, Some(MemType::WriteCombining));
        let t = guest.translate(RawAddr::guest(0x2000)).unwrap();
        assert_eq!(t.mem_type, Some(MemType::Uncacheable));
        let t = guest.translate(RawAddr::guest(0x3000)).unwrap();
        assert_eq!((t.perms, t.mem_type), (Some(EptPerms::RWX), Some(MemType::WriteBack)));

        assert_eq!(guest.unmap(RawAddr::guest(0x3000)), Ok(PageSize::Size4k));
        assert!(guest.translate(RawAddr::guest(0x3000)).is_none());
        guest.map_4k_r(gpa(0x3000), hpa(0x6000));
        assert_eq!(
            guest.translate(RawAddr::guest(0x3000)).unwrap().hpa.bits(),
            0x6000
        );
        guest.release(RawAddr::guest(0x3000)).unwrap();
        assert_eq!(
            guest.unmap(RawAddr::guest(0x3000)),
            Err(crate::Error::Paging(PageTableError::NotMapped))
        );
    }

    #[test]
    #[should_panic]
    fn misaligned_huge_mapping_is_fatal() {
        let (platform, domains) = PlatformBuilder::new().build_with_root();
        let guest = domains
            .create(&platform, DomainId::new(1), DomainInfo::guest(64))
            .unwrap();
        guest.map_2m_rw(gpa(0x1000), hpa(0x20_0000));
    }
}
