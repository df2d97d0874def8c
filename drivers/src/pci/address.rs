// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

/// PCI requester IDs are composed of a bus, device, and function. Each of those components will
/// implement the `AddressComponent` type.
pub trait AddressComponent {
    const SHIFT: u32;
    const BITS: u32;
    const MAX_VAL: u32 = (1 << Self::BITS) - 1;
}

// Implements conversions from and to the specified types to the given address component.
macro_rules! unsigned_conversions {
    ($T:ident, $($F:ident),+) => {
        $(
        impl TryFrom<$F> for $T {
            type Error = ();
            fn try_from(v: $F) -> core::result::Result<Self, Self::Error> {
                if (Self::MAX_VAL as u64) < (v as u64) {
                    Err(())
                } else {
                    Ok($T(v as u32))
                }
            }
        }
        )+
    }
}

// Implements functionality common to all the `Address` components.
macro_rules! address_type {
    ($T:ident) => {
        impl core::fmt::Display for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{:02x}", self.0)
            }
        }

        impl $T {
            /// Returns the u32 bits that represent this component index.
            pub fn bits(&self) -> u32 {
                self.0
            }

            /// Iterates over every value of this component, in order.
            pub fn all() -> impl Iterator<Item = Self> {
                (0..=Self::MAX_VAL).map($T)
            }
        }

        unsigned_conversions!($T, u8, u16, u32, u64);
    };
}

/// The function portion of a PCI address, 3 bits.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Function(u32);

impl AddressComponent for Function {
    const SHIFT: u32 = 0;
    const BITS: u32 = 3;
}
address_type!(Function);

/// The device portion of a PCI address, 5 bits.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Device(u32);

impl AddressComponent for Device {
    const BITS: u32 = 5;
    const SHIFT: u32 = 3;
}
address_type!(Device);

/// The bus portion of a PCI address, 8 bits.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Bus(u32);

impl AddressComponent for Bus {
    const BITS: u32 = 8;
    const SHIFT: u32 = 8;
}
address_type!(Bus);

/// The combined device and function, as used to index a VT-d context table. 8 bits.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct DevFn(u32);

impl AddressComponent for DevFn {
    const BITS: u32 = 8;
    const SHIFT: u32 = 0;
}
address_type!(DevFn);

/// The requester ID of a PCI function: 8 bits bus, 5 bits device, 3 bits function.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct Address(u32);

impl Address {
    /// Creates an Address from the passed address components. Returns None if any are out of
    /// range.
    pub fn try_from_components(bus: u32, dev: u32, func: u32) -> Option<Address> {
        Some(Self::new(
            Bus::try_from(bus).ok()?,
            Device::try_from(dev).ok()?,
            Function::try_from(func).ok()?,
        ))
    }

    /// Creates a new `Address` based on the provided components.
    pub fn new(bus: Bus, dev: Device, func: Function) -> Address {
        Address(bus.0 << Bus::SHIFT | dev.0 << Device::SHIFT | func.0)
    }

    /// Creates a new `Address` from a bus and a combined device/function.
    pub fn from_devfn(bus: Bus, devfn: DevFn) -> Address {
        Address(bus.0 << Bus::SHIFT | devfn.0)
    }

    /// Returns the function portion of the address.
    pub fn function(&self) -> Function {
        Function(self.0 & Function::MAX_VAL)
    }

    /// Returns the device portion of the address.
    pub fn device(&self) -> Device {
        Device((self.0 >> Device::SHIFT) & Device::MAX_VAL)
    }

    /// Returns the combined device and function.
    pub fn devfn(&self) -> DevFn {
        DevFn(self.0 & DevFn::MAX_VAL)
    }

    /// Returns the bus portion of the address.
    pub fn bus(&self) -> Bus {
        Bus((self.0 >> Bus::SHIFT) & Bus::MAX_VAL)
    }

    /// Returns the 16-bit requester ID.
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}.{}", self.bus(), self.device(), self.function())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_try_from() {
        assert!(Function::try_from(0u32).is_ok());
        assert!(Function::try_from(Function::MAX_VAL as u64).is_ok());
        assert!(Function::try_from(Function::MAX_VAL + 1).is_err());
        assert!(Bus::try_from(0x100u32).is_err());
        assert_eq!(Bus::all().count(), 256);
        assert_eq!(DevFn::all().count(), 256);
    }

    #[test]
    fn components() {
        let a = Address::try_from_components(0x3a, 0x1f, 0x7).unwrap();
        assert_eq!(a.bits(), 0x3aff);
        assert_eq!(a.devfn().bits(), 0xff);
        assert_eq!(a, Address::from_devfn(a.bus(), a.devfn()));
        assert_eq!(format!("{}", a), "3a:1f.07");
        assert!(Address::try_from_components(0x100, 0, 0).is_none());
        assert!(Address::try_from_components(0, 0x20, 0).is_none());
    }
}
