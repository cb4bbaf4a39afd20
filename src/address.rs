// SPDX-License-Identifier: Apache-2.0

//! Address spaces and full addresses (spec §3 "Address").

use core::fmt;

/// One of the address spaces the kernel (or hypervisor) uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    /// Unset sentinel; no space has been assigned yet.
    None,
    /// Machine-physical address (host physical, under Xen).
    MachinePhys,
    /// Kernel-physical address (guest physical).
    KernelPhys,
    /// Kernel-virtual address.
    KernelVirt,
    /// User-virtual address.
    UserVirt,
    /// Machine frame number: MPA >> page_shift, as used in Xen p2m/m2p.
    MachineFrame,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AddressSpace::None => "none",
            AddressSpace::MachinePhys => "MPA",
            AddressSpace::KernelPhys => "KPA",
            AddressSpace::KernelVirt => "KVA",
            AddressSpace::UserVirt => "user-virt",
            AddressSpace::MachineFrame => "MFN",
        };
        f.write_str(s)
    }
}

/// A full address: a space tag plus a 64-bit value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FullAddress {
    pub space: AddressSpace,
    pub addr: u64,
}

impl FullAddress {
    pub const NONE: FullAddress = FullAddress {
        space: AddressSpace::None,
        addr: 0,
    };

    pub fn new(space: AddressSpace, addr: u64) -> Self {
        FullAddress { space, addr }
    }

    pub fn is_set(&self) -> bool {
        self.space != AddressSpace::None
    }
}

impl Default for FullAddress {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for FullAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.space, self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_none() {
        assert!(!FullAddress::default().is_set());
    }

    #[test]
    fn display_formats_hex() {
        let a = FullAddress::new(AddressSpace::KernelVirt, 0xdead_beef);
        assert_eq!(format!("{}", a), "KVA:0xdeadbeef");
    }
}
