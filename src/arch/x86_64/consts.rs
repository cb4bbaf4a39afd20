// SPDX-License-Identifier: Apache-2.0

//! Bit-exact x86_64 constants, carried over from
//! `original_source/src/addrxlat/x86_64.c` verbatim. These values are
//! part of the on-disk compatibility surface (spec §6): changing any of
//! them changes which existing dumps translate correctly.

/// Bit position of the present flag in a PTE.
pub const PRESENT: u64 = 1 << 0;
/// Bit position of the page-size (huge page) flag in a PMD/PUD entry.
pub const PSE: u64 = 1 << 7;

/// Byte shift of an ordinary 4 KiB page.
pub const PAGE_SHIFT: u32 = 12;
/// Byte shift of a 2 MiB huge page (PMD level).
pub const PAGE_SHIFT_2M: u32 = 21;
/// Byte shift of a 1 GiB huge page (PUD level).
pub const PAGE_SHIFT_1G: u32 = 30;

/// Highest physical address bit a PTE can encode.
pub const PHYSADDR_BITS_MAX: u32 = 52;

/// Virtual address width for 4-level paging.
pub const VIRTADDR_BITS_MAX: u32 = 48;
/// Virtual address width for 5-level (LA57) paging.
pub const VIRTADDR_5L_BITS_MAX: u32 = 57;

/// Position of the LA57 bit in CR4.
pub const CR4_BIT_LA57: u32 = 12;

/// The low bit of cr3 KPTI sets to select the user-mode page table.
pub const PTI_USER_PGTABLE_MASK: u64 = 1 << PAGE_SHIFT;

/// Xen's machine-to-physical array, fixed at this kernel-virtual base.
pub const XEN_MACH2PHYS_ADDR: u64 = 0xffff800000000000;

pub const LINUX_KTEXT_START: u64 = 0xffffffff80000000;
pub const LINUX_KTEXT_END_NOKASLR: u64 = 0xffffffff9fffffff;
pub const LINUX_KTEXT_END: u64 = 0xffffffffbfffffff;

pub const LINUX_DIRECTMAP_START_2_6_0: u64 = 0x0000010000000000;
pub const LINUX_DIRECTMAP_END_2_6_0: u64 = 0x000001ffffffffff;

pub const LINUX_DIRECTMAP_START_2_6_11: u64 = 0xffff810000000000;
pub const LINUX_DIRECTMAP_END_2_6_11: u64 = 0xffffc0ffffffffff;

pub const LINUX_DIRECTMAP_START_2_6_27: u64 = 0xffff880000000000;
pub const LINUX_DIRECTMAP_END_2_6_27: u64 = 0xffffc0ffffffffff;

pub const LINUX_DIRECTMAP_START_2_6_31: u64 = LINUX_DIRECTMAP_START_2_6_27;
pub const LINUX_DIRECTMAP_END_2_6_31: u64 = 0xffffc7ffffffffff;

pub const LINUX_DIRECTMAP_START_4_2: u64 = 0xffff888000000000;
pub const LINUX_DIRECTMAP_END_4_2: u64 = 0xffffc8ffffffffff;

pub const LINUX_DIRECTMAP_START_5L: u64 = 0xff10000000000000;
pub const LINUX_DIRECTMAP_END_5L: u64 = 0xff8fffffffffffff;

pub const LINUX_DIRECTMAP_START_5L_4_2: u64 = 0xff11000000000000;
pub const LINUX_DIRECTMAP_END_5L_4_2: u64 = 0xff90ffffffffffff;

pub const XEN_DIRECTMAP: u64 = 0xffff830000000000;
pub const XEN_DIRECTMAP_BIGMEM: u64 = 0xffff848000000000;
pub const XEN_DIRECTMAP_SIZE_1T: u64 = 1u64 << 40;
pub const XEN_DIRECTMAP_SIZE_3_5T: u64 = 3584u64 << 30;
pub const XEN_DIRECTMAP_SIZE_5T: u64 = 5u64 << 40;

pub const XEN_TEXT_3_2: u64 = 0xffff828c80000000;
pub const XEN_TEXT_4_0DEV: u64 = 0xffff828880000000;
pub const XEN_TEXT_4_0: u64 = 0xffff82c480000000;
pub const XEN_TEXT_4_3: u64 = 0xffff82c4c0000000;
pub const XEN_TEXT_4_4: u64 = 0xffff82d080000000;

/// Known Linux directmap bases to probe, most recent kernel first
/// (`linux_ktext_map`'s `fixed_loc` order in `x86_64.c`).
pub const LINUX_DIRECTMAP_CANDIDATES: &[u64] = &[
    LINUX_DIRECTMAP_START_4_2,
    LINUX_DIRECTMAP_START_2_6_31,
    LINUX_DIRECTMAP_START_2_6_11,
    LINUX_DIRECTMAP_START_2_6_0,
];

/// `linux_directmap_by_ver`: pick the directmap window for a known
/// `(major, minor, patch)` version, newest first.
pub fn linux_directmap_by_ver(version_code: u32) -> Option<(u64, u64)> {
    // version_code is (major<<16)|(minor<<8)|patch.
    if version_code >= ver(2, 6, 31) {
        Some((LINUX_DIRECTMAP_START_2_6_31, LINUX_DIRECTMAP_END_2_6_31))
    } else if version_code >= ver(2, 6, 27) {
        Some((LINUX_DIRECTMAP_START_2_6_27, LINUX_DIRECTMAP_END_2_6_27))
    } else if version_code >= ver(2, 6, 11) {
        Some((LINUX_DIRECTMAP_START_2_6_11, LINUX_DIRECTMAP_END_2_6_11))
    } else if version_code >= ver(2, 6, 0) {
        Some((LINUX_DIRECTMAP_START_2_6_0, LINUX_DIRECTMAP_END_2_6_0))
    } else {
        None
    }
}

const fn ver(major: u32, minor: u32, patch: u32) -> u32 {
    (major << 16) | (minor << 8) | patch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_picks_newest_matching_window() {
        assert_eq!(
            linux_directmap_by_ver(ver(4, 19, 0)),
            Some((LINUX_DIRECTMAP_START_2_6_31, LINUX_DIRECTMAP_END_2_6_31))
        );
        assert_eq!(
            linux_directmap_by_ver(ver(2, 6, 5)),
            Some((LINUX_DIRECTMAP_START_2_6_0, LINUX_DIRECTMAP_END_2_6_0))
        );
        assert_eq!(linux_directmap_by_ver(ver(1, 0, 0)), None);
    }
}
