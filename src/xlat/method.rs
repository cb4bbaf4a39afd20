// SPDX-License-Identifier: Apache-2.0

//! Translation methods: the tagged union of ways to turn an offset in
//! one address space into an offset in another (spec §3 "Translation
//! method", §4.B). Grounded on the method kinds `addrxlat_meth_t` takes
//! in `original_source/src/addrxlat/x86_64.c` (`ADDRXLAT_LINEAR`,
//! `ADDRXLAT_PGT`, `ADDRXLAT_MEMARR`, `ADDRXLAT_CUSTOM`).

use std::fmt;
use std::sync::Arc;

use crate::address::{AddressSpace, FullAddress};
use crate::callback::PageReader;
use crate::error::Result;
use crate::xlat::step::Step;

/// The wire layout a `PGT` walk interprets PTEs as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PteFormat {
    /// Ordinary x86_64 PTE: present bit 0, PSE bit 7, PFN in bits 12..52.
    X8664,
    /// A bare little-endian frame number (Xen p2m/m2p style tables).
    Pfn64,
}

/// `{ pte_format, nfields, fieldsz[0..=nfields] }` (spec §3). `fieldsz[0]`
/// is the page shift; `fieldsz[1..]` are the bit widths of each
/// page-table index, leaf to root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagingForm {
    pub pte_format: PteFormat,
    pub fieldsz: Vec<u8>,
}

impl PagingForm {
    pub fn new(pte_format: PteFormat, fieldsz: Vec<u8>) -> Self {
        PagingForm { pte_format, fieldsz }
    }

    /// Total field count, offset included (spec's `nfields`): 5 for
    /// 4-level paging, 6 for 5-level.
    pub fn nfields(&self) -> usize {
        self.fieldsz.len()
    }

    /// Number of page-table levels a walk descends through (4 or 5),
    /// i.e. `nfields - 1`.
    pub fn levels(&self) -> usize {
        self.fieldsz.len() - 1
    }

    /// Sum of all field widths; also the virtual address width in bits,
    /// and must not exceed 64 (spec invariant).
    pub fn paging_max_index(&self) -> u32 {
        self.fieldsz.iter().map(|&b| b as u32).sum()
    }

    /// 4-level paging: 9-bit fields at each of four levels plus a 12-bit
    /// page offset.
    pub fn x86_64_4level() -> Self {
        PagingForm::new(PteFormat::X8664, vec![12, 9, 9, 9, 9])
    }

    /// 5-level (LA57) paging: an extra 9-bit field at the top.
    pub fn x86_64_5level() -> Self {
        PagingForm::new(PteFormat::X8664, vec![12, 9, 9, 9, 9, 9])
    }

    /// The layout Xen's p2m/m2p frame tables use: a flat array of 8-byte
    /// frame numbers indexed by page-aligned offset.
    pub fn pfn64() -> Self {
        PagingForm::new(PteFormat::Pfn64, vec![12, 9, 9, 9])
    }
}

/// A boxed callback for the `CUSTOM` method kind. Takes the in-flight
/// step and the active reader, and performs the whole remaining
/// translation itself.
pub type CustomFn = Arc<dyn Fn(&mut Step, &dyn PageReader) -> Result<()> + Send + Sync>;

/// One translation rule between two address spaces (spec §3).
#[derive(Clone)]
pub enum Method {
    /// Absent/unimplemented.
    None,
    /// `output = input + off (mod 2^64)`.
    Linear { target: AddressSpace, off: i64 },
    /// Hardware-style page-table walk; see `arch::x86_64`.
    Pgt {
        target: AddressSpace,
        root: FullAddress,
        pte_mask: u64,
        form: PagingForm,
    },
    /// Per-index lookup in a small caller-supplied table.
    Table {
        target: AddressSpace,
        entries: Arc<Vec<FullAddress>>,
        shift: u8,
    },
    /// Indexed array in memory: `frame = mem[base + (input>>shift)*elemsz]`,
    /// `output = (frame<<shift) | (input & mask)`.
    MemArr {
        target: AddressSpace,
        base: FullAddress,
        shift: u8,
        elemsz: u8,
        valsz: u8,
    },
    /// Opaque callback, for translations that do not fit the other kinds.
    Custom { target: AddressSpace, step_fn: CustomFn },
}

impl Method {
    pub fn target(&self) -> AddressSpace {
        match self {
            Method::None => AddressSpace::None,
            Method::Linear { target, .. }
            | Method::Pgt { target, .. }
            | Method::Table { target, .. }
            | Method::MemArr { target, .. }
            | Method::Custom { target, .. } => *target,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Method::None)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::None => write!(f, "None"),
            Method::Linear { target, off } => write!(f, "Linear({target:?}, {off:#x})"),
            Method::Pgt { target, root, .. } => write!(f, "Pgt({target:?}, root={root})"),
            Method::Table { target, entries, .. } => {
                write!(f, "Table({target:?}, {} entries)", entries.len())
            }
            Method::MemArr { target, base, .. } => write!(f, "MemArr({target:?}, base={base})"),
            Method::Custom { target, .. } => write!(f, "Custom({target:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_level_field_sum_is_48_plus_page_offset() {
        let form = PagingForm::x86_64_4level();
        assert_eq!(form.nfields(), 5);
        assert_eq!(form.levels(), 4);
        assert_eq!(form.paging_max_index(), 48);
    }

    #[test]
    fn five_level_adds_one_field() {
        let form = PagingForm::x86_64_5level();
        assert_eq!(form.nfields(), 6);
        assert_eq!(form.levels(), 5);
        assert_eq!(form.paging_max_index(), 57);
    }
}
