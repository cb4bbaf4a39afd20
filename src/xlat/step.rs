// SPDX-License-Identifier: Apache-2.0

//! The walker: `launch`/`step`/`walk` over a single [`Method`], plus the
//! auxiliary primitives setup routines use to probe a live page-table
//! graph (spec §4.B). Grounded on `pgt_x86_64`/`internal_walk` in
//! `original_source/src/addrxlat/x86_64.c:143-223`.

use crate::address::{AddressSpace, FullAddress};
use crate::arch::x86_64::consts::{PAGE_SHIFT, PRESENT, PSE};
use crate::callback::PageReader;
use crate::error::{Error, Result};
use crate::xlat::method::{Method, PteFormat};

/// The walker's working memory (spec §3 "Step state").
#[derive(Clone, Debug)]
pub struct Step {
    /// The address being translated, unmodified for the life of the walk.
    pub input: u64,
    /// Current base: the page-table root while descending, the final
    /// answer once `remain == 0`.
    pub base: FullAddress,
    /// `idx[0]` is the in-page byte offset; `idx[k]`, `k >= 1`, is the
    /// index at page-table level `k`.
    pub idx: Vec<u64>,
    /// Counts down from `form.levels()` to 0.
    pub remain: usize,
    pub raw_pte: u64,
    pub elemsz: u8,
}

impl Step {
    fn split_index(addr: u64, fieldsz: &[u8]) -> Vec<u64> {
        let mut idx = Vec::with_capacity(fieldsz.len());
        let mut shift = 0u32;
        for &width in fieldsz {
            let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
            idx.push((addr >> shift) & mask);
            shift += width as u32;
        }
        idx
    }
}

/// True if `addr` falls in the non-canonical hole for a paging width of
/// `virt_bits` (spec §4.C).
pub fn is_canonical(addr: u64, virt_bits: u32) -> bool {
    if virt_bits >= 64 {
        return true;
    }
    let hole_lo = 1u64 << (virt_bits - 1);
    let hole_hi = 0u64.wrapping_sub(hole_lo); // 2^64 - 2^(virt_bits-1)
    !(hole_lo..hole_hi).contains(&addr)
}

/// Prepare a walk of `method` starting at `addr`.
pub fn launch(method: &Method, addr: FullAddress) -> Result<Step> {
    match method {
        Method::Pgt { root, form, .. } => {
            let virt_bits = form.paging_max_index();
            if !is_canonical(addr.addr, virt_bits) {
                return Err(Error::invalid(format!(
                    "non-canonical address {addr:#x?} for {virt_bits}-bit paging"
                )));
            }
            Ok(Step {
                input: addr.addr,
                base: *root,
                idx: Step::split_index(addr.addr, &form.fieldsz),
                remain: form.levels(),
                raw_pte: 0,
                elemsz: 8,
            })
        }
        Method::MemArr { base, .. } => Ok(Step {
            input: addr.addr,
            base: *base,
            idx: vec![addr.addr],
            remain: 1,
            raw_pte: 0,
            elemsz: 8,
        }),
        Method::Linear { .. } | Method::Table { .. } | Method::Custom { .. } => Ok(Step {
            input: addr.addr,
            base: addr,
            idx: vec![addr.addr],
            remain: 1,
            raw_pte: 0,
            elemsz: 8,
        }),
        Method::None => Err(Error::no_method("method is NONE")),
    }
}

/// Perform one descent. When this returns with `step.remain == 0`,
/// `step.base` holds the final address.
pub fn do_step(method: &Method, st: &mut Step, reader: &dyn PageReader) -> Result<()> {
    log::trace!("do_step: input={:#x} remain={} base={:#x?}", st.input, st.remain, st.base);
    match method {
        Method::Pgt { pte_mask, form, target, .. } => pgt_step(*pte_mask, form, *target, st, reader),
        Method::Linear { target, off } => {
            st.base = FullAddress::new(*target, st.input.wrapping_add(*off as u64));
            st.remain = 0;
            Ok(())
        }
        Method::Table { target, entries, shift } => {
            let i = (st.input >> shift) as usize;
            let entry = entries
                .get(i)
                .ok_or_else(|| Error::not_present(format!("table index {i}")))?;
            let low = st.input & ((1u64 << shift) - 1);
            st.base = FullAddress::new(*target, entry.addr | low);
            st.remain = 0;
            Ok(())
        }
        Method::MemArr { target, base, shift, elemsz, .. } => {
            let slot = (st.input >> shift) as u64;
            let entry_addr = base.addr.wrapping_add(slot * (*elemsz as u64));
            let frame = match elemsz {
                4 => reader.read_u32(FullAddress::new(base.space, entry_addr))? as u64,
                _ => reader.read_u64(FullAddress::new(base.space, entry_addr))?,
            };
            let low = st.input & ((1u64 << shift) - 1);
            st.base = FullAddress::new(*target, (frame << shift) | low);
            st.remain = 0;
            Ok(())
        }
        Method::Custom { step_fn, .. } => step_fn(st, reader),
        Method::None => Err(Error::no_method("method is NONE")),
    }
}

fn pgt_step(
    pte_mask: u64,
    form: &crate::xlat::method::PagingForm,
    target: AddressSpace,
    st: &mut Step,
    reader: &dyn PageReader,
) -> Result<()> {
    if st.remain == 0 {
        return Ok(());
    }
    let level = st.remain;
    let entry_size = 8u64;
    let pte_addr = st.base.addr.wrapping_add(st.idx[level] * entry_size);
    let pte = reader.read_u64(FullAddress::new(st.base.space, pte_addr))?;
    st.raw_pte = pte;

    match form.pte_format {
        PteFormat::X8664 => {
            if pte & PRESENT == 0 {
                return Err(Error::not_present(format!(
                    "PTE not present at level {level} (addr {pte_addr:#x})"
                )));
            }
            let masked = pte & !pte_mask;
            let phys_mask = (1u64 << 52) - (1u64 << PAGE_SHIFT);
            if (level == 2 || level == 3) && masked & PSE != 0 {
                let huge_shift = if level == 2 { 21 } else { 30 };
                let huge_mask = !((1u64 << huge_shift) - 1);
                let phys_base = masked & phys_mask & huge_mask;
                let low = st.input & ((1u64 << huge_shift) - 1);
                st.base = FullAddress::new(target, phys_base | low);
                st.remain = 0;
                return Ok(());
            }
            let phys = masked & phys_mask;
            st.remain -= 1;
            if st.remain == 0 {
                st.base = FullAddress::new(target, phys | st.idx[0]);
                st.elemsz = 1;
            } else {
                st.base = FullAddress::new(st.base.space, phys);
            }
            Ok(())
        }
        PteFormat::Pfn64 => {
            let frame = pte;
            st.remain -= 1;
            if st.remain == 0 {
                st.base = FullAddress::new(target, (frame << PAGE_SHIFT) | st.idx[0]);
            } else {
                st.base = FullAddress::new(st.base.space, frame << PAGE_SHIFT);
            }
            Ok(())
        }
    }
}

/// Run `launch` then `do_step` until the walk completes or errors.
pub fn walk(method: &Method, addr: FullAddress, reader: &dyn PageReader) -> Result<FullAddress> {
    let mut st = launch(method, addr)?;
    while st.remain > 0 {
        do_step(method, &mut st, reader)?;
    }
    log::trace!("walk: {:#x?} -> {:#x?}", addr, st.base);
    Ok(st.base)
}

/// Advance `addr` to the smallest address `>= addr` (exclusive upper
/// bound `end`) that walks successfully, or fail if none exists.
pub fn lowest_mapped(
    method: &Method,
    addr: &mut u64,
    end: u64,
    reader: &dyn PageReader,
) -> Result<()> {
    let step = 1u64 << PAGE_SHIFT;
    let mut a = *addr;
    while a < end {
        if walk(method, FullAddress::new(AddressSpace::KernelVirt, a), reader).is_ok() {
            *addr = a;
            return Ok(());
        }
        a = a.wrapping_add(step);
    }
    Err(Error::not_present("no mapped address in range"))
}

/// Symmetric to [`lowest_mapped`]: advance to the smallest unmapped
/// address.
pub fn lowest_unmapped(
    method: &Method,
    addr: &mut u64,
    end: u64,
    reader: &dyn PageReader,
) -> Result<()> {
    let step = 1u64 << PAGE_SHIFT;
    let mut a = *addr;
    while a < end {
        if walk(method, FullAddress::new(AddressSpace::KernelVirt, a), reader).is_err() {
            *addr = a;
            return Ok(());
        }
        a = a.wrapping_add(step);
    }
    Err(Error::not_present("no unmapped address in range"))
}

/// Largest address `<= end` for which the walk keeps producing
/// `addr + linear_off`; used to measure direct-map extents.
pub fn highest_linear(
    method: &Method,
    start: u64,
    end: u64,
    linear_off: i64,
    reader: &dyn PageReader,
) -> u64 {
    let step = 1u64 << PAGE_SHIFT;
    let mut last_good = start;
    let mut a = start;
    while a <= end {
        match walk(method, FullAddress::new(AddressSpace::KernelVirt, a), reader) {
            Ok(out) if out.addr == a.wrapping_add(linear_off as u64) => {
                last_good = a;
                a = a.wrapping_add(step);
            }
            _ => break,
        }
    }
    last_good
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::test_support::FakeCtx;
    use crate::callback::ReadCaps;
    use crate::xlat::method::PagingForm;

    fn four_level_method(root: u64, pte_mask: u64) -> Method {
        Method::Pgt {
            target: AddressSpace::KernelPhys,
            root: FullAddress::new(AddressSpace::KernelPhys, root),
            pte_mask,
            form: PagingForm::x86_64_4level(),
        }
    }

    #[test]
    fn rejects_noncanonical_address() {
        let method = four_level_method(0x1000, 0);
        let err = launch(&method, FullAddress::new(AddressSpace::KernelVirt, 0x0000_8000_0000_0000))
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn huge_page_pmd_terminates_walk() {
        // A single present PMD entry with PSE set, pointing at phys 0,
        // aligned to 2 MiB. The walk should resolve the low 21 bits of
        // the input directly onto that base.
        let mut ctx = FakeCtx::new(ReadCaps::KPHYSADDR);
        // root table (PML4) level 4 entry -> points at a PDPT at 0x2000
        ctx.put_u64(0x1000, 0x2000 | 0x1 /* present */);
        // PDPT level 3 entry -> points at a PMD at 0x3000
        ctx.put_u64(0x2000, 0x3000 | 0x1);
        // PMD level 2 entry: present + PSE, phys base 0
        ctx.put_u64(0x3000, 0x1 | 0x80);

        let method = four_level_method(0x1000, 0);
        let out = walk(&method, FullAddress::new(AddressSpace::KernelVirt, 0x1fffff), &ctx).unwrap();
        assert_eq!(out.addr, 0x1fffff);
    }

    #[test]
    fn not_present_bit_clear_is_error() {
        let mut ctx = FakeCtx::new(ReadCaps::KPHYSADDR);
        ctx.put_u64(0x1000, 0); // present bit clear
        let method = four_level_method(0x1000, 0);
        let err = walk(&method, FullAddress::new(AddressSpace::KernelVirt, 0), &ctx).unwrap_err();
        assert!(matches!(err, Error::NotPresent(_)));
    }

    #[test]
    fn linear_method_adds_offset() {
        let mut ctx = FakeCtx::new(ReadCaps::KPHYSADDR);
        let method = Method::Linear {
            target: AddressSpace::KernelPhys,
            off: -0x1000,
        };
        let out = walk(&method, FullAddress::new(AddressSpace::KernelVirt, 0x5000), &ctx).unwrap();
        assert_eq!(out.addr, 0x4000);
        assert_eq!(out.space, AddressSpace::KernelPhys);
    }

    #[test]
    fn pte_decoding_round_trips_random_pfns() {
        use rand::Rng;

        // Fixed page-table scaffolding: PML4 and PDPT entries just point
        // forward to the next level. Only the final PT entry's PFN bits
        // are randomized.
        let mut ctx = FakeCtx::new(ReadCaps::KPHYSADDR);
        ctx.put_u64(0x1000, 0x2000 | 0x1);
        ctx.put_u64(0x2000, 0x3000 | 0x1);
        ctx.put_u64(0x3000, 0x4000 | 0x1);
        let method = four_level_method(0x1000, 0);

        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            // 40 bits of PFN room: PTEs expose bits 12..52 of phys addr.
            let pfn: u64 = rng.gen::<u64>() & ((1u64 << 40) - 1);
            // Random accessed/dirty/global/NX-style flag bits outside the
            // physical mask and the present bit.
            let flags: u64 = rng.gen::<u64>() & 0x8000_0000_0000_0e00;
            let pte = (pfn << 12) | flags | 0x1;
            ctx.put_u64(0x4000, pte);

            let out = walk(&method, FullAddress::new(AddressSpace::KernelVirt, 0), &ctx).unwrap();
            assert_eq!(out.addr >> 12, pfn);
        }
    }
}
