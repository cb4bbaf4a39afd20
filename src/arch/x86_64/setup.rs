// SPDX-License-Identifier: Apache-2.0

//! Linux and Xen x86_64 setup: discovers a live paging configuration
//! and programs a [`TranslationSystem`]'s method and map slots (spec
//! §4.C). Grounded step-by-step on `original_source/src/addrxlat/x86_64.c`
//! (`linux_pgt`, `linux_directmap`, `linux_ktext_map`, `xen_*`).
//!
//! Every step here distinguishes *fatal* errors from *expected* ones
//! (`Error::is_expected`) and falls through to the next strategy on the
//! latter, exactly as spec.md §7 requires of setup routines.

use crate::address::{AddressSpace, FullAddress};
use crate::arch::x86_64::consts::*;
use crate::attr::AttrDict;
use crate::attr::AttrValue;
use crate::callback::{PageReader, SymbolResolver};
use crate::error::{Error, Result};
use crate::xlat::map::Range;
use crate::xlat::method::{Method, PagingForm};
use crate::xlat::step;
use crate::xlat::system::{MapSlot, MethodSlot, TranslationSystem};

fn version_code(major: u32, minor: u32, patch: u32) -> u64 {
    ((major as u64) << 16) | ((minor as u64) << 8) | patch as u64
}

/// Step 1: virtual-address width, in bits (48 or 57).
fn detect_virt_bits(dict: &AttrDict, resolver: &dyn SymbolResolver) -> Result<u32> {
    if let Ok(user_opt) = dict.get_number("addrxlat.opts.virt_bits") {
        return match user_opt {
            48 | 57 => Ok(user_opt as u32),
            other => Err(Error::invalid(format!("bad virt_bits override: {other}"))),
        };
    }
    if let Ok(cr4) = resolver.get_reg("cr4") {
        return Ok(if cr4 & (1 << CR4_BIT_LA57) != 0 {
            VIRTADDR_5L_BITS_MAX
        } else {
            VIRTADDR_BITS_MAX
        });
    }
    if let Ok(enabled) = resolver.get_number("pgtable_l5_enabled") {
        return Ok(if enabled != 0 {
            VIRTADDR_5L_BITS_MAX
        } else {
            VIRTADDR_BITS_MAX
        });
    }
    if resolver.get_symval("_stext").is_ok() {
        return Ok(VIRTADDR_BITS_MAX);
    }
    if let Ok(ver) = dict.get_number("linux.version_code") {
        if ver < version_code(4, 13, 0) {
            return Ok(VIRTADDR_BITS_MAX);
        }
    }
    Err(Error::invalid("bad virt_bits: cannot determine paging levels"))
}

/// Step 2: root page-table physical address, plus whether KPTI is
/// active (cr3's bit 12 set).
///
/// Symbol values are treated as already-physical facts here (a
/// simplification from the original's virtual-symbol-plus-phys_base
/// resolution, recorded in `DESIGN.md`).
fn detect_root_pgt(dict: &AttrDict, resolver: &dyn SymbolResolver) -> Result<(u64, bool)> {
    if let Ok(addr) = dict.get_address("addrxlat.opts.rootpgt") {
        return Ok((addr & !((1u64 << PAGE_SHIFT) - 1), false));
    }
    if let Ok(v) = resolver.get_symval("init_top_pgt") {
        return Ok((v & !((1u64 << PAGE_SHIFT) - 1), false));
    }
    if let Ok(v) = resolver.get_symval("init_level4_pgt") {
        return Ok((v & !((1u64 << PAGE_SHIFT) - 1), false));
    }
    if let Ok(cr3) = resolver.get_reg("cr3") {
        let page_base = cr3 & !((1u64 << PAGE_SHIFT) - 1);
        let kpti = page_base & PTI_USER_PGTABLE_MASK != 0;
        return Ok((page_base, kpti));
    }
    Err(Error::no_data("cannot determine root page table"))
}

/// True if walking `addr` through `pgt` lands on physical 0.
fn is_directmap(pgt: &Method, addr: u64, reader: &dyn PageReader) -> bool {
    step::walk(pgt, FullAddress::new(AddressSpace::KernelVirt, addr), reader)
        .map(|out| out.addr == 0)
        .unwrap_or(false)
}

/// Populate `sys`'s `Pgt` method and `Hw` map's hardware-walk range for
/// Linux on x86_64, then layer in SME, Xen p2m (if configured), the
/// reverse direct map, kernel text, and the direct map (spec §4.C steps
/// 1-7).
pub fn setup_linux(
    dict: &mut AttrDict,
    sys: &mut TranslationSystem,
    reader: &dyn PageReader,
    resolver: &dyn SymbolResolver,
) -> Result<()> {
    dict.set("addrxlat.ostype", AttrValue::String("linux".into()))?;

    let virt_bits = detect_virt_bits(dict, resolver)?;
    let form = if virt_bits == VIRTADDR_5L_BITS_MAX {
        PagingForm::x86_64_5level()
    } else {
        PagingForm::x86_64_4level()
    };

    let (mut root, kpti) = detect_root_pgt(dict, resolver)?;

    let mut pte_mask = 0u64;
    if let Ok(sme) = resolver.get_number("sme_mask") {
        pte_mask |= sme;
    }

    let pgt_method = |root: u64, pte_mask: u64, form: PagingForm| Method::Pgt {
        target: AddressSpace::KernelPhys,
        root: FullAddress::new(AddressSpace::KernelPhys, root),
        pte_mask,
        form,
    };

    // With KPTI, try the user-table root first; if the direct map can't
    // be confirmed through it, retry with the kernel-table root (spec
    // §4.C step 2, "concrete scenario: KPTI bit detection").
    let mut candidate = pgt_method(root, pte_mask, form.clone());
    if kpti && !probes_any_directmap(&candidate, reader) {
        root &= !PTI_USER_PGTABLE_MASK;
        candidate = pgt_method(root, pte_mask, form.clone());
    }
    sys.set_method(MethodSlot::Pgt, candidate);
    sys.map_mut(MapSlot::Hw).set(
        0,
        Range {
            endoff: u64::MAX,
            meth: MethodSlot::Pgt as usize,
        },
    );

    // Step 4: Xen p2m/m2p, when cross-translating a Xen-aware guest.
    if let (Ok(1..=u64::MAX), Ok(p2m_mfn)) = (
        dict.get_number("xen.xen_xlat"),
        dict.get_address("xen.xen_p2m_mfn"),
    ) {
        let p2m_root = p2m_mfn << PAGE_SHIFT;
        sys.set_method(
            MethodSlot::KphysMachphys,
            Method::Pgt {
                target: AddressSpace::MachinePhys,
                root: FullAddress::new(AddressSpace::MachinePhys, p2m_root),
                pte_mask: 0,
                form: PagingForm::pfn64(),
            },
        );
        sys.map_mut(MapSlot::KphysMachphys).set(
            0,
            Range {
                endoff: u64::MAX,
                meth: MethodSlot::KphysMachphys as usize,
            },
        );
        sys.set_method(
            MethodSlot::MachphysKphys,
            Method::MemArr {
                target: AddressSpace::KernelPhys,
                base: FullAddress::new(AddressSpace::KernelVirt, XEN_MACH2PHYS_ADDR),
                shift: PAGE_SHIFT as u8,
                elemsz: 8,
                valsz: 8,
            },
        );
    }

    // Step 5: reverse direct map, if neither KPA nor MPA is directly
    // readable by the caller's reader.
    let caps = reader.read_caps();
    if !caps.contains(crate::callback::ReadCaps::KPHYSADDR)
        && !caps.contains(crate::callback::ReadCaps::MACHPHYSADDR)
    {
        log::debug!("linux setup: probing reverse direct map");
        setup_reverse_directmap(dict, sys, reader, resolver)?;
    }

    // Step 6: kernel text.
    log::debug!("linux setup: probing kernel text map");
    setup_ktext(dict, sys, reader, resolver)?;

    // Step 7: direct map.
    log::debug!("linux setup: probing direct map, virt_bits={virt_bits}");
    setup_directmap(dict, sys, reader, resolver)?;

    log::debug!("linux setup complete, root={root:#x} kpti={kpti}");
    Ok(())
}

fn probes_any_directmap(pgt: &Method, reader: &dyn PageReader) -> bool {
    LINUX_DIRECTMAP_CANDIDATES
        .iter()
        .chain(std::iter::once(&LINUX_DIRECTMAP_START_5L))
        .any(|&base| is_directmap(pgt, base, reader))
}

fn setup_reverse_directmap(
    dict: &mut AttrDict,
    sys: &mut TranslationSystem,
    reader: &dyn PageReader,
    resolver: &dyn SymbolResolver,
) -> Result<()> {
    let pgt = sys.method(MethodSlot::Pgt).clone();
    let base = if let Ok(v) = resolver.get_symval("page_offset_base") {
        v
    } else {
        let candidates: &[u64] = &[
            LINUX_DIRECTMAP_START_4_2,
            LINUX_DIRECTMAP_START_2_6_31,
            LINUX_DIRECTMAP_START_2_6_11,
            LINUX_DIRECTMAP_START_2_6_0,
        ];
        match candidates.iter().find(|&&b| is_directmap(&pgt, b, reader)) {
            Some(&b) => b,
            None => return Ok(()), // expected failure: leave RDIRECT unset
        }
    };
    dict.set("linux.phys_base", AttrValue::Address(0))?;
    sys.set_method(
        MethodSlot::RDirect,
        Method::Linear {
            target: AddressSpace::KernelVirt,
            off: base as i64,
        },
    );
    sys.map_mut(MapSlot::KphysDirect).set(
        0,
        Range {
            endoff: u64::MAX,
            meth: MethodSlot::RDirect as usize,
        },
    );
    Ok(())
}

fn setup_ktext(
    dict: &mut AttrDict,
    sys: &mut TranslationSystem,
    reader: &dyn PageReader,
    resolver: &dyn SymbolResolver,
) -> Result<()> {
    if let (Ok(phys_stext), Ok(virt_stext)) = (
        resolver.get_number("phys_stext"),
        resolver.get_symval("_stext"),
    ) {
        let off = phys_stext.wrapping_sub(virt_stext);
        sys.set_method(
            MethodSlot::Ktext,
            Method::Linear {
                target: AddressSpace::KernelPhys,
                off: off as i64,
            },
        );
        return Ok(());
    }

    let pgt = sys.method(MethodSlot::Pgt).clone();
    let mut stext = LINUX_KTEXT_START;
    match step::lowest_mapped(&pgt, &mut stext, LINUX_KTEXT_END, reader) {
        Ok(()) => {
            let out = step::walk(&pgt, FullAddress::new(AddressSpace::KernelVirt, stext), reader)?;
            let off = out.addr.wrapping_sub(stext);
            sys.set_method(
                MethodSlot::Ktext,
                Method::Linear {
                    target: AddressSpace::KernelPhys,
                    off: off as i64,
                },
            );
            Ok(())
        }
        Err(e) if e.is_expected() => {
            // Leave KTEXT unconfigured; callers fall back to the direct
            // map for code addresses.
            let _ = dict;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn setup_directmap(
    dict: &mut AttrDict,
    sys: &mut TranslationSystem,
    reader: &dyn PageReader,
    resolver: &dyn SymbolResolver,
) -> Result<()> {
    let pgt = sys.method(MethodSlot::Pgt).clone();
    let virt_bits = match &pgt {
        Method::Pgt { form, .. } => form.paging_max_index(),
        _ => VIRTADDR_BITS_MAX,
    };

    let (start, hi_bound) = if virt_bits == VIRTADDR_5L_BITS_MAX {
        (LINUX_DIRECTMAP_START_5L, LINUX_DIRECTMAP_END_5L_4_2)
    } else if is_directmap(&pgt, LINUX_DIRECTMAP_START_2_6_0, reader) {
        (LINUX_DIRECTMAP_START_2_6_0, LINUX_DIRECTMAP_END_2_6_0)
    } else if is_directmap(&pgt, LINUX_DIRECTMAP_START_2_6_11, reader) {
        (LINUX_DIRECTMAP_START_2_6_11, LINUX_DIRECTMAP_END_2_6_11)
    } else {
        match LINUX_DIRECTMAP_CANDIDATES
            .iter()
            .find(|&&b| is_directmap(&pgt, b, reader))
        {
            Some(&b) => (b, LINUX_DIRECTMAP_END_4_2),
            None => {
                if let Ok(ver) = dict.get_number("linux.version_code") {
                    if ver < version_code(4, 8, 0) {
                        if let Some((s, e)) = linux_directmap_by_ver(ver as u32) {
                            (s, e)
                        } else {
                            return Ok(());
                        }
                    } else {
                        return Ok(());
                    }
                } else {
                    return Ok(());
                }
            }
        }
    };

    let high = step::highest_linear(&pgt, start, hi_bound, -(start as i64), reader);
    sys.set_method(
        MethodSlot::Direct,
        Method::Linear {
            target: AddressSpace::KernelPhys,
            off: -(start as i64),
        },
    );
    sys.map_mut(MapSlot::Hw).set(
        start,
        Range {
            endoff: high - start,
            meth: MethodSlot::Direct as usize,
        },
    );
    Ok(())
}

/// Xen x86_64 setup: analogous to Linux's, choosing among the known
/// Xen text bases and directmap window sizes (spec §4.C, "For Xen setup
/// the sequence is analogous").
pub fn setup_xen(
    dict: &mut AttrDict,
    sys: &mut TranslationSystem,
    reader: &dyn PageReader,
    resolver: &dyn SymbolResolver,
) -> Result<()> {
    dict.set("addrxlat.ostype", AttrValue::String("xen".into()))?;

    log::debug!("xen setup: detecting root page table");
    let (root, _kpti) = detect_root_pgt(dict, resolver)?;
    log::debug!("xen setup: root={root:#x}");
    let form = PagingForm::x86_64_4level();
    let pgt = Method::Pgt {
        target: AddressSpace::MachinePhys,
        root: FullAddress::new(AddressSpace::MachinePhys, root),
        pte_mask: 0,
        form,
    };
    sys.set_method(MethodSlot::Pgt, pgt.clone());
    sys.map_mut(MapSlot::Hw).set(
        0,
        Range {
            endoff: u64::MAX,
            meth: MethodSlot::Pgt as usize,
        },
    );

    for &text_base in &[XEN_TEXT_4_4, XEN_TEXT_4_3, XEN_TEXT_4_0, XEN_TEXT_4_0DEV, XEN_TEXT_3_2] {
        if is_directmap(&pgt, text_base, reader) {
            sys.set_method(
                MethodSlot::Ktext,
                Method::Linear {
                    target: AddressSpace::MachinePhys,
                    off: -(text_base as i64),
                },
            );
            break;
        }
    }

    if is_directmap(&pgt, XEN_DIRECTMAP, reader) {
        let high = step::highest_linear(
            &pgt,
            XEN_DIRECTMAP,
            XEN_DIRECTMAP + XEN_DIRECTMAP_SIZE_1T - 1,
            -(XEN_DIRECTMAP as i64),
            reader,
        );
        sys.set_method(
            MethodSlot::Direct,
            Method::Linear {
                target: AddressSpace::MachinePhys,
                off: -(XEN_DIRECTMAP as i64),
            },
        );
        sys.map_mut(MapSlot::Hw).set(
            XEN_DIRECTMAP,
            Range {
                endoff: high - XEN_DIRECTMAP,
                meth: MethodSlot::Direct as usize,
            },
        );
    } else if is_directmap(&pgt, XEN_DIRECTMAP_BIGMEM, reader) {
        // Xen 4.6+ with BIGMEM absent is assumed elsewhere (open
        // question in DESIGN.md); here BIGMEM presence is confirmed by
        // the probe itself, so no heuristic is needed.
        let high = step::highest_linear(
            &pgt,
            XEN_DIRECTMAP_BIGMEM,
            XEN_DIRECTMAP_BIGMEM + XEN_DIRECTMAP_SIZE_3_5T - 1,
            -(XEN_DIRECTMAP_BIGMEM as i64),
            reader,
        );
        sys.set_method(
            MethodSlot::Direct,
            Method::Linear {
                target: AddressSpace::MachinePhys,
                off: -(XEN_DIRECTMAP_BIGMEM as i64),
            },
        );
        sys.map_mut(MapSlot::Hw).set(
            XEN_DIRECTMAP_BIGMEM,
            Range {
                endoff: high - XEN_DIRECTMAP_BIGMEM,
                meth: MethodSlot::Direct as usize,
            },
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::declare_well_known;
    use crate::callback::test_support::FakeCtx;
    use crate::callback::ReadCaps;

    fn build_four_level_tables(ctx: &mut FakeCtx, root: u64, text_phys_base: u64) {
        // Identity-style direct map: every level points straight
        // through so that virt == phys for a directmap probe at base 0
        // walked from `root`.
        ctx.put_u64(root, 0x2000 | PRESENT);
        ctx.put_u64(0x2000, 0x3000 | PRESENT);
        ctx.put_u64(0x3000, 0x4000 | PRESENT);
        ctx.put_u64(0x4000, text_phys_base | PRESENT);
    }

    #[test]
    fn detect_virt_bits_prefers_cr4_la57() {
        let mut dict = crate::attr::AttrDict::new();
        declare_well_known(&mut dict);
        let mut ctx = FakeCtx::new(ReadCaps::KPHYSADDR);
        ctx.registers.insert("cr4".into(), 1 << CR4_BIT_LA57);
        assert_eq!(detect_virt_bits(&dict, &ctx).unwrap(), VIRTADDR_5L_BITS_MAX);
    }

    #[test]
    fn detect_virt_bits_falls_back_to_version_hint() {
        let mut dict = crate::attr::AttrDict::new();
        declare_well_known(&mut dict);
        dict.set("linux.version_code", AttrValue::Number(version_code(4, 9, 0)))
            .unwrap();
        let ctx = FakeCtx::new(ReadCaps::KPHYSADDR);
        assert_eq!(detect_virt_bits(&dict, &ctx).unwrap(), VIRTADDR_BITS_MAX);
    }

    #[test]
    fn root_pgt_falls_back_to_cr3_and_flags_kpti() {
        let dict = crate::attr::AttrDict::new();
        let mut ctx = FakeCtx::new(ReadCaps::KPHYSADDR);
        ctx.registers.insert("cr3".into(), 0x5000 | PTI_USER_PGTABLE_MASK);
        let (root, kpti) = detect_root_pgt(&dict, &ctx).unwrap();
        assert_eq!(root, 0x5000 | PTI_USER_PGTABLE_MASK);
        assert!(kpti);
    }

    #[test]
    fn linux_setup_configures_pgt_and_hw_map() {
        let mut dict = crate::attr::AttrDict::new();
        declare_well_known(&mut dict);
        let mut sys = TranslationSystem::empty();
        let mut ctx = FakeCtx::new(ReadCaps::KVADDR);
        ctx.registers.insert("cr4".into(), 0);
        ctx.registers.insert("cr3".into(), 0x1000);
        build_four_level_tables(&mut ctx, 0x1000, 0);

        setup_linux(&mut dict, &mut sys, &ctx, &ctx).unwrap();

        assert!(!sys.method(MethodSlot::Pgt).is_none());
        assert_eq!(dict.get_string("addrxlat.ostype").unwrap(), "linux");
    }
}
