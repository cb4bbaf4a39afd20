// SPDX-License-Identifier: Apache-2.0

//! The translation system: a fixed small array of named method and map
//! slots, built during setup and then shared read-only (spec §3
//! "Translation System", §9 "Shared immutable post-setup"). Grounded on
//! the `ADDRXLAT_SYS_METH_*`/map-slot layout `x86_64.c` programs via
//! `sys->meth[...]`/`sys->map[...]`.

use crate::address::{AddressSpace, FullAddress};
use crate::callback::PageReader;
use crate::error::{Error, Result};
use crate::xlat::map::Map;
use crate::xlat::method::Method;
use crate::xlat::step;

/// Named method slots (`sys.meth[M]`, spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodSlot {
    /// The live hardware page-table walk.
    Pgt,
    /// The Linux/Xen direct map as a single linear method.
    Direct,
    /// Reverse direct map: KPA/MPA back to KVA.
    RDirect,
    /// Kernel text: a linear method from the `_stext`/`_text` offset.
    Ktext,
    /// Xen p2m: KPA -> MPA.
    KphysMachphys,
    /// Xen m2p: MPA -> KPA.
    MachphysKphys,
}

impl MethodSlot {
    pub const COUNT: usize = 6;

    fn idx(self) -> usize {
        self as usize
    }
}

/// Named map slots (`sys.map[K]`, spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapSlot {
    /// KVA -> KPA, routing through `Pgt`/`Ktext`/`Direct`.
    Hw,
    /// KPA -> KVA, routing through `RDirect`.
    KphysDirect,
    /// KPA -> MPA, routing through `KphysMachphys`.
    KphysMachphys,
}

impl MapSlot {
    pub const COUNT: usize = 3;

    fn idx(self) -> usize {
        self as usize
    }
}

/// A fixed array of method and map slots, built during setup
/// (`arch::x86_64::setup`) and shared read-only via `Arc` once
/// published.
pub struct TranslationSystem {
    methods: [Method; MethodSlot::COUNT],
    maps: [Map; MapSlot::COUNT],
}

impl TranslationSystem {
    pub fn empty() -> Self {
        TranslationSystem {
            methods: [
                Method::None,
                Method::None,
                Method::None,
                Method::None,
                Method::None,
                Method::None,
            ],
            maps: [Map::new(), Map::new(), Map::new()],
        }
    }

    pub fn method(&self, slot: MethodSlot) -> &Method {
        &self.methods[slot.idx()]
    }

    pub fn set_method(&mut self, slot: MethodSlot, method: Method) {
        self.methods[slot.idx()] = method;
    }

    pub fn map(&self, slot: MapSlot) -> &Map {
        &self.maps[slot.idx()]
    }

    pub fn map_mut(&mut self, slot: MapSlot) -> &mut Map {
        &mut self.maps[slot.idx()]
    }

    /// Route `addr` through `map_slot`'s map, then walk the method it
    /// names to completion.
    fn via_map(&self, map_slot: MapSlot, addr: FullAddress, reader: &dyn PageReader) -> Result<FullAddress> {
        let meth_idx = self
            .map(map_slot)
            .search(addr.addr)
            .ok_or_else(|| Error::no_method(format!("no range covers {addr}")))?;
        if meth_idx >= self.methods.len() {
            return Err(Error::no_method("map references unknown method slot"));
        }
        step::walk(&self.methods[meth_idx], addr, reader)
    }

    fn via_method(&self, slot: MethodSlot, addr: FullAddress, reader: &dyn PageReader) -> Result<FullAddress> {
        let method = self.method(slot);
        if method.is_none() {
            return Err(Error::no_method(format!("{slot:?} is not configured")));
        }
        step::walk(method, addr, reader)
    }

    /// One hop towards `target`, chosen by `cur`'s space and the
    /// destination (spec §4.B "chaining... along the fixed graph
    /// `KVA -> KPA -> MPA` and its reverses").
    fn hop(&self, cur: FullAddress, target: AddressSpace, reader: &dyn PageReader) -> Result<FullAddress> {
        use AddressSpace::*;
        match (cur.space, target) {
            (KernelVirt, _) | (UserVirt, _) => self.via_map(MapSlot::Hw, cur, reader),
            (KernelPhys, MachinePhys) | (KernelPhys, MachineFrame) => {
                self.via_map(MapSlot::KphysMachphys, cur, reader)
            }
            (KernelPhys, KernelVirt) | (KernelPhys, UserVirt) => {
                self.via_map(MapSlot::KphysDirect, cur, reader)
            }
            (MachinePhys, _) | (MachineFrame, _) => self.via_method(MethodSlot::MachphysKphys, cur, reader),
            _ => Err(Error::no_method(format!(
                "no translation path from {} towards {target}",
                cur.space
            ))),
        }
    }
}

impl Default for TranslationSystem {
    fn default() -> Self {
        Self::empty()
    }
}

/// Convert `addr` to `target_space`, chaining at most four methods
/// along the fixed `KVA -> KPA -> MPA` graph and its reverses (spec
/// §4.B `fulladdr_conv`).
pub fn fulladdr_conv(
    addr: FullAddress,
    target: AddressSpace,
    sys: &TranslationSystem,
    reader: &dyn PageReader,
) -> Result<FullAddress> {
    const MAX_HOPS: usize = 4;
    let mut cur = addr;
    for _ in 0..MAX_HOPS {
        if cur.space == target {
            return Ok(cur);
        }
        cur = sys.hop(cur, target, reader)?;
    }
    if cur.space == target {
        Ok(cur)
    } else {
        Err(Error::no_method(format!(
            "translation from {} to {target} exceeds hop budget",
            addr.space
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::test_support::FakeCtx;
    use crate::callback::ReadCaps;
    use crate::xlat::map::Range;

    #[test]
    fn kva_to_kpa_via_linear_ktext_method() {
        let mut sys = TranslationSystem::empty();
        sys.set_method(
            MethodSlot::Ktext,
            Method::Linear {
                target: AddressSpace::KernelPhys,
                off: -(0xffffffff80000000i64),
            },
        );
        sys.map_mut(MapSlot::Hw).set(
            0xffffffff80000000,
            Range {
                endoff: 0xfffffff,
                meth: MethodSlot::Ktext as usize,
            },
        );

        let ctx = FakeCtx::new(ReadCaps::KVADDR);
        let out = fulladdr_conv(
            FullAddress::new(AddressSpace::KernelVirt, 0xffffffff80001000),
            AddressSpace::KernelPhys,
            &sys,
            &ctx,
        )
        .unwrap();
        assert_eq!(out.addr, 0x1000);
    }

    #[test]
    fn unconfigured_path_is_no_method() {
        let sys = TranslationSystem::empty();
        let ctx = FakeCtx::new(ReadCaps::KVADDR);
        let err = fulladdr_conv(
            FullAddress::new(AddressSpace::KernelVirt, 0x1000),
            AddressSpace::MachinePhys,
            &sys,
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoMethod(_)));
    }
}
