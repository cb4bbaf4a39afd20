// SPDX-License-Identifier: Apache-2.0

//! External collaborators: the page reader and the symbol/register/number
//! resolver (spec §6 "External interfaces"). The engine never touches
//! storage or a symbol table directly; it calls back into these traits.

use bitflags::bitflags;

use crate::address::FullAddress;
use crate::error::Result;

bitflags! {
    /// Which address spaces a reader can service directly (`read_caps`).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ReadCaps: u32 {
        const KPHYSADDR = 1 << 0;
        const MACHPHYSADDR = 1 << 1;
        const KVADDR = 1 << 2;
    }
}

/// Raw byte access to dump contents, keyed by full address.
///
/// Implemented by a dump-format decoder (ELF core, makedumpfile, LKCD,
/// `/dev/mem`); this crate only ever calls through the trait.
pub trait PageReader {
    /// Address spaces this reader can service without further translation.
    fn read_caps(&self) -> ReadCaps;

    /// Read a little/big-endian (per the reader's own convention) 4-byte
    /// value at `addr`.
    fn read_u32(&self, addr: FullAddress) -> Result<u32>;

    /// Read an 8-byte value at `addr`.
    fn read_u64(&self, addr: FullAddress) -> Result<u64>;

    /// Read `buf.len()` raw bytes starting at `addr`.
    fn read_bytes(&self, addr: FullAddress, buf: &mut [u8]) -> Result<()>;
}

/// Resolution of kernel symbols, CPU registers, and numeric constants.
///
/// Implemented by whatever owns symbol-table information for the dump
/// (usually derived from the guest's own debug info); this crate never
/// interprets symbol tables itself.
pub trait SymbolResolver {
    /// Resolve a kernel symbol's value, e.g. `_stext`, `init_top_pgt`.
    fn get_symval(&self, name: &str) -> Result<u64>;

    /// Resolve a CPU register's value, e.g. `cr3`, `cr4`.
    fn get_reg(&self, name: &str) -> Result<u64>;

    /// Resolve a numeric constant discovered out-of-band, e.g. `sme_mask`,
    /// `pgtable_l5_enabled`.
    fn get_number(&self, name: &str) -> Result<u64>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;

    /// A reader/resolver backed by a flat `HashMap`, for unit tests.
    #[derive(Default)]
    pub struct FakeCtx {
        pub caps: ReadCaps,
        pub pages: HashMap<u64, Vec<u8>>,
        pub symbols: HashMap<String, u64>,
        pub registers: HashMap<String, u64>,
        pub numbers: HashMap<String, u64>,
    }

    impl FakeCtx {
        pub fn new(caps: ReadCaps) -> Self {
            FakeCtx {
                caps,
                ..Default::default()
            }
        }

        /// Install an 8-byte little-endian PTE at a byte address.
        pub fn put_u64(&mut self, addr: u64, val: u64) {
            self.pages.insert(addr, val.to_le_bytes().to_vec());
        }
    }

    impl PageReader for FakeCtx {
        fn read_caps(&self) -> ReadCaps {
            self.caps
        }

        fn read_u32(&self, addr: FullAddress) -> Result<u32> {
            let mut buf = [0u8; 4];
            self.read_bytes(addr, &mut buf)?;
            Ok(u32::from_le_bytes(buf))
        }

        fn read_u64(&self, addr: FullAddress) -> Result<u64> {
            let mut buf = [0u8; 8];
            self.read_bytes(addr, &mut buf)?;
            Ok(u64::from_le_bytes(buf))
        }

        fn read_bytes(&self, addr: FullAddress, buf: &mut [u8]) -> Result<()> {
            let bytes = self
                .pages
                .get(&addr.addr)
                .ok_or_else(|| crate::error::Error::not_present(format!("{addr}")))?;
            if bytes.len() < buf.len() {
                return Err(crate::error::Error::corrupt("short read"));
            }
            buf.copy_from_slice(&bytes[..buf.len()]);
            Ok(())
        }
    }

    impl SymbolResolver for FakeCtx {
        fn get_symval(&self, name: &str) -> Result<u64> {
            self.symbols
                .get(name)
                .copied()
                .ok_or_else(|| crate::error::Error::no_data(name))
        }

        fn get_reg(&self, name: &str) -> Result<u64> {
            self.registers
                .get(name)
                .copied()
                .ok_or_else(|| crate::error::Error::no_data(name))
        }

        fn get_number(&self, name: &str) -> Result<u64> {
            self.numbers
                .get(name)
                .copied()
                .ok_or_else(|| crate::error::Error::no_data(name))
        }
    }
}
