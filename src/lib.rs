// SPDX-License-Identifier: Apache-2.0

//! Address translation core for Linux and Xen kernel crash dumps: an
//! attribute dictionary, a generic translation engine, an x86_64 paging
//! module, and an ELF notes parser, grounded on `original_source/`
//! (libkdumpfile's `attr.c`, `addrxlat/*.c`, `kdumpfile/notes.c`).

use std::sync::{Arc, RwLock};

pub mod address;
pub mod arch;
pub mod attr;
pub mod callback;
pub mod error;
pub mod notes;
pub mod xlat;

/// A reference-counted, read/write-locked handle to shared, post-setup
/// state (dictionaries, translation systems) — spec §5 "Shared
/// resources... reference-counted".
pub type Shared<T> = Arc<RwLock<T>>;

pub use address::{AddressSpace, FullAddress};
pub use attr::{declare_well_known, AttrDict, AttrId, AttrValue};
pub use callback::{PageReader, ReadCaps, SymbolResolver};
pub use error::{Error, Result};
pub use notes::{process_notes, ByteOrder, CpuStateDecoder, NullCpuStateDecoder};
pub use xlat::map::{Map, Range};
pub use xlat::method::{Method, PagingForm, PteFormat};
pub use xlat::step::{launch, walk};
pub use xlat::system::{fulladdr_conv, MapSlot, MethodSlot, TranslationSystem};
