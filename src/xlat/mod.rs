// SPDX-License-Identifier: Apache-2.0

//! The translation engine (spec §4.B): methods, range maps, the walker,
//! and the translation system that ties them together.

pub mod map;
pub mod method;
pub mod step;
pub mod system;

pub use map::{Map, Range};
pub use method::{CustomFn, Method, PagingForm, PteFormat};
pub use step::{do_step, highest_linear, launch, lowest_mapped, lowest_unmapped, walk, Step};
pub use system::{fulladdr_conv, MapSlot, MethodSlot, TranslationSystem};
