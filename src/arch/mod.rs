// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2022 Akira Moroo

//! Architecture-specific paging support. The library inspects x86_64
//! page tables found in a dump regardless of the host it runs on, so
//! this module is not gated on the build's own target architecture.

pub mod x86_64;
