// SPDX-License-Identifier: Apache-2.0
// Copyright (C) 2022 Akira Moroo

pub mod consts;
pub mod setup;
