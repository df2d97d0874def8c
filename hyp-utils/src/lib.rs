// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Console output and the `log` backend shared by the hypervisor crates.
#![no_std]

#[cfg(test)]
extern crate std;

pub mod logger;
pub mod print;
