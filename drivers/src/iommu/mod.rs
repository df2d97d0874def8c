// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

mod context;
mod core;
mod error;
mod registers;
mod registry;

pub use self::core::{DmaRemapper, VtdUnit};
pub use context::DmaContext;
pub use error::Error as IommuError;
pub use error::Result as IommuResult;
pub use registry::{IommuId, IommuRegistry};
