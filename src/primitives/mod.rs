// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

mod block;
mod common;
mod hash;
mod ticket;
mod transaction;

pub use crate::primitives::block::*;
pub use crate::primitives::common::*;
pub use crate::primitives::hash::*;
pub use crate::primitives::ticket::*;
pub use crate::primitives::transaction::*;
