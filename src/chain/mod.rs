// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

pub mod backend;
pub mod chain;
pub mod chain_config;
pub mod index;
pub mod ledger;
pub mod redemption;

pub use backend::*;
pub use chain::*;
pub use chain_config::*;
pub use index::*;
pub use ledger::*;
pub use redemption::*;
