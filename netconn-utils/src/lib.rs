//
// Copyright (c) The Netconn Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

use std::sync::{Arc, Mutex};

use pickledb::PickleDb;

pub mod network;
pub mod script;
pub mod task;

pub type Database = Arc<Mutex<PickleDb>>;
pub type DatabaseError = pickledb::error::Error;
