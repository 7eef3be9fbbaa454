// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod connection;
pub mod dummy_object;
pub mod run_log;
