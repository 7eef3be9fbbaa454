// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggedJob {
    pub thread: usize,

    pub job_id: u64,

    pub row: String,

    pub inserted_id: Option<i64>,

    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct RunLog {
    pub threads: usize,

    pub calls: usize,

    pub rows_in_table: usize,

    pub signals_received: usize,

    pub failures: usize,

    pub jobs: Vec<LoggedJob>,
}
