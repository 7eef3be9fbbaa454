// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use clap::ValueEnum;

/// What dropping a [`ThreadWrapper`](crate::ThreadWrapper) does with its worker.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Default)]
#[clap(rename_all = "kebab-case")]
pub enum ShutdownMode {
    #[default]
    /// Enqueue the shutdown marker and return right away; the worker exits
    /// once it reaches the marker.
    Detach,
    /// Enqueue the shutdown marker and wait for the worker to exit. Jobs that
    /// are already running finish first.
    Join,
}

#[derive(Debug, Clone)]
pub struct WrapperConfig {
    pub worker_name: String,
    pub shutdown: ShutdownMode,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            worker_name: "gda-worker".to_string(),
            shutdown: ShutdownMode::default(),
        }
    }
}

/// Builder for [`ThreadWrapper`](crate::ThreadWrapper).
#[derive(Debug, Default)]
pub struct WrapperBuilder {
    config: WrapperConfig,
}

impl WrapperBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name given to the worker thread.
    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.config.worker_name = name.into();
        self
    }

    pub fn shutdown(mut self, mode: ShutdownMode) -> Self {
        self.config.shutdown = mode;
        self
    }

    pub fn build(self) -> crate::Result<crate::ThreadWrapper> {
        crate::ThreadWrapper::with_config(self.config)
    }
}
