// SPDX-License-Identifier: MIT
// gda-thread-wrapper: run jobs on one dedicated worker thread
//
// - Objects that are not thread safe live on the worker thread only.
// - Any thread submits jobs and picks up their results from its own queue.
// - Signals the objects emit during a job are relayed back to the thread
//   that registered for them.
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod config;
pub mod error;
pub mod signal;
pub mod value;
pub mod wrapper;

pub use config::{ShutdownMode, WrapperBuilder, WrapperConfig};
pub use error::{Result, WrapperError};
pub use signal::{Emitter, SignalQuery, SignalSource};
pub use value::{Value, ValueType};
pub use wrapper::{
    ConnectFlags, HandlerId, JobId, JobKind, JobValue, Notification, NotificationKind, Runnable,
    SignalCallback, ThreadWrapper,
};
