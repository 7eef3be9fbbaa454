// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! # Object model for relayed signals
//!
//! The wrapper does not care what an object is, only that it can name its
//! signals and accept handlers for them. [`SignalSource`] is that seam;
//! [`Emitter`] is a ready-made implementation that objects living on the
//! worker thread can embed.
//!
//! Handlers are invoked synchronously, on whatever thread calls
//! [`Emitter::emit`]. Deciding whether that emission is worth relaying to
//! another thread is the job of the wrapper, not of the object.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueType};

pub mod emitter;

pub use emitter::Emitter;

/// Identifies a signal within one [`SignalSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalId(pub u32);

/// Identifies a handler installed directly on a [`SignalSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandlerId(pub u64);

/// Metadata of a signal, as known when a relay is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalQuery {
    pub id: SignalId,
    pub name: String,
    pub param_types: Vec<ValueType>,
    /// `None` for signals returning nothing. Only those can be relayed.
    pub return_type: Option<ValueType>,
}

/// A handler as seen by the object: it gets the emitted arguments, borrowed
/// for the duration of the emission.
pub type SignalHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

pub trait SignalSource: Send + Sync {
    /// Free-form description, used for logging.
    fn desc(&self) -> &str;

    /// Resolves a signal by name. The name may carry a `::detail` suffix.
    fn lookup_signal(&self, name: &str) -> Option<SignalQuery>;

    fn connect_handler(&self, signal: SignalId, handler: SignalHandler) -> NativeHandlerId;

    /// Returns `false` if the handler was not connected.
    fn disconnect_handler(&self, handler: NativeHandlerId) -> bool;
}

impl std::fmt::Debug for dyn SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSource")
            .field("desc", &self.desc())
            .finish()
    }
}

/// Strips the `::detail` part of a `signal-name::detail` string.
pub fn base_signal_name(name: &str) -> &str {
    match name.split_once("::") {
        Some((base, _detail)) => base,
        None => name,
    }
}
