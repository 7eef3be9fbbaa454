// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! A stand-in for a database connection whose handle must only ever be used
//! from the thread that opened it.

use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};

use anyhow::{bail, Result};
use gda_thread_wrapper::{Emitter, SignalQuery, SignalSource, Value, ValueType};
use gda_thread_wrapper::signal::{NativeHandlerId, SignalHandler, SignalId};
use log::debug;

#[derive(Debug, Default)]
struct Table {
    next_id: i64,
    rows: Vec<(i64, String)>,
}

/// Rows are plain names. Inserting emits `row-inserted (id, name)`, a
/// refused insert emits `error (message)`.
pub struct Connection {
    owner: Mutex<Option<ThreadId>>,
    table: Mutex<Table>,
    signals: Emitter,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// The connection binds to the first thread using it.
    pub fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            table: Mutex::new(Table {
                next_id: 1,
                rows: Vec::new(),
            }),
            signals: Emitter::new("connection")
                .with_signal("row-inserted", &[ValueType::Int, ValueType::String])
                .with_signal("error", &[ValueType::String]),
        }
    }

    fn check_thread(&self) -> Result<()> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        match *owner {
            Some(owner) if owner != me => {
                bail!("connection opened in {owner:?} used from {me:?}")
            }
            Some(_) => Ok(()),
            None => {
                debug!("Connection bound to {me:?}");
                *owner = Some(me);
                Ok(())
            }
        }
    }

    pub fn insert(&self, name: &str) -> Result<i64> {
        self.check_thread()?;
        if name.is_empty() {
            self.signals
                .emit("error", &[Value::from("empty names are not allowed")]);
            bail!("empty names are not allowed");
        }

        let id = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            let id = table.next_id;
            table.next_id += 1;
            table.rows.push((id, name.to_string()));
            id
        };
        self.signals
            .emit("row-inserted", &[Value::from(id), Value::from(name)]);
        Ok(id)
    }

    pub fn row_count(&self) -> Result<usize> {
        self.check_thread()?;
        Ok(self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rows
            .len())
    }

    pub fn select(&self, id: i64) -> Result<Option<String>> {
        self.check_thread()?;
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(table
            .rows
            .iter()
            .find(|(row_id, _)| *row_id == id)
            .map(|(_, name)| name.clone()))
    }
}

impl SignalSource for Connection {
    fn desc(&self) -> &str {
        self.signals.desc()
    }

    fn lookup_signal(&self, name: &str) -> Option<SignalQuery> {
        self.signals.lookup_signal(name)
    }

    fn connect_handler(&self, signal: SignalId, handler: SignalHandler) -> NativeHandlerId {
        self.signals.connect_handler(signal, handler)
    }

    fn disconnect_handler(&self, handler: NativeHandlerId) -> bool {
        self.signals.disconnect_handler(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_refuses_other_threads() {
        let cnc = Connection::new();
        assert_eq!(cnc.insert("alice").unwrap(), 1);

        thread::scope(|s| {
            s.spawn(|| {
                let err = cnc.insert("bob").unwrap_err();
                assert!(err.to_string().contains("used from"));
            });
        });

        assert_eq!(cnc.row_count().unwrap(), 1);
        assert_eq!(cnc.select(1).unwrap().as_deref(), Some("alice"));
    }
}
