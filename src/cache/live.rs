// SPDX-License-Identifier: MPL-2.0

//! Change-driven reads over the cache.
//!
//! A [`LiveQuery`] names the tables its read touches and recomputes only
//! when a committed transaction changed one of them. This is the sanctioned
//! way for the UI side to observe cache state.

use crate::cache::{CacheDb, CacheError, Table, TableChange};
use tokio::sync::broadcast::error::RecvError;
use tracing::trace;

type ReadFn<T> = Box<dyn Fn(&CacheDb) -> Result<T, CacheError> + Send + Sync>;

pub struct LiveQuery<T> {
    db: CacheDb,
    tables: Vec<Table>,
    read: ReadFn<T>,
    changes: tokio::sync::broadcast::Receiver<TableChange>,
}

impl<T> LiveQuery<T> {
    /// Subscribes immediately, so no change after construction is missed.
    pub fn new<F>(db: &CacheDb, tables: &[Table], read: F) -> Self
    where
        F: Fn(&CacheDb) -> Result<T, CacheError> + Send + Sync + 'static,
    {
        Self {
            db: db.clone(),
            tables: tables.to_vec(),
            read: Box::new(read),
            changes: db.subscribe(),
        }
    }

    /// Evaluate the read now.
    pub fn current(&self) -> Result<T, CacheError> {
        (self.read)(&self.db)
    }

    /// Wait for a change to one of the watched tables and return a fresh
    /// snapshot. Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Result<T, CacheError>> {
        loop {
            match self.changes.recv().await {
                Ok(change) if self.tables.contains(&change.table) => {
                    return Some(self.current());
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    // Missed notifications may have touched our tables
                    trace!(skipped, "live query lagged, recomputing");
                    return Some(self.current());
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
