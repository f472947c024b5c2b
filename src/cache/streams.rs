// SPDX-License-Identifier: MPL-2.0

use crate::cache::record::{KeyShape, Record, Table, json, json_column};
use crate::cache::{CacheDb, CacheError};
use rusqlite::types::Value;
use std::collections::HashSet;

/// Ordered post ids of one stream, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostStream {
    pub id: String,
    pub stream: Vec<String>,
}

/// Ordered user ids of one stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStream {
    pub id: String,
    pub stream: Vec<String>,
}

/// Common shape of the two stream tables.
pub trait StreamRecord: Record {
    fn with_members(id: &str, stream: Vec<String>) -> Self;
    fn members(&self) -> &[String];
}

macro_rules! stream_record {
    ($ty:ident, $table:expr) => {
        impl Record for $ty {
            const TABLE: Table = $table;
            const KEY: KeyShape = KeyShape::Stream;
            const COLUMNS: &'static [&'static str] = &["stream"];

            fn id(&self) -> &str {
                &self.id
            }

            fn values(&self) -> Result<Vec<Value>, CacheError> {
                Ok(vec![json(&self.stream)?])
            }

            fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
                Ok(Self {
                    id: row.get(0)?,
                    stream: json_column(row, 1)?,
                })
            }
        }

        impl StreamRecord for $ty {
            fn with_members(id: &str, stream: Vec<String>) -> Self {
                Self {
                    id: id.to_string(),
                    stream,
                }
            }

            fn members(&self) -> &[String] {
                &self.stream
            }
        }
    };
}

stream_record!(PostStream, Table::PostStreams);
stream_record!(UserStream, Table::UserStreams);

/// Put `incoming` in front of `existing`, skipping ids already present.
/// Returns the merged list and how many ids were new.
pub fn merge_prepend(existing: &[String], incoming: &[String]) -> (Vec<String>, usize) {
    let mut seen: HashSet<&str> = existing.iter().map(String::as_str).collect();
    let mut fresh = Vec::new();
    for id in incoming {
        if seen.insert(id.as_str()) {
            fresh.push(id.clone());
        }
    }
    let added = fresh.len();
    fresh.extend(existing.iter().cloned());
    (fresh, added)
}

/// Put `incoming` after `existing`, skipping ids already present.
pub fn merge_append(existing: &[String], incoming: &[String]) -> (Vec<String>, usize) {
    let mut seen: HashSet<&str> = existing.iter().map(String::as_str).collect();
    let mut merged = existing.to_vec();
    let mut added = 0;
    for id in incoming {
        if seen.insert(id.as_str()) {
            merged.push(id.clone());
            added += 1;
        }
    }
    (merged, added)
}

/// Up to `limit` members following `after` (or from the head when `None`).
/// `None` when `after` is not a member of the stream.
pub fn local_slice(stream: &[String], after: Option<&str>, limit: usize) -> Option<Vec<String>> {
    let start = match after {
        None => 0,
        Some(after) => stream.iter().position(|m| m == after)? + 1,
    };
    Some(stream.iter().skip(start).take(limit).cloned().collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeAt {
    Head,
    Tail,
}

/// Cache operations for stream membership
pub struct StreamCache<'a> {
    db: &'a CacheDb,
}

impl<'a> StreamCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Members of a stream, `None` when the stream was never stored.
    pub fn get<S: StreamRecord>(&self, stream_id: &str) -> Result<Option<Vec<String>>, CacheError> {
        Ok(self
            .db
            .find_by_id::<S>(stream_id)?
            .map(|s| s.members().to_vec()))
    }

    /// Prepend new members (fresh content). Returns how many were added.
    pub fn prepend<S: StreamRecord>(
        &self,
        stream_id: &str,
        ids: &[String],
    ) -> Result<usize, CacheError> {
        self.merge::<S>(stream_id, ids, MergeAt::Head)
    }

    /// Append members (older page). Returns how many were added.
    pub fn append<S: StreamRecord>(
        &self,
        stream_id: &str,
        ids: &[String],
    ) -> Result<usize, CacheError> {
        self.merge::<S>(stream_id, ids, MergeAt::Tail)
    }

    /// Re-read the current list inside the transaction so concurrent
    /// merges into the same stream never duplicate members.
    fn merge<S: StreamRecord>(
        &self,
        stream_id: &str,
        ids: &[String],
        at: MergeAt,
    ) -> Result<usize, CacheError> {
        self.db.transaction(&[S::TABLE], |tx| {
            let current = tx.find_by_id::<S>(stream_id)?;
            let existing = current.as_ref().map(|s| s.members()).unwrap_or(&[]);

            let (merged, added) = match at {
                MergeAt::Head => merge_prepend(existing, ids),
                MergeAt::Tail => merge_append(existing, ids),
            };

            // An unchanged, existing stream needs no write
            if added > 0 || current.is_none() {
                tx.upsert(&S::with_members(stream_id, merged))?;
            }
            Ok(added)
        })
    }

    /// Drop a stream entirely (e.g. a full refresh of an engagement feed).
    pub fn clear<S: StreamRecord>(&self, stream_id: &str) -> Result<bool, CacheError> {
        self.db.delete::<S>(stream_id)
    }
}
