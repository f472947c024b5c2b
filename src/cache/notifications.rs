// SPDX-License-Identifier: MPL-2.0

use crate::cache::record::{KeyShape, Record, Table, int, json, json_column, opt_text, text};
use crate::cache::{CacheDb, CacheError};
use crate::remote::NexusNotification;
use rusqlite::types::Value;
use std::collections::HashMap;

/// A notification persisted verbatim, keyed `user_id:timestamp-index`
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub kind: Option<String>,
    pub timestamp: i64,
    pub body: serde_json::Value,
}

impl Record for NotificationRow {
    const TABLE: Table = Table::Notifications;
    const KEY: KeyShape = KeyShape::Composite;
    const COLUMNS: &'static [&'static str] = &["user_id", "kind", "timestamp", "body"];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<Value>, CacheError> {
        Ok(vec![
            text(&self.user_id),
            opt_text(self.kind.as_ref()),
            int(self.timestamp),
            json(&self.body)?,
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: row.get(2)?,
            timestamp: row.get(3)?,
            body: json_column(row, 4)?,
        })
    }
}

/// Small key/value row for watermarks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRow {
    pub id: String,
    pub value: String,
}

impl Record for MetaRow {
    const TABLE: Table = Table::SyncMeta;
    const KEY: KeyShape = KeyShape::Opaque;
    const COLUMNS: &'static [&'static str] = &["value"];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<Value>, CacheError> {
        Ok(vec![text(&self.value)])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            value: row.get(1)?,
        })
    }
}

fn last_read_key(user_id: &str) -> String {
    format!("last_read/{user_id}")
}

/// Cache operations for notifications
pub struct NotificationCache<'a> {
    db: &'a CacheDb,
}

impl<'a> NotificationCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Store notifications for `user_id` as Nexus returned them.
    pub fn persist(
        &self,
        user_id: &str,
        notifications: &[NexusNotification],
    ) -> Result<(), CacheError> {
        // Several notifications can share a timestamp; number them within it
        let mut seen: HashMap<i64, usize> = HashMap::new();
        let rows: Vec<NotificationRow> = notifications
            .iter()
            .map(|n| {
                let nth = seen.entry(n.timestamp).or_insert(0);
                *nth += 1;
                NotificationRow {
                    id: format!("{user_id}:{}-{}", n.timestamp, *nth - 1),
                    user_id: user_id.to_string(),
                    kind: n.kind().map(String::from),
                    timestamp: n.timestamp,
                    body: n.body.clone(),
                }
            })
            .collect();
        self.db.bulk_upsert(&rows)
    }

    /// Newest first.
    pub fn list(&self, user_id: &str, limit: usize) -> Result<Vec<NotificationRow>, CacheError> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, kind, timestamp, body
            FROM notifications
            WHERE user_id = ?1
            ORDER BY timestamp DESC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id, limit as i64], |row| {
            NotificationRow::from_row(row)
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Timestamp up to which the user has read notifications.
    pub fn last_read(&self, user_id: &str) -> Result<Option<i64>, CacheError> {
        Ok(self
            .db
            .find_by_id::<MetaRow>(&last_read_key(user_id))?
            .and_then(|row| row.value.parse().ok()))
    }

    /// Advance the watermark; never moves it backwards.
    pub fn set_last_read(&self, user_id: &str, timestamp: i64) -> Result<(), CacheError> {
        if self.last_read(user_id)?.is_some_and(|current| current >= timestamp) {
            return Ok(());
        }
        self.db.upsert(&MetaRow {
            id: last_read_key(user_id),
            value: timestamp.to_string(),
        })
    }

    pub fn unread_count(&self, user_id: &str) -> Result<usize, CacheError> {
        let since = self.last_read(user_id)?.unwrap_or(0);
        let conn = self.db.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND timestamp > ?2",
            rusqlite::params![user_id, since],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
