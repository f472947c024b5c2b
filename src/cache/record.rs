// SPDX-License-Identifier: MPL-2.0

use crate::cache::CacheError;
use crate::identity::{self, CompositeId, IdentityError, StreamId};
use rusqlite::types::{Type, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;

/// One table per (entity type x concern).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    UserDetails,
    UserCounts,
    UserRelationships,
    UserTags,
    PostDetails,
    PostCounts,
    PostTags,
    PostStreams,
    UserStreams,
    Notifications,
    SyncMeta,
}

impl Table {
    pub const ALL: [Table; 11] = [
        Table::UserDetails,
        Table::UserCounts,
        Table::UserRelationships,
        Table::UserTags,
        Table::PostDetails,
        Table::PostCounts,
        Table::PostTags,
        Table::PostStreams,
        Table::UserStreams,
        Table::Notifications,
        Table::SyncMeta,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::UserDetails => "user_details",
            Table::UserCounts => "user_counts",
            Table::UserRelationships => "user_relationships",
            Table::UserTags => "user_tags",
            Table::PostDetails => "post_details",
            Table::PostCounts => "post_counts",
            Table::PostTags => "post_tags",
            Table::PostStreams => "post_streams",
            Table::UserStreams => "user_streams",
            Table::Notifications => "notifications",
            Table::SyncMeta => "sync_meta",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape a row key must have before it may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    /// A bare user id
    User,
    /// `owner:local_id`
    Composite,
    /// A structured stream key
    Stream,
    /// Free-form, non-empty
    Opaque,
}

impl KeyShape {
    pub fn validate(self, id: &str) -> Result<(), IdentityError> {
        match self {
            KeyShape::User => identity::validate_user_id(id),
            KeyShape::Composite => CompositeId::parse(id).map(|_| ()),
            KeyShape::Stream => StreamId::parse(id).map(|_| ()),
            KeyShape::Opaque if id.is_empty() => Err(IdentityError::Composite(String::new())),
            KeyShape::Opaque => Ok(()),
        }
    }
}

/// A row type stored in exactly one table.
///
/// Every table has an `id TEXT PRIMARY KEY` column followed by
/// [`Record::COLUMNS`] and a trailing `fetched_at` maintained by the store.
pub trait Record: Sized {
    const TABLE: Table;
    const KEY: KeyShape;
    /// Payload columns in the order used by `values` and `from_row` (after `id`).
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> &str;

    fn values(&self) -> Result<Vec<Value>, CacheError>;

    /// Build from a row selected as `id, COLUMNS...`.
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}

pub(crate) fn upsert_sql<R: Record>() -> String {
    let table = R::TABLE.name();
    let columns = R::COLUMNS.join(", ");
    let placeholders: Vec<String> = (1..=R::COLUMNS.len() + 2).map(|i| format!("?{i}")).collect();
    let updates: Vec<String> = R::COLUMNS
        .iter()
        .chain(std::iter::once(&"fetched_at"))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    format!(
        "INSERT INTO {table} (id, {columns}, fetched_at) VALUES ({}) \
         ON CONFLICT(id) DO UPDATE SET {}",
        placeholders.join(", "),
        updates.join(", ")
    )
}

pub(crate) fn select_sql<R: Record>() -> String {
    format!(
        "SELECT id, {} FROM {}",
        R::COLUMNS.join(", "),
        R::TABLE.name()
    )
}

pub(crate) fn json<T: Serialize + ?Sized>(value: &T) -> Result<Value, CacheError> {
    Ok(Value::Text(serde_json::to_string(value)?))
}

pub(crate) fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

pub(crate) fn opt_text(value: Option<&String>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.clone()))
}

pub(crate) fn int(value: impl Into<i64>) -> Value {
    Value::Integer(value.into())
}

pub(crate) fn flag(value: bool) -> Value {
    Value::Integer(value as i64)
}

/// Read a JSON text column.
pub(crate) fn json_column<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
