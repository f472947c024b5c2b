// SPDX-License-Identifier: MPL-2.0

mod blobs;
mod db;
mod live;
mod notifications;
mod posts;
mod record;
mod schema;
mod streams;
mod users;

pub use blobs::BlobLeases;
pub use db::{CacheDb, StoreTx, TableChange};
pub use live::LiveQuery;
pub use notifications::{MetaRow, NotificationCache, NotificationRow};
pub use posts::{POST_TABLES, PostCache, PostCounts, PostDetails, PostSnapshot, PostTags};
pub use record::{KeyShape, Record, Table};
pub use streams::{
    PostStream, StreamCache, StreamRecord, UserStream, local_slice, merge_append, merge_prepend,
};
pub use users::{
    RelationshipPatch, USER_TABLES, UserCache, UserCounts, UserDetails, UserRelationship, UserTags,
};

use crate::identity::IdentityError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found")]
    NotFound,
    #[error("database path error: {0}")]
    Path(String),
    #[error("invalid key: {0}")]
    InvalidIdentifier(#[from] IdentityError),
    #[error("bulk write to {table} failed: {source}")]
    BulkOperationFailed {
        table: Table,
        source: Box<CacheError>,
    },
    #[error("write of {id} to {table} failed: {source}")]
    CreateFailed {
        table: Table,
        id: String,
        source: Box<CacheError>,
    },
    #[error("table {0} was not declared by the transaction")]
    UndeclaredTable(Table),
}
