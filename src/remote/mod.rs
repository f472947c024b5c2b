// SPDX-License-Identifier: MPL-2.0

//! Remote collaborators: the homeserver (store of record) and Nexus (index).
//!
//! Both are opaque to the sync engine. It only needs action/url/payload
//! semantics from the homeserver and structured records from Nexus.

mod nexus;
mod types;

pub use nexus::HttpNexus;
pub use types::{
    NexusLink, NexusNotification, NexusPost, NexusPostCounts, NexusPostDetails,
    NexusRelationship, NexusTag, NexusUser, NexusUserCounts, NexusUserDetails, StreamPage,
    StreamQuery,
};

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("not authenticated")]
    NotAuthenticated,
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::InvalidResponse(e.to_string())
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

/// Write verb understood by the homeserver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeserverAction {
    Put,
    Delete,
}

impl fmt::Display for HomeserverAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HomeserverAction::Put => f.write_str("PUT"),
            HomeserverAction::Delete => f.write_str("DELETE"),
        }
    }
}

/// Store of record for user-owned data.
#[async_trait]
pub trait Homeserver: Send + Sync {
    /// Write (`Put`) or remove (`Delete`) the resource at `url`.
    async fn request(
        &self,
        action: HomeserverAction,
        url: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<(), ClientError>;

    /// List resource URIs under `base_uri`, starting after `cursor`.
    async fn list(
        &self,
        base_uri: &str,
        cursor: Option<&str>,
        reverse: bool,
        limit: usize,
    ) -> Result<Vec<String>, ClientError>;

    async fn get(&self, uri: &str) -> Result<Vec<u8>, ClientError>;
}

/// Index service supplying denormalized entity snapshots.
#[async_trait]
pub trait Nexus: Send + Sync {
    async fn users_by_ids(
        &self,
        user_ids: &[String],
        viewer_id: Option<&str>,
    ) -> Result<Vec<NexusUser>, ClientError>;

    /// `post_ids` are composite `owner:local_id` keys.
    async fn posts_by_ids(
        &self,
        post_ids: &[String],
        viewer_id: Option<&str>,
    ) -> Result<Vec<NexusPost>, ClientError>;

    /// Composite keys of the posts in a post stream page.
    async fn stream_post_keys(&self, query: &StreamQuery) -> Result<StreamPage, ClientError>;

    /// User ids in a user stream page.
    async fn stream_user_ids(&self, query: &StreamQuery) -> Result<Vec<String>, ClientError>;

    /// Tag labels starting with `prefix`.
    async fn search_tags(&self, prefix: &str, limit: usize) -> Result<Vec<String>, ClientError>;

    /// Notifications for `user_id` newer than `since`.
    async fn notifications(
        &self,
        user_id: &str,
        since: Option<i64>,
    ) -> Result<Vec<NexusNotification>, ClientError>;
}
