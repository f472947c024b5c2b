// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

/// Decoupled from the wire format so the cache owns its own shapes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NexusUser {
    pub details: NexusUserDetails,
    #[serde(default)]
    pub counts: NexusUserCounts,
    #[serde(default)]
    pub tags: Vec<NexusTag>,
    /// Viewer's relationship to this user, when the request carried a viewer
    #[serde(default)]
    pub relationship: Option<NexusRelationship>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NexusUserDetails {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub links: Vec<NexusLink>,
    #[serde(default)]
    pub status: Option<String>,
    pub indexed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NexusLink {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NexusUserCounts {
    pub posts: u32,
    pub replies: u32,
    pub tagged: u32,
    pub tags: u32,
    pub unique_tags: u32,
    pub followers: u32,
    pub following: u32,
    pub friends: u32,
    pub bookmarks: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NexusRelationship {
    pub following: bool,
    pub followed_by: bool,
    pub muted: bool,
}

/// Tag summary attached to a user or a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NexusTag {
    pub label: String,
    #[serde(default)]
    pub taggers: Vec<String>,
    pub taggers_count: u32,
    /// Whether the viewer is one of the taggers
    #[serde(default)]
    pub relationship: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NexusPost {
    pub details: NexusPostDetails,
    #[serde(default)]
    pub counts: NexusPostCounts,
    #[serde(default)]
    pub tags: Vec<NexusTag>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NexusPostDetails {
    /// Local id of the post inside its author's namespace
    pub id: String,
    pub author: String,
    pub content: String,
    #[serde(default)]
    pub kind: String,
    pub uri: String,
    pub indexed_at: i64,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NexusPostCounts {
    pub tags: u32,
    pub unique_tags: u32,
    pub replies: u32,
    pub reposts: u32,
}

/// A notification exactly as Nexus lists it; the body is kept opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NexusNotification {
    pub timestamp: i64,
    pub body: serde_json::Value,
}

impl NexusNotification {
    /// Notification kind (`follow`, `reply`, `mention`, ...), if the body names one.
    pub fn kind(&self) -> Option<&str> {
        self.body.get("type").and_then(|t| t.as_str())
    }
}

/// Stream query sent to Nexus. `start`/`end` are indexed_at bounds:
/// `start` asks for members newer than it, `end` for members older than it.
/// User streams carry no timestamps and page with `skip` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamQuery {
    pub stream_id: String,
    pub viewer_id: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub skip: Option<usize>,
    pub limit: usize,
}

/// Ordered member keys of one stream page, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamPage {
    pub keys: Vec<String>,
    #[serde(default)]
    pub last_indexed_at: Option<i64>,
}
