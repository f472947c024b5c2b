// SPDX-License-Identifier: MPL-2.0

//! Composite keys shared by every cache table.
//!
//! Posts are addressed as `owner:local_id`, relationships as `actor:target`
//! and streams by a structured key such as `following:timeline:all` or
//! `replies:owner:local_id`. Keys are plain values: parsing is the only way
//! to derive an owner from a reference, and nothing mutates a key in place.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scheme and path prefix of homeserver resources.
const URI_SCHEME: &str = "pubky://";
const APP_PATH: &str = "pub/pubky.app";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid composite id: {0}")]
    Composite(String),
    #[error("invalid resource uri: {0}")]
    Uri(String),
    #[error("invalid stream id: {0}")]
    Stream(String),
}

/// A part of a composite key must be non-empty and free of separators.
fn valid_part(part: &str) -> bool {
    !part.is_empty() && !part.contains(':') && !part.chars().any(char::is_whitespace)
}

/// `owner:local_id` address of a post (or any owner-scoped record).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeId {
    owner: String,
    local_id: String,
}

impl CompositeId {
    pub fn build(owner: &str, local_id: &str) -> Result<Self, IdentityError> {
        if !valid_part(owner) || !valid_part(local_id) {
            return Err(IdentityError::Composite(format!("{owner}:{local_id}")));
        }
        Ok(Self {
            owner: owner.to_string(),
            local_id: local_id.to_string(),
        })
    }

    pub fn parse(key: &str) -> Result<Self, IdentityError> {
        let (owner, local_id) = key
            .split_once(':')
            .ok_or_else(|| IdentityError::Composite(key.to_string()))?;
        Self::build(owner, local_id).map_err(|_| IdentityError::Composite(key.to_string()))
    }

    /// Extract the pair from `pubky://{owner}/pub/pubky.app/{collection}/{local_id}`.
    pub fn from_uri(uri: &str) -> Result<Self, IdentityError> {
        let invalid = || IdentityError::Uri(uri.to_string());
        let rest = uri.strip_prefix(URI_SCHEME).ok_or_else(invalid)?;
        let (owner, path) = rest.split_once('/').ok_or_else(invalid)?;
        let path = path.strip_prefix(APP_PATH).ok_or_else(invalid)?;

        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let [collection, local_id] = segments.as_slice() else {
            return Err(invalid());
        };
        if collection.is_empty() {
            return Err(invalid());
        }
        Self::build(owner, local_id).map_err(|_| invalid())
    }

    /// Homeserver URI of this record inside `collection` (e.g. `posts`).
    pub fn to_uri(&self, collection: &str) -> String {
        format!(
            "{URI_SCHEME}{}/{APP_PATH}/{collection}/{}",
            self.owner, self.local_id
        )
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.local_id)
    }
}

impl FromStr for CompositeId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Owner of a post reference given either as a composite key or a homeserver URI.
pub fn owner_of(reference: &str) -> Result<String, IdentityError> {
    let id = if reference.starts_with(URI_SCHEME) {
        CompositeId::from_uri(reference)?
    } else {
        CompositeId::parse(reference)?
    };
    Ok(id.owner)
}

/// `actor:target` key of a relationship row. Same shape rules as [`CompositeId`].
pub fn relationship_id(actor: &str, target: &str) -> Result<String, IdentityError> {
    CompositeId::build(actor, target).map(|id| id.to_string())
}

/// Validate a plain user id (single key part).
pub fn validate_user_id(user_id: &str) -> Result<(), IdentityError> {
    if valid_part(user_id) {
        Ok(())
    } else {
        Err(IdentityError::Composite(user_id.to_string()))
    }
}

macro_rules! key_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            fn from_key(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

key_enum!(
    /// Whose posts a timeline shows.
    Reach {
        All => "all",
        Following => "following",
        Followers => "followers",
        Friends => "friends",
        Me => "me",
    }
);

key_enum!(
    /// Ordering of a timeline.
    Sort {
        Timeline => "timeline",
        Engagement => "engagement",
    }
);

key_enum!(
    /// Content filter of a timeline.
    Content {
        All => "all",
        Short => "short",
        Long => "long",
        Image => "image",
        Video => "video",
        Link => "link",
        File => "file",
    }
);

/// Which list of users a user stream holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserList {
    Followers,
    Following,
    Friends,
    Muted,
}

impl UserList {
    pub fn as_str(self) -> &'static str {
        match self {
            UserList::Followers => "followers",
            UserList::Following => "following",
            UserList::Friends => "friends",
            UserList::Muted => "muted",
        }
    }

    fn from_key(s: &str) -> Option<Self> {
        match s {
            "followers" => Some(UserList::Followers),
            "following" => Some(UserList::Following),
            "friends" => Some(UserList::Friends),
            "muted" => Some(UserList::Muted),
            _ => None,
        }
    }
}

/// Structured key of a post or user stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamId {
    /// `{reach}:{sort}:{content}`
    Timeline {
        reach: Reach,
        sort: Sort,
        content: Content,
    },
    /// `replies:{owner}:{local_id}`
    Replies(CompositeId),
    /// `author:{user_id}`
    Author(String),
    /// `{list}:{user_id}`
    Users { list: UserList, user_id: String },
}

impl StreamId {
    pub fn timeline(reach: Reach, sort: Sort, content: Content) -> Self {
        StreamId::Timeline {
            reach,
            sort,
            content,
        }
    }

    pub fn replies(post: CompositeId) -> Self {
        StreamId::Replies(post)
    }

    pub fn author(user_id: &str) -> Result<Self, IdentityError> {
        validate_user_id(user_id).map_err(|_| IdentityError::Stream(user_id.to_string()))?;
        Ok(StreamId::Author(user_id.to_string()))
    }

    pub fn users(list: UserList, user_id: &str) -> Result<Self, IdentityError> {
        validate_user_id(user_id).map_err(|_| IdentityError::Stream(user_id.to_string()))?;
        Ok(StreamId::Users {
            list,
            user_id: user_id.to_string(),
        })
    }

    pub fn parse(key: &str) -> Result<Self, IdentityError> {
        let invalid = || IdentityError::Stream(key.to_string());
        let parts: Vec<&str> = key.split(':').collect();

        match parts.as_slice() {
            ["replies", owner, local_id] => CompositeId::build(owner, local_id)
                .map(StreamId::Replies)
                .map_err(|_| invalid()),
            ["author", user_id] => StreamId::author(user_id).map_err(|_| invalid()),
            [list, user_id] if UserList::from_key(list).is_some() => {
                let list = UserList::from_key(list).ok_or_else(invalid)?;
                StreamId::users(list, user_id).map_err(|_| invalid())
            }
            [reach, sort, content] => Ok(StreamId::Timeline {
                reach: Reach::from_key(reach).ok_or_else(invalid)?,
                sort: Sort::from_key(sort).ok_or_else(invalid)?,
                content: Content::from_key(content).ok_or_else(invalid)?,
            }),
            _ => Err(invalid()),
        }
    }

    /// Engagement-ordered streams reshuffle continuously and are never
    /// extended from their head.
    pub fn is_engagement_sorted(&self) -> bool {
        matches!(
            self,
            StreamId::Timeline {
                sort: Sort::Engagement,
                ..
            }
        )
    }

    /// True for streams whose members are users rather than posts.
    pub fn is_user_stream(&self) -> bool {
        matches!(self, StreamId::Users { .. })
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Timeline {
                reach,
                sort,
                content,
            } => write!(
                f,
                "{}:{}:{}",
                reach.as_str(),
                sort.as_str(),
                content.as_str()
            ),
            StreamId::Replies(post) => write!(f, "replies:{post}"),
            StreamId::Author(user_id) => write!(f, "author:{user_id}"),
            StreamId::Users { list, user_id } => write!(f, "{}:{user_id}", list.as_str()),
        }
    }
}

impl FromStr for StreamId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
