// SPDX-License-Identifier: MPL-2.0

use crate::cache::record::{
    KeyShape, Record, Table, flag, int, json, json_column, opt_text, text,
};
use crate::cache::{CacheDb, CacheError};
use crate::identity;
use crate::remote::{NexusLink, NexusRelationship, NexusTag, NexusUser};
use rusqlite::types::Value;

/// Profile fields of a user; large, rarely changing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserDetails {
    pub id: String,
    pub name: String,
    pub bio: Option<String>,
    pub image: Option<String>,
    pub links: Vec<NexusLink>,
    pub status: Option<String>,
    pub indexed_at: i64,
}

impl Record for UserDetails {
    const TABLE: Table = Table::UserDetails;
    const KEY: KeyShape = KeyShape::User;
    const COLUMNS: &'static [&'static str] =
        &["name", "bio", "image", "links", "status", "indexed_at"];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<Value>, CacheError> {
        Ok(vec![
            text(&self.name),
            opt_text(self.bio.as_ref()),
            opt_text(self.image.as_ref()),
            json(&self.links)?,
            opt_text(self.status.as_ref()),
            int(self.indexed_at),
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            bio: row.get(2)?,
            image: row.get(3)?,
            links: json_column(row, 4)?,
            status: row.get(5)?,
            indexed_at: row.get(6)?,
        })
    }
}

/// Counters of a user; updated far more often than the details
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserCounts {
    pub id: String,
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

impl UserCounts {
    /// Zeroed counts, used when the row has not been fetched yet.
    pub fn empty(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }
}

impl Record for UserCounts {
    const TABLE: Table = Table::UserCounts;
    const KEY: KeyShape = KeyShape::User;
    const COLUMNS: &'static [&'static str] = &[
        "posts",
        "replies",
        "tagged",
        "tags",
        "unique_tags",
        "followers",
        "following",
        "friends",
        "bookmarks",
    ];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<Value>, CacheError> {
        Ok(vec![
            int(self.posts),
            int(self.replies),
            int(self.tagged),
            int(self.tags),
            int(self.unique_tags),
            int(self.followers),
            int(self.following),
            int(self.friends),
            int(self.bookmarks),
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            posts: row.get(1)?,
            replies: row.get(2)?,
            tagged: row.get(3)?,
            tags: row.get(4)?,
            unique_tags: row.get(5)?,
            followers: row.get(6)?,
            following: row.get(7)?,
            friends: row.get(8)?,
            bookmarks: row.get(9)?,
        })
    }
}

/// Relationship of an actor towards a target, keyed `actor:target`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRelationship {
    pub id: String,
    pub following: bool,
    pub followed_by: bool,
    pub muted: bool,
}

impl UserRelationship {
    /// Synthesized defaults for a pair that has no row yet.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    /// No flag set; equivalent to having no row.
    pub fn is_unset(&self) -> bool {
        !self.following && !self.followed_by && !self.muted
    }

    /// Apply a partial update; fields left as `None` keep their value.
    pub fn merged(&self, patch: RelationshipPatch) -> Self {
        Self {
            id: self.id.clone(),
            following: patch.following.unwrap_or(self.following),
            followed_by: patch.followed_by.unwrap_or(self.followed_by),
            muted: patch.muted.unwrap_or(self.muted),
        }
    }
}

/// Partial update of a relationship row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationshipPatch {
    pub following: Option<bool>,
    pub followed_by: Option<bool>,
    pub muted: Option<bool>,
}

impl Record for UserRelationship {
    const TABLE: Table = Table::UserRelationships;
    const KEY: KeyShape = KeyShape::Composite;
    const COLUMNS: &'static [&'static str] = &["following", "followed_by", "muted"];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<Value>, CacheError> {
        Ok(vec![
            flag(self.following),
            flag(self.followed_by),
            flag(self.muted),
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            following: row.get(1)?,
            followed_by: row.get(2)?,
            muted: row.get(3)?,
        })
    }
}

/// Tags other users put on a user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserTags {
    pub id: String,
    pub tags: Vec<NexusTag>,
}

impl Record for UserTags {
    const TABLE: Table = Table::UserTags;
    const KEY: KeyShape = KeyShape::User;
    const COLUMNS: &'static [&'static str] = &["tags"];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<Value>, CacheError> {
        Ok(vec![json(&self.tags)?])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tags: json_column(row, 1)?,
        })
    }
}

/// Tables written when a user snapshot is persisted
pub const USER_TABLES: [Table; 4] = [
    Table::UserDetails,
    Table::UserCounts,
    Table::UserTags,
    Table::UserRelationships,
];

/// Cache operations for users
pub struct UserCache<'a> {
    db: &'a CacheDb,
}

impl<'a> UserCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Store Nexus user snapshots, every concern in one transaction.
    /// Relationships are stored as `viewer:user` when a viewer is given.
    pub fn persist(&self, users: &[NexusUser], viewer: Option<&str>) -> Result<(), CacheError> {
        if users.is_empty() {
            return Ok(());
        }

        let mut details = Vec::with_capacity(users.len());
        let mut counts = Vec::with_capacity(users.len());
        let mut tags = Vec::with_capacity(users.len());
        let mut relationships = Vec::new();

        for user in users {
            let id = &user.details.id;
            details.push(UserDetails {
                id: id.clone(),
                name: user.details.name.clone(),
                bio: user.details.bio.clone(),
                image: user.details.image.clone(),
                links: user.details.links.clone(),
                status: user.details.status.clone(),
                indexed_at: user.details.indexed_at,
            });
            counts.push(counts_from(id, &user.counts));
            tags.push(UserTags {
                id: id.clone(),
                tags: user.tags.clone(),
            });

            if let (Some(viewer), Some(rel)) = (viewer, user.relationship) {
                relationships.push(relationship_from(&identity::relationship_id(viewer, id)?, rel));
            }
        }

        self.db.transaction(&USER_TABLES, |tx| {
            tx.bulk_upsert(&details)?;
            tx.bulk_upsert(&counts)?;
            tx.bulk_upsert(&tags)?;
            tx.bulk_upsert(&relationships)
        })
    }

    pub fn details(&self, user_id: &str) -> Result<Option<UserDetails>, CacheError> {
        self.db.find_by_id(user_id)
    }

    /// Counts for a user; zeroed when the row has not arrived yet.
    pub fn counts(&self, user_id: &str) -> Result<UserCounts, CacheError> {
        Ok(self
            .db
            .find_by_id(user_id)?
            .unwrap_or_else(|| UserCounts::empty(user_id)))
    }

    pub fn relationship(
        &self,
        actor: &str,
        target: &str,
    ) -> Result<Option<UserRelationship>, CacheError> {
        self.db.find_by_id(&identity::relationship_id(actor, target)?)
    }

    pub fn tags(&self, user_id: &str) -> Result<Vec<NexusTag>, CacheError> {
        Ok(self
            .db
            .find_by_id::<UserTags>(user_id)?
            .map(|t| t.tags)
            .unwrap_or_default())
    }
}

fn counts_from(id: &str, c: &crate::remote::NexusUserCounts) -> UserCounts {
    UserCounts {
        id: id.to_string(),
        posts: c.posts,
        replies: c.replies,
        tagged: c.tagged,
        tags: c.tags,
        unique_tags: c.unique_tags,
        followers: c.followers,
        following: c.following,
        friends: c.friends,
        bookmarks: c.bookmarks,
    }
}

fn relationship_from(id: &str, rel: NexusRelationship) -> UserRelationship {
    UserRelationship {
        id: id.to_string(),
        following: rel.following,
        followed_by: rel.followed_by,
        muted: rel.muted,
    }
}
