// SPDX-License-Identifier: MPL-2.0

use crate::cache::record::{KeyShape, Record, Table, int, json, json_column, text};
use crate::cache::streams::PostStream;
use crate::cache::{CacheDb, CacheError, StoreTx};
use crate::identity::CompositeId;
use crate::remote::{NexusPost, NexusTag};
use rusqlite::types::Value;

/// Body and metadata of a post, keyed `owner:local_id`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostDetails {
    pub id: String,
    pub author: String,
    pub content: String,
    pub kind: String,
    pub uri: String,
    pub indexed_at: i64,
    pub attachments: Vec<String>,
}

impl Record for PostDetails {
    const TABLE: Table = Table::PostDetails;
    const KEY: KeyShape = KeyShape::Composite;
    const COLUMNS: &'static [&'static str] =
        &["author", "content", "kind", "uri", "indexed_at", "attachments"];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<Value>, CacheError> {
        Ok(vec![
            text(&self.author),
            text(&self.content),
            text(&self.kind),
            text(&self.uri),
            int(self.indexed_at),
            json(&self.attachments)?,
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            author: row.get(1)?,
            content: row.get(2)?,
            kind: row.get(3)?,
            uri: row.get(4)?,
            indexed_at: row.get(5)?,
            attachments: json_column(row, 6)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostCounts {
    pub id: String,
    pub tags: u32,
    pub unique_tags: u32,
    pub replies: u32,
    pub reposts: u32,
}

impl Record for PostCounts {
    const TABLE: Table = Table::PostCounts;
    const KEY: KeyShape = KeyShape::Composite;
    const COLUMNS: &'static [&'static str] = &["tags", "unique_tags", "replies", "reposts"];

    fn id(&self) -> &str {
        &self.id
    }

    fn values(&self) -> Result<Vec<Value>, CacheError> {
        Ok(vec![
            int(self.tags),
            int(self.unique_tags),
            int(self.replies),
            int(self.reposts),
        ])
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tags: row.get(1)?,
            unique_tags: row.get(2)?,
            replies: row.get(3)?,
            reposts: row.get(4)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostTags {
    pub id: String,
    pub tags: Vec<NexusTag>,
}

impl Record for PostTags {
    const TABLE: Table = Table::PostTags;
    const KEY: KeyShape = KeyShape::Composite;
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

/// Tables holding one post, plus the streams that reference it
pub const POST_TABLES: [Table; 4] = [
    Table::PostDetails,
    Table::PostCounts,
    Table::PostTags,
    Table::PostStreams,
];

/// Everything removed from the store when a post is deleted locally.
#[derive(Debug, Clone, PartialEq)]
pub struct PostSnapshot {
    pub id: String,
    pub details: Option<PostDetails>,
    pub counts: Option<PostCounts>,
    pub tags: Option<PostTags>,
    /// (stream id, position) of every stream that listed the post
    pub memberships: Vec<(String, usize)>,
}

/// Cache operations for posts
pub struct PostCache<'a> {
    db: &'a CacheDb,
}

impl<'a> PostCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Store Nexus post snapshots, every concern in one transaction.
    /// Returns the composite ids in input order.
    pub fn persist(&self, posts: &[NexusPost]) -> Result<Vec<CompositeId>, CacheError> {
        let mut ids = Vec::with_capacity(posts.len());
        let mut details = Vec::with_capacity(posts.len());
        let mut counts = Vec::with_capacity(posts.len());
        let mut tags = Vec::with_capacity(posts.len());

        for post in posts {
            let id = CompositeId::build(&post.details.author, &post.details.id)?;
            let key = id.to_string();

            details.push(PostDetails {
                id: key.clone(),
                author: post.details.author.clone(),
                content: post.details.content.clone(),
                kind: post.details.kind.clone(),
                uri: post.details.uri.clone(),
                indexed_at: post.details.indexed_at,
                attachments: post.details.attachments.clone(),
            });
            counts.push(PostCounts {
                id: key.clone(),
                tags: post.counts.tags,
                unique_tags: post.counts.unique_tags,
                replies: post.counts.replies,
                reposts: post.counts.reposts,
            });
            tags.push(PostTags {
                id: key,
                tags: post.tags.clone(),
            });
            ids.push(id);
        }

        if ids.is_empty() {
            return Ok(ids);
        }

        self.db
            .transaction(&[Table::PostDetails, Table::PostCounts, Table::PostTags], |tx| {
                tx.bulk_upsert(&details)?;
                tx.bulk_upsert(&counts)?;
                tx.bulk_upsert(&tags)
            })?;
        Ok(ids)
    }

    pub fn details(&self, id: &CompositeId) -> Result<Option<PostDetails>, CacheError> {
        self.db.find_by_id(&id.to_string())
    }

    /// Counts for a post; zeroed when the row has not arrived yet.
    pub fn counts(&self, id: &CompositeId) -> Result<PostCounts, CacheError> {
        let key = id.to_string();
        Ok(self.db.find_by_id(&key)?.unwrap_or(PostCounts {
            id: key,
            ..Default::default()
        }))
    }

    pub fn exists(&self, id: &CompositeId) -> Result<bool, CacheError> {
        Ok(self.details(id)?.is_some())
    }

    /// Delete a post from every table and stream atomically.
    /// Returns what was removed so it can be put back.
    pub fn remove(&self, id: &CompositeId) -> Result<PostSnapshot, CacheError> {
        let key = id.to_string();

        self.db.transaction(&POST_TABLES, |tx| {
            let mut snapshot = PostSnapshot {
                id: key.clone(),
                details: tx.find_by_id(&key)?,
                counts: tx.find_by_id(&key)?,
                tags: tx.find_by_id(&key)?,
                memberships: Vec::new(),
            };

            let mut rewritten = Vec::new();
            for stream in tx.find_all::<PostStream>()? {
                if let Some(position) = stream.stream.iter().position(|m| m == &key) {
                    snapshot.memberships.push((stream.id.clone(), position));
                    let mut members = stream.stream;
                    members.remove(position);
                    rewritten.push(PostStream {
                        id: stream.id,
                        stream: members,
                    });
                }
            }

            tx.delete::<PostDetails>(&key)?;
            tx.delete::<PostCounts>(&key)?;
            tx.delete::<PostTags>(&key)?;
            tx.bulk_upsert(&rewritten)?;
            Ok(snapshot)
        })
    }

    /// Put back a snapshot taken by [`PostCache::remove`].
    /// Rows written since the removal are kept over the snapshot. Stream
    /// positions are clamped to the current stream length and members
    /// already present are left where they are.
    pub fn restore(&self, snapshot: &PostSnapshot) -> Result<(), CacheError> {
        self.db.transaction(&POST_TABLES, |tx| {
            restore_row(tx, snapshot.details.as_ref())?;
            restore_row(tx, snapshot.counts.as_ref())?;
            restore_row(tx, snapshot.tags.as_ref())?;

            for (stream_id, position) in &snapshot.memberships {
                let Some(mut stream) = tx.find_by_id::<PostStream>(stream_id)? else {
                    continue;
                };
                if stream.stream.contains(&snapshot.id) {
                    continue;
                }
                let at = (*position).min(stream.stream.len());
                stream.stream.insert(at, snapshot.id.clone());
                tx.upsert(&stream)?;
            }
            Ok(())
        })
    }
}

fn restore_row<R: Record>(tx: &mut StoreTx<'_>, row: Option<&R>) -> Result<(), CacheError> {
    match row {
        Some(row) if tx.find_by_id::<R>(row.id())?.is_none() => tx.upsert(row),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::nexus_post;

    #[test]
    fn test_persist_returns_composite_ids() {
        let db = CacheDb::in_memory().unwrap();
        let posts = PostCache::new(&db);
        let ids = posts
            .persist(&[nexus_post("alice", "p1", 10), nexus_post("bob", "p2", 20)])
            .unwrap();

        assert_eq!(ids[0].to_string(), "alice:p1");
        assert_eq!(ids[1].to_string(), "bob:p2");
        assert_eq!(posts.details(&ids[1]).unwrap().unwrap().indexed_at, 20);
        assert_eq!(posts.counts(&ids[0]).unwrap().replies, 1);
    }

    #[test]
    fn test_persist_rejects_invalid_author() {
        let db = CacheDb::in_memory().unwrap();
        let err = PostCache::new(&db)
            .persist(&[nexus_post("bad:author", "p1", 10)])
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidIdentifier(_)));
    }

    #[test]
    fn test_remove_and_restore() {
        let db = CacheDb::in_memory().unwrap();
        let posts = PostCache::new(&db);
        let ids = posts
            .persist(&[
                nexus_post("alice", "p1", 30),
                nexus_post("alice", "p2", 20),
                nexus_post("alice", "p3", 10),
            ])
            .unwrap();
        let members: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        db.upsert(&PostStream {
            id: "all:timeline:all".into(),
            stream: members.clone(),
        })
        .unwrap();

        let snapshot = posts.remove(&ids[1]).unwrap();
        assert!(!posts.exists(&ids[1]).unwrap());
        assert_eq!(snapshot.memberships, vec![("all:timeline:all".to_string(), 1)]);
        let stream: PostStream = db.find_by_id("all:timeline:all").unwrap().unwrap();
        assert_eq!(stream.stream, vec!["alice:p1", "alice:p3"]);

        posts.restore(&snapshot).unwrap();
        assert!(posts.exists(&ids[1]).unwrap());
        let stream: PostStream = db.find_by_id("all:timeline:all").unwrap().unwrap();
        assert_eq!(stream.stream, members);
    }

    #[test]
    fn test_restore_keeps_rows_written_since_removal() {
        let db = CacheDb::in_memory().unwrap();
        let posts = PostCache::new(&db);
        let ids = posts
            .persist(&[nexus_post("alice", "p1", 20), nexus_post("alice", "p2", 10)])
            .unwrap();
        db.upsert(&PostStream {
            id: "author:alice".into(),
            stream: vec!["alice:p1".into(), "alice:p2".into()],
        })
        .unwrap();

        let snapshot = posts.remove(&ids[0]).unwrap();
        let mut fresh = nexus_post("alice", "p1", 20);
        fresh.counts.replies = 9;
        posts.persist(&[fresh]).unwrap();

        posts.restore(&snapshot).unwrap();
        assert_eq!(posts.counts(&ids[0]).unwrap().replies, 9);
        let stream: PostStream = db.find_by_id("author:alice").unwrap().unwrap();
        assert_eq!(stream.stream, vec!["alice:p1", "alice:p2"]);
    }
}
