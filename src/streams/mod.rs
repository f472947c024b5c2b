// SPDX-License-Identifier: MPL-2.0

//! Stream head resolution, cursor slices and set-based merges.
//!
//! A stream is an ordered, deduplicated list of post or user ids, newest
//! first. Fresh content is prepended from the head, older pages are appended
//! at the tail. Members are persisted through the cache before they are
//! merged, so a reader never sees an id whose details are unknown.

mod head;

pub use crate::cache::{local_slice, merge_append, merge_prepend};
pub use head::StreamHead;

use crate::cache::{
    CacheDb, PostCache, PostDetails, PostStream, StreamCache, UserCache, UserDetails, UserStream,
};
use crate::config::{REPLY_PREVIEW_LIMIT, STREAM_PAGE_SIZE};
use crate::error::{Result, SyncError};
use crate::identity::{self, CompositeId, StreamId};
use crate::remote::{Nexus, StreamQuery};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Next page of a stream after `after` (or from the head).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceRequest {
    pub stream_id: StreamId,
    pub after: Option<String>,
    pub limit: usize,
}

impl SliceRequest {
    pub fn first_page(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            after: None,
            limit: STREAM_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSlice {
    pub next_page_ids: Vec<String>,
}

/// Reads streams from the cache and fills them from Nexus.
#[derive(Clone)]
pub struct StreamManager {
    db: CacheDb,
    nexus: Arc<dyn Nexus>,
    viewer: Option<String>,
}

impl StreamManager {
    pub fn new(db: CacheDb, nexus: Arc<dyn Nexus>) -> Self {
        Self {
            db,
            nexus,
            viewer: None,
        }
    }

    /// Ask Nexus for viewer-relative data (relationships, own tags).
    pub fn with_viewer(mut self, viewer: &str) -> Self {
        self.viewer = Some(viewer.to_string());
        self
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    /// Resolve the newest known member of a stream into a cursor.
    pub fn get_stream_head(&self, stream_id: &StreamId) -> Result<StreamHead> {
        // User streams carry no timestamps to page from
        if stream_id.is_user_stream() {
            return Ok(StreamHead::Skip);
        }

        let key = stream_id.to_string();
        let Some(stream) = StreamCache::new(&self.db).get::<PostStream>(&key)? else {
            return Ok(StreamHead::Skip);
        };
        let Some(head) = stream.first() else {
            return Ok(StreamHead::Force);
        };

        match self.db.find_by_id::<PostDetails>(head)? {
            None => {
                trace!(stream = %key, head = %head, "head member not cached");
                Ok(StreamHead::Skip)
            }
            Some(details) if details.indexed_at <= 0 => Err(SyncError::InvalidCursor {
                stream: key,
                cursor: details.indexed_at,
            }),
            Some(details) => Ok(StreamHead::Since(details.indexed_at)),
        }
    }

    /// Serve the slice from the cache when it holds `limit` members past the
    /// cursor, otherwise fetch the next page from Nexus and merge it at the tail.
    pub async fn get_or_fetch_stream_slice(&self, request: &SliceRequest) -> Result<StreamSlice> {
        if request.stream_id.is_user_stream() {
            return self.user_slice(request).await;
        }

        let key = request.stream_id.to_string();
        let streams = StreamCache::new(&self.db);
        let cached = streams.get::<PostStream>(&key)?.unwrap_or_default();
        let after = request.after.as_deref();

        if let Some(slice) =
            local_slice(&cached, after, request.limit).filter(|s| s.len() >= request.limit)
        {
            trace!(stream = %key, count = slice.len(), "slice served from cache");
            return Ok(StreamSlice {
                next_page_ids: slice,
            });
        }

        // A cursor outside the cached list pages from its own timestamp
        let end = match after.filter(|a| !cached.iter().any(|m| m == a)) {
            Some(after) => Some(self.cursor_of(&key, after)?),
            None => self.tail_cursor(&cached)?,
        };
        if end.is_none() && !cached.is_empty() {
            // Without a bound Nexus answers with the newest page, which
            // does not belong at the tail
            warn!(stream = %key, "no timestamp for stream tail, serving cache only");
            return Ok(StreamSlice {
                next_page_ids: local_slice(&cached, after, request.limit).unwrap_or_default(),
            });
        }

        let page = self
            .nexus
            .stream_post_keys(&StreamQuery {
                stream_id: key.clone(),
                viewer_id: self.viewer.clone(),
                end,
                limit: request.limit,
                ..Default::default()
            })
            .await?;
        let keys = self.ensure_posts(&page.keys).await?;
        let added = streams.append::<PostStream>(&key, &keys)?;
        debug!(stream = %key, fetched = keys.len(), added, "merged older page");

        let merged = streams.get::<PostStream>(&key)?.unwrap_or_default();
        let next_page_ids = local_slice(&merged, after, request.limit)
            .unwrap_or_else(|| keys.into_iter().take(request.limit).collect());
        Ok(StreamSlice { next_page_ids })
    }

    /// Fetch members newer than `head` and prepend them.
    /// Returns how many members were genuinely new.
    pub async fn fetch_newer(&self, stream_id: &StreamId, head: StreamHead) -> Result<usize> {
        let start = match head {
            StreamHead::Skip => return Ok(0),
            StreamHead::Force => None,
            StreamHead::Since(cursor) => Some(cursor),
        };

        let key = stream_id.to_string();
        let page = self
            .nexus
            .stream_post_keys(&StreamQuery {
                stream_id: key.clone(),
                viewer_id: self.viewer.clone(),
                start,
                limit: STREAM_PAGE_SIZE,
                ..Default::default()
            })
            .await?;
        if page.keys.is_empty() {
            return Ok(0);
        }

        let keys = self.ensure_posts(&page.keys).await?;
        let added = StreamCache::new(&self.db).prepend::<PostStream>(&key, &keys)?;
        debug!(stream = %key, added, "merged newer posts");
        Ok(added)
    }

    /// First replies of a post, capped regardless of the full reply count.
    pub async fn reply_preview(&self, post: &CompositeId) -> Result<Vec<String>> {
        let slice = self
            .get_or_fetch_stream_slice(&SliceRequest {
                stream_id: StreamId::replies(post.clone()),
                after: None,
                limit: REPLY_PREVIEW_LIMIT,
            })
            .await?;
        Ok(slice
            .next_page_ids
            .into_iter()
            .take(REPLY_PREVIEW_LIMIT)
            .collect())
    }

    async fn user_slice(&self, request: &SliceRequest) -> Result<StreamSlice> {
        let key = request.stream_id.to_string();
        let streams = StreamCache::new(&self.db);
        let cached = streams.get::<UserStream>(&key)?.unwrap_or_default();
        let after = request.after.as_deref();

        if let Some(slice) =
            local_slice(&cached, after, request.limit).filter(|s| s.len() >= request.limit)
        {
            return Ok(StreamSlice {
                next_page_ids: slice,
            });
        }

        let ids = self
            .nexus
            .stream_user_ids(&StreamQuery {
                stream_id: key.clone(),
                viewer_id: self.viewer.clone(),
                skip: Some(cached.len()),
                limit: request.limit,
                ..Default::default()
            })
            .await?;
        let ids = self.ensure_users(&ids).await?;
        let added = streams.append::<UserStream>(&key, &ids)?;
        debug!(stream = %key, added, "merged user page");

        let merged = streams.get::<UserStream>(&key)?.unwrap_or_default();
        let next_page_ids = local_slice(&merged, after, request.limit)
            .unwrap_or_else(|| ids.into_iter().take(request.limit).collect());
        Ok(StreamSlice { next_page_ids })
    }

    /// Timestamp of a post used as a paging cursor.
    fn cursor_of(&self, stream: &str, post_id: &str) -> Result<i64> {
        match self.db.find_by_id::<PostDetails>(post_id)? {
            None => Err(SyncError::UnknownCursor {
                stream: stream.to_string(),
                after: post_id.to_string(),
            }),
            Some(details) if details.indexed_at <= 0 => Err(SyncError::InvalidCursor {
                stream: stream.to_string(),
                cursor: details.indexed_at,
            }),
            Some(details) => Ok(details.indexed_at),
        }
    }

    /// Timestamp of the oldest cached member with known details.
    fn tail_cursor(&self, stream: &[String]) -> Result<Option<i64>> {
        for member in stream.iter().rev() {
            if let Some(details) = self.db.find_by_id::<PostDetails>(member)? {
                return Ok(Some(details.indexed_at));
            }
        }
        Ok(None)
    }

    /// Persist the posts of `keys` that are not cached yet. Returns the keys
    /// whose details are now known, in input order.
    async fn ensure_posts(&self, keys: &[String]) -> Result<Vec<String>> {
        let valid: Vec<String> = keys
            .iter()
            .filter(|key| match CompositeId::parse(key) {
                Ok(_) => true,
                Err(e) => {
                    warn!(key = %key, error = %e, "dropping malformed stream member");
                    false
                }
            })
            .cloned()
            .collect();

        let mut known: HashSet<String> = self
            .db
            .find_many_by_ids::<PostDetails>(&valid)?
            .into_iter()
            .map(|d| d.id)
            .collect();
        let missing: Vec<String> = valid
            .iter()
            .filter(|k| !known.contains(*k))
            .cloned()
            .collect();

        if !missing.is_empty() {
            let posts = self
                .nexus
                .posts_by_ids(&missing, self.viewer.as_deref())
                .await?;
            for id in PostCache::new(&self.db).persist(&posts)? {
                known.insert(id.to_string());
            }
        }

        Ok(valid.into_iter().filter(|k| known.contains(k)).collect())
    }

    async fn ensure_users(&self, ids: &[String]) -> Result<Vec<String>> {
        let valid: Vec<String> = ids
            .iter()
            .filter(|id| identity::validate_user_id(id).is_ok())
            .cloned()
            .collect();

        let mut known: HashSet<String> = self
            .db
            .find_many_by_ids::<UserDetails>(&valid)?
            .into_iter()
            .map(|d| d.id)
            .collect();
        let missing: Vec<String> = valid
            .iter()
            .filter(|id| !known.contains(*id))
            .cloned()
            .collect();

        if !missing.is_empty() {
            let users = self
                .nexus
                .users_by_ids(&missing, self.viewer.as_deref())
                .await?;
            UserCache::new(&self.db).persist(&users, self.viewer.as_deref())?;
            known.extend(users.into_iter().map(|u| u.details.id));
        }

        Ok(valid.into_iter().filter(|id| known.contains(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Content, Reach, Sort, UserList};
    use crate::testing::{MockNexus, nexus_post, nexus_user};
    use std::time::Duration;

    const TIMELINE: &str = "all:timeline:all";

    fn timeline() -> StreamId {
        StreamId::timeline(Reach::All, Sort::Timeline, Content::All)
    }

    fn setup() -> (Arc<MockNexus>, StreamManager) {
        let nexus = Arc::new(MockNexus::new());
        let manager = StreamManager::new(CacheDb::in_memory().unwrap(), nexus.clone());
        (nexus, manager)
    }

    fn request(limit: usize, after: Option<&str>) -> SliceRequest {
        SliceRequest {
            stream_id: timeline(),
            after: after.map(String::from),
            limit,
        }
    }

    #[test]
    fn test_head_states() {
        let (_, manager) = setup();
        let db = manager.db().clone();
        assert_eq!(manager.get_stream_head(&timeline()).unwrap(), StreamHead::Skip);

        db.upsert(&PostStream {
            id: TIMELINE.into(),
            stream: Vec::new(),
        })
        .unwrap();
        assert_eq!(manager.get_stream_head(&timeline()).unwrap(), StreamHead::Force);

        db.upsert(&PostStream {
            id: TIMELINE.into(),
            stream: vec!["alice:p1".into()],
        })
        .unwrap();
        // Head details not cached yet
        assert_eq!(manager.get_stream_head(&timeline()).unwrap(), StreamHead::Skip);

        PostCache::new(&db)
            .persist(&[nexus_post("alice", "p1", 42)])
            .unwrap();
        assert_eq!(
            manager.get_stream_head(&timeline()).unwrap(),
            StreamHead::Since(42)
        );
    }

    #[test]
    fn test_non_positive_head_is_invalid_cursor() {
        let (_, manager) = setup();
        let db = manager.db().clone();
        PostCache::new(&db)
            .persist(&[nexus_post("alice", "p1", 0)])
            .unwrap();
        db.upsert(&PostStream {
            id: TIMELINE.into(),
            stream: vec!["alice:p1".into()],
        })
        .unwrap();

        let err = manager.get_stream_head(&timeline()).unwrap_err();
        assert!(matches!(err, SyncError::InvalidCursor { cursor: 0, .. }));
    }

    #[tokio::test]
    async fn test_slice_fetches_then_serves_from_cache() {
        let (nexus, manager) = setup();
        nexus.publish(
            TIMELINE,
            &[
                nexus_post("alice", "p4", 40),
                nexus_post("alice", "p3", 30),
                nexus_post("bob", "p2", 20),
                nexus_post("bob", "p1", 10),
            ],
        );

        let first = manager.get_or_fetch_stream_slice(&request(2, None)).await.unwrap();
        assert_eq!(first.next_page_ids, vec!["alice:p4", "alice:p3"]);
        assert!(
            PostCache::new(manager.db())
                .exists(&CompositeId::parse("alice:p3").unwrap())
                .unwrap()
        );

        let again = manager.get_or_fetch_stream_slice(&request(2, None)).await.unwrap();
        assert_eq!(again, first);
        assert_eq!(nexus.call_count("stream_post_keys"), 1);

        let next = manager
            .get_or_fetch_stream_slice(&request(2, Some("alice:p3")))
            .await
            .unwrap();
        assert_eq!(next.next_page_ids, vec!["bob:p2", "bob:p1"]);
        assert_eq!(nexus.call_count("stream_post_keys"), 2);
    }

    #[tokio::test]
    async fn test_merging_same_page_twice_is_idempotent() {
        let (nexus, manager) = setup();
        nexus.publish(
            TIMELINE,
            &[nexus_post("alice", "p2", 20), nexus_post("alice", "p1", 10)],
        );

        assert_eq!(manager.fetch_newer(&timeline(), StreamHead::Force).await.unwrap(), 2);
        let once = StreamCache::new(manager.db()).get::<PostStream>(TIMELINE).unwrap();

        assert_eq!(manager.fetch_newer(&timeline(), StreamHead::Force).await.unwrap(), 0);
        let twice = StreamCache::new(manager.db()).get::<PostStream>(TIMELINE).unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.unwrap(), vec!["alice:p2", "alice:p1"]);
    }

    #[tokio::test]
    async fn test_fetch_newer_prepends_since_head() {
        let (nexus, manager) = setup();
        nexus.publish(TIMELINE, &[nexus_post("alice", "p1", 10)]);
        manager.fetch_newer(&timeline(), StreamHead::Force).await.unwrap();

        nexus.publish(TIMELINE, &[nexus_post("bob", "p2", 20)]);
        let head = manager.get_stream_head(&timeline()).unwrap();
        assert_eq!(head, StreamHead::Since(10));

        assert_eq!(manager.fetch_newer(&timeline(), head).await.unwrap(), 1);
        let stream = StreamCache::new(manager.db())
            .get::<PostStream>(TIMELINE)
            .unwrap()
            .unwrap();
        assert_eq!(stream, vec!["bob:p2", "alice:p1"]);
        assert_eq!(manager.fetch_newer(&timeline(), StreamHead::Skip).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reply_preview_is_capped() {
        let (nexus, manager) = setup();
        let parent = CompositeId::build("alice", "root").unwrap();
        let replies: Vec<_> = (1..=5)
            .map(|i| nexus_post("bob", &format!("r{i}"), 100 - i))
            .collect();
        nexus.publish("replies:alice:root", &replies);

        let preview = manager.reply_preview(&parent).await.unwrap();
        assert_eq!(preview, vec!["bob:r1", "bob:r2", "bob:r3"]);
    }

    #[tokio::test]
    async fn test_malformed_members_are_dropped() {
        let (nexus, manager) = setup();
        nexus.publish(TIMELINE, &[nexus_post("alice", "p1", 10)]);
        nexus.publish(TIMELINE, &[nexus_post("bad author", "p2", 20)]);

        let slice = manager.get_or_fetch_stream_slice(&request(5, None)).await.unwrap();
        assert_eq!(slice.next_page_ids, vec!["alice:p1"]);
    }

    #[tokio::test]
    async fn test_user_stream_slice() {
        let (nexus, manager) = setup();
        let stream_id = StreamId::users(UserList::Followers, "alice").unwrap();
        nexus.set_user_stream(
            "followers:alice",
            &[nexus_user("bob"), nexus_user("carol"), nexus_user("dave")],
        );

        let first = manager
            .get_or_fetch_stream_slice(&SliceRequest {
                stream_id: stream_id.clone(),
                after: None,
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(first.next_page_ids, vec!["bob", "carol"]);

        let next = manager
            .get_or_fetch_stream_slice(&SliceRequest {
                stream_id: stream_id.clone(),
                after: Some("carol".into()),
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(next.next_page_ids, vec!["dave"]);
        assert!(UserCache::new(manager.db()).details("dave").unwrap().is_some());
        assert_eq!(manager.get_stream_head(&stream_id).unwrap(), StreamHead::Skip);
    }

    #[tokio::test]
    async fn test_unknown_cursor_leaves_stream_untouched() {
        let (nexus, manager) = setup();
        nexus.publish(
            TIMELINE,
            &[nexus_post("a", "p3", 30), nexus_post("a", "p2", 20)],
        );
        manager.fetch_newer(&timeline(), StreamHead::Force).await.unwrap();
        nexus.publish(TIMELINE, &[nexus_post("a", "p5", 50)]);

        let err = manager
            .get_or_fetch_stream_slice(&request(2, Some("zed:unknown")))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::UnknownCursor { .. }));
        assert!(err.is_local());
        let stream = StreamCache::new(manager.db())
            .get::<PostStream>(TIMELINE)
            .unwrap()
            .unwrap();
        assert_eq!(stream, vec!["a:p3", "a:p2"]);
        assert_eq!(nexus.call_count("stream_post_keys"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetch_newer_merges_once() {
        let (nexus, manager) = setup();
        nexus.set_latency(Duration::from_millis(20));
        nexus.publish(
            TIMELINE,
            &[
                nexus_post("alice", "p3", 30),
                nexus_post("alice", "p2", 20),
                nexus_post("bob", "p1", 10),
            ],
        );

        let (ta, tb) = (timeline(), timeline());
        let (a, b) = tokio::join!(
            manager.fetch_newer(&ta, StreamHead::Force),
            manager.fetch_newer(&tb, StreamHead::Force),
        );

        // Both fetched before either merged
        assert_eq!(nexus.call_count("posts_by_ids"), 2);
        assert_eq!(a.unwrap() + b.unwrap(), 3);
        let stream = StreamCache::new(manager.db())
            .get::<PostStream>(TIMELINE)
            .unwrap()
            .unwrap();
        assert_eq!(stream, vec!["alice:p3", "alice:p2", "bob:p1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_slices_merge_once() {
        let (nexus, manager) = setup();
        nexus.set_latency(Duration::from_millis(20));
        nexus.publish(
            TIMELINE,
            &[
                nexus_post("alice", "p3", 30),
                nexus_post("alice", "p2", 20),
                nexus_post("bob", "p1", 10),
            ],
        );

        let (ra, rb) = (request(2, None), request(2, None));
        let (a, b) = tokio::join!(
            manager.get_or_fetch_stream_slice(&ra),
            manager.get_or_fetch_stream_slice(&rb),
        );

        assert_eq!(nexus.call_count("stream_post_keys"), 2);
        assert_eq!(a.unwrap().next_page_ids, vec!["alice:p3", "alice:p2"]);
        assert_eq!(b.unwrap().next_page_ids, vec!["alice:p3", "alice:p2"]);
        let stream = StreamCache::new(manager.db())
            .get::<PostStream>(TIMELINE)
            .unwrap()
            .unwrap();
        assert_eq!(stream, vec!["alice:p3", "alice:p2"]);
    }
}
