// SPDX-License-Identifier: MPL-2.0

use crate::actions::{Notifier, report};
use crate::cache::{CacheDb, PostCache, PostSnapshot};
use crate::error::{Result, SyncError};
use crate::identity::CompositeId;
use crate::remote::{Homeserver, HomeserverAction};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What the local lookup said when a failed delete was undone.
/// Content is restored in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreReason {
    /// The post was still present locally
    Confirmed,
    /// The post was gone locally
    Missing,
    /// The lookup itself failed
    Unverified,
}

/// Post deletion, applied optimistically.
pub struct PostActions {
    db: CacheDb,
    homeserver: Arc<dyn Homeserver>,
    notifier: Arc<dyn Notifier>,
}

impl PostActions {
    pub fn new(db: CacheDb, homeserver: Arc<dyn Homeserver>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            homeserver,
            notifier,
        }
    }

    /// Remove `post` from `list` and the store, then ask the homeserver to
    /// delete it. On failure both are put back where they were.
    pub async fn delete(&self, list: &mut Vec<CompositeId>, post: &CompositeId) -> Result<()> {
        let snapshot = PostCache::new(&self.db).remove(post)?;
        let position = list.iter().position(|p| p == post);
        if let Some(position) = position {
            list.remove(position);
        }

        let url = post.to_uri("posts");
        match self
            .homeserver
            .request(HomeserverAction::Delete, &url, None)
            .await
        {
            Ok(()) => {
                info!(%post, "post deleted");
                Ok(())
            }
            Err(e) => {
                warn!(%post, error = %e, "delete rejected, restoring post");
                let reason = self.rollback(list, position, post, &snapshot);
                info!(%post, ?reason, "post restored");
                report(self.notifier.as_ref());
                Err(SyncError::RemoteRequestFailed(e))
            }
        }
    }

    fn rollback(
        &self,
        list: &mut Vec<CompositeId>,
        position: Option<usize>,
        post: &CompositeId,
        snapshot: &PostSnapshot,
    ) -> RestoreReason {
        let posts = PostCache::new(&self.db);
        let reason = match posts.exists(post) {
            Ok(true) => RestoreReason::Confirmed,
            Ok(false) => RestoreReason::Missing,
            Err(e) => {
                warn!(%post, error = %e, "could not check local post");
                RestoreReason::Unverified
            }
        };

        if let Err(e) = posts.restore(snapshot) {
            error!(%post, error = %e, "failed to restore post rows");
        }
        if let Some(position) = position {
            if !list.contains(post) {
                list.insert(position.min(list.len()), post.clone());
            }
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, PostStream, Table};
    use crate::testing::{MockHomeserver, RecordingNotifier, nexus_post};

    struct Fixture {
        db: CacheDb,
        homeserver: Arc<MockHomeserver>,
        notifier: Arc<RecordingNotifier>,
        actions: PostActions,
        ids: Vec<CompositeId>,
    }

    fn setup(homeserver: MockHomeserver) -> Fixture {
        let db = CacheDb::in_memory().unwrap();
        let ids = PostCache::new(&db)
            .persist(&[
                nexus_post("alice", "p1", 30),
                nexus_post("alice", "p2", 20),
                nexus_post("alice", "p3", 10),
            ])
            .unwrap();
        db.upsert(&PostStream {
            id: "author:alice".into(),
            stream: ids.iter().map(|id| id.to_string()).collect(),
        })
        .unwrap();

        let homeserver = Arc::new(homeserver);
        let notifier = Arc::new(RecordingNotifier::default());
        let actions = PostActions::new(db.clone(), homeserver.clone(), notifier.clone());
        Fixture {
            db,
            homeserver,
            notifier,
            actions,
            ids,
        }
    }

    #[tokio::test]
    async fn test_delete_removes_everywhere() {
        let f = setup(MockHomeserver::new());
        let ids = &f.ids;
        let mut list = ids.clone();

        f.actions.delete(&mut list, &ids[1]).await.unwrap();

        assert_eq!(list, vec![ids[0].clone(), ids[2].clone()]);
        assert!(!PostCache::new(&f.db).exists(&ids[1]).unwrap());
        let stream: PostStream = f.db.find_by_id("author:alice").unwrap().unwrap();
        assert_eq!(stream.stream, vec!["alice:p1", "alice:p3"]);
        assert_eq!(
            f.homeserver.requests()[0].url,
            "pubky://alice/pub/pubky.app/posts/p2"
        );
        assert!(f.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delete_restores_position() {
        let f = setup(MockHomeserver::failing());
        let ids = &f.ids;
        let mut list = ids.clone();

        let err = f.actions.delete(&mut list, &ids[1]).await.unwrap_err();

        assert!(matches!(err, SyncError::RemoteRequestFailed(_)));
        assert_eq!(&list, ids);
        assert!(PostCache::new(&f.db).exists(&ids[1]).unwrap());
        let stream: PostStream = f.db.find_by_id("author:alice").unwrap().unwrap();
        assert_eq!(stream.stream, vec!["alice:p1", "alice:p2", "alice:p3"]);
        assert_eq!(f.notifier.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_list_and_skips_homeserver() {
        let f = setup(MockHomeserver::new());
        f.db.conn()
            .execute_batch(
                "CREATE TRIGGER freeze_streams BEFORE UPDATE ON post_streams
                 BEGIN SELECT RAISE(ABORT, 'read only'); END;
                 CREATE TRIGGER freeze_new_streams BEFORE INSERT ON post_streams
                 BEGIN SELECT RAISE(ABORT, 'read only'); END;",
            )
            .unwrap();
        let mut list = f.ids.clone();

        let err = f.actions.delete(&mut list, &f.ids[1]).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::Cache(CacheError::BulkOperationFailed {
                table: Table::PostStreams,
                ..
            })
        ));
        assert_eq!(list, f.ids);
        assert!(PostCache::new(&f.db).exists(&f.ids[1]).unwrap());
        assert!(f.homeserver.requests().is_empty());
        assert!(f.notifier.messages().is_empty());
    }

    #[test]
    fn test_rollback_reasons() {
        let f = setup(MockHomeserver::new());
        let ids = &f.ids;
        let posts = PostCache::new(&f.db);

        // Gone locally: restored anyway
        let snapshot = posts.remove(&ids[0]).unwrap();
        let mut list = vec![ids[1].clone()];
        let reason = f.actions.rollback(&mut list, Some(0), &ids[0], &snapshot);
        assert_eq!(reason, RestoreReason::Missing);
        assert_eq!(list, vec![ids[0].clone(), ids[1].clone()]);

        // Re-persisted by someone else in the meantime
        let snapshot = posts.remove(&ids[2]).unwrap();
        let mut fresh = nexus_post("alice", "p3", 10);
        fresh.counts.replies = 4;
        posts.persist(&[fresh]).unwrap();
        let mut list = vec![ids[0].clone()];
        let reason = f.actions.rollback(&mut list, Some(5), &ids[2], &snapshot);
        assert_eq!(reason, RestoreReason::Confirmed);
        assert_eq!(list, vec![ids[0].clone(), ids[2].clone()]);
        assert_eq!(posts.counts(&ids[2]).unwrap().replies, 4);
    }

    #[test]
    fn test_rollback_restores_list_when_lookup_fails() {
        let f = setup(MockHomeserver::new());
        let ids = &f.ids;
        let snapshot = PostCache::new(&f.db).remove(&ids[1]).unwrap();
        f.db.conn().execute_batch("DROP TABLE post_details").unwrap();

        let mut list = vec![ids[0].clone(), ids[2].clone()];
        let reason = f.actions.rollback(&mut list, Some(1), &ids[1], &snapshot);

        assert_eq!(reason, RestoreReason::Unverified);
        assert_eq!(&list, ids);
    }
}
