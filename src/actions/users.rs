// SPDX-License-Identifier: MPL-2.0

use crate::actions::{Notifier, created_now, report};
use crate::cache::{CacheDb, RelationshipPatch, StoreTx, Table, UserCounts, UserRelationship};
use crate::error::{Result, SyncError};
use crate::identity::{self, CompositeId};
use crate::remote::{Homeserver, HomeserverAction};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Relationship flag touched by one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Following,
    Muted,
}

impl Flag {
    fn get(self, row: &UserRelationship) -> bool {
        match self {
            Flag::Following => row.following,
            Flag::Muted => row.muted,
        }
    }

    fn patch(self, value: bool) -> RelationshipPatch {
        match self {
            Flag::Following => RelationshipPatch {
                following: Some(value),
                ..Default::default()
            },
            Flag::Muted => RelationshipPatch {
                muted: Some(value),
                ..Default::default()
            },
        }
    }
}

/// Count changes made by a follow or unfollow.
#[derive(Debug, Clone)]
struct FollowCounts {
    follower: String,
    followee: String,
    mutual: bool,
    /// Users whose counts row did not exist before the change.
    created: Vec<String>,
}

/// Inverse of an optimistic relationship change. It is applied over the
/// rows as they are at rollback time, so other writes made meanwhile stay.
#[derive(Debug, Clone)]
struct Undo {
    relationship_id: String,
    flag: Flag,
    applied: bool,
    /// The relationship row did not exist before the change.
    created: bool,
    counts: Option<FollowCounts>,
}

/// Follow and mute, applied optimistically.
pub struct UserActions {
    db: CacheDb,
    homeserver: Arc<dyn Homeserver>,
    notifier: Arc<dyn Notifier>,
}

impl UserActions {
    pub fn new(db: CacheDb, homeserver: Arc<dyn Homeserver>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            homeserver,
            notifier,
        }
    }

    /// `Put` follows `followee`, `Delete` unfollows.
    pub async fn follow(
        &self,
        action: HomeserverAction,
        follower: &str,
        followee: &str,
    ) -> Result<()> {
        let following = action == HomeserverAction::Put;
        let relationship_id = identity::relationship_id(follower, followee)?;
        let url = CompositeId::build(follower, followee)?.to_uri("follows");

        let undo = self.db.transaction(
            &[Table::UserRelationships, Table::UserCounts],
            |tx| -> Result<Option<Undo>> {
                let current = tx.find_by_id::<UserRelationship>(&relationship_id)?;
                let created = current.is_none();
                let base = current.unwrap_or_else(|| UserRelationship::new(&relationship_id));
                if base.following == following {
                    return Ok(None);
                }

                let mut new_counts = Vec::new();
                for user_id in [follower, followee] {
                    if tx.find_by_id::<UserCounts>(user_id)?.is_none() {
                        new_counts.push(user_id.to_string());
                    }
                }

                tx.upsert(&base.merged(Flag::Following.patch(following)))?;

                // A follow back makes the pair friends
                let counts = FollowCounts {
                    follower: follower.to_string(),
                    followee: followee.to_string(),
                    mutual: base.followed_by,
                    created: new_counts,
                };
                apply_follow_counts(tx, &counts, following)?;

                Ok(Some(Undo {
                    relationship_id: relationship_id.clone(),
                    flag: Flag::Following,
                    applied: following,
                    created,
                    counts: Some(counts),
                }))
            },
        )?;

        let payload = following.then(created_now);
        self.send(action, &url, payload, undo).await
    }

    /// `Put` mutes `mutee`, `Delete` unmutes. Only the `muted` flag changes.
    pub async fn mute(&self, action: HomeserverAction, muter: &str, mutee: &str) -> Result<()> {
        let muted = action == HomeserverAction::Put;
        let relationship_id = identity::relationship_id(muter, mutee)?;
        let url = CompositeId::build(muter, mutee)?.to_uri("mutes");

        let undo = self.db.transaction(
            &[Table::UserRelationships],
            |tx| -> Result<Option<Undo>> {
                let current = tx.find_by_id::<UserRelationship>(&relationship_id)?;
                let created = current.is_none();
                let base = current.unwrap_or_else(|| UserRelationship::new(&relationship_id));
                if base.muted == muted {
                    return Ok(None);
                }

                tx.upsert(&base.merged(Flag::Muted.patch(muted)))?;
                Ok(Some(Undo {
                    relationship_id: relationship_id.clone(),
                    flag: Flag::Muted,
                    applied: muted,
                    created,
                    counts: None,
                }))
            },
        )?;

        let payload = muted.then(created_now);
        self.send(action, &url, payload, undo).await
    }

    /// Issue the remote request; apply `undo` if it fails.
    async fn send(
        &self,
        action: HomeserverAction,
        url: &str,
        payload: Option<serde_json::Value>,
        undo: Option<Undo>,
    ) -> Result<()> {
        if undo.is_none() {
            debug!(%action, url, "local state already current");
        }

        match self.homeserver.request(action, url, payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(%action, url, error = %e, "homeserver rejected mutation, rolling back");
                if let Some(undo) = undo {
                    if let Err(rollback) = self.rollback(&undo) {
                        error!(url, error = %rollback, "failed to roll back relationship");
                    }
                }
                report(self.notifier.as_ref());
                Err(SyncError::RemoteRequestFailed(e))
            }
        }
    }

    fn rollback(&self, undo: &Undo) -> Result<()> {
        self.db.transaction(
            &[Table::UserRelationships, Table::UserCounts],
            |tx| -> Result<()> {
                let Some(row) = tx.find_by_id::<UserRelationship>(&undo.relationship_id)? else {
                    debug!(id = %undo.relationship_id, "relationship removed meanwhile");
                    return Ok(());
                };
                if undo.flag.get(&row) != undo.applied {
                    debug!(id = %undo.relationship_id, "relationship changed meanwhile, keeping it");
                    return Ok(());
                }

                let restored = row.merged(undo.flag.patch(!undo.applied));
                if undo.created && restored.is_unset() {
                    tx.delete::<UserRelationship>(&restored.id)?;
                } else {
                    tx.upsert(&restored)?;
                }

                if let Some(counts) = &undo.counts {
                    apply_follow_counts(tx, counts, !undo.applied)?;
                    for user_id in &counts.created {
                        let current = tx.find_by_id::<UserCounts>(user_id)?;
                        if current.as_ref() == Some(&UserCounts::empty(user_id)) {
                            tx.delete::<UserCounts>(user_id)?;
                        }
                    }
                }
                Ok(())
            },
        )
    }
}

fn step(value: u32, delta: i8) -> u32 {
    if delta > 0 {
        value.saturating_add(1)
    } else {
        value.saturating_sub(1)
    }
}

fn adjust_counts(
    tx: &mut StoreTx<'_>,
    user_id: &str,
    increment: bool,
    apply: impl FnOnce(&mut UserCounts, i8),
) -> Result<()> {
    let mut counts = tx
        .find_by_id::<UserCounts>(user_id)?
        .unwrap_or_else(|| UserCounts::empty(user_id));
    apply(&mut counts, if increment { 1 } else { -1 });
    tx.upsert(&counts)?;
    Ok(())
}

/// Step the follow counters of both users up or down by one.
fn apply_follow_counts(tx: &mut StoreTx<'_>, counts: &FollowCounts, increment: bool) -> Result<()> {
    let mutual = counts.mutual;
    adjust_counts(tx, &counts.follower, increment, |c, delta| {
        c.following = step(c.following, delta);
        if mutual {
            c.friends = step(c.friends, delta);
        }
    })?;
    adjust_counts(tx, &counts.followee, increment, |c, delta| {
        c.followers = step(c.followers, delta);
        if mutual {
            c.friends = step(c.friends, delta);
        }
    })
}
