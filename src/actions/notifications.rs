// SPDX-License-Identifier: MPL-2.0

use crate::cache::{CacheDb, NotificationCache};
use crate::error::Result;
use crate::remote::Nexus;
use std::sync::Arc;
use tracing::debug;

/// Notification listing against the stored `last_read` watermark.
pub struct NotificationActions {
    db: CacheDb,
    nexus: Arc<dyn Nexus>,
}

impl NotificationActions {
    pub fn new(db: CacheDb, nexus: Arc<dyn Nexus>) -> Self {
        Self { db, nexus }
    }

    /// Fetch notifications newer than the watermark, store them and
    /// return the unread count.
    pub async fn refresh(&self, user_id: &str) -> Result<usize> {
        let since = NotificationCache::new(&self.db).last_read(user_id)?;
        let fetched = self.nexus.notifications(user_id, since).await?;

        let cache = NotificationCache::new(&self.db);
        cache.persist(user_id, &fetched)?;
        let unread = cache.unread_count(user_id)?;
        debug!(user_id, fetched = fetched.len(), unread, "notifications refreshed");
        Ok(unread)
    }

    /// Everything up to `now` has been seen.
    pub fn mark_read(&self, user_id: &str, now: i64) -> Result<()> {
        NotificationCache::new(&self.db).set_last_read(user_id, now)?;
        Ok(())
    }
}
