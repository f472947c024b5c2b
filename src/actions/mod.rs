// SPDX-License-Identifier: MPL-2.0

//! Optimistic mutations.
//!
//! Every mutation writes to the local store first, then issues exactly one
//! homeserver request. When the request fails the local write is reversed
//! and the user is told through a [`Notifier`]. A failed local write returns
//! before anything is sent.

mod notifications;
mod posts;
mod tags;
mod users;

pub use notifications::NotificationActions;
pub use posts::{PostActions, RestoreReason};
pub use tags::{Suggestions, TagSuggester};
pub use users::UserActions;

use crate::config::MUTATION_FAILED_MESSAGE;
use serde_json::json;
use tracing::warn;

/// Surface for failures the user must hear about.
pub trait Notifier: Send + Sync {
    fn notify_failure(&self, message: &str);
}

/// Logs failures; used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify_failure(&self, message: &str) {
        warn!(message, "mutation failed");
    }
}

pub(crate) fn report(notifier: &dyn Notifier) {
    notifier.notify_failure(MUTATION_FAILED_MESSAGE);
}

/// Body of a PUT for follow/mute style records.
pub(crate) fn created_now() -> serde_json::Value {
    json!({ "created_at": chrono::Utc::now().timestamp_micros() })
}
