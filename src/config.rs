// SPDX-License-Identifier: MPL-2.0

use std::time::Duration;

pub const APP_ID: &str = "app.pubky.Franky";
pub const APP_NAME: &str = "franky";

pub const DEFAULT_NEXUS: &str = "https://nexus.pubky.app/";
pub const NEXUS_TIMEOUT_SECS: u64 = 15;

/// Default period between background polls of the active stream.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Shortest poll period; shorter requests are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Routes whose streams are polled unless the settings say otherwise.
pub const DEFAULT_POLLED_ROUTES: &[&str] = &[r"^/home/?$", r"^/post/[^/]+/[^/]+/?$"];

/// Page size used when filling a stream from Nexus.
pub const STREAM_PAGE_SIZE: usize = 20;

/// Replies shown under a post before the full thread is opened.
pub const REPLY_PREVIEW_LIMIT: usize = 3;

/// Delay before a tag search is sent while the user is still typing.
pub const TAG_SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);
pub const TAG_SUGGESTION_LIMIT: usize = 10;

/// Message shown to the user when an optimistic mutation had to be undone.
pub const MUTATION_FAILED_MESSAGE: &str = "Something went wrong. Please try again.";
