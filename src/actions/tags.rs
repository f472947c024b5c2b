// SPDX-License-Identifier: MPL-2.0

use crate::config::{TAG_SEARCH_DEBOUNCE, TAG_SUGGESTION_LIMIT};
use crate::remote::Nexus;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Latest tag suggestions and the input they answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Suggestions {
    pub input: String,
    pub tags: Vec<String>,
}

/// Debounced prefix search over Nexus tags.
///
/// Each call to [`TagSuggester::input`] cancels the pending delay. A response
/// is published only if no newer input arrived while it was in flight.
pub struct TagSuggester {
    nexus: Arc<dyn Nexus>,
    delay: Duration,
    generation: Arc<AtomicU64>,
    pending: Option<JoinHandle<()>>,
    results: Arc<watch::Sender<Suggestions>>,
}

impl TagSuggester {
    pub fn new(nexus: Arc<dyn Nexus>) -> Self {
        Self::with_delay(nexus, TAG_SEARCH_DEBOUNCE)
    }

    pub fn with_delay(nexus: Arc<dyn Nexus>, delay: Duration) -> Self {
        let (results, _) = watch::channel(Suggestions::default());
        Self {
            nexus,
            delay,
            generation: Arc::new(AtomicU64::new(0)),
            pending: None,
            results: Arc::new(results),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Suggestions> {
        self.results.subscribe()
    }

    /// Must be called from within a tokio runtime.
    pub fn input(&mut self, text: &str) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }

        let prefix = text.trim().trim_start_matches('#').to_lowercase();
        if prefix.is_empty() {
            self.results.send_replace(Suggestions::default());
            return;
        }

        let nexus = self.nexus.clone();
        let delay = self.delay;
        let current = self.generation.clone();
        let results = self.results.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let tags = match nexus.search_tags(&prefix, TAG_SUGGESTION_LIMIT).await {
                Ok(tags) => tags,
                Err(e) => {
                    warn!(prefix = %prefix, error = %e, "tag search failed");
                    return;
                }
            };
            if current.load(Ordering::SeqCst) != generation {
                trace!(prefix = %prefix, "dropping stale tag suggestions");
                return;
            }
            results.send_replace(Suggestions {
                input: prefix,
                tags,
            });
        }));
    }
}

impl Drop for TagSuggester {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockNexus;

    fn nexus() -> Arc<MockNexus> {
        let nexus = Arc::new(MockNexus::new());
        nexus.set_tags(&["ruby", "rust", "rustlang"]);
        nexus
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_input_cancels_pending_search() {
        let nexus = nexus();
        let mut suggester = TagSuggester::new(nexus.clone());
        let mut rx = suggester.subscribe();

        suggester.input("ru");
        tokio::time::sleep(Duration::from_millis(100)).await;
        suggester.input("#Rust");
        rx.changed().await.unwrap();

        let current = rx.borrow().clone();
        assert_eq!(current.input, "rust");
        assert_eq!(current.tags, vec!["rust", "rustlang"]);
        assert_eq!(nexus.calls(), vec!["search_tags:rust"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_suggester_never_searches() {
        let nexus = nexus();
        let suggester = {
            let mut s = TagSuggester::new(nexus.clone());
            s.input("ru");
            s
        };
        drop(suggester);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(nexus.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clearing_input_clears_suggestions() {
        let nexus = nexus();
        let mut suggester = TagSuggester::new(nexus.clone());
        let rx = suggester.subscribe();

        suggester.input("ru");
        suggester.input("  ");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(*rx.borrow(), Suggestions::default());
        assert!(nexus.calls().is_empty());
    }
}
