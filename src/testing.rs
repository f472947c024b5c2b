// SPDX-License-Identifier: MPL-2.0

//! In-memory remote collaborators and record builders for unit tests.

use crate::actions::Notifier;
use crate::remote::{
    ClientError, Homeserver, HomeserverAction, Nexus, NexusNotification, NexusPost,
    NexusPostCounts, NexusPostDetails, NexusUser, NexusUserCounts, NexusUserDetails, StreamPage,
    StreamQuery,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub fn nexus_post(author: &str, id: &str, indexed_at: i64) -> NexusPost {
    NexusPost {
        details: NexusPostDetails {
            id: id.to_string(),
            author: author.to_string(),
            content: format!("post {id} by {author}"),
            kind: "short".to_string(),
            uri: format!("pubky://{author}/pub/pubky.app/posts/{id}"),
            indexed_at,
            attachments: Vec::new(),
        },
        counts: NexusPostCounts {
            replies: 1,
            ..Default::default()
        },
        tags: Vec::new(),
    }
}

pub fn nexus_user(id: &str) -> NexusUser {
    NexusUser {
        details: NexusUserDetails {
            id: id.to_string(),
            name: id.to_string(),
            indexed_at: 1,
            ..Default::default()
        },
        counts: NexusUserCounts {
            followers: 1,
            following: 1,
            ..Default::default()
        },
        tags: Vec::new(),
        relationship: None,
    }
}

fn offline() -> ClientError {
    ClientError::Network("offline".into())
}

/// Nexus backed by maps; streams are stored newest first.
#[derive(Default)]
pub struct MockNexus {
    posts: Mutex<HashMap<String, NexusPost>>,
    users: Mutex<HashMap<String, NexusUser>>,
    post_streams: Mutex<HashMap<String, Vec<String>>>,
    user_streams: Mutex<HashMap<String, Vec<String>>>,
    tags: Mutex<Vec<String>>,
    notifications: Mutex<Vec<NexusNotification>>,
    calls: Mutex<Vec<String>>,
    failing: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MockNexus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add posts and put their keys at the head of `stream_id`, in order.
    pub fn publish(&self, stream_id: &str, posts: &[NexusPost]) {
        let mut keys = Vec::new();
        {
            let mut stored = self.posts.lock().unwrap();
            for post in posts {
                let key = format!("{}:{}", post.details.author, post.details.id);
                stored.insert(key.clone(), post.clone());
                keys.push(key);
            }
        }
        let mut streams = self.post_streams.lock().unwrap();
        let stream = streams.entry(stream_id.to_string()).or_default();
        keys.extend(stream.drain(..));
        *stream = keys;
    }

    pub fn set_user_stream(&self, stream_id: &str, users: &[NexusUser]) {
        let mut stored = self.users.lock().unwrap();
        for user in users {
            stored.insert(user.details.id.clone(), user.clone());
        }
        self.user_streams.lock().unwrap().insert(
            stream_id.to_string(),
            users.iter().map(|u| u.details.id.clone()).collect(),
        );
    }

    pub fn set_tags(&self, tags: &[&str]) {
        *self.tags.lock().unwrap() = tags.iter().map(|t| t.to_string()).collect();
    }

    pub fn push_notification(&self, notification: NexusNotification) {
        self.notifications.lock().unwrap().push(notification);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make `posts_by_ids` wait, so concurrent fetches interleave.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Every call made so far, as `method` or `method:argument`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.split(':').next() == Some(method))
            .count()
    }

    fn record(&self, call: String) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.load(Ordering::SeqCst) {
            Err(offline())
        } else {
            Ok(())
        }
    }

    fn indexed_at(&self, key: &str) -> i64 {
        self.posts
            .lock()
            .unwrap()
            .get(key)
            .map(|p| p.details.indexed_at)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Nexus for MockNexus {
    async fn users_by_ids(
        &self,
        user_ids: &[String],
        _viewer_id: Option<&str>,
    ) -> Result<Vec<NexusUser>, ClientError> {
        self.record("users_by_ids".into())?;
        let users = self.users.lock().unwrap();
        Ok(user_ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }

    async fn posts_by_ids(
        &self,
        post_ids: &[String],
        _viewer_id: Option<&str>,
    ) -> Result<Vec<NexusPost>, ClientError> {
        self.record("posts_by_ids".into())?;
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let posts = self.posts.lock().unwrap();
        Ok(post_ids.iter().filter_map(|id| posts.get(id).cloned()).collect())
    }

    async fn stream_post_keys(&self, query: &StreamQuery) -> Result<StreamPage, ClientError> {
        self.record(format!("stream_post_keys:{}", query.stream_id))?;
        let stream = self
            .post_streams
            .lock()
            .unwrap()
            .get(&query.stream_id)
            .cloned()
            .unwrap_or_default();

        let keys: Vec<String> = stream
            .into_iter()
            .filter(|key| {
                let at = self.indexed_at(key);
                query.start.is_none_or(|start| at > start) && query.end.is_none_or(|end| at < end)
            })
            .take(query.limit)
            .collect();
        let last_indexed_at = keys.last().map(|k| self.indexed_at(k));
        Ok(StreamPage {
            keys,
            last_indexed_at,
        })
    }

    async fn stream_user_ids(&self, query: &StreamQuery) -> Result<Vec<String>, ClientError> {
        self.record(format!("stream_user_ids:{}", query.stream_id))?;
        let streams = self.user_streams.lock().unwrap();
        Ok(streams
            .get(&query.stream_id)
            .map(|ids| {
                ids.iter()
                    .skip(query.skip.unwrap_or(0))
                    .take(query.limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn search_tags(&self, prefix: &str, limit: usize) -> Result<Vec<String>, ClientError> {
        self.record(format!("search_tags:{prefix}"))?;
        let tags = self.tags.lock().unwrap();
        Ok(tags
            .iter()
            .filter(|t| t.starts_with(prefix))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn notifications(
        &self,
        _user_id: &str,
        since: Option<i64>,
    ) -> Result<Vec<NexusNotification>, ClientError> {
        self.record("notifications".into())?;
        let all = self.notifications.lock().unwrap();
        Ok(all
            .iter()
            .filter(|n| since.is_none_or(|since| n.timestamp > since))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub action: HomeserverAction,
    pub url: String,
    pub payload: Option<serde_json::Value>,
}

/// Homeserver that records writes and can be switched to fail them.
#[derive(Default)]
pub struct MockHomeserver {
    requests: Mutex<Vec<RecordedRequest>>,
    failing: AtomicBool,
    failing_paths: Mutex<Vec<String>>,
    delays: Mutex<Vec<(String, Duration)>>,
}

impl MockHomeserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let homeserver = Self::default();
        homeserver.set_failing(true);
        homeserver
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail every request whose url contains `fragment`.
    pub fn fail_matching(&self, fragment: &str) {
        self.failing_paths.lock().unwrap().push(fragment.to_string());
    }

    /// Hold requests whose url contains `fragment` for `delay` before answering.
    pub fn delay_matching(&self, fragment: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .push((fragment.to_string(), delay));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Homeserver for MockHomeserver {
    async fn request(
        &self,
        action: HomeserverAction,
        url: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            action,
            url: url.to_string(),
            payload,
        });
        let delay = self
            .delays
            .lock()
            .unwrap()
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let path_fails = self
            .failing_paths
            .lock()
            .unwrap()
            .iter()
            .any(|fragment| url.contains(fragment.as_str()));
        if path_fails || self.failing.load(Ordering::SeqCst) {
            Err(ClientError::Rejected {
                status: 500,
                message: "homeserver unavailable".into(),
            })
        } else {
            Ok(())
        }
    }

    async fn list(
        &self,
        _base_uri: &str,
        _cursor: Option<&str>,
        _reverse: bool,
        _limit: usize,
    ) -> Result<Vec<String>, ClientError> {
        Ok(Vec::new())
    }

    async fn get(&self, _uri: &str) -> Result<Vec<u8>, ClientError> {
        Ok(Vec::new())
    }
}

/// Notifier that keeps every message it was asked to show.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_failure(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
