// SPDX-License-Identifier: MPL-2.0

use crate::config::{DEFAULT_NEXUS, NEXUS_TIMEOUT_SECS};
use crate::remote::{
    ClientError, Nexus, NexusNotification, NexusPost, NexusUser, StreamPage, StreamQuery,
};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use url::Url;

#[derive(Serialize)]
struct UsersByIds<'a> {
    user_ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    viewer_id: Option<&'a str>,
}

#[derive(Serialize)]
struct PostsByIds<'a> {
    post_ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    viewer_id: Option<&'a str>,
}

/// Nexus v0 REST client.
pub struct HttpNexus {
    http: reqwest::Client,
    base: Url,
}

impl HttpNexus {
    pub fn new() -> Result<Self, ClientError> {
        Self::with_base(DEFAULT_NEXUS)
    }

    pub fn with_base(base: &str) -> Result<Self, ClientError> {
        let base = Url::parse(base)
            .map_err(|e| ClientError::InvalidResponse(format!("invalid nexus url: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(NEXUS_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|e| ClientError::InvalidResponse(format!("invalid endpoint {path}: {e}")))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    fn stream_url(&self, path: &str, query: &StreamQuery) -> Result<Url, ClientError> {
        let mut url = self.endpoint(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("source", &query.stream_id);
            pairs.append_pair("limit", &query.limit.to_string());
            if let Some(viewer) = &query.viewer_id {
                pairs.append_pair("viewer_id", viewer);
            }
            if let Some(start) = query.start {
                pairs.append_pair("start", &start.to_string());
            }
            if let Some(end) = query.end {
                pairs.append_pair("end", &end.to_string());
            }
            if let Some(skip) = query.skip {
                pairs.append_pair("skip", &skip.to_string());
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Nexus for HttpNexus {
    async fn users_by_ids(
        &self,
        user_ids: &[String],
        viewer_id: Option<&str>,
    ) -> Result<Vec<NexusUser>, ClientError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.endpoint("v0/stream/users/by_ids")?;
        let response = self
            .http
            .post(url)
            .json(&UsersByIds {
                user_ids,
                viewer_id,
            })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn posts_by_ids(
        &self,
        post_ids: &[String],
        viewer_id: Option<&str>,
    ) -> Result<Vec<NexusPost>, ClientError> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.endpoint("v0/stream/posts/by_ids")?;
        let response = self
            .http
            .post(url)
            .json(&PostsByIds {
                post_ids,
                viewer_id,
            })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn stream_post_keys(&self, query: &StreamQuery) -> Result<StreamPage, ClientError> {
        let url = self.stream_url("v0/stream/posts/keys", query)?;
        let response = self.http.get(url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn stream_user_ids(&self, query: &StreamQuery) -> Result<Vec<String>, ClientError> {
        let url = self.stream_url("v0/stream/users/ids", query)?;
        let response = self.http.get(url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn search_tags(&self, prefix: &str, limit: usize) -> Result<Vec<String>, ClientError> {
        let mut url = self.endpoint("v0/search/tags/by_prefix/")?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidResponse("nexus url cannot be a base".into()))?
            .pop_if_empty()
            .push(prefix);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());

        let response = self.http.get(url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn notifications(
        &self,
        user_id: &str,
        since: Option<i64>,
    ) -> Result<Vec<NexusNotification>, ClientError> {
        let mut url = self.endpoint("v0/user/")?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidResponse("nexus url cannot be a base".into()))?
            .pop_if_empty()
            .push(user_id)
            .push("notifications");
        if let Some(since) = since {
            url.query_pairs_mut().append_pair("start", &since.to_string());
        }

        let response = self.http.get(url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url_carries_bounds() {
        let nexus = HttpNexus::with_base("https://nexus.example/").unwrap();
        let query = StreamQuery {
            stream_id: "following:timeline:all".into(),
            viewer_id: Some("viewer".into()),
            start: Some(100),
            end: None,
            skip: None,
            limit: 10,
        };
        let url = nexus.stream_url("v0/stream/posts/keys", &query).unwrap();
        assert_eq!(url.path(), "/v0/stream/posts/keys");
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("source".into(), "following:timeline:all".into())));
        assert!(query.contains(&("start".into(), "100".into())));
        assert!(query.contains(&("viewer_id".into(), "viewer".into())));
        assert!(!query.iter().any(|(k, _)| k == "end"));
    }

    #[test]
    fn test_invalid_base_rejected() {
        assert!(HttpNexus::with_base("not a url").is_err());
    }
}
