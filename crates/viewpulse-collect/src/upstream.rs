//! Upstream metadata source: current counts for a batch of item ids.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use viewpulse_core::{EngineConfig, Error, Result};
use viewpulse_store::ItemCounts;

/// Per-item outcome of one batch call. Ids the source did not return are
/// simply absent; the collector counts them as failures.
pub type BatchFetch = HashMap<String, std::result::Result<ItemCounts, String>>;

/// Whole-batch failure. Both kinds are retried by the collector.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("upstream rejected credentials ({status}): {body}")]
    Unauthorized { status: u16, body: String },

    #[error("upstream transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch counts for up to one batch of ids in a single upstream call.
    async fn fetch_batch(&self, ids: &[String]) -> std::result::Result<BatchFetch, FetchError>;
}

/// YouTube Data API v3 `videos?part=statistics`.
pub struct YouTubeDataSource {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoResource>,
}

#[derive(Deserialize)]
struct VideoResource {
    id: String,
    statistics: Option<VideoStatistics>,
}

/// Counts arrive as decimal strings; like/comment counts are omitted when hidden.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

impl YouTubeDataSource {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let key = config
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("YOUTUBE_API_KEY is not set".into()))?;
        Self::new(&config.api_base_url, key)
    }
}

fn parse_count(raw: Option<&str>) -> std::result::Result<i64, String> {
    match raw {
        None => Ok(0),
        Some(s) => s
            .parse::<i64>()
            .map_err(|_| format!("unparseable count {:?}", s)),
    }
}

fn to_counts(stats: Option<VideoStatistics>) -> std::result::Result<ItemCounts, String> {
    let stats = stats.ok_or_else(|| "statistics missing".to_string())?;
    let views = stats
        .view_count
        .as_deref()
        .ok_or_else(|| "viewCount missing".to_string())?;
    Ok(ItemCounts {
        view_count: parse_count(Some(views))?,
        like_count: parse_count(stats.like_count.as_deref())?,
        comment_count: parse_count(stats.comment_count.as_deref())?,
    })
}

#[async_trait]
impl MetadataSource for YouTubeDataSource {
    async fn fetch_batch(&self, ids: &[String]) -> std::result::Result<BatchFetch, FetchError> {
        let url = format!("{}/videos", self.base_url);
        debug!("Fetching statistics for {} ids", ids.len());

        let response = self
            .client
            .get(&url)
            .query(&[
                ("part", "statistics"),
                ("id", ids.join(",").as_str()),
                ("key", self.api_key.as_str()),
                ("maxResults", "50"),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Transport(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Unauthorized {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Transport(format!("API error {}: {}", status, body)));
        }

        let parsed: VideoListResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Transport(format!("invalid response body: {}", e)))?;

        Ok(parsed
            .items
            .into_iter()
            .map(|video| (video.id, to_counts(video.statistics)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_parses_statistics_and_omits_unknown_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .and(query_param("part", "statistics"))
            .and(query_param("id", "a,b,gone"))
            .and(query_param("key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "a", "statistics": {"viewCount": "5000", "likeCount": "12", "commentCount": "3"}},
                    {"id": "b", "statistics": {"viewCount": "7"}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = YouTubeDataSource::new(server.uri(), "k").unwrap();
        let fetched = source.fetch_batch(&ids(&["a", "b", "gone"])).await.unwrap();

        assert_eq!(fetched.len(), 2);
        let a = fetched["a"].as_ref().unwrap();
        assert_eq!((a.view_count, a.like_count, a.comment_count), (5000, 12, 3));
        let b = fetched["b"].as_ref().unwrap();
        assert_eq!((b.view_count, b.like_count), (7, 0));
        assert!(!fetched.contains_key("gone"));
    }

    #[tokio::test]
    async fn test_bad_item_is_per_item_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "a", "statistics": {"viewCount": "lots"}},
                    {"id": "b"}
                ]
            })))
            .mount(&server)
            .await;

        let source = YouTubeDataSource::new(server.uri(), "k").unwrap();
        let fetched = source.fetch_batch(&ids(&["a", "b"])).await.unwrap();
        assert!(fetched["a"].is_err());
        assert!(fetched["b"].is_err());
    }

    #[tokio::test]
    async fn test_forbidden_is_authorization_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("quotaExceeded"))
            .mount(&server)
            .await;

        let source = YouTubeDataSource::new(server.uri(), "k").unwrap();
        let err = source.fetch_batch(&ids(&["a"])).await.unwrap_err();
        assert!(matches!(err, FetchError::Unauthorized { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = YouTubeDataSource::new(server.uri(), "k").unwrap();
        let err = source.fetch_batch(&ids(&["a"])).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[test]
    fn test_from_config_requires_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::with_defaults(dir.path()).unwrap();
        assert!(matches!(
            YouTubeDataSource::from_config(&config),
            Err(Error::Config(_))
        ));
    }
}
