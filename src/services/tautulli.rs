//! Watch-history service API client (Tautulli-style `/api/v2`)

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use super::rate_limiter::{retry_async, RateLimitedClient, RetryConfig};

/// One playback history row from the service
///
/// `full_title` is the exact display title used for rescue matching against
/// local items.
#[derive(Debug, Clone, Deserialize)]
pub struct TautulliHistoryItem {
    pub id: i64,
    pub full_title: String,
    #[serde(default)]
    pub user: String,
    /// Unix timestamp of the playback
    pub date: i64,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub duration_in_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    response: HistoryResponse,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    data: HistoryData,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    #[serde(default)]
    data: Vec<TautulliHistoryItem>,
}

/// Client for the watch-history service
pub struct TautulliClient {
    http: RateLimitedClient,
    base_url: String,
    api_key: String,
    retry_config: RetryConfig,
}

impl TautulliClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: RateLimitedClient::for_tautulli(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            retry_config: RetryConfig::default(),
        }
    }

    /// Fetch playback history after the given date, newest first.
    pub async fn get_history(
        &self,
        after: NaiveDate,
        length: u32,
    ) -> Result<Vec<TautulliHistoryItem>> {
        let url = format!("{}/api/v2", self.base_url);
        let after_str = after.format("%Y-%m-%d").to_string();
        let length_str = length.to_string();

        retry_async(
            || async {
                let query = [
                    ("cmd", "get_history"),
                    ("apikey", self.api_key.as_str()),
                    ("length", length_str.as_str()),
                    ("after", after_str.as_str()),
                ];

                let response = self
                    .http
                    .get_with_headers_and_query(&url, &[], &query)
                    .await?;

                if !response.status().is_success() {
                    anyhow::bail!("history fetch failed with status: {}", response.status());
                }

                let envelope: HistoryEnvelope = response
                    .json()
                    .await
                    .context("Failed to parse history response")?;

                Ok(envelope.response.data.data)
            },
            &self.retry_config,
            "tautulli_get_history",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_envelope_parses() {
        let body = r#"{
            "response": {
                "result": "success",
                "data": {
                    "recordsTotal": 2,
                    "data": [
                        {"id": 10, "full_title": "Blade Runner", "user": "sam", "date": 1709300000,
                         "state": null, "duration_in_seconds": 6600},
                        {"id": 11, "full_title": "Severance", "user": "sam", "date": 1709310000}
                    ]
                }
            }
        }"#;

        let envelope: HistoryEnvelope = serde_json::from_str(body).unwrap();
        let items = envelope.response.data.data;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].full_title, "Blade Runner");
        assert_eq!(items[0].duration_in_seconds, Some(6600));
        assert_eq!(items[1].duration_in_seconds, None);
    }
}
