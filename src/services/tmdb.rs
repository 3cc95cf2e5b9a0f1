//! TMDB (The Movie Database) API client for descriptive assets
//!
//! Base URL: https://api.themoviedb.org/3
//!
//! Movies are looked up by their native TMDB id. Shows carry a TVDB id from
//! the series manager, so they go through `/find/{id}` with
//! `external_source=tvdb_id` first. Rate limiting: TMDB allows ~40 requests
//! per 10 seconds; this client uses rate limiting and retry logic to handle
//! that gracefully.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use super::rate_limiter::{retry_async, RateLimitedClient, RetryConfig};
use crate::scoring::MediaKind;

/// Descriptive assets fetched for one item
#[derive(Debug, Clone)]
pub struct TmdbAssets {
    /// Relative poster path under the poster directory, e.g. `movie_603.jpg`
    pub poster_path: Option<String>,
    pub overview: Option<String>,
    /// Top-billed cast, comma separated
    pub cast_names: Option<String>,
    /// Resolved TMDB id (differs from the input for TVDB-keyed shows)
    pub tmdb_id: i64,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    tv_results: Vec<FindResult>,
}

#[derive(Debug, Deserialize)]
struct FindResult {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    credits: Option<Credits>,
}

#[derive(Debug, Deserialize)]
struct Credits {
    #[serde(default)]
    cast: Vec<CastMember>,
}

#[derive(Debug, Deserialize)]
struct CastMember {
    name: String,
}

/// TMDB API client with rate limiting and retry logic
pub struct TmdbClient {
    client: RateLimitedClient,
    base_url: String,
    api_key: String,
    retry_config: RetryConfig,
}

impl TmdbClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: RateLimitedClient::for_tmdb(),
            base_url: "https://api.themoviedb.org/3".to_string(),
            api_key,
            retry_config: RetryConfig {
                max_retries: 3,
                ..RetryConfig::default()
            },
        }
    }

    /// Resolve a TVDB series id to a TMDB id via the cross-reference endpoint
    pub async fn find_by_tvdb(&self, tvdb_id: i64) -> Result<Option<i64>> {
        let url = format!("{}/find/{}", self.base_url, tvdb_id);

        let found = retry_async(
            || async {
                let response = self
                    .client
                    .get_with_headers_and_query(
                        &url,
                        &[],
                        &[
                            ("api_key", self.api_key.as_str()),
                            ("external_source", "tvdb_id"),
                        ],
                    )
                    .await?;

                if response.status().as_u16() == 429 {
                    anyhow::bail!("Rate limited (429)");
                }
                if !response.status().is_success() {
                    anyhow::bail!("TMDB find failed with status: {}", response.status());
                }

                response
                    .json::<FindResponse>()
                    .await
                    .context("Failed to parse TMDB find response")
            },
            &self.retry_config,
            "tmdb_find_by_tvdb",
        )
        .await?;

        Ok(found.tv_results.first().map(|r| r.id))
    }

    /// Fetch overview, top cast, and the poster for an item, writing the
    /// poster into `poster_dir`. `media_id` is the TMDB id for movies and the
    /// TVDB id for shows.
    pub async fn fetch_assets(
        &self,
        kind: MediaKind,
        media_id: i64,
        poster_dir: &Path,
    ) -> Result<Option<TmdbAssets>> {
        let (resource, tmdb_id) = match kind {
            MediaKind::Movie => ("movie", Some(media_id)),
            MediaKind::Show => ("tv", self.find_by_tvdb(media_id).await?),
        };

        let Some(tmdb_id) = tmdb_id else {
            debug!(kind = kind.as_str(), media_id, "No TMDB id found");
            return Ok(None);
        };

        let url = format!("{}/{}/{}", self.base_url, resource, tmdb_id);

        let details = retry_async(
            || async {
                let response = self
                    .client
                    .get_with_headers_and_query(
                        &url,
                        &[],
                        &[
                            ("api_key", self.api_key.as_str()),
                            ("append_to_response", "credits"),
                        ],
                    )
                    .await?;

                if response.status().as_u16() == 429 {
                    anyhow::bail!("Rate limited (429)");
                }
                if !response.status().is_success() {
                    anyhow::bail!("TMDB details failed with status: {}", response.status());
                }

                response
                    .json::<DetailsResponse>()
                    .await
                    .context("Failed to parse TMDB details")
            },
            &self.retry_config,
            "tmdb_fetch_details",
        )
        .await?;

        let cast_names = details.credits.as_ref().map(|c| {
            c.cast
                .iter()
                .take(5)
                .map(|m| m.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        });

        let poster_path = match &details.poster_path {
            Some(remote_path) => {
                let filename = format!("{}_{}.jpg", resource, tmdb_id);
                match self.download_poster(remote_path, poster_dir, &filename).await {
                    Ok(_) => Some(filename),
                    Err(e) => {
                        warn!(tmdb_id, error = %e, "Poster download failed");
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Some(TmdbAssets {
            poster_path,
            overview: details.overview,
            cast_names: cast_names.filter(|c| !c.is_empty()),
            tmdb_id,
        }))
    }

    /// Download a w500 poster image to disk
    async fn download_poster(
        &self,
        remote_path: &str,
        poster_dir: &Path,
        filename: &str,
    ) -> Result<PathBuf> {
        let url = format!("https://image.tmdb.org/t/p/w500{}", remote_path);

        self.client.wait_for_permit().await;
        let response = self
            .client
            .inner()
            .get(&url)
            .send()
            .await
            .context("Poster request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("poster fetch failed with status: {}", response.status());
        }

        let bytes = response.bytes().await.context("Failed to read poster body")?;

        tokio::fs::create_dir_all(poster_dir)
            .await
            .context("Failed to create poster directory")?;
        let dest = poster_dir.join(filename);
        tokio::fs::write(&dest, &bytes)
            .await
            .context("Failed to write poster file")?;

        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_response_parses() {
        let body = r#"{"movie_results": [], "tv_results": [{"id": 95396, "name": "Severance"}]}"#;
        let found: FindResponse = serde_json::from_str(body).unwrap();
        assert_eq!(found.tv_results[0].id, 95396);
    }

    #[test]
    fn test_details_cast_extraction() {
        let body = r#"{
            "overview": "A mind-bending workplace thriller.",
            "poster_path": "/abc.jpg",
            "credits": {"cast": [
                {"name": "Adam Scott"}, {"name": "Britt Lower"}, {"name": "Zach Cherry"},
                {"name": "Tramell Tillman"}, {"name": "Patricia Arquette"}, {"name": "John Turturro"}
            ]}
        }"#;
        let details: DetailsResponse = serde_json::from_str(body).unwrap();
        let cast: Vec<_> = details.credits.unwrap().cast.into_iter().take(5).collect();
        assert_eq!(cast.len(), 5);
        assert_eq!(cast[0].name, "Adam Scott");
    }
}
