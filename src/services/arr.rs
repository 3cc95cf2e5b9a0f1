//! Library manager API client (Radarr/Sonarr-style `/api/v3`)
//!
//! One client per configured connection. The same client serves both media
//! kinds; [MediaKind] supplies the resource paths and payload keys that
//! differ between the movie and series services.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::rate_limiter::{retry_async, RateLimitedClient, ResponseExt, RetryConfig};
use crate::scoring::{LabelDelta, MediaKind};

/// A tag definition on the remote service
#[derive(Debug, Clone, Deserialize)]
pub struct ArrTag {
    pub id: i64,
    pub label: String,
}

/// A library item as returned by the list endpoint
///
/// Movies report `sizeOnDisk` at the top level; series nest it under
/// `statistics`. Both shapes deserialize here and `size_gb` picks whichever
/// is present.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrItem {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub tmdb_id: Option<i64>,
    #[serde(default)]
    pub tvdb_id: Option<i64>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub size_on_disk: Option<i64>,
    #[serde(default)]
    pub statistics: Option<ArrItemStatistics>,
    #[serde(default)]
    pub tags: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrItemStatistics {
    #[serde(default)]
    pub size_on_disk: Option<i64>,
}

impl ArrItem {
    /// Size on disk in gigabytes, from whichever field the service reports.
    pub fn size_gb(&self) -> Option<f64> {
        self.size_on_disk
            .or_else(|| self.statistics.as_ref().and_then(|s| s.size_on_disk))
            .map(|bytes| bytes as f64 / (1024u64.pow(3) as f64))
    }
}

/// Direction of a bulk tag edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagApply {
    Add,
    Remove,
}

impl TagApply {
    fn as_str(&self) -> &'static str {
        match self {
            TagApply::Add => "add",
            TagApply::Remove => "remove",
        }
    }
}

/// Client for one library manager connection
pub struct ArrClient {
    http: RateLimitedClient,
    base_url: String,
    api_key: String,
    kind: MediaKind,
    retry_config: RetryConfig,
}

impl ArrClient {
    pub fn new(kind: MediaKind, base_url: &str, api_key: &str) -> Self {
        Self {
            http: RateLimitedClient::for_library_manager(kind.service()),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            kind,
            retry_config: RetryConfig::default(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    fn headers(&self) -> [(&str, &str); 1] {
        [("X-Api-Key", self.api_key.as_str())]
    }

    /// Fetch the full tag catalog (id <-> label)
    pub async fn list_tags(&self) -> Result<Vec<ArrTag>> {
        let url = format!("{}/api/v3/tag", self.base_url);

        retry_async(
            || async {
                let response = self
                    .http
                    .get_with_headers_and_query(&url, &self.headers(), &[] as &[(&str, &str)])
                    .await?;

                if response.is_transient_error() {
                    anyhow::bail!("transient failure with status: {}", response.status());
                }
                if !response.status().is_success() {
                    anyhow::bail!("tag list failed with status: {}", response.status());
                }

                response
                    .json::<Vec<ArrTag>>()
                    .await
                    .context("Failed to parse tag list")
            },
            &self.retry_config,
            "arr_list_tags",
        )
        .await
    }

    /// Create a tag definition, returning its assigned id
    pub async fn create_tag(&self, label: &str) -> Result<ArrTag> {
        let url = format!("{}/api/v3/tag", self.base_url);
        info!(service = self.kind.service(), label = %label, "Creating remote tag");

        let response = self
            .http
            .post_json(&url, &self.headers(), &json!({ "label": label }))
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("tag create failed with status: {}", response.status());
        }

        response
            .json::<ArrTag>()
            .await
            .context("Failed to parse created tag")
    }

    /// Fetch the full item list in remote order
    pub async fn list_items(&self) -> Result<Vec<ArrItem>> {
        let url = format!("{}/api/v3/{}", self.base_url, self.kind.item_resource());

        retry_async(
            || async {
                let response = self
                    .http
                    .get_with_headers_and_query(&url, &self.headers(), &[] as &[(&str, &str)])
                    .await?;

                if response.is_transient_error() {
                    anyhow::bail!("transient failure with status: {}", response.status());
                }
                if !response.status().is_success() {
                    anyhow::bail!("item list failed with status: {}", response.status());
                }

                response
                    .json::<Vec<ArrItem>>()
                    .await
                    .context("Failed to parse item list")
            },
            &self.retry_config,
            "arr_list_items",
        )
        .await
    }

    /// Issue one bulk editor call adding or removing tag ids on the given items
    pub async fn bulk_edit_tags(
        &self,
        item_ids: &[i64],
        tag_ids: &[i64],
        apply: TagApply,
    ) -> Result<()> {
        if item_ids.is_empty() || tag_ids.is_empty() {
            return Ok(());
        }

        let url = format!(
            "{}/api/v3/{}/editor",
            self.base_url,
            self.kind.item_resource()
        );
        let payload = json!({
            (self.kind.id_key()): item_ids,
            "tags": tag_ids,
            "applyTags": apply.as_str(),
        });

        debug!(
            service = self.kind.service(),
            items = item_ids.len(),
            tags = tag_ids.len(),
            apply = apply.as_str(),
            "Bulk tag edit"
        );

        let response = self.http.put_json(&url, &self.headers(), &payload).await?;
        if !response.status().is_success() {
            anyhow::bail!("bulk tag edit failed with status: {}", response.status());
        }

        Ok(())
    }

    /// Apply one label delta to a group of items: resolve label names to tag
    /// ids (creating missing definitions on first use), then issue one bulk
    /// add call and one bulk remove call.
    pub async fn apply_label_delta(&self, item_ids: &[i64], delta: &LabelDelta) -> Result<()> {
        if item_ids.is_empty() || delta.is_empty() {
            return Ok(());
        }

        let mut label_to_id: HashMap<String, i64> = self
            .list_tags()
            .await?
            .into_iter()
            .map(|t| (t.label.to_ascii_lowercase(), t.id))
            .collect();

        let mut ids_to_add = Vec::new();
        for label in &delta.add {
            match label_to_id.get(label.as_str()) {
                Some(id) => ids_to_add.push(*id),
                None => match self.create_tag(label.as_str()).await {
                    Ok(tag) => {
                        label_to_id.insert(tag.label.to_ascii_lowercase(), tag.id);
                        ids_to_add.push(tag.id);
                    }
                    Err(e) => {
                        warn!(service = self.kind.service(), label = %label, error = %e, "Failed to create tag");
                    }
                },
            }
        }

        let ids_to_remove: Vec<i64> = delta
            .remove
            .iter()
            .filter_map(|label| label_to_id.get(label.as_str()).copied())
            .collect();

        self.bulk_edit_tags(item_ids, &ids_to_add, TagApply::Add)
            .await?;
        self.bulk_edit_tags(item_ids, &ids_to_remove, TagApply::Remove)
            .await?;

        Ok(())
    }

    /// Destructive delete of one item: remove files, skip the exclusion list.
    pub async fn delete_item(&self, remote_id: i64) -> Result<()> {
        let url = format!(
            "{}/api/v3/{}/{}",
            self.base_url,
            self.kind.item_resource(),
            remote_id
        );
        let query = [
            ("deleteFiles", "true"),
            (self.kind.exclusion_param(), "false"),
        ];

        info!(service = self.kind.service(), remote_id, "Deleting remote item");

        let response = self
            .http
            .delete_with_query(&url, &self.headers(), &query)
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("remote delete failed with status: {}", response.status());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_size_prefers_top_level() {
        let item: ArrItem = serde_json::from_value(json!({
            "id": 1,
            "sizeOnDisk": 2_147_483_648i64,
            "tags": []
        }))
        .unwrap();
        assert_eq!(item.size_gb(), Some(2.0));
    }

    #[test]
    fn test_item_size_falls_back_to_statistics() {
        let item: ArrItem = serde_json::from_value(json!({
            "id": 2,
            "statistics": { "sizeOnDisk": 1_073_741_824i64 },
            "tags": [3, 4]
        }))
        .unwrap();
        assert_eq!(item.size_gb(), Some(1.0));
        assert_eq!(item.tags, vec![3, 4]);
    }

    #[test]
    fn test_item_tolerates_sparse_payload() {
        let item: ArrItem = serde_json::from_value(json!({ "id": 3 })).unwrap();
        assert_eq!(item.size_gb(), None);
        assert!(item.tags.is_empty());
    }
}
