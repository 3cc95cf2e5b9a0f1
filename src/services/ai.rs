//! Hosted language model client for rule learning and retention scoring
//!
//! Supports Gemini-style and OpenAI-style chat endpoints, selected by the
//! provider field in AI settings. Rate-limit handling is deliberately
//! different from the generic HTTP retry in `rate_limiter`: quota exhaustion
//! from the model provider retries with a long exponential backoff and then
//! surfaces as a dedicated terminal error that fails the enclosing job,
//! rather than quietly producing partial results from a starved provider.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::AiSettingsRecord;

/// Attempts against the provider before giving up on a rate-limited call.
const RATE_LIMIT_ATTEMPTS: u32 = 5;
/// Base delay; attempt n sleeps `base * 2^n`.
const RATE_LIMIT_BASE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum AiError {
    /// Terminal: the provider kept refusing after all backoff attempts.
    #[error("AI provider rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("AI provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI provider returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("AI provider returned an empty response")]
    EmptyResponse,

    #[error("unsupported AI provider: {0}")]
    UnsupportedProvider(String),
}

impl AiError {
    /// Whether this error is the provider telling us to slow down.
    fn is_rate_limit_signal(&self) -> bool {
        match self {
            AiError::Api { status, body } => {
                *status == 429 || body.to_ascii_uppercase().contains("RESOURCE_EXHAUSTED")
            }
            _ => false,
        }
    }
}

/// Which configured model a call should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Learning,
    Scoring,
}

/// Retry a model call on rate-limit signals with exponential backoff.
/// Non-rate-limit errors pass through untouched.
pub async fn with_rate_limit_retry<T, F, Fut>(mut operation: F) -> Result<T, AiError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AiError>>,
{
    let mut last_attempt = 0;
    for attempt in 0..RATE_LIMIT_ATTEMPTS {
        last_attempt = attempt + 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_rate_limit_signal() => {
                if attempt + 1 == RATE_LIMIT_ATTEMPTS {
                    break;
                }
                let delay = RATE_LIMIT_BASE * 2u32.pow(attempt);
                warn!(
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    "AI provider rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(AiError::RateLimitExceeded {
        attempts: last_attempt,
    })
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: String,
}

/// Client for the configured AI provider
pub struct AiClient {
    http: reqwest::Client,
    provider: String,
    api_key: String,
    learning_model: String,
    scoring_model: String,
}

impl AiClient {
    pub fn from_settings(settings: &AiSettingsRecord) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to create HTTP client"),
            provider: settings.provider.to_ascii_lowercase(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            learning_model: settings.learning_model.clone(),
            scoring_model: settings.scoring_model.clone(),
        }
    }

    fn model_for(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Learning => &self.learning_model,
            ModelRole::Scoring => &self.scoring_model,
        }
    }

    /// Send one prompt and return the raw response text, retrying on
    /// rate-limit signals per the backoff policy above.
    pub async fn call_model(&self, prompt: &str, role: ModelRole) -> Result<String, AiError> {
        with_rate_limit_retry(|| self.call_model_once(prompt, role)).await
    }

    async fn call_model_once(&self, prompt: &str, role: ModelRole) -> Result<String, AiError> {
        match self.provider.as_str() {
            "gemini" => self.call_gemini(prompt, role).await,
            "openai" => self.call_openai(prompt, role).await,
            other => Err(AiError::UnsupportedProvider(other.to_string())),
        }
    }

    async fn call_gemini(&self, prompt: &str, role: ModelRole) -> Result<String, AiError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model_for(role)
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api { status, body });
        }

        let parsed: GeminiResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(AiError::EmptyResponse);
        }
        Ok(text)
    }

    async fn call_openai(&self, prompt: &str, role: ModelRole) -> Result<String, AiError> {
        let url = "https://api.openai.com/v1/chat/completions";
        let body = json!({
            "model": self.model_for(role),
            "messages": [
                { "role": "system", "content": "You are a helpful assistant." },
                { "role": "user", "content": prompt }
            ]
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api { status, body });
        }

        let parsed: OpenAiResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if text.is_empty() {
            return Err(AiError::EmptyResponse);
        }
        Ok(text)
    }

    /// Ask the learning model for rule proposals based on kept/deleted
    /// exemplars. Returns the raw response; the caller parses it into a
    /// proposal document.
    pub async fn generate_rules(
        &self,
        kept_items: &JsonValue,
        deleted_items: &JsonValue,
        current_rules: &str,
    ) -> Result<String, AiError> {
        let prompt = format!(
            r#"You are an expert media curator. Analyze the user's library to understand their taste.

Here are items the user explicitly KEPT:
{kept}

Here are items the user explicitly DELETED:
{deleted}

Current rules (if any):
{rules}

Propose updates to the rules that capture the user's preferences. Focus on genres, years, themes, keywords in overviews, and ratings.
Respond with a JSON object of the form:
{{"refinements": [{{"original": "<existing rule text>", "proposed": "<replacement text>", "reason": "<why>"}}],
 "new_rules": [{{"rule": "<new rule text>", "reason": "<why>"}}]}}
Do not include markdown formatting like ```json. Just the raw JSON string."#,
            kept = serde_json::to_string_pretty(kept_items).unwrap_or_default(),
            deleted = serde_json::to_string_pretty(deleted_items).unwrap_or_default(),
            rules = current_rules,
        );

        self.call_model(&prompt, ModelRole::Learning).await
    }

    /// Ask the scoring model for 0-100 retention scores for a batch of items.
    /// Returns the raw key/value map; non-integer values and unknown keys are
    /// the caller's problem to drop.
    pub async fn score_items(
        &self,
        items: &JsonValue,
        rules: &str,
    ) -> Result<HashMap<String, JsonValue>, AiError> {
        let prompt = format!(
            r#"You are an expert media curator. Score the following items based on these rules:

RULES:
{rules}

ITEMS TO SCORE:
{items}

For each item, assign a score from 0 to 100, where 0 is a definite delete and 100 is a definite keep.
Return the result as a JSON object where the keys are the item IDs and the values are the integer scores.
Example format: {{ "123": 85, "456": 10 }}
Do not include markdown formatting like ```json. Just the raw JSON string."#,
            rules = rules,
            items = serde_json::to_string_pretty(items).unwrap_or_default(),
        );

        let response = self.call_model(&prompt, ModelRole::Scoring).await?;
        let cleaned = strip_code_fences(&response);

        match serde_json::from_str::<HashMap<String, JsonValue>>(&cleaned) {
            Ok(scores) => {
                debug!(count = scores.len(), "Parsed score map from model response");
                Ok(scores)
            }
            Err(e) => {
                // Malformed output is recovered locally, never a job failure.
                warn!(error = %e, "Failed to decode score JSON from model response");
                Ok(HashMap::new())
            }
        }
    }
}

/// Strip markdown code fences from a model response, leaving the payload.
pub fn strip_code_fences(response: &str) -> String {
    let trimmed = response.trim();

    if trimmed.starts_with("```") {
        let lines: Vec<&str> = trimmed.lines().collect();
        if lines.len() >= 3 {
            // Skip first line (```json) and last line (```)
            return lines[1..lines.len() - 1].join("\n");
        }
    }

    // A fenced block embedded in prose: take what's between the fences.
    if let Some(start) = trimmed.find("```") {
        if let Some(end) = trimmed.rfind("```") {
            if end > start {
                let inner = &trimmed[start + 3..end];
                return inner
                    .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
                    .trim()
                    .to_string();
            }
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rate_limited() -> AiError {
        AiError::Api {
            status: 429,
            body: "too many requests".to_string(),
        }
    }

    #[test]
    fn test_rate_limit_signal_detection() {
        assert!(rate_limited().is_rate_limit_signal());
        assert!(AiError::Api {
            status: 500,
            body: r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#.to_string(),
        }
        .is_rate_limit_signal());
        assert!(!AiError::Api {
            status: 400,
            body: "bad request".to_string(),
        }
        .is_rate_limit_signal());
        assert!(!AiError::EmptyResponse.is_rate_limit_signal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_four_rate_limits_then_success() {
        let attempts = AtomicU32::new(0);

        let result = with_rate_limit_retry(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 5 {
                    Err(rate_limited())
                } else {
                    Ok("scored")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "scored");
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_rate_limits_is_terminal() {
        let attempts = AtomicU32::new(0);

        let result: Result<&str, AiError> = with_rate_limit_retry(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(rate_limited()) }
        })
        .await;

        assert!(matches!(
            result,
            Err(AiError::RateLimitExceeded { attempts: 5 })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_non_rate_limit_error_passes_through() {
        let attempts = AtomicU32::new(0);

        let result: Result<&str, AiError> = with_rate_limit_retry(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AiError::EmptyResponse) }
        })
        .await;

        assert!(matches!(result, Err(AiError::EmptyResponse)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_strip_fences_raw_json() {
        assert_eq!(strip_code_fences(r#"{"1": 90}"#), r#"{"1": 90}"#);
    }

    #[test]
    fn test_strip_fences_fenced_json() {
        let fenced = "```json\n{\"1\": 90}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"1\": 90}");
    }
}
