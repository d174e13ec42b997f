use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

const MAX_PROMPT_CHARS: usize = 2000;
const FALLBACK_SCORE: f64 = 75.0;
const MAX_SUGGESTIONS: usize = 3;
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("scoring request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("scoring provider returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentScore {
    pub score: f64,
    pub suggestions: Vec<String>,
}

#[async_trait]
pub trait ContentScorer: Send + Sync {
    async fn score(
        &self,
        content: &str,
        stage_name: Option<&str>,
    ) -> Result<ContentScore, ScoringError>;
}

#[derive(Clone)]
pub struct AnthropicScorer {
    api_key: String,
    base_url: String,
    model: String,
    http: Client,
}

impl AnthropicScorer {
    pub fn new(http: &Client, api_key: &str, base_url: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http: http.clone(),
        }
    }
}

#[async_trait]
impl ContentScorer for AnthropicScorer {
    async fn score(
        &self,
        content: &str,
        stage_name: Option<&str>,
    ) -> Result<ContentScore, ScoringError> {
        let payload = json!({
            "model": self.model,
            "max_tokens": 1024,
            "messages": [ { "role": "user", "content": build_prompt(content, stage_name) } ]
        });

        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ScoringError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = resp.json().await?;
        let text = body
            .pointer("/content/0")
            .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
            .and_then(|block| block.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or("{}");
        Ok(parse_score_reply(text))
    }
}

pub fn build_prompt(content: &str, stage_name: Option<&str>) -> String {
    let truncated: String = content.chars().take(MAX_PROMPT_CHARS).collect();
    let ellipsis = if content.chars().count() > MAX_PROMPT_CHARS {
        "..."
    } else {
        ""
    };
    format!(
        "You are a content quality expert. Score this content on a scale of 0-100 and provide 2-3 specific, actionable improvement suggestions.\n\n\
         Stage: {stage}\n\n\
         Content to evaluate:\n{truncated}{ellipsis}\n\n\
         Respond in this exact JSON format:\n\
         {{\n  \"score\": 85,\n  \"suggestions\": [\n    \"First specific improvement\",\n    \"Second specific improvement\",\n    \"Third specific improvement\"\n  ]\n}}\n\n\
         Only return the JSON, no other text.",
        stage = stage_name.unwrap_or("Unknown"),
    )
}

/// Read the model's reply. Valid JSON is taken at face value (missing
/// fields become 0 and an empty list); anything else goes through the
/// plain-text extractors.
pub fn parse_score_reply(text: &str) -> ContentScore {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        let score = value.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let suggestions = value
            .get("suggestions")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        return ContentScore { score, suggestions };
    }

    ContentScore {
        score: extract_score(text),
        suggestions: extract_suggestions(text),
    }
}

static SCORE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)/100|score[:\s]+(\d+)").ok());
static LIST_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[\d\-*•]\s+").ok());

/// First `NN/100` or `score: NN` in the text, whichever appears first.
/// Falls back to 75 when nothing matches or the number does not fit.
pub fn extract_score(text: &str) -> f64 {
    SCORE_PATTERN
        .as_ref()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .and_then(|digits| digits.as_str().parse::<u32>().ok())
        .map_or(FALLBACK_SCORE, f64::from)
}

/// Bulleted or numbered lines longer than ten characters, marker stripped,
/// at most three.
pub fn extract_suggestions(text: &str) -> Vec<String> {
    let Some(marker) = LIST_MARKER.as_ref() else {
        return Vec::new();
    };
    text.lines()
        .filter(|line| line.chars().count() > 10)
        .filter_map(|line| marker.find(line).map(|m| line[m.end()..].trim().to_string()))
        .take(MAX_SUGGESTIONS)
        .collect()
}
