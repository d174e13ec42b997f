use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, FromRow, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunStage {
    pub id: Uuid,
    pub run_id: Uuid,
    pub stage_name: String,
    pub stage_order: i32,
    pub status: String,
    pub output_text: Option<String>,
    pub output_metadata: Option<Value>,
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub duration_ms: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(StageStatus::Pending),
            "running" => Some(StageStatus::Running),
            "completed" => Some(StageStatus::Completed),
            "failed" => Some(StageStatus::Failed),
            "skipped" => Some(StageStatus::Skipped),
            _ => None,
        }
    }
}

/// Values written by a single stage upsert, keyed by `(run_id, stage_name)`.
/// `None` leaves the stored column as it was.
#[derive(Debug, Clone, PartialEq)]
pub struct StageUpsert {
    pub stage_name: String,
    pub stage_order: i32,
    pub status: StageStatus,
    pub output_text: Option<String>,
    pub output_metadata: Option<Value>,
    pub error_message: Option<String>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub duration_ms: Option<i64>,
}

/// Structured fields lifted out of a stage's output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl StageMetadata {
    /// Pull `score` and `suggestions` out of a node output. Values of the
    /// wrong shape are dropped; returns `None` when nothing usable remains.
    pub fn from_output(output: &Value) -> Option<Self> {
        let obj = output.as_object()?;
        let score = obj.get("score").and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        });
        let suggestions: Vec<String> = obj
            .get("suggestions")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if score.is_none() && suggestions.is_empty() {
            return None;
        }
        Some(StageMetadata { score, suggestions })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
