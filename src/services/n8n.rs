use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const N8N_API_KEY_HEADER: &str = "X-N8N-API-KEY";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("n8n request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("n8n returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("n8n execution payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Execution record as returned by `GET /api/v1/executions/{id}`. Only the
/// fields the run tracker reads are modelled; everything is optional so a
/// partially populated record still decodes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct N8nExecution {
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub data: Option<ExecutionData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionData {
    #[serde(rename = "resultData", default)]
    pub result_data: Option<ResultData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultData {
    /// Node name -> list of executions of that node, in the order n8n
    /// serialised them.
    #[serde(rename = "runData", default)]
    pub run_data: Option<Map<String, Value>>,
}

/// First recorded execution of a node. Missing or malformed fields stay
/// `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeRun {
    pub start_time_ms: Option<i64>,
    pub execution_time_ms: Option<i64>,
    pub output: Option<Value>,
}

impl N8nExecution {
    pub fn run_data(&self) -> Option<&Map<String, Value>> {
        self.data
            .as_ref()
            .and_then(|d| d.result_data.as_ref())
            .and_then(|r| r.run_data.as_ref())
    }

    /// Every node in `runData`, in document order, with its first execution.
    pub fn node_runs(&self) -> Vec<(&str, NodeRun)> {
        let Some(run_data) = self.run_data() else {
            return Vec::new();
        };
        run_data
            .iter()
            .map(|(name, entries)| (name.as_str(), NodeRun::from_entries(entries)))
            .collect()
    }
}

impl NodeRun {
    fn from_entries(entries: &Value) -> Self {
        let Some(first) = entries.as_array().and_then(|a| a.first()) else {
            return NodeRun::default();
        };
        NodeRun {
            start_time_ms: first.get("startTime").and_then(as_millis),
            execution_time_ms: first.get("executionTime").and_then(as_millis),
            output: first
                .pointer("/data/main/0/0/json")
                .filter(|v| !v.is_null())
                .cloned(),
        }
    }
}

fn as_millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

#[async_trait]
pub trait ExecutionSource: Send + Sync {
    async fn fetch_execution(&self, execution_id: &str) -> Result<N8nExecution, EngineError>;
}

#[derive(Clone)]
pub struct N8nClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl N8nClient {
    pub fn new(http: &Client, base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http: http.clone(),
        }
    }

    fn execution_url(&self, execution_id: &str) -> String {
        format!("{}/api/v1/executions/{}", self.base_url, execution_id)
    }
}

#[async_trait]
impl ExecutionSource for N8nClient {
    async fn fetch_execution(&self, execution_id: &str) -> Result<N8nExecution, EngineError> {
        let resp = self
            .http
            .get(self.execution_url(execution_id))
            .query(&[("includeData", "true")])
            .header(N8N_API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
