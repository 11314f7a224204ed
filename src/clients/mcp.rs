// ABOUTME: §6.4 MCP control endpoint client: POSTs {image_path}, returns the camera-control decision
// ABOUTME: Grounded in examples/original_source/mcp/src/camera_mcp/cores/camera_client.py's tool-call result shape

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct McpControlOutcome {
    pub success: bool,
    pub tool_name: Option<String>,
    pub arguments: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub result: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct McpRequestBody<'a> {
    image_path: &'a str,
}

#[derive(Deserialize)]
struct McpResponseEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<McpResponseData>,
}

#[derive(Deserialize)]
struct McpResponseData {
    #[serde(default)]
    control_result: Option<ControlResult>,
}

#[derive(Deserialize)]
struct ControlResult {
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    arguments: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    success: Option<bool>,
}

/// Narrow trait over the MCP HTTP contract (§6.4).
pub trait McpClient: Send + Sync {
    fn control(&self, image_path: &str) -> impl Future<Output = Result<McpControlOutcome>> + Send;
}

pub struct ReqwestMcpClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl ReqwestMcpClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

impl McpClient for ReqwestMcpClient {
    async fn control(&self, image_path: &str) -> Result<McpControlOutcome> {
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&McpRequestBody { image_path })
            .send()
            .await
            .map_err(|e| PipelineError::Mcp(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::Mcp(format!("HTTP {}", response.status())));
        }

        let envelope: McpResponseEnvelope = response
            .json()
            .await
            .map_err(|e| PipelineError::Mcp(e.to_string()))?;

        let control_result = envelope.data.and_then(|d| d.control_result);
        Ok(McpControlOutcome {
            success: envelope.success && control_result.as_ref().and_then(|c| c.success).unwrap_or(true),
            tool_name: control_result.as_ref().and_then(|c| c.tool_name.clone()),
            arguments: control_result.as_ref().and_then(|c| c.arguments.clone()),
            reason: control_result.as_ref().and_then(|c| c.reason.clone()),
            result: control_result.and_then(|c| c.result),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_deserializes_nested_control_result() {
        let body = r#"{
            "success": true,
            "data": {
                "control_result": {
                    "tool_name": "pan_tilt_move",
                    "arguments": {"pan_angle": -30},
                    "reason": "user requested a left pan",
                    "result": {"ok": true},
                    "success": true
                }
            }
        }"#;
        let envelope: McpResponseEnvelope = serde_json::from_str(body).unwrap();
        assert!(envelope.success);
        let control_result = envelope.data.unwrap().control_result.unwrap();
        assert_eq!(control_result.tool_name.as_deref(), Some("pan_tilt_move"));
    }
}
