// ABOUTME: §6.3 VLM endpoint client: POSTs {image, prompt, system, conversation_tail?}, tolerantly parses the JSON-ish response
// ABOUTME: Grounded in examples/original_source/src/monitor/vlm/vlm_client.py's best-effort fenced-JSON parsing

use std::future::Future;
use std::time::Duration;

use base64::Engine;
use serde::Serialize;
use serde_json::Value;

use crate::conversation::ConversationMessage;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct VlmOutcome {
    /// The `response` field for routine calls, `answer` for user-question
    /// calls; whichever the caller asked for.
    pub text: String,
    /// The raw (post-fence-stripping) response body, kept for persistence.
    pub raw: String,
}

#[derive(Serialize)]
struct VlmRequestBody<'a> {
    image: String,
    prompt: &'a str,
    system: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_tail: Option<Vec<WireMessage<'a>>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// The field name to pull out of the VLM's JSON-ish response: `response`
/// for routine summaries, `answer` for user-question replies (§6.3).
#[derive(Debug, Clone, Copy)]
pub enum ResponseField {
    Response,
    Answer,
}

impl ResponseField {
    fn key(self) -> &'static str {
        match self {
            ResponseField::Response => "response",
            ResponseField::Answer => "answer",
        }
    }
}

/// Narrow trait over the VLM HTTP contract so the coordinator can run
/// against a fake in tests without a live endpoint.
pub trait VlmClient: Send + Sync {
    fn analyze(
        &self,
        image: &[u8],
        prompt: &str,
        system: &str,
        conversation_tail: &[ConversationMessage],
        field: ResponseField,
    ) -> impl Future<Output = Result<VlmOutcome>> + Send;
}

pub struct ReqwestVlmClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl ReqwestVlmClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

impl VlmClient for ReqwestVlmClient {
    async fn analyze(
        &self,
        image: &[u8],
        prompt: &str,
        system: &str,
        conversation_tail: &[ConversationMessage],
        field: ResponseField,
    ) -> Result<VlmOutcome> {
        let tail: Option<Vec<WireMessage>> = if conversation_tail.is_empty() {
            None
        } else {
            Some(
                conversation_tail
                    .iter()
                    .map(|m| match m {
                        ConversationMessage::Assistant { content } => WireMessage {
                            role: "assistant",
                            content,
                        },
                        ConversationMessage::User { content } => WireMessage {
                            role: "user",
                            content,
                        },
                    })
                    .collect(),
            )
        };

        let body = VlmRequestBody {
            image: base64::engine::general_purpose::STANDARD.encode(image),
            prompt,
            system,
            conversation_tail: tail,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Vlm(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::Vlm(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let raw = response
            .text()
            .await
            .map_err(|e| PipelineError::Vlm(e.to_string()))?;

        parse_vlm_response(&raw, field)
    }
}

/// Best-effort parse of the VLM's response body: strip ```json fences if
/// present, parse as JSON and pull the requested field; fall back to the
/// raw text if JSON parsing fails, matching the Python client's tolerant
/// parsing rather than hard-failing on a slightly-malformed model reply.
pub fn parse_vlm_response(raw: &str, field: ResponseField) -> Result<VlmOutcome> {
    let stripped = strip_json_fence(raw);

    match serde_json::from_str::<Value>(stripped) {
        Ok(value) => {
            let text = value
                .get(field.key())
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| stripped.to_string());
            Ok(VlmOutcome {
                text,
                raw: raw.to_string(),
            })
        }
        Err(_) => Ok(VlmOutcome {
            text: stripped.to_string(),
            raw: raw.to_string(),
        }),
    }
}

fn strip_json_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start();
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_response() {
        let outcome = parse_vlm_response(r#"{"response": "a car is parked"}"#, ResponseField::Response).unwrap();
        assert_eq!(outcome.text, "a car is parked");
    }

    #[test]
    fn strips_fenced_json() {
        let raw = "```json\n{\"answer\": \"it is red\"}\n```";
        let outcome = parse_vlm_response(raw, ResponseField::Answer).unwrap();
        assert_eq!(outcome.text, "it is red");
    }

    #[test]
    fn falls_back_to_raw_text_on_parse_failure() {
        let outcome = parse_vlm_response("not json at all", ResponseField::Response).unwrap();
        assert_eq!(outcome.text, "not json at all");
    }

    #[test]
    fn missing_field_falls_back_to_stripped_body() {
        let outcome = parse_vlm_response(r#"{"other": "x"}"#, ResponseField::Response).unwrap();
        assert_eq!(outcome.text, r#"{"other": "x"}"#);
    }
}
