// ABOUTME: VLM prompt templates for the routine and user-question analysis paths
// ABOUTME: Grounded in the original mcp/src/camera_mcp/prompts/prompt.py and vlm_client.py system prompts

/// System prompt accompanying every VLM call, routine or user-question.
pub const VLM_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that analyzes camera frames and returns structured JSON responses.";

/// Routine-cadence prompt: summarize what's in the frame.
pub const ROUTINE_PROMPT: &str =
    "Describe what is currently visible in this camera frame. Respond with a JSON object of the form {\"response\": \"...\"}.";

/// User-question prompt template; `{question}` is substituted verbatim.
const USER_QUESTION_TEMPLATE: &str =
    "Answer the following question about this camera frame: {question}\nRespond with a JSON object of the form {{\"answer\": \"...\"}}.";

pub fn user_question_prompt(question: &str) -> String {
    USER_QUESTION_TEMPLATE.replace("{question}", question)
}

/// MCP system prompt: names the one tool family the coordinator cares
/// about (pan/tilt/zoom), trimmed from the original's full Chinese-language
/// XML tool-call instructions down to the subset this crate actually drives.
pub const MCP_SYSTEM_PROMPT: &str = "You are a camera-control assistant. Given the current frame \
and the recent conversation, decide whether a pan/tilt/zoom adjustment is warranted and issue at \
most one tool call per turn.";
