// ABOUTME: Crate-wide error types for the monitoring pipeline
// ABOUTME: Mirrors each subsystem's failure modes so callers can match on cause, not string content

use std::io;
use thiserror::Error;

/// Errors surfaced by the pipeline's core subsystems.
///
/// Per the error-handling design, most of these are *not* meant to tear down
/// the pipeline: callers log-and-continue for anything short of a protocol
/// reset. `PipelineError` exists so that decision is made by matching on a
/// variant rather than inspecting a formatted string.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// I/O failure reading/writing the upstream TCP video source.
    #[error("video source I/O error: {0}")]
    Io(#[from] io::Error),

    /// The upstream sent a frame whose declared length exceeds the maximum
    /// payload size, or otherwise violates the length-prefixed framing.
    #[error("framing corruption: {0}")]
    Framing(String),

    /// JPEG decode failure for an otherwise well-framed payload.
    #[error("frame decode failed: {0}")]
    Decode(#[from] image::ImageError),

    /// The VLM HTTP endpoint returned an error or could not be reached.
    #[error("VLM request failed: {0}")]
    Vlm(String),

    /// The MCP control HTTP endpoint returned an error or could not be reached.
    #[error("MCP request failed: {0}")]
    Mcp(String),

    /// The sentry-mode toggle endpoint (§6.6) returned an error or could not
    /// be reached.
    #[error("sentry-mode request failed: {0}")]
    Sentry(String),

    /// The user-question feed endpoint (§6.5) returned an error or could not
    /// be reached.
    #[error("question feed request failed: {0}")]
    QuestionFeed(String),

    /// A call to an external HTTP endpoint exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Configuration failed validation at load time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The caller's request violated an internal invariant (mismatched task
    /// id on release, unexpected registry state, ...). These are logged and
    /// treated as no-ops by the caller; this variant exists so unit tests can
    /// assert on the condition without the production path ever propagating
    /// it as a hard failure.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

/// Result alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;
