// ABOUTME: A4 - per-frame result layout and atomic (write-temp, rename) persistence (§6.7)
// ABOUTME: Each sibling operation in C6 writes its own result file independently; the task awaits all of them before releasing the question

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::scheduler::TaskKind;

/// Primary VLM analysis output, keyed by `(session, frame sequence)`.
#[derive(Debug, Clone, Serialize)]
pub struct VlmResult {
    pub session_id: Uuid,
    pub frame_sequence: u64,
    pub response: String,
    pub raw: String,
}

/// User-question analysis output. Same endpoint as `VlmResult` but a
/// different prompt and a different result file name (§4.6).
#[derive(Debug, Clone, Serialize)]
pub struct UserQuestionResult {
    pub session_id: Uuid,
    pub frame_sequence: u64,
    pub question: String,
    pub answer: String,
    pub raw: String,
}

/// MCP camera-control decision, persisted verbatim (§6.4).
#[derive(Debug, Clone, Serialize)]
pub struct McpResult {
    pub session_id: Uuid,
    pub frame_sequence: u64,
    pub success: bool,
    pub tool_name: Option<String>,
    pub arguments: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// Frame-level metadata written alongside the JPEG (`image_details.json`).
#[derive(Debug, Clone, Serialize)]
pub struct ImageDetails {
    pub sequence_number: u64,
    pub width: u32,
    pub height: u32,
    pub wall_time_unix_ms: u128,
}

/// Writes the `<kind>_<seq>_details/` layout for one processed frame
/// (§6.7), using write-to-temp-then-rename so a reader observes either an
/// absent or a complete file, never a partial one.
pub struct ResultWriter {
    root: PathBuf,
}

impl ResultWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn details_dir(&self, kind: TaskKind, sequence: u64) -> PathBuf {
        let prefix = match kind {
            TaskKind::Routine => "routine",
            TaskKind::UserQuestion => "user_question",
        };
        self.root.join(format!("{prefix}_{sequence}_details"))
    }

    pub async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await.map_err(PipelineError::Io)
    }

    /// Writes `value` as pretty JSON to `dir/name`, atomically.
    pub async fn write_json<T: Serialize + ?Sized>(
        &self,
        dir: &Path,
        name: &str,
        value: &T,
    ) -> Result<()> {
        self.ensure_dir(dir).await?;
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| PipelineError::Invariant(format!("serializing {name}: {e}")))?;
        self.write_atomic(dir, name, &bytes).await
    }

    /// Writes raw bytes (e.g. the JPEG itself) atomically.
    pub async fn write_bytes(&self, dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
        self.ensure_dir(dir).await?;
        self.write_atomic(dir, name, bytes).await
    }

    async fn write_atomic(&self, dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
        let final_path = dir.join(name);
        let tmp_path = dir.join(format!("{name}.tmp"));
        tokio::fs::write(&tmp_path, bytes).await.map_err(PipelineError::Io)?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(PipelineError::Io)?;
        debug!(path = %final_path.display(), "wrote result file");
        Ok(())
    }
}
