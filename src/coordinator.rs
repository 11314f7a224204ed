// ABOUTME: C6 - launches VLM analysis and MCP control in parallel per task, saves each sibling eagerly, releases the question lately
// ABOUTME: Releasing only after every sibling terminates prevents mis-attribution: a still-running sibling must never outlive its question's lifetime

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::mcp::{McpClient, McpControlOutcome};
use crate::clients::vlm::{ResponseField, VlmClient};
use crate::conversation::ConversationLog;
use crate::image_utils::{encode_jpeg, smart_resize_frame, FrameResizePolicy};
use crate::prompts;
use crate::question::QuestionRegistry;
use crate::results::{ImageDetails, McpResult, ResultWriter, UserQuestionResult, VlmResult};
use crate::scheduler::{InferenceScheduler, InferenceTask, TaskKind};
use crate::stats::PipelineStats;

/// C6. Generic over the VLM/MCP client traits so the coordinator can be
/// exercised against fakes in tests without a live HTTP endpoint (per
/// SPEC_FULL.md §9's "narrow trait per external endpoint").
pub struct VlmMcpCoordinator<V: VlmClient, M: McpClient> {
    session_id: Uuid,
    vlm: Arc<V>,
    mcp: Arc<M>,
    sentry_enabled: Arc<AtomicBool>,
    results: Arc<ResultWriter>,
    conversation: Arc<ConversationLog>,
    registry: Arc<QuestionRegistry>,
    scheduler: Arc<InferenceScheduler>,
    stats: Arc<PipelineStats>,
    resize_policy: FrameResizePolicy,
}

impl<V: VlmClient + 'static, M: McpClient + 'static> VlmMcpCoordinator<V, M> {
    pub fn new(
        session_id: Uuid,
        vlm: Arc<V>,
        mcp: Arc<M>,
        sentry_enabled: Arc<AtomicBool>,
        results: Arc<ResultWriter>,
        conversation: Arc<ConversationLog>,
        registry: Arc<QuestionRegistry>,
        scheduler: Arc<InferenceScheduler>,
        stats: Arc<PipelineStats>,
        resize_policy: FrameResizePolicy,
    ) -> Self {
        Self {
            session_id,
            vlm,
            mcp,
            sentry_enabled,
            results,
            conversation,
            registry,
            scheduler,
            stats,
            resize_policy,
        }
    }

    /// Returns the JPEG bytes actually submitted to the VLM: the frame as
    /// received when resizing is disabled or the frame already fits the
    /// policy's bounds, otherwise a resized re-encode. Falls back to the
    /// original bytes if re-encoding fails.
    fn vlm_image_payload(&self, task: &InferenceTask) -> bytes::Bytes {
        if !self.resize_policy.enabled {
            return task.frame.encoded.clone();
        }
        let resized = smart_resize_frame(&task.frame.pixels, &self.resize_policy);
        if resized.dimensions() == task.frame.pixels.dimensions() {
            return task.frame.encoded.clone();
        }
        match encode_jpeg(&resized) {
            Ok(bytes) => {
                self.stats.record_frame_resized();
                bytes
            }
            Err(err) => {
                warn!(task_id = %task.id, %err, "failed to re-encode resized frame, submitting original");
                task.frame.encoded.clone()
            }
        }
    }

    /// Runs every sibling operation for `task` to completion, then releases
    /// the question (if any) and notifies the scheduler. Each sibling
    /// persists its own result file as soon as it finishes; this function
    /// itself only returns once *all* siblings are done (§4.6).
    pub async fn run(self: Arc<Self>, task: InferenceTask) {
        self.stats.record_inference_started();
        let details_dir = self.results.details_dir(task.kind, task.frame.sequence_number);

        if let Err(err) = self.save_frame_and_metadata(&task, &details_dir).await {
            warn!(task_id = %task.id, %err, "failed to persist frame metadata");
        }

        let vlm_fut = self.run_vlm_sibling(&task, &details_dir);

        let mcp_enabled = task.kind == TaskKind::Routine && self.sentry_enabled.load(Ordering::Relaxed);
        let mcp_fut = async {
            if mcp_enabled {
                self.run_mcp_sibling(&task, &details_dir).await
            } else {
                None
            }
        };

        let (vlm_success, mcp_outcome) = tokio::join!(vlm_fut, mcp_fut);

        if let (true, Some(outcome)) = (vlm_success, mcp_outcome) {
            if outcome.success {
                self.conversation
                    .append_assistant(outcome.reason.clone().unwrap_or_default());
                if let Some(result) = &outcome.result {
                    self.conversation.append_user(result.to_string());
                }
            }
        }

        if let Some(task_id) = &task.question_task_id {
            self.registry.release(task_id, vlm_success);
        }

        self.scheduler.on_task_complete(task.id);
        self.stats.record_inference_completed();
        info!(task_id = %task.id, kind = ?task.kind, "task complete, all siblings finished");
    }

    async fn save_frame_and_metadata(
        &self,
        task: &InferenceTask,
        details_dir: &std::path::Path,
    ) -> crate::error::Result<()> {
        self.results
            .write_bytes(details_dir, "frame.jpg", &task.frame.encoded)
            .await?;

        let details = ImageDetails {
            sequence_number: task.frame.sequence_number,
            width: task.frame.width(),
            height: task.frame.height(),
            wall_time_unix_ms: task
                .frame
                .wall_time
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        };
        self.results
            .write_json(details_dir, "image_details.json", &details)
            .await
    }

    /// Sibling #1 (always) or #3 (user-question path): VLM analysis.
    /// Returns whether it succeeded, since `release`'s `success` parameter
    /// tracks the primary analysis outcome for user-question tasks.
    async fn run_vlm_sibling(&self, task: &InferenceTask, details_dir: &std::path::Path) -> bool {
        let (prompt, field, filename): (String, ResponseField, &str) = match &task.user_question {
            Some(question) => (
                prompts::user_question_prompt(question),
                ResponseField::Answer,
                "user_question.json",
            ),
            None => (
                prompts::ROUTINE_PROMPT.to_string(),
                ResponseField::Response,
                "inference_result.json",
            ),
        };

        let tail = self.conversation.snapshot();
        let payload = self.vlm_image_payload(task);
        let outcome = self
            .vlm
            .analyze(&payload, &prompt, prompts::VLM_SYSTEM_PROMPT, &tail, field)
            .await;

        match outcome {
            Ok(outcome) => {
                let write_result = match &task.user_question {
                    Some(question) => {
                        let result = UserQuestionResult {
                            session_id: self.session_id,
                            frame_sequence: task.frame.sequence_number,
                            question: question.clone(),
                            answer: outcome.text.clone(),
                            raw: outcome.raw.clone(),
                        };
                        self.results.write_json(details_dir, filename, &result).await
                    }
                    None => {
                        let result = VlmResult {
                            session_id: self.session_id,
                            frame_sequence: task.frame.sequence_number,
                            response: outcome.text.clone(),
                            raw: outcome.raw.clone(),
                        };
                        self.results.write_json(details_dir, filename, &result).await
                    }
                };
                if let Err(err) = write_result {
                    warn!(task_id = %task.id, %err, "failed to persist VLM result");
                    return false;
                }
                true
            }
            Err(err) => {
                warn!(task_id = %task.id, %err, "VLM sibling failed");
                false
            }
        }
    }

    /// Sibling #2: MCP camera control, only for routine tasks while
    /// sentry-mode is enabled (§4.6).
    async fn run_mcp_sibling(
        &self,
        task: &InferenceTask,
        details_dir: &std::path::Path,
    ) -> Option<McpControlOutcome> {
        let image_path = details_dir.join("frame.jpg");
        let outcome = self.mcp.control(&image_path.to_string_lossy()).await;

        match outcome {
            Ok(outcome) => {
                let result = McpResult {
                    session_id: self.session_id,
                    frame_sequence: task.frame.sequence_number,
                    success: outcome.success,
                    tool_name: outcome.tool_name.clone(),
                    arguments: outcome.arguments.clone(),
                    reason: outcome.reason.clone(),
                    result: outcome.result.clone(),
                };
                if let Err(err) = self
                    .results
                    .write_json(details_dir, "mcp_result.json", &result)
                    .await
                {
                    warn!(task_id = %task.id, %err, "failed to persist MCP result");
                    return None;
                }
                Some(outcome)
            }
            Err(err) => {
                warn!(task_id = %task.id, %err, "MCP sibling failed, leaving mcp_result.json absent");
                None
            }
        }
    }
}
