// ABOUTME: Pipeline-wide atomic counters mirroring async_video_processor.py's status dict
// ABOUTME: Exposed for the out-of-scope /status façade; updated lock-free from every subsystem

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub total_frames_received: AtomicU64,
    pub total_inferences_started: AtomicU64,
    pub total_inferences_completed: AtomicU64,
    pub frames_skipped_sync_mode: AtomicU64,
    pub frames_resized: AtomicU64,
    pub frames_invalid: AtomicU64,
    pub user_questions_processed: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatsSnapshot {
    pub total_frames_received: u64,
    pub total_inferences_started: u64,
    pub total_inferences_completed: u64,
    pub frames_skipped_sync_mode: u64,
    pub frames_resized: u64,
    pub frames_invalid: u64,
    pub user_questions_processed: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            total_frames_received: self.total_frames_received.load(Ordering::Relaxed),
            total_inferences_started: self.total_inferences_started.load(Ordering::Relaxed),
            total_inferences_completed: self.total_inferences_completed.load(Ordering::Relaxed),
            frames_skipped_sync_mode: self.frames_skipped_sync_mode.load(Ordering::Relaxed),
            frames_resized: self.frames_resized.load(Ordering::Relaxed),
            frames_invalid: self.frames_invalid.load(Ordering::Relaxed),
            user_questions_processed: self.user_questions_processed.load(Ordering::Relaxed),
        }
    }

    pub fn record_frame_received(&self) {
        self.total_frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference_started(&self) {
        self.total_inferences_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference_completed(&self) {
        self.total_inferences_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_invalid(&self) {
        self.frames_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_resized(&self) {
        self.frames_resized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_user_question_processed(&self) {
        self.user_questions_processed.fetch_add(1, Ordering::Relaxed);
    }
}
