// ABOUTME: C5 - polls the question registry independently of frame arrival to bound preemption latency
// ABOUTME: Only acts when the scheduler is busy with a pending frame cached; otherwise a routine frame will pick up the question anyway

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::frame::SharedFrame;
use crate::question::QuestionRegistry;
use crate::scheduler::InferenceScheduler;

/// C5. Exists so a question posted while frame arrival has paused (TCP
/// stall, idle viewer) still gets a bounded-latency answer rather than
/// waiting indefinitely for the next frame to arrive and trigger §4.4's
/// `on_frame` preemption path.
pub struct QuestionMonitor {
    registry: Arc<QuestionRegistry>,
    scheduler: Arc<InferenceScheduler>,
    poll_interval: Duration,
}

impl QuestionMonitor {
    pub fn new(
        registry: Arc<QuestionRegistry>,
        scheduler: Arc<InferenceScheduler>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            scheduler,
            poll_interval,
        }
    }

    /// Runs until cancelled. Intended to be spawned as its own task.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            self.poll_once();
        }
    }

    /// One polling cycle, split out so tests can drive it deterministically
    /// without sleeping.
    pub fn poll_once(&self) {
        if !self.registry.has_available() {
            return;
        }
        if !self.scheduler.is_in_flight() {
            // A routine admission will see the question on the very next
            // frame; nothing for the monitor to do yet.
            return;
        }
        if !self.scheduler.has_pending() {
            debug!("question available but no pending frame cached yet, waiting for next poll");
            return;
        }

        self.preempt();
    }

    /// Performs the same preemption dance as §4.4 step 1, on the monitor's
    /// own initiative rather than in response to a newly-arrived frame.
    fn preempt(&self) {
        // Acquire first to claim the question atomically (closing the same
        // TOCTOU window §4.3 exists for), *then* look for a pending frame.
        // If it fails, a concurrent `on_frame` admission already won.
        match self.registry.acquire() {
            Some((text, task_id)) => match self.scheduler.take_pending() {
                Some(frame) => {
                    info!(%task_id, frame = frame.sequence_number, "monitor preempting with pending frame");
                    self.scheduler.dispatch_user_question(frame, text, task_id);
                }
                None => {
                    debug!(%task_id, "no pending frame to dispatch on, releasing question");
                    self.registry.release(&task_id, false);
                }
            },
            None => {
                debug!("monitor lost the race acquiring the question, benign");
            }
        }
    }
}
