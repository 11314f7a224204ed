// ABOUTME: C4 - converts sampled frames into inference tasks under the sync-mode at-most-one-in-flight invariant
// ABOUTME: Prefers the freshest frame: pending is drained only on the next on_frame call, never on completion (§9)

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::SharedFrame;
use crate::question::QuestionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Routine,
    UserQuestion,
}

/// §3 InferenceTask.
#[derive(Debug, Clone)]
pub struct InferenceTask {
    pub id: Uuid,
    pub frame: SharedFrame,
    pub user_question: Option<String>,
    pub question_task_id: Option<String>,
    pub started_at: Instant,
    pub kind: TaskKind,
}

/// Scheduling discipline. Sync is the default and primary mode (§4.4); async
/// is a bounded concurrent pool used only when explicitly configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Sync,
    Async,
}

/// The single-slot overwriting buffer of §3 PendingFrameSlot. Written only
/// while the scheduler is busy; read (and cleared) only on the next
/// `on_frame` call or on preemption — never on task completion.
struct PendingFrameSlot {
    frame: Mutex<Option<SharedFrame>>,
}

impl PendingFrameSlot {
    fn new() -> Self {
        Self {
            frame: Mutex::new(None),
        }
    }

    fn take(&self) -> Option<SharedFrame> {
        self.frame.lock().take()
    }

    fn set(&self, frame: SharedFrame) {
        *self.frame.lock() = Some(frame);
    }

    fn peek_is_some(&self) -> bool {
        self.frame.lock().is_some()
    }
}

/// Callback invoked by C4 to hand a fully-formed task to C6. Implemented as
/// a boxed closure rather than a trait object hierarchy, since the
/// scheduler only ever needs one operation: "go run this".
pub type TaskLauncher = Arc<dyn Fn(InferenceTask) + Send + Sync>;

/// C4. Owns the sync-mode `in_flight` flag and the pending-frame slot; in
/// async mode delegates admission control to a `Semaphore` instead.
pub struct InferenceScheduler {
    registry: Arc<QuestionRegistry>,
    pending: PendingFrameSlot,
    in_flight: AtomicBool,
    mode: Mutex<SchedulerMode>,
    async_permits: Arc<Semaphore>,
    async_max: usize,
    /// Permits held by in-flight async-mode tasks, keyed by task id. Kept
    /// alive here (not dropped at acquisition time) so the semaphore
    /// actually bounds concurrency; released in `on_task_complete`.
    async_inflight: Mutex<HashMap<Uuid, OwnedSemaphorePermit>>,
    launcher: Mutex<Option<TaskLauncher>>,
    /// Id of the task the scheduler currently considers itself blocked on.
    /// Distinguishes "an orphaned task finished" from "the task the
    /// scheduler is waiting on finished" (§9 orphaned-task bookkeeping):
    /// without this, an orphaned routine task completing after a
    /// user-question task has taken over would incorrectly clear
    /// `in_flight` out from under the still-running successor.
    current_owner: Mutex<Option<Uuid>>,
    pub frames_skipped_sync: AtomicU64,
    pub user_questions_dispatched: AtomicU64,
}

impl InferenceScheduler {
    pub fn new(registry: Arc<QuestionRegistry>, mode: SchedulerMode, async_max: usize) -> Self {
        Self {
            registry,
            pending: PendingFrameSlot::new(),
            in_flight: AtomicBool::new(false),
            mode: Mutex::new(mode),
            async_permits: Arc::new(Semaphore::new(async_max.max(1))),
            async_max: async_max.max(1),
            async_inflight: Mutex::new(HashMap::new()),
            launcher: Mutex::new(None),
            current_owner: Mutex::new(None),
            frames_skipped_sync: AtomicU64::new(0),
            user_questions_dispatched: AtomicU64::new(0),
        }
    }

    pub fn set_launcher(&self, launcher: TaskLauncher) {
        *self.launcher.lock() = Some(launcher);
    }

    fn launch(&self, task: InferenceTask) {
        if let Some(launcher) = self.launcher.lock().as_ref() {
            launcher(task);
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.peek_is_some()
    }

    /// Takes the cached pending frame, if any, clearing the slot. Used by
    /// the question monitor (C5) when it preempts on its own initiative.
    pub fn take_pending(&self) -> Option<SharedFrame> {
        self.pending.take()
    }

    pub fn mode(&self) -> SchedulerMode {
        *self.mode.lock()
    }

    /// §4.4 entry point. Admits a newly-sampled frame.
    pub fn on_frame(&self, frame: SharedFrame) {
        if *self.mode.lock() == SchedulerMode::Async {
            self.on_frame_async(frame);
            return;
        }

        if self.registry.has_available() {
            self.admit_user_question(frame);
            return;
        }

        if !self.in_flight.swap(true, Ordering::SeqCst) {
            let working = match self.pending.take() {
                Some(cached) => {
                    self.pending.set(frame);
                    cached
                }
                None => frame,
            };
            self.dispatch_routine(working);
        } else {
            // Only a frame that was actually sitting in `pending` and gets
            // overwritten here is truly skipped; the one that replaces it
            // is still a candidate for dispatch once the in-flight task
            // completes.
            if self.pending.peek_is_some() {
                self.frames_skipped_sync.fetch_add(1, Ordering::Relaxed);
            }
            self.pending.set(frame);
        }
    }

    /// Step 1 of §4.4: a question is available. Orphans any in-flight
    /// routine task (it keeps running, but no longer gates the scheduler),
    /// prefers the cached `pending` frame over the just-arrived one, and
    /// dispatches a user-question task if `acquire()` wins the race.
    fn admit_user_question(&self, incoming: SharedFrame) {
        self.in_flight.store(false, Ordering::SeqCst);

        let working = match self.pending.take() {
            Some(cached) => {
                self.pending.set(incoming);
                cached
            }
            None => incoming,
        };

        self.try_dispatch_user_question(working);
    }

    /// Shared by `admit_user_question` and the question monitor (C5): tries
    /// to acquire the question and, on success, launches a user-question
    /// task on `working`. On failure to acquire (lost the race), `working`
    /// is simply dropped back into routine admission territory by the
    /// caller's fallthrough (§4.4 step 1: "fall through to step 2").
    pub fn try_dispatch_user_question(&self, working: SharedFrame) -> bool {
        match self.registry.acquire() {
            Some((text, task_id)) => {
                self.dispatch_user_question(working, text, task_id);
                true
            }
            None => {
                debug!("lost race acquiring question, falling through to routine admission");
                self.on_frame(working);
                false
            }
        }
    }

    /// Launches a user-question task for an already-acquired `(text,
    /// task_id)` pair. Used both by `try_dispatch_user_question` (which
    /// acquires internally) and by the question monitor (C5), which must
    /// acquire first to claim the question atomically before it knows
    /// whether a pending frame is even available to dispatch on.
    pub fn dispatch_user_question(&self, frame: SharedFrame, text: String, task_id: String) {
        self.user_questions_dispatched
            .fetch_add(1, Ordering::Relaxed);
        let task = InferenceTask {
            id: Uuid::new_v4(),
            frame,
            user_question: Some(text),
            question_task_id: Some(task_id),
            started_at: Instant::now(),
            kind: TaskKind::UserQuestion,
        };
        info!(task_id = %task.id, "dispatching user-question task");
        self.in_flight.store(true, Ordering::SeqCst);
        *self.current_owner.lock() = Some(task.id);
        self.launch(task);
    }

    fn dispatch_routine(&self, frame: SharedFrame) {
        let task = InferenceTask {
            id: Uuid::new_v4(),
            frame,
            user_question: None,
            question_task_id: None,
            started_at: Instant::now(),
            kind: TaskKind::Routine,
        };
        info!(task_id = %task.id, "dispatching routine task");
        *self.current_owner.lock() = Some(task.id);
        self.launch(task);
    }

    fn on_frame_async(&self, frame: SharedFrame) {
        let permits = self.async_permits.clone();
        match permits.try_acquire_owned() {
            Ok(permit) => {
                let task = InferenceTask {
                    id: Uuid::new_v4(),
                    frame,
                    user_question: None,
                    question_task_id: None,
                    started_at: Instant::now(),
                    kind: TaskKind::Routine,
                };
                // Held until `on_task_complete` drops it; this is what
                // actually bounds async-mode concurrency at `async_max`.
                self.async_inflight.lock().insert(task.id, permit);
                self.launch(task);
            }
            Err(_) => {
                self.frames_skipped_sync.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// §4.4 completion callback. Critically does *not* drain `pending` —
    /// the next `on_frame` call picks it up, preserving freshest-frame-wins
    /// (the anti-pattern this deliberately avoids is documented in
    /// SPEC_FULL.md §9 / spec.md §9).
    ///
    /// Only clears `in_flight` if `task_id` is still the scheduler's
    /// current owner. An orphaned task (§4.4 step 1, §9) completing after
    /// a successor has already taken over the slot is a no-op here beyond
    /// bookkeeping — the successor still gates admission.
    pub fn on_task_complete(&self, task_id: Uuid) {
        self.async_inflight.lock().remove(&task_id);

        let mut owner = self.current_owner.lock();
        if *owner == Some(task_id) {
            self.in_flight.store(false, Ordering::SeqCst);
            *owner = None;
        } else {
            debug!(%task_id, "orphaned task completed, scheduler state unchanged");
        }
    }

    /// Atomically flushes `pending` into the async pool and switches mode.
    /// Sync -> async: the pending frame (if any) becomes one async task.
    /// Async -> sync: caller is responsible for awaiting outstanding tasks
    /// before this returns cleanly usable; the mode flips immediately since
    /// admission from this point on follows sync rules regardless.
    pub fn set_mode(&self, mode: SchedulerMode) {
        let mut current = self.mode.lock();
        if *current == mode {
            return;
        }
        if mode == SchedulerMode::Async {
            if let Some(frame) = self.pending.take() {
                drop(current);
                self.dispatch_routine(frame);
                current = self.mode.lock();
            }
        }
        *current = mode;
    }

    pub fn async_capacity(&self) -> usize {
        self.async_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use std::sync::Mutex as StdMutex;
    use std::time::{Duration, SystemTime};

    fn make_frame(seq: u64) -> SharedFrame {
        Arc::new(Frame {
            sequence_number: seq,
            wall_time: SystemTime::now(),
            relative_time: Duration::from_secs(seq),
            pixels: image::RgbImage::new(1, 1),
            encoded: bytes::Bytes::from_static(b"jpeg"),
        })
    }

    fn scheduler_with_recorder() -> (Arc<InferenceScheduler>, Arc<StdMutex<Vec<InferenceTask>>>) {
        let registry = Arc::new(QuestionRegistry::new(Duration::from_secs(300)));
        let scheduler = Arc::new(InferenceScheduler::new(registry, SchedulerMode::Sync, 3));
        let launched = Arc::new(StdMutex::new(Vec::new()));
        let sink = launched.clone();
        scheduler.set_launcher(Arc::new(move |task| {
            sink.lock().unwrap().push(task);
        }));
        (scheduler, launched)
    }

    #[test]
    fn at_most_one_in_flight_in_sync_mode() {
        let (scheduler, launched) = scheduler_with_recorder();
        scheduler.on_frame(make_frame(1));
        assert!(scheduler.is_in_flight());
        scheduler.on_frame(make_frame(2));
        scheduler.on_frame(make_frame(3));
        // only the first frame actually launched a task; the rest queued as pending
        assert_eq!(launched.lock().unwrap().len(), 1);
        assert_eq!(scheduler.frames_skipped_sync.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn freshest_frame_wins_when_one_frame_arrives_while_busy() {
        let (scheduler, launched) = scheduler_with_recorder();
        scheduler.on_frame(make_frame(1));
        scheduler.on_frame(make_frame(2));
        let first_task_id = launched.lock().unwrap()[0].id;
        scheduler.on_task_complete(first_task_id);
        scheduler.on_frame(make_frame(3));
        let seqs: Vec<u64> = launched
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.frame.sequence_number)
            .collect();
        // task for frame 1 dispatched, then completion, then frame 3 arrives
        // and the cached frame 2 (pending) is dispatched before frame 3 caches.
        assert_eq!(seqs, vec![1, 2]);
        assert!(scheduler.has_pending());
    }

    #[test]
    fn completion_does_not_drain_pending() {
        let (scheduler, launched) = scheduler_with_recorder();
        scheduler.on_frame(make_frame(1));
        scheduler.on_frame(make_frame(2));
        assert!(scheduler.has_pending());
        let first_task_id = launched.lock().unwrap()[0].id;
        scheduler.on_task_complete(first_task_id);
        assert!(scheduler.has_pending(), "pending must survive completion");
    }

    #[test]
    fn orphaned_task_completion_does_not_clear_successors_slot() {
        let (scheduler, launched) = scheduler_with_recorder();
        scheduler.on_frame(make_frame(1)); // routine task A starts
        scheduler.on_frame(make_frame(2)); // cached as pending
        let task_a_id = launched.lock().unwrap()[0].id;

        scheduler.registry.set_question("preempt now");
        scheduler.on_frame(make_frame(3)); // orphans A, dispatches user-question task B on frame 2

        assert!(scheduler.is_in_flight());
        // A (orphaned) completes late; must not clear B's in-flight slot.
        scheduler.on_task_complete(task_a_id);
        assert!(
            scheduler.is_in_flight(),
            "orphaned task's completion must not clear the current owner's slot"
        );
    }

    #[test]
    fn busy_preemption_prefers_cached_pending_frame() {
        let (scheduler, launched) = scheduler_with_recorder();
        let registry = scheduler.registry.clone();

        scheduler.on_frame(make_frame(100)); // routine task starts on 100
        scheduler.on_frame(make_frame(104)); // cached as pending

        registry.set_question("where is the red car?");
        scheduler.on_frame(make_frame(105)); // question admission

        let seqs: Vec<u64> = launched
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.frame.sequence_number)
            .collect();
        assert_eq!(seqs, vec![100, 104]);
        assert_eq!(launched.lock().unwrap()[1].kind, TaskKind::UserQuestion);
        assert!(scheduler.has_pending()); // 105 is now cached
    }

    #[test]
    fn idle_preemption_dispatches_directly_on_incoming_frame() {
        let (scheduler, launched) = scheduler_with_recorder();
        scheduler.registry.set_question("hello?");
        scheduler.on_frame(make_frame(1));
        let tasks = launched.lock().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, TaskKind::UserQuestion);
        assert_eq!(tasks[0].frame.sequence_number, 1);
    }

    #[test]
    fn async_mode_bounds_concurrency_at_async_max() {
        let registry = Arc::new(QuestionRegistry::new(Duration::from_secs(300)));
        let scheduler = Arc::new(InferenceScheduler::new(registry, SchedulerMode::Async, 2));
        let launched = Arc::new(StdMutex::new(Vec::new()));
        let sink = launched.clone();
        scheduler.set_launcher(Arc::new(move |task| {
            sink.lock().unwrap().push(task);
        }));

        scheduler.on_frame(make_frame(1));
        scheduler.on_frame(make_frame(2));
        scheduler.on_frame(make_frame(3)); // Mth+1: no permit available, skipped

        assert_eq!(launched.lock().unwrap().len(), 2);
        assert_eq!(scheduler.frames_skipped_sync.load(Ordering::Relaxed), 1);

        let first_task_id = launched.lock().unwrap()[0].id;
        scheduler.on_task_complete(first_task_id);

        scheduler.on_frame(make_frame(4)); // a permit freed up, this one is admitted
        assert_eq!(launched.lock().unwrap().len(), 3);
        assert_eq!(scheduler.frames_skipped_sync.load(Ordering::Relaxed), 1);
    }
}
