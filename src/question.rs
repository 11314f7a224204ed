// ABOUTME: C3 - holds at most one active user question, with atomic preallocate/acquire/release
// ABOUTME: The `Preallocated` state closes the TOCTOU race between a question arriving and being picked up (§9)

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// The registry's internal state machine (§3 QuestionRecord, §4.3).
///
/// `Preallocated` is distinct from `Assigned` on purpose: it's what lets
/// `has_available()` report false the instant a question is picked up by a
/// scheduler, closing the window where two frames could both observe an
/// available question and both try to dispatch a user-question task.
#[derive(Debug, Clone)]
enum QuestionState {
    Absent,
    Preallocated { text: String, since: Instant },
    Assigned { text: String, task_id: String, since: Instant },
}

struct Inner {
    state: QuestionState,
}

/// C3. All operations run under a single lock; each is an O(1) critical
/// section, matching `UserQuestionManager`'s `question_lock` discipline in
/// the Python original but with the TOCTOU fix made structural rather than
/// a comment ("修复竞争条件") next to a `bool`.
pub struct QuestionRegistry {
    inner: Mutex<Inner>,
    timeout: Duration,
}

impl QuestionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: QuestionState::Absent,
            }),
            timeout,
        }
    }

    /// Registers a new question. Idempotent on identical text (re-arrival of
    /// the same question is a no-op once preallocated). Refuses to overwrite
    /// a question that is already `Assigned` — an in-flight question is
    /// uninterruptible at the registry level; preemption of the *scheduler*
    /// is C4/C5's concern, not C3's.
    pub fn set_question(&self, text: impl Into<String>) {
        let text = text.into();
        let mut inner = self.inner.lock();
        self.expire_if_stale(&mut inner);

        match &inner.state {
            QuestionState::Absent => {
                info!(%text, "new user question registered");
                inner.state = QuestionState::Preallocated {
                    text,
                    since: Instant::now(),
                };
            }
            QuestionState::Preallocated { text: existing, .. } if existing == &text => {
                // identical re-post, nothing to do
            }
            QuestionState::Preallocated { .. } => {
                info!(%text, "replacing un-acquired question with a newer one");
                inner.state = QuestionState::Preallocated {
                    text,
                    since: Instant::now(),
                };
            }
            QuestionState::Assigned { task_id, .. } => {
                warn!(%text, %task_id, "question already in flight, refusing to overwrite");
            }
        }
    }

    /// True only while the state is exactly `Preallocated` (§4.3/§8
    /// invariant 4): a question already handed to a task is not "available".
    pub fn has_available(&self) -> bool {
        let mut inner = self.inner.lock();
        self.expire_if_stale(&mut inner);
        matches!(inner.state, QuestionState::Preallocated { .. })
    }

    /// Atomically transitions `Preallocated -> Assigned(fresh_id)`. Returns
    /// `None` from any other state (including `Assigned`, so a second
    /// admission path racing the first loses benignly).
    pub fn acquire(&self) -> Option<(String, String)> {
        let mut inner = self.inner.lock();
        self.expire_if_stale(&mut inner);

        match &inner.state {
            QuestionState::Preallocated { text, .. } => {
                let text = text.clone();
                let task_id = Uuid::new_v4().to_string()[..8].to_string();
                info!(%text, %task_id, "question acquired");
                inner.state = QuestionState::Assigned {
                    text: text.clone(),
                    task_id: task_id.clone(),
                    since: Instant::now(),
                };
                Some((text, task_id))
            }
            _ => None,
        }
    }

    /// Releases a question after its task has finished. A no-op unless the
    /// current state is `Assigned(task_id)` with a matching id — a mismatch
    /// is logged and ignored per §7 (internal invariant violation, not a
    /// hard error). The question is cleared regardless of `success`: either
    /// it was answered, or it was dropped and should not linger.
    pub fn release(&self, task_id: &str, success: bool) {
        let mut inner = self.inner.lock();
        match &inner.state {
            QuestionState::Assigned { task_id: assigned, text, .. } if assigned == task_id => {
                info!(%task_id, success, question = %text, "releasing question");
                inner.state = QuestionState::Absent;
            }
            QuestionState::Assigned { task_id: assigned, .. } => {
                warn!(expected = %assigned, got = %task_id, "task id mismatch on release, ignoring");
            }
            _ => {
                warn!(%task_id, "release called with no question assigned, ignoring");
            }
        }
    }

    pub fn clear(&self) {
        self.inner.lock().state = QuestionState::Absent;
    }

    /// Auto-clears a question that has sat in `Preallocated` or `Assigned`
    /// longer than the configured timeout (default 300s, §4.3). Checked
    /// lazily on access rather than via a background timer, matching the
    /// Python manager's per-access staleness check.
    fn expire_if_stale(&self, inner: &mut Inner) {
        let since = match &inner.state {
            QuestionState::Preallocated { since, .. } => Some(*since),
            QuestionState::Assigned { since, .. } => Some(*since),
            QuestionState::Absent => None,
        };
        if let Some(since) = since {
            if since.elapsed() > self.timeout {
                warn!("question auto-cleared after exceeding timeout");
                inner.state = QuestionState::Absent;
            }
        }
    }
}
