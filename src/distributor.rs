// ABOUTME: C2 - fans each decoded frame out to the latest-frame cache, live viewers, and the inference sink
// ABOUTME: Every per-consumer send is non-blocking; a slow viewer or a busy scheduler never stalls ingestion

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::config::SamplingConfig;
use crate::frame::SharedFrame;

/// A bounded, drop-oldest queue of encoded frames for one connected viewer
/// (§3 ViewerSubscription). `parking_lot::Mutex` over a `VecDeque` gives us
/// the drop-oldest-on-overflow semantics a plain bounded channel can't: a
/// `tokio::sync::mpsc` channel would apply backpressure or reject on full,
/// neither of which matches "never blocks, drop the head".
pub struct ViewerSubscription {
    queue: Arc<Mutex<VecDeque<Bytes>>>,
    notify: Arc<tokio::sync::Notify>,
    capacity: usize,
}

impl ViewerSubscription {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            notify: Arc::new(tokio::sync::Notify::new()),
            capacity,
        }
    }

    fn push(&self, frame: Bytes) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(frame);
        drop(queue);
        self.notify.notify_waiters();
    }

    /// Pops the oldest buffered frame, if any, without waiting.
    pub fn try_next(&self) -> Option<Bytes> {
        self.queue.lock().pop_front()
    }

    /// Waits until a frame is available, then pops it. Used by the MJPEG
    /// façade (out of scope here) to drive its own cadence.
    pub async fn next(&self) -> Bytes {
        loop {
            if let Some(frame) = self.try_next() {
                return frame;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What the distributor sends to the inference scheduler: a single sampled
/// frame (image mode) or a time-sampled batch (video mode), per §4.2.
pub enum InferenceSample {
    Single(SharedFrame),
    Batch(Vec<SharedFrame>),
}

/// C2. Owns the latest-frame cache, the set of live viewer subscriptions,
/// and the video-mode accumulation buffer.
pub struct FrameDistributor {
    latest: Mutex<Option<SharedFrame>>,
    viewers: Mutex<Vec<Arc<ViewerSubscription>>>,
    viewer_capacity: usize,
    sink: Mutex<Option<mpsc::Sender<InferenceSample>>>,
    sampling: SamplingConfig,
    frames_seen: AtomicU64,
    frames_sent_to_sink: AtomicU64,
    video_buffer: Mutex<VecDeque<SharedFrame>>,
}

impl FrameDistributor {
    pub fn new(sampling: SamplingConfig, viewer_capacity: usize) -> Self {
        Self {
            latest: Mutex::new(None),
            viewers: Mutex::new(Vec::new()),
            viewer_capacity,
            sink: Mutex::new(None),
            sampling,
            frames_seen: AtomicU64::new(0),
            frames_sent_to_sink: AtomicU64::new(0),
            video_buffer: Mutex::new(VecDeque::new()),
        }
    }

    pub fn register_inference_sink(&self, sink: mpsc::Sender<InferenceSample>) {
        *self.sink.lock() = Some(sink);
    }

    pub fn subscribe_viewer(&self) -> Arc<ViewerSubscription> {
        let subscription = Arc::new(ViewerSubscription::new(self.viewer_capacity));
        self.viewers.lock().push(subscription.clone());
        subscription
    }

    /// Drops a viewer's subscription on disconnect. No-op if already gone.
    pub fn unsubscribe_viewer(&self, subscription: &Arc<ViewerSubscription>) {
        self.viewers
            .lock()
            .retain(|v| !Arc::ptr_eq(v, subscription));
    }

    pub fn latest_frame(&self) -> Option<SharedFrame> {
        self.latest.lock().clone()
    }

    /// Publishes a decoded frame to every consumer. Never blocks: viewer
    /// pushes drop-oldest on overflow, and the inference sink is fed via
    /// `try_send` so a saturated scheduler simply misses this frame's
    /// sampling slot rather than stalling the publisher.
    pub fn publish(&self, frame: SharedFrame) {
        *self.latest.lock() = Some(frame.clone());

        for viewer in self.viewers.lock().iter() {
            viewer.push(frame.encoded.clone());
        }

        let seen = self.frames_seen.fetch_add(1, Ordering::Relaxed) + 1;
        let stride = self.sampling.sample_stride() as u64;

        if self.sampling.is_image_mode() {
            if seen % stride == 0 {
                self.send_sample(InferenceSample::Single(frame));
            }
            return;
        }

        self.accumulate_for_video_mode(frame);
    }

    fn send_sample(&self, sample: InferenceSample) {
        let sink = self.sink.lock();
        if let Some(sink) = sink.as_ref() {
            match sink.try_send(sample) {
                Ok(()) => {
                    self.frames_sent_to_sink.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!("inference sink saturated, dropping sample");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Video-mode accumulation: collect `duration * original_fps` raw
    /// frames, then emit a time-sampled subset of `duration * target_fps`
    /// frames. Successive batches overlap by 25% to preserve continuity
    /// across batch boundaries (§4.2).
    fn accumulate_for_video_mode(&self, frame: SharedFrame) {
        let collect = self.sampling.frames_to_collect().max(1);
        let mut buffer = self.video_buffer.lock();
        buffer.push_back(frame);

        if buffer.len() < collect {
            return;
        }

        let frames: Vec<SharedFrame> = buffer.iter().cloned().collect();
        let sampled = time_sample(&frames, self.sampling.target_frames_per_batch().max(1));
        drop(buffer);

        self.send_sample(InferenceSample::Batch(sampled));

        // Keep the most recent 25% of the window so the next batch overlaps
        // this one rather than starting from a clean slate.
        let overlap = ((collect as f64) * 0.25).round() as usize;
        let mut buffer = self.video_buffer.lock();
        while buffer.len() > overlap {
            buffer.pop_front();
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen.load(Ordering::Relaxed)
    }

    pub fn frames_sent_to_sink(&self) -> u64 {
        self.frames_sent_to_sink.load(Ordering::Relaxed)
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.lock().len()
    }
}

/// Evenly time-samples `count` frames out of `frames`, preserving order.
/// Grounded in `async_video_processor.py::_sample_frames_by_time`.
fn time_sample(frames: &[SharedFrame], count: usize) -> Vec<SharedFrame> {
    if frames.is_empty() || count == 0 {
        return Vec::new();
    }
    if count >= frames.len() {
        return frames.to_vec();
    }
    let step = frames.len() as f64 / count as f64;
    (0..count)
        .map(|i| {
            let idx = ((i as f64) * step).round() as usize;
            frames[idx.min(frames.len() - 1)].clone()
        })
        .collect()
}
