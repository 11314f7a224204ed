// ABOUTME: A6 - single PipelineContext wiring C1-C7 + A1-A5 together, constructed once at startup
// ABOUTME: No process-wide singletons (§9): every subsystem is an explicit field threaded through via Arc

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::clients::mcp::ReqwestMcpClient;
use crate::clients::question_feed::{QuestionFeedPoller, ReqwestQuestionFeedClient};
use crate::clients::sentry::{ReqwestSentryClient, SentryPoller};
use crate::clients::vlm::ReqwestVlmClient;
use crate::config::Config;
use crate::conversation::ConversationLog;
use crate::coordinator::VlmMcpCoordinator;
use crate::distributor::{FrameDistributor, InferenceSample};
use crate::error::Result;
use crate::frame::FrameDecoder;
use crate::monitor::QuestionMonitor;
use crate::question::QuestionRegistry;
use crate::results::ResultWriter;
use crate::scheduler::{InferenceScheduler, SchedulerMode};
use crate::stats::PipelineStats;

type Coordinator = VlmMcpCoordinator<ReqwestVlmClient, ReqwestMcpClient>;

/// Wires every component together and owns the handles needed to run the
/// pipeline end to end. Constructed once at startup; every subsystem below
/// is an `Arc`-shared explicit field, never a global (§9 "Global singletons
/// for pipeline state" anti-pattern).
pub struct PipelineContext {
    pub config: Config,
    pub distributor: Arc<FrameDistributor>,
    pub registry: Arc<QuestionRegistry>,
    pub scheduler: Arc<InferenceScheduler>,
    pub conversation: Arc<ConversationLog>,
    pub results: Arc<ResultWriter>,
    pub stats: Arc<PipelineStats>,
    pub sentry_enabled: Arc<AtomicBool>,
    coordinator: Arc<Coordinator>,
    sentry_poller: StdMutex<Option<SentryPoller<ReqwestSentryClient>>>,
    pipeline_start: Instant,
}

impl PipelineContext {
    pub fn new(config: Config, results_root: impl Into<std::path::PathBuf>, session_id: uuid::Uuid) -> Self {
        let registry = Arc::new(QuestionRegistry::new(config.question.timeout));
        let scheduler_mode = if config.vlm.sync_inference_mode {
            SchedulerMode::Sync
        } else {
            SchedulerMode::Async
        };
        let scheduler = Arc::new(InferenceScheduler::new(
            registry.clone(),
            scheduler_mode,
            config.vlm.max_concurrent,
        ));
        let distributor = Arc::new(FrameDistributor::new(config.sampling.clone(), 32));
        let conversation = Arc::new(ConversationLog::new(config.conversation.max_rounds));
        let results = Arc::new(ResultWriter::new(results_root));
        let stats = Arc::new(PipelineStats::new());

        let sentry_client = ReqwestSentryClient::new(config.sentry.endpoint.clone(), config.vlm.timeout);
        let sentry_poller = SentryPoller::new(sentry_client, config.sentry.refresh_interval);
        let sentry_enabled = sentry_poller.handle();

        let vlm_client = Arc::new(ReqwestVlmClient::new(config.vlm.endpoint.clone(), config.vlm.timeout));
        let mcp_client = Arc::new(ReqwestMcpClient::new(
            config.vlm.mcp_endpoint.clone(),
            config.vlm.mcp_timeout,
        ));

        let coordinator = Arc::new(VlmMcpCoordinator::new(
            session_id,
            vlm_client,
            mcp_client,
            sentry_enabled.clone(),
            results.clone(),
            conversation.clone(),
            registry.clone(),
            scheduler.clone(),
            stats.clone(),
            config.sampling.resize.clone(),
        ));

        let launch_coordinator = coordinator.clone();
        scheduler.set_launcher(Arc::new(move |task| {
            let coordinator = launch_coordinator.clone();
            tokio::spawn(async move {
                coordinator.run(task).await;
            });
        }));

        Self {
            config,
            distributor,
            registry,
            scheduler,
            conversation,
            results,
            stats,
            sentry_enabled,
            coordinator,
            sentry_poller: StdMutex::new(Some(sentry_poller)),
            pipeline_start: Instant::now(),
        }
    }

    /// Wires C2's inference sink to C4's admission entry point. Sample
    /// batches (video mode) are reduced to their last frame, since sync
    /// mode's admission model is one frame in, one task out — batching is
    /// accumulated upstream in C2 but the scheduler still reasons in terms
    /// of single `InferenceTask`s (the `user_question` prompt template
    /// operates on a single representative frame either way).
    pub fn spawn_sink_pump(&self) -> mpsc::Sender<InferenceSample> {
        let (tx, mut rx) = mpsc::channel(8);
        self.distributor.register_inference_sink(tx.clone());

        let scheduler = self.scheduler.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            while let Some(sample) = rx.recv().await {
                stats.record_frame_received();
                match sample {
                    InferenceSample::Single(frame) => scheduler.on_frame(frame),
                    InferenceSample::Batch(mut frames) => {
                        if let Some(frame) = frames.pop() {
                            scheduler.on_frame(frame);
                        }
                    }
                }
            }
        });

        tx
    }

    /// Spawns C5, the sentry-mode poller, and the external question feed
    /// poller as independent background tasks. Idempotent only in the
    /// sense that a second call finds the sentry poller already taken and
    /// simply skips it; call once per process.
    pub fn spawn_background_tasks(&self) {
        let monitor = Arc::new(QuestionMonitor::new(
            self.registry.clone(),
            self.scheduler.clone(),
            self.config.question.poll_interval,
        ));
        tokio::spawn(monitor.run());

        if let Some(sentry_poller) = self.sentry_poller.lock().unwrap().take() {
            tokio::spawn(sentry_poller.run());
        }

        let feed_client = ReqwestQuestionFeedClient::new(
            self.config.question.feed_endpoint.clone(),
            self.config.question.timeout,
        );
        let feed_poller = QuestionFeedPoller::new(
            feed_client,
            self.registry.clone(),
            self.config.question.poll_interval,
        );
        tokio::spawn(feed_poller.run());
    }

    /// Runs the TCP ingest loop (C1) against `host:port`, reconnecting with
    /// capped exponential backoff on any read error or EOF (§4.1; this
    /// reconnect wrapper is external per spec.md but required for the
    /// crate to run standalone end to end).
    pub async fn run_ingest(&self, host: &str, port: u16) {
        let mut backoff = std::time::Duration::from_millis(200);
        const MAX_BACKOFF: std::time::Duration = std::time::Duration::from_secs(10);

        loop {
            match TcpStream::connect((host, port)).await {
                Ok(stream) => {
                    info!(host, port, "connected to video source");
                    backoff = std::time::Duration::from_millis(200);
                    if let Err(err) = self.ingest_one_connection(stream).await {
                        warn!(%err, "ingest connection ended, reconnecting");
                    }
                }
                Err(err) => {
                    warn!(%err, host, port, "connect failed, retrying");
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn ingest_one_connection(&self, stream: TcpStream) -> Result<()> {
        let mut decoder = FrameDecoder::new(stream, self.pipeline_start);
        loop {
            match decoder.read_frame().await {
                Ok(Some(frame)) => {
                    self.distributor.publish(Arc::new(frame));
                }
                Ok(None) => return Ok(()),
                Err(err) => {
                    error!(%err, "frame decoder error, resetting connection");
                    return Err(err);
                }
            }
        }
    }
}
