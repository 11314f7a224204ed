// ABOUTME: §6.5 user-question feed: polls GET /question/current, posts /question/clear
// ABOUTME: This is the "internal poller" spec.md refers to that feeds C3 directly, independent of C5's scheduler-side monitor

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::question::QuestionRegistry;

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentQuestion {
    pub has_question: bool,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Narrow trait over the ASR-backed question feed (§6.5).
pub trait QuestionFeedClient: Send + Sync {
    fn current(&self) -> impl Future<Output = Result<CurrentQuestion>> + Send;
    fn clear(&self) -> impl Future<Output = Result<()>> + Send;
}

pub struct ReqwestQuestionFeedClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestQuestionFeedClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

impl QuestionFeedClient for ReqwestQuestionFeedClient {
    async fn current(&self) -> Result<CurrentQuestion> {
        let response = self
            .http
            .get(format!("{}/question/current", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PipelineError::QuestionFeed(e.to_string()))?;

        response
            .json::<CurrentQuestion>()
            .await
            .map_err(|e| PipelineError::QuestionFeed(e.to_string()))
    }

    async fn clear(&self) -> Result<()> {
        self.http
            .post(format!("{}/question/clear", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PipelineError::QuestionFeed(e.to_string()))?;
        Ok(())
    }
}

/// Drives a `QuestionFeedClient` on a fixed interval and feeds results into
/// `QuestionRegistry::set_question`. Network errors (the feed server isn't
/// up yet) are swallowed at debug level, matching the Python manager's
/// "don't pollute the logs, the ASR server is probably just not started
/// yet" policy.
pub struct QuestionFeedPoller<C: QuestionFeedClient> {
    client: C,
    registry: Arc<QuestionRegistry>,
    poll_interval: Duration,
}

impl<C: QuestionFeedClient> QuestionFeedPoller<C> {
    pub fn new(client: C, registry: Arc<QuestionRegistry>, poll_interval: Duration) -> Self {
        Self {
            client,
            registry,
            poll_interval,
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            self.poll_once().await;
        }
    }

    pub async fn poll_once(&self) {
        match self.client.current().await {
            Ok(current) => {
                if current.has_question {
                    if let Some(text) = current.question {
                        self.registry.set_question(text);
                    }
                } else {
                    // Upstream reports no question; nothing to propagate.
                    // `clear()` is driven by C6 after a successful
                    // user-question task, not by the poller itself.
                }
            }
            Err(err) => debug!(%err, "question feed unreachable, will retry"),
        }
    }

    /// Notifies the upstream feed that the question has been answered.
    pub async fn notify_cleared(&self) {
        if let Err(err) = self.client.clear().await {
            warn!(%err, "failed to notify question feed of clear");
        }
    }
}
