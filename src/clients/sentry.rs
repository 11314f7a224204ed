// ABOUTME: §6.6 sentry-mode toggle: polls GET /api/sentry-mode every refresh_interval, caches the result lock-free
// ABOUTME: Gates whether C6 dispatches the MCP sibling for routine tasks

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Deserialize)]
struct SentryModeResponse {
    enabled: bool,
}

/// Narrow trait over the sentry-mode toggle endpoint (§6.6).
pub trait SentryClient: Send + Sync {
    fn enabled(&self) -> impl Future<Output = Result<bool>> + Send;
}

pub struct ReqwestSentryClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl ReqwestSentryClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

impl SentryClient for ReqwestSentryClient {
    async fn enabled(&self) -> Result<bool> {
        let response = self
            .http
            .get(&self.endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PipelineError::Sentry(e.to_string()))?;

        let body: SentryModeResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Sentry(e.to_string()))?;
        Ok(body.enabled)
    }
}

/// Caches the sentry-mode flag behind an `AtomicBool`; reads are lock-free
/// per §4.6/§5, refreshed by a background poll every `refresh_interval`
/// (default 5s).
pub struct SentryPoller<C: SentryClient> {
    client: C,
    cached: Arc<AtomicBool>,
    refresh_interval: Duration,
}

impl<C: SentryClient> SentryPoller<C> {
    pub fn new(client: C, refresh_interval: Duration) -> Self {
        Self {
            client,
            cached: Arc::new(AtomicBool::new(false)),
            refresh_interval,
        }
    }

    pub fn handle(&self) -> Arc<AtomicBool> {
        self.cached.clone()
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.refresh_interval);
        loop {
            interval.tick().await;
            self.poll_once().await;
        }
    }

    pub async fn poll_once(&self) {
        match self.client.enabled().await {
            Ok(enabled) => self.cached.store(enabled, Ordering::Relaxed),
            Err(err) => debug!(%err, "sentry-mode endpoint unreachable, keeping cached value"),
        }
    }
}
