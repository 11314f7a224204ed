// ABOUTME: Pipeline configuration: the full enumeration of sections the pipeline honors
// ABOUTME: Loaded from a JSON file; unrecognized sections are simply ignored by serde

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::image_utils::FrameResizePolicy;

/// Top-level configuration object.
///
/// This is the full contract: no section beyond the ones named here is
/// honored, per spec. Each section has a `Default` so a caller can start from
/// `Config::default()` and override only what it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vlm: VlmConfig,
    pub tcp: TcpConfig,
    pub sampling: SamplingConfig,
    pub conversation: ConversationConfig,
    pub question: QuestionConfig,
    pub sentry: SentryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vlm: VlmConfig::default(),
            tcp: TcpConfig::default(),
            sampling: SamplingConfig::default(),
            conversation: ConversationConfig::default(),
            question: QuestionConfig::default(),
            sentry: SentryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VlmConfig {
    /// VLM analysis endpoint, e.g. `http://localhost:9000/analyze`.
    pub endpoint: String,
    /// MCP camera-control endpoint, e.g. `http://localhost:9001/control`.
    pub mcp_endpoint: String,
    pub model: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    #[serde(with = "duration_secs")]
    pub mcp_timeout: Duration,
    /// Bound on concurrent in-flight inferences when `sync_inference_mode` is
    /// false (the bounded async pool, §4.4).
    pub max_concurrent: usize,
    /// Sync-mode is the default and primary scheduling discipline (§4.4).
    pub sync_inference_mode: bool,
}

impl Default for VlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000/analyze".to_string(),
            mcp_endpoint: "http://localhost:9001/control".to_string(),
            model: "qwen-vl".to_string(),
            timeout: Duration::from_secs(60),
            mcp_timeout: Duration::from_secs(30),
            max_concurrent: 3,
            sync_inference_mode: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub host: String,
    pub port: u16,
    pub buffer: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9100,
            buffer: 4 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Target duration (seconds) of a video-mode batch; 1.0 paired with
    /// `frames_per_second == 1` selects image mode (§4.2).
    pub target_video_duration: f64,
    pub frames_per_second: u32,
    pub original_fps: f64,
    /// Optional smart-resize applied before a frame is handed to the VLM
    /// (`sampling.resize.*`), supplemented from `image_utils.py`.
    pub resize: FrameResizePolicy,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            target_video_duration: 1.0,
            frames_per_second: 1,
            original_fps: 25.0,
            resize: FrameResizePolicy::default(),
        }
    }
}

impl SamplingConfig {
    /// `K` in the sampling rule: forward every K-th frame to the inference
    /// sink. Computed once, per §4.2.
    pub fn sample_stride(&self) -> u32 {
        let k = (self.original_fps / self.frames_per_second.max(1) as f64).round() as u32;
        k.max(1)
    }

    /// True when this configuration selects the image-mode special case
    /// (single-frame-at-a-time inference rather than batched video).
    pub fn is_image_mode(&self) -> bool {
        self.target_video_duration == 1.0 && self.frames_per_second == 1
    }

    /// Number of raw frames collected per video-mode batch.
    pub fn frames_to_collect(&self) -> usize {
        (self.target_video_duration * self.original_fps).round() as usize
    }

    /// Number of sampled frames emitted per video-mode batch.
    pub fn target_frames_per_batch(&self) -> usize {
        (self.target_video_duration * self.frames_per_second as f64).round() as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// N: the tail keeps at most 2*N messages (§4.7).
    pub max_rounds: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { max_rounds: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestionConfig {
    /// Feed endpoint root, e.g. `http://localhost:8081`.
    pub feed_endpoint: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    #[serde(with = "duration_secs_f64")]
    pub poll_interval: Duration,
}

impl Default for QuestionConfig {
    fn default() -> Self {
        Self {
            feed_endpoint: "http://localhost:8081".to_string(),
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentryConfig {
    pub endpoint: String,
    #[serde(with = "duration_secs_f64")]
    pub refresh_interval: Duration,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api/sentry-mode".to_string(),
            refresh_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for any
    /// section the file omits.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref())
            .await
            .map_err(PipelineError::Io)?;
        let config: Config = serde_json::from_slice(&bytes)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vlm.max_concurrent == 0 {
            return Err(PipelineError::Config(
                "vlm.max_concurrent must be >= 1".to_string(),
            ));
        }
        if self.sampling.original_fps <= 0.0 {
            return Err(PipelineError::Config(
                "sampling.original_fps must be positive".to_string(),
            ));
        }
        if self.conversation.max_rounds == 0 {
            return Err(PipelineError::Config(
                "conversation.max_rounds must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_secs_f64(f64::deserialize(d)?))
    }
}
