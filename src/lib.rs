//! `sentrycam` — a real-time video monitoring pipeline.
//!
//! A TCP video source feeds length-prefixed JPEG frames into a decoder
//! (`frame`), which are fanned out live to viewers and sampled into an
//! inference stream (`distributor`). Sampled frames are scheduled for
//! analysis (`scheduler`), dispatched to a VLM and an MCP camera controller
//! in parallel (`coordinator`, `clients`), with results persisted to disk
//! (`results`). A user can interrupt routine sampling with a question
//! (`question`, `monitor`) that preempts the next scheduling decision.
//!
//! See `config` for the full set of tunables and `context` for how every
//! piece above is wired together at startup.

pub mod clients;
pub mod config;
pub mod context;
pub mod conversation;
pub mod coordinator;
pub mod distributor;
pub mod error;
pub mod frame;
pub mod image_utils;
pub mod monitor;
pub mod prompts;
pub mod question;
pub mod results;
pub mod scheduler;
pub mod stats;

#[cfg(test)]
mod scenarios;

pub use config::Config;
pub use context::PipelineContext;
pub use error::{PipelineError, Result};
pub use frame::{Frame, FrameDecoder, SharedFrame};
