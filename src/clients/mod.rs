// ABOUTME: A5 - thin typed HTTP clients/pollers for the external collaborators named in spec.md §6
// ABOUTME: Each external contract gets a narrow trait with one default reqwest-backed implementation, so C6 can be tested against a fake

pub mod mcp;
pub mod question_feed;
pub mod sentry;
pub mod vlm;

pub use mcp::{McpClient, McpControlOutcome, ReqwestMcpClient};
pub use question_feed::{QuestionFeedClient, QuestionFeedPoller, ReqwestQuestionFeedClient};
pub use sentry::{ReqwestSentryClient, SentryClient, SentryPoller};
pub use vlm::{ReqwestVlmClient, VlmClient, VlmOutcome};
