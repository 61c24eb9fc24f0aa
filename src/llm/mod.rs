//! Completion client implementations.
//!
//! The UI and the response workers only see the [`CompletionClient`] trait,
//! which offers a single-shot and a streaming entry point.

pub mod openai;

use crate::config::Config;
use crate::message::Message;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;

/// Stream of reply fragments. Each item is a piece of text to append.
pub type DeltaStream = BoxStream<'static, std::result::Result<String, LlmError>>;

/// Errors raised while talking to a completion endpoint.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to reach completion endpoint: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("completion endpoint returned {status}: {message}")]
    Status {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("malformed stream frame: {0}")]
    MalformedFrame(String),
    #[error("completion endpoint reported an error: {0}")]
    Remote(String),
    #[error("completion endpoint returned an empty reply")]
    EmptyReply,
}

/// A chat completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Request the full reply in one response.
    async fn complete(&self, model: &str, messages: &[Message]) -> std::result::Result<Message, LlmError>;

    /// Request the reply as a stream of fragments.
    async fn stream(&self, model: &str, messages: &[Message]) -> std::result::Result<DeltaStream, LlmError>;
}

/// Create the completion client described by the configuration.
pub fn create_client(config: &Config) -> Result<Arc<dyn CompletionClient>> {
    let client = openai::OpenAIClient::new(config.api_url.clone(), config.api_key.clone())?;
    Ok(Arc::new(client))
}
