//! Chat transport seam
//!
//! The session speaks to a model provider only through this trait, so round
//! logic can be tested against scripted transports and providers can be
//! swapped without touching the protocol.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::PopResult;

use super::ChatMessage;

/// One declared tool, provider-agnostic.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One decoded unit of a streamed model response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// A chunk of assistant text.
    Content(String),
    /// A chunk of one tool call. `index` keys accumulation across chunks;
    /// id and name arrive on the first chunk, arguments concatenate.
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = PopResult<StreamDelta>> + Send>>;

/// Streaming connection to a model provider.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open one streaming round over the full transcript.
    async fn stream_round(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> PopResult<DeltaStream>;

    /// Generate an image for the built-in image tool; returns a URL or a
    /// `file://` path to the written image.
    async fn generate_image(&self, prompt: &str) -> PopResult<String>;
}
