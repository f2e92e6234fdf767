//! AI chat
//!
//! Streaming multi-round conversation engine with tool calling. The
//! [`session::ChatSession`] owns a transcript and speaks to a model provider
//! through the [`transport::ChatTransport`] seam; turn updates flow to the
//! owning surface over a channel as `(turn index, ResponseMessage)` pairs.

pub mod functions;
pub mod openai;
pub mod render;
pub mod session;
pub mod transport;

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::capture::SelectedTextContext;

/// Rounds allowed within one exchange before the session gives up; bounds
/// runaway tool-calling loops.
pub const MAX_CHAT_ROUNDS: usize = 20;

/// What the chat prompt gets to see of a capture.
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    pub text: String,
    pub web_page_url: String,
    pub app_id: String,
}

impl From<&SelectedTextContext> for ChatContext {
    fn from(ctx: &SelectedTextContext) -> Self {
        Self {
            text: ctx.text.clone(),
            web_page_url: ctx.web_page_url.clone().unwrap_or_default(),
            app_id: ctx.app_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Initial,
    Updating,
    Finished,
    Failure,
}

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// One turn update. While a turn is streaming, updates with `new == false`
/// append to the content already shown at that index; `new == true` starts
/// the slot over.
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub id: u64,
    pub content: String,
    pub role: Role,
    pub status: Status,
    /// True when this update begins a new turn at its index.
    pub new: bool,
}

impl ResponseMessage {
    pub fn new(content: impl Into<String>, role: Role, new: bool, status: Status) -> Self {
        Self {
            id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed),
            content: content.into(),
            role,
            status,
            new,
        }
    }
}

/// Turn updates are delivered as `(index, message)`; indices are assigned
/// sequentially and a surfaced index is only ever appended to or finalized.
pub type ChatSink = mpsc::UnboundedSender<(usize, ResponseMessage)>;

/// Wire-level transcript entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl ChatMessage {
    pub fn role(&self) -> Role {
        match self {
            ChatMessage::System { .. } => Role::System,
            ChatMessage::User { .. } => Role::User,
            ChatMessage::Assistant { .. } => Role::Assistant,
            ChatMessage::Tool { .. } => Role::Tool,
        }
    }
}

/// A completed tool call recorded on an assistant turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Fixed preamble for every session.
pub fn system_prompt() -> String {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    format!(
        "Current time is {}.\n\
         You are a tool running on the Linux desktop called textpop. \
         You can help the user do anything with the text they selected.",
        now
    )
}
