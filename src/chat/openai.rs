//! OpenAI-compatible transport
//!
//! Streams chat completions over SSE from any OpenAI-compatible endpoint
//! (hosted or local). Tool-call deltas are passed through with their stream
//! index so the session can accumulate arguments across chunks.

use std::collections::VecDeque;

use base64::Engine as _;
use futures::StreamExt;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{PopError, PopResult};

use super::transport::{ChatTransport, DeltaStream, StreamDelta, ToolSpec};
use super::ChatMessage;

const IMAGE_MODEL: &str = "dall-e-3";

pub struct OpenAiTransport {
    client: reqwest::Client,
    host: String,
    api_key: String,
    model: String,
}

impl OpenAiTransport {
    pub fn new(host: &str, api_key: &str, model: &str) -> PopResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

fn to_wire(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|message| match message {
            ChatMessage::System { content } => json!({"role": "system", "content": content}),
            ChatMessage::User { content } => json!({"role": "user", "content": content}),
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                if tool_calls.is_empty() {
                    json!({"role": "assistant", "content": content})
                } else {
                    let calls: Vec<_> = tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {"name": call.name, "arguments": call.arguments}
                            })
                        })
                        .collect();
                    json!({"role": "assistant", "content": content, "tool_calls": calls})
                }
            }
            ChatMessage::Tool {
                content,
                tool_call_id,
            } => json!({"role": "tool", "content": content, "tool_call_id": tool_call_id}),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: WireDelta,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

enum LineParse {
    Deltas(Vec<StreamDelta>),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> LineParse {
    let Some(payload) = line.strip_prefix("data: ") else {
        return LineParse::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return LineParse::Done;
    }

    let Ok(response) = serde_json::from_str::<StreamResponse>(payload) else {
        debug!("unparseable stream line: {}", payload);
        return LineParse::Skip;
    };
    let Some(choice) = response.choices.into_iter().next() else {
        return LineParse::Skip;
    };

    let mut deltas = Vec::new();
    if let Some(content) = choice.delta.content {
        if !content.is_empty() {
            deltas.push(StreamDelta::Content(content));
        }
    }
    for call in choice.delta.tool_calls.unwrap_or_default() {
        let (name, arguments) = match call.function {
            Some(f) => (f.name, f.arguments.unwrap_or_default()),
            None => (None, String::new()),
        };
        deltas.push(StreamDelta::ToolCall {
            index: call.index,
            id: call.id,
            name,
            arguments,
        });
    }
    if deltas.is_empty() {
        LineParse::Skip
    } else {
        LineParse::Deltas(deltas)
    }
}

#[async_trait::async_trait]
impl ChatTransport for OpenAiTransport {
    async fn stream_round(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> PopResult<DeltaStream> {
        let mut body = json!({
            "model": self.model,
            "messages": to_wire(messages),
            "stream": true,
        });
        if !tools.is_empty() {
            let wire_tools: Vec<_> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(wire_tools);
        }

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.host))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PopError::Chat(format!("chat request failed ({status}): {text}")));
        }

        type State = (
            std::pin::Pin<Box<dyn futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
            Vec<u8>,
            VecDeque<StreamDelta>,
            bool,
        );

        let state: State = (Box::pin(response.bytes_stream()), Vec::new(), VecDeque::new(), false);
        let stream = futures::stream::unfold(state, |(mut body, mut buffer, mut pending, mut done)| async move {
            loop {
                if let Some(delta) = pending.pop_front() {
                    return Some((Ok(delta), (body, buffer, pending, done)));
                }
                if done {
                    return None;
                }
                match body.next().await {
                    Some(Ok(chunk)) => {
                        buffer.extend_from_slice(&chunk);
                        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=pos).collect();
                            let Ok(line) = std::str::from_utf8(&line[..line.len() - 1]) else {
                                continue;
                            };
                            match parse_sse_line(line.trim_end_matches('\r')) {
                                LineParse::Deltas(deltas) => pending.extend(deltas),
                                LineParse::Done => done = true,
                                LineParse::Skip => {}
                            }
                        }
                    }
                    Some(Err(e)) => {
                        // Terminate the stream after surfacing the error.
                        return Some((
                            Err(PopError::Chat(format!("stream error: {e}"))),
                            (body, buffer, pending, true),
                        ));
                    }
                    None => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn generate_image(&self, prompt: &str) -> PopResult<String> {
        #[derive(Debug, Deserialize)]
        struct ImagesResponse {
            data: Vec<ImagePayload>,
        }
        #[derive(Debug, Deserialize)]
        struct ImagePayload {
            url: Option<String>,
            b64_json: Option<String>,
        }

        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.host))
            .bearer_auth(&self.api_key)
            .timeout(std::time::Duration::from_secs(60))
            .json(&json!({"model": IMAGE_MODEL, "prompt": prompt}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(PopError::Chat(format!("image request failed ({status})")));
        }

        let payload: ImagesResponse = response.json().await?;
        let Some(image) = payload.data.into_iter().next() else {
            return Err(PopError::Chat("no image returned".into()));
        };

        if let Some(url) = image.url {
            return Ok(url);
        }
        if let Some(b64) = image.b64_json {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| PopError::Chat(format!("bad image payload: {e}")))?;
            let suffix: u32 = rand::thread_rng().gen();
            let path = std::env::temp_dir().join(format!("textpop_image_{suffix}.png"));
            std::fs::write(&path, bytes)?;
            return Ok(format!("file://{}", path.display()));
        }

        warn!("image response had neither url nor b64 payload");
        Err(PopError::Chat("no image returned".into()))
    }
}
