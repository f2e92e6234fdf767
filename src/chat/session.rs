//! Chat session
//!
//! Stateful multi-round conversation engine. One exchange streams rounds
//! until the transcript ends on an assistant turn; tool calls requested by
//! the model are executed between rounds, and a hard cap bounds runaway
//! tool-calling loops. A session is not reentrant: rounds within it are
//! strictly sequential.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::PopResult;

use super::functions::{self, FunctionDefinition, ImagePrompt, IMAGE_TOOL_NAME, SVG_TOOL_NAME};
use super::openai::OpenAiTransport;
use super::render;
use super::transport::{ChatTransport, StreamDelta, ToolSpec};
use super::{
    system_prompt, ChatContext, ChatMessage, ChatSink, ResponseMessage, Role, Status, ToolCall,
    MAX_CHAT_ROUNDS,
};

fn emit(sink: &ChatSink, index: i64, message: ResponseMessage) {
    let _ = sink.send((index.max(0) as usize, message));
}

pub struct ChatSession {
    transport: Arc<dyn ChatTransport>,
    prompt: String,
    tools: Vec<FunctionDefinition>,
    options: HashMap<String, String>,
    extra_path: Vec<String>,
    messages: Vec<ChatMessage>,
    /// Index of the turn slot most recently surfaced; -1 before the first.
    index: i64,
}

/// Build a session against the configured provider.
pub fn create_session(
    config: &Config,
    prompt: impl Into<String>,
    tools: Vec<FunctionDefinition>,
    options: HashMap<String, String>,
) -> PopResult<ChatSession> {
    let transport = OpenAiTransport::new(&config.ai_host, &config.ai_api_key, &config.ai_model)?;
    Ok(ChatSession::new(
        Arc::new(transport),
        prompt,
        tools,
        options,
        config.extra_path_dirs.clone(),
    ))
}

impl ChatSession {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        prompt: impl Into<String>,
        tools: Vec<FunctionDefinition>,
        options: HashMap<String, String>,
        extra_path: Vec<String>,
    ) -> Self {
        Self {
            transport,
            prompt: prompt.into(),
            tools,
            options,
            extra_path,
            messages: vec![ChatMessage::System {
                content: system_prompt(),
            }],
            index: -1,
        }
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Start an exchange from a capture. The rendered prompt becomes the
    /// first user turn.
    pub async fn chat(&mut self, ctx: &ChatContext, sink: &ChatSink) {
        let content = render::render_chat_content(&self.prompt, ctx);
        let content = render::replace_options(&content, &ctx.text, &self.options);
        self.messages.push(ChatMessage::User { content });
        self.run_exchange(sink).await;
    }

    /// Append a follow-up user message and resume the round protocol. The
    /// round cap applies per exchange, so it resets here.
    pub async fn chat_follow(&mut self, user_message: &str, sink: &ChatSink) {
        self.messages.push(ChatMessage::User {
            content: user_message.to_string(),
        });
        self.run_exchange(sink).await;
    }

    /// One-shot streaming completion without transcript mutation; used by
    /// the translation builtins.
    pub async fn chat_one(
        &self,
        selected_text: &str,
        mut on_delta: impl FnMut(&str) + Send,
    ) -> PopResult<()> {
        let content = render::replace_options(&self.prompt, selected_text, &self.options);
        let messages = vec![
            ChatMessage::System {
                content: system_prompt(),
            },
            ChatMessage::User { content },
        ];
        let mut stream = self.transport.stream_round(&messages, &[]).await?;
        while let Some(delta) = stream.next().await {
            if let StreamDelta::Content(content) = delta? {
                on_delta(&content);
            }
        }
        Ok(())
    }

    async fn run_exchange(&mut self, sink: &ChatSink) {
        let mut rounds = 0;
        while self.messages.last().map(ChatMessage::role) != Some(Role::Assistant) {
            rounds += 1;
            if rounds >= MAX_CHAT_ROUNDS {
                self.index += 1;
                emit(
                    sink,
                    self.index,
                    ResponseMessage::new(
                        "Too many rounds, please start a new chat",
                        Role::System,
                        true,
                        Status::Failure,
                    ),
                );
                return;
            }
            if let Err(e) = self.chat_one_round(sink).await {
                self.index += 1;
                emit(
                    sink,
                    self.index,
                    ResponseMessage::new(
                        format!("Something went wrong: {e}"),
                        Role::System,
                        true,
                        Status::Failure,
                    ),
                );
                return;
            }
        }
    }

    /// One request/stream-response cycle, possibly followed by tool
    /// execution.
    async fn chat_one_round(&mut self, sink: &ChatSink) -> PopResult<()> {
        // Placeholder turn; the first assistant delta takes over this slot.
        emit(
            sink,
            self.index + 1,
            ResponseMessage::new("Waiting", Role::System, true, Status::Initial),
        );

        let specs = self.tool_specs();
        let mut stream = self.transport.stream_round(&self.messages, &specs).await?;

        let mut pending: BTreeMap<usize, ToolCall> = BTreeMap::new();
        let mut has_message = false;
        let mut assistant_content = String::new();

        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::Content(content) => {
                    let new = !has_message;
                    if new {
                        self.index += 1;
                        has_message = true;
                    }
                    assistant_content.push_str(&content);
                    emit(
                        sink,
                        self.index,
                        ResponseMessage::new(content, Role::Assistant, new, Status::Updating),
                    );
                }
                StreamDelta::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    // Arguments accumulate by concatenation, keyed by the
                    // stream-provided index.
                    let entry = pending.entry(index).or_default();
                    if let Some(id) = id {
                        entry.id = id;
                    }
                    if let Some(name) = name {
                        entry.name = name;
                    }
                    entry.arguments.push_str(&arguments);
                }
            }
        }

        if has_message {
            emit(
                sink,
                self.index,
                ResponseMessage::new("", Role::Assistant, false, Status::Finished),
            );
        }

        let calls: Vec<ToolCall> = pending.into_values().collect();
        self.messages.push(ChatMessage::Assistant {
            content: assistant_content,
            tool_calls: calls.clone(),
        });
        if calls.is_empty() {
            return Ok(());
        }
        self.call_tools(&calls, sink).await
    }

    async fn call_tools(&mut self, calls: &[ToolCall], sink: &ChatSink) -> PopResult<()> {
        self.index += 1;
        let definitions: HashMap<&str, &FunctionDefinition> =
            self.tools.iter().map(|d| (d.name.as_str(), d)).collect();

        for call in calls {
            let mut invoking = ResponseMessage::new(
                format!("Calling tool {}", call.name),
                Role::Tool,
                true,
                Status::Updating,
            );
            if let Some(template) = definitions
                .get(call.name.as_str())
                .and_then(|d| d.template.as_deref())
            {
                invoking.content = render::render_template(template, &call.arguments);
            }
            emit(sink, self.index, invoking);
            debug!("tool '{}' arguments: {}", call.name, call.arguments);

            if call.name == IMAGE_TOOL_NAME {
                let prompt: ImagePrompt = serde_json::from_str(&call.arguments)?;
                let url = self.transport.generate_image(&prompt.prompt).await?;
                self.messages.push(ChatMessage::Tool {
                    content: url.clone(),
                    tool_call_id: call.id.clone(),
                });
                emit(
                    sink,
                    self.index,
                    ResponseMessage::new(
                        format!("[![generated image]({url})]({url})"),
                        Role::Tool,
                        true,
                        Status::Finished,
                    ),
                );
            } else if call.name == SVG_TOOL_NAME {
                if let Err(e) = functions::open_svg_preview(&call.arguments) {
                    warn!("svg preview failed: {}", e);
                }
                self.messages.push(ChatMessage::Tool {
                    content: "display svg successfully".to_string(),
                    tool_call_id: call.id.clone(),
                });
                emit(
                    sink,
                    self.index,
                    ResponseMessage::new("Displayed SVG preview", Role::Tool, true, Status::Finished),
                );
            } else if let Some(def) = definitions.get(call.name.as_str()) {
                if let Some(result) = def.run(&call.arguments, &self.options, &self.extra_path).await? {
                    let shown = if def.show_result.unwrap_or(true) {
                        result.clone()
                    } else {
                        format!("Called tool {}", def.name)
                    };
                    emit(
                        sink,
                        self.index,
                        ResponseMessage::new(shown, Role::Tool, true, Status::Finished),
                    );
                    self.messages.push(ChatMessage::Tool {
                        content: result,
                        tool_call_id: call.id.clone(),
                    });
                }
            } else {
                debug!("model called unknown tool '{}'", call.name);
            }
        }
        Ok(())
    }

    /// Declared tools, or none at all for a plain session. The built-ins
    /// ride along only when the session carries plugin tools.
    fn tool_specs(&self) -> Vec<ToolSpec> {
        if self.tools.is_empty() {
            return Vec::new();
        }
        let mut specs = vec![functions::image_tool_spec(), functions::svg_tool_spec()];
        specs.extend(self.tools.iter().map(FunctionDefinition::to_spec));
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PopError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn sink() -> (ChatSink, mpsc::UnboundedReceiver<(usize, ResponseMessage)>) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<(usize, ResponseMessage)>) -> Vec<(usize, ResponseMessage)> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    fn echo_tool(name: &str) -> FunctionDefinition {
        FunctionDefinition {
            name: name.to_string(),
            description: "echoes its arguments".into(),
            parameters: "{}".into(),
            command: Some(vec!["echo".into(), "-n".into()]),
            workdir: Some(std::env::temp_dir()),
            show_result: Some(true),
            template: None,
        }
    }

    fn boxed(deltas: Vec<PopResult<StreamDelta>>) -> super::super::transport::DeltaStream {
        Box::pin(futures::stream::iter(deltas))
    }

    /// Plays back scripted rounds; when the script runs dry it repeats the
    /// final round.
    struct ScriptedTransport {
        rounds: Mutex<Vec<Vec<StreamDelta>>>,
        calls: AtomicUsize,
        repeat_last: bool,
    }

    impl ScriptedTransport {
        fn new(rounds: Vec<Vec<StreamDelta>>, repeat_last: bool) -> Self {
            Self {
                rounds: Mutex::new(rounds),
                calls: AtomicUsize::new(0),
                repeat_last,
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn stream_round(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> PopResult<super::super::transport::DeltaStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut rounds = self.rounds.lock().unwrap();
            let round = if rounds.len() > 1 || !self.repeat_last {
                if rounds.is_empty() {
                    Vec::new()
                } else {
                    rounds.remove(0)
                }
            } else {
                rounds[0].clone()
            };
            Ok(boxed(round.into_iter().map(Ok).collect()))
        }

        async fn generate_image(&self, _prompt: &str) -> PopResult<String> {
            Ok("https://img.example/1.png".into())
        }
    }

    struct FailingTransport;

    #[async_trait::async_trait]
    impl ChatTransport for FailingTransport {
        async fn stream_round(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> PopResult<super::super::transport::DeltaStream> {
            Err(PopError::Chat("connection refused".into()))
        }

        async fn generate_image(&self, _prompt: &str) -> PopResult<String> {
            Err(PopError::Chat("unused".into()))
        }
    }

    fn tool_call(name: &str, id: &str, arguments: &str) -> StreamDelta {
        StreamDelta::ToolCall {
            index: 0,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: arguments.into(),
        }
    }

    fn session_with(transport: Arc<dyn ChatTransport>, tools: Vec<FunctionDefinition>) -> ChatSession {
        ChatSession::new(transport, "Explain: {selected.text}", tools, HashMap::new(), Vec::new())
    }

    #[tokio::test]
    async fn test_single_round_text_exchange() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![vec![
                StreamDelta::Content("Hello".into()),
                StreamDelta::Content(" world".into()),
            ]],
            false,
        ));
        let mut session = session_with(transport, Vec::new());
        let (tx, mut rx) = sink();

        let ctx = ChatContext {
            text: "foo".into(),
            ..Default::default()
        };
        session.chat(&ctx, &tx).await;

        let events = drain(&mut rx);
        // waiting placeholder, two streamed deltas, terminal finish.
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].1.role, Role::System);
        assert_eq!(events[0].1.status, Status::Initial);
        assert!(events[1].1.new);
        assert_eq!(events[1].1.content, "Hello");
        assert!(!events[2].1.new, "second delta appends");
        assert_eq!(events[3].1.status, Status::Finished);
        // All four land in the same turn slot.
        assert!(events.iter().all(|(i, _)| *i == 0));

        match session.transcript().last().unwrap() {
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                assert_eq!(content, "Hello world");
                assert!(tool_calls.is_empty());
            }
            other => panic!("expected assistant turn, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_prompt_rendering_into_first_user_turn() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![vec![StreamDelta::Content("ok".into())]],
            false,
        ));
        let mut session = session_with(transport, Vec::new());
        let (tx, _rx) = sink();

        let ctx = ChatContext {
            text: "selected words".into(),
            ..Default::default()
        };
        session.chat(&ctx, &tx).await;

        match &session.transcript()[1] {
            ChatMessage::User { content } => assert_eq!(content, "Explain: selected words"),
            other => panic!("expected user turn, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                vec![
                    StreamDelta::Content("Let me check".into()),
                    tool_call("probe", "call_1", r#"{"q":"x"}"#),
                ],
                vec![StreamDelta::Content("Answer".into())],
            ],
            false,
        ));
        let mut session = session_with(transport, vec![echo_tool("probe")]);
        let (tx, mut rx) = sink();

        session.chat(&ChatContext::default(), &tx).await;

        let roles: Vec<Role> = session.transcript().iter().map(ChatMessage::role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );

        match &session.transcript()[3] {
            ChatMessage::Tool {
                content,
                tool_call_id,
            } => {
                assert_eq!(content, r#"{"q":"x"}"#);
                assert_eq!(tool_call_id, "call_1");
            }
            other => panic!("expected tool turn, got {:?}", other),
        }

        // Indices never go backwards across the exchange.
        let events = drain(&mut rx);
        let indices: Vec<usize> = events.iter().map(|(i, _)| *i).collect();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]), "{indices:?}");
        // The second round's answer lands in a fresh slot.
        assert_eq!(*indices.last().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_tool_arguments_accumulate_across_chunks() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                vec![
                    StreamDelta::ToolCall {
                        index: 0,
                        id: Some("call_1".into()),
                        name: Some("probe".into()),
                        arguments: r#"{"q""#.into(),
                    },
                    StreamDelta::ToolCall {
                        index: 0,
                        id: None,
                        name: None,
                        arguments: r#":"rust"}"#.into(),
                    },
                ],
                vec![StreamDelta::Content("done".into())],
            ],
            false,
        ));
        let mut session = session_with(transport, vec![echo_tool("probe")]);
        let (tx, _rx) = sink();

        session.chat(&ChatContext::default(), &tx).await;

        match &session.transcript()[2] {
            ChatMessage::Assistant { tool_calls, .. } => {
                assert_eq!(tool_calls[0].arguments, r#"{"q":"rust"}"#);
            }
            other => panic!("expected assistant turn, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_round_cap_fails_at_twenty() {
        // Every round requests another tool call; the exchange must stop
        // with a failure turn at round 20.
        let transport = Arc::new(ScriptedTransport::new(
            vec![vec![tool_call("probe", "call_x", "{}")]],
            true,
        ));
        let calls = Arc::clone(&transport);
        let mut session = session_with(transport, vec![echo_tool("probe")]);
        let (tx, mut rx) = sink();

        session.chat(&ChatContext::default(), &tx).await;

        assert_eq!(calls.calls.load(Ordering::SeqCst), MAX_CHAT_ROUNDS - 1);

        let events = drain(&mut rx);
        let (_, last) = events.last().unwrap();
        assert_eq!(last.role, Role::System);
        assert_eq!(last.status, Status::Failure);
        assert!(last.content.contains("Too many rounds"));
    }

    #[tokio::test]
    async fn test_transport_error_becomes_failure_turn() {
        let mut session = session_with(Arc::new(FailingTransport), Vec::new());
        let (tx, mut rx) = sink();

        session.chat(&ChatContext::default(), &tx).await;

        let events = drain(&mut rx);
        let (_, last) = events.last().unwrap();
        assert_eq!(last.role, Role::System);
        assert_eq!(last.status, Status::Failure);
        assert!(last.content.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_follow_up_continues_transcript() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                vec![StreamDelta::Content("first".into())],
                vec![StreamDelta::Content("second".into())],
            ],
            false,
        ));
        let mut session = session_with(transport, Vec::new());
        let (tx, _rx) = sink();

        session.chat(&ChatContext::default(), &tx).await;
        session.chat_follow("and then?", &tx).await;

        let roles: Vec<Role> = session.transcript().iter().map(ChatMessage::role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_image_tool_round() {
        let transport = Arc::new(ScriptedTransport::new(
            vec![
                vec![tool_call(IMAGE_TOOL_NAME, "call_img", r#"{"prompt":"a crab"}"#)],
                vec![StreamDelta::Content("there you go".into())],
            ],
            false,
        ));
        // A plugin tool must be present for built-ins to be offered.
        let mut session = session_with(transport, vec![echo_tool("probe")]);
        let (tx, mut rx) = sink();

        session.chat(&ChatContext::default(), &tx).await;

        match &session.transcript()[3] {
            ChatMessage::Tool { content, .. } => {
                assert_eq!(content, "https://img.example/1.png");
            }
            other => panic!("expected tool turn, got {:?}", other),
        }
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|(_, m)| m.role == Role::Tool && m.content.contains("generated image")));
    }
}
