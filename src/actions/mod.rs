//! Actions
//!
//! An action is a user-invokable operation applied to captured text. Each
//! action couples display metadata with one variant of a sum type; the
//! [`Executor`] dispatches on the variant and applies the configured
//! after-effect to whatever the action produced.

pub mod builtin;
pub mod catalog;
pub mod run_command;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::capture::{CaptureBackend, SelectedTextContext};
use crate::chat::functions::FunctionDefinition;
use crate::chat::openai::OpenAiTransport;
use crate::chat::render::replace_options;
use crate::chat::session::{self, ChatSession};
use crate::chat::{ChatContext, ResponseMessage};
use crate::clipboard::{self, Clipboard};
use crate::config::Config;
use crate::input::SharedKeyboard;
use crate::plugins::ManifestAction;
use crate::tts::TtsEngine;

/// What happens with an action's textual output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AfterEffect {
    Paste,
    Copy,
    Show,
    #[default]
    None,
}

impl AfterEffect {
    pub fn parse(value: &str) -> Self {
        match value {
            "paste" => AfterEffect::Paste,
            "copy" => AfterEffect::Copy,
            "show" => AfterEffect::Show,
            _ => AfterEffect::None,
        }
    }
}

/// Display metadata shared by every action.
#[derive(Debug, Clone)]
pub struct GenericAction {
    pub identifier: String,
    pub title: String,
    pub icon: String,
    pub after: AfterEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateTarget {
    Chinese,
    English,
}

/// One variant per executor kind; decoded from manifests by trying each
/// known field, first present wins.
#[derive(Debug, Clone)]
pub enum ActionVariant {
    WebSearch,
    Copy,
    Speak,
    Translate { target: TranslateTarget },
    Url { template: String },
    Service { name: String },
    KeyCombo { keys: Vec<String> },
    Gpt {
        prompt: String,
        tools: Vec<FunctionDefinition>,
    },
    RunCommand {
        command: Vec<String>,
        plugin_dir: PathBuf,
    },
}

/// A fully resolved, executable action.
#[derive(Debug, Clone)]
pub struct ResolvedAction {
    pub generic: GenericAction,
    pub variant: ActionVariant,
    /// Current option values of the owning plugin; empty for builtins.
    pub options: HashMap<String, String>,
}

impl ResolvedAction {
    /// Titles render against option values at listing time and again with
    /// the selected text at execution time.
    pub fn rendered_title(&self, selected_text: &str) -> String {
        replace_options(&self.generic.title, selected_text, &self.options)
    }
}

/// Convert a manifest action; `None` when no variant field is populated.
pub fn resolve_manifest_action(
    action: &ManifestAction,
    options: HashMap<String, String>,
) -> Option<ResolvedAction> {
    let generic = GenericAction {
        identifier: action.meta.identifier.clone(),
        title: action.meta.title.clone(),
        icon: action.meta.icon.clone(),
        after: AfterEffect::parse(&action.meta.after),
    };

    let variant = if let Some(url) = &action.url {
        ActionVariant::Url {
            template: url.url.clone(),
        }
    } else if let Some(service) = &action.service {
        ActionVariant::Service {
            name: service.name.clone(),
        }
    } else if let Some(keycombo) = &action.keycombo {
        ActionVariant::KeyCombo {
            keys: keycombo.keycombo.clone(),
        }
    } else if let Some(gpt) = &action.gpt {
        ActionVariant::Gpt {
            prompt: gpt.prompt.clone(),
            tools: gpt.tools.clone().unwrap_or_default(),
        }
    } else if let Some(run_command) = &action.run_command {
        ActionVariant::RunCommand {
            command: run_command.command.clone(),
            plugin_dir: run_command.plugin_path.clone(),
        }
    } else {
        return None;
    };

    Some(ResolvedAction {
        generic,
        variant,
        options,
    })
}

/// Result of one execution, as seen by the surface.
pub enum ActionOutput {
    /// Done; nothing to display.
    None,
    /// Show this text in a result surface.
    Text(String),
    /// A chat exchange started; events stream through the handle.
    Chat(ChatHandle),
}

/// Owns a running chat exchange. Dropping the handle cancels the in-flight
/// stream and any pending follow-ups.
pub struct ChatHandle {
    pub events: mpsc::UnboundedReceiver<(usize, ResponseMessage)>,
    follow: mpsc::UnboundedSender<String>,
    task: tokio::task::JoinHandle<()>,
}

impl ChatHandle {
    pub fn follow_up(&self, message: impl Into<String>) {
        let _ = self.follow.send(message.into());
    }
}

impl Drop for ChatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Executes actions against a capture. All failures are logged and degrade
/// to no output; nothing here may take down the dispatcher.
pub struct Executor {
    config: Arc<Config>,
    backend: Arc<dyn CaptureBackend>,
    clipboard: Arc<dyn Clipboard>,
    tts: Arc<dyn TtsEngine>,
    keyboard: Option<Arc<SharedKeyboard>>,
}

impl Executor {
    pub fn new(
        config: Arc<Config>,
        backend: Arc<dyn CaptureBackend>,
        clipboard: Arc<dyn Clipboard>,
        tts: Arc<dyn TtsEngine>,
        keyboard: Option<Arc<SharedKeyboard>>,
    ) -> Self {
        Self {
            config,
            backend,
            clipboard,
            tts,
            keyboard,
        }
    }

    pub async fn execute(&self, action: &ResolvedAction, ctx: &SelectedTextContext) -> ActionOutput {
        info!("▶️ executing '{}'", action.generic.identifier);
        match &action.variant {
            ActionVariant::WebSearch => {
                self.open_template(&self.config.search_url, action, ctx);
                ActionOutput::None
            }
            ActionVariant::Url { template } => {
                self.open_template(template, action, ctx);
                ActionOutput::None
            }
            ActionVariant::Copy => {
                clipboard::copy_text(self.clipboard.as_ref(), &ctx.text);
                ActionOutput::None
            }
            ActionVariant::Speak => {
                self.speak(&ctx.text).await;
                ActionOutput::None
            }
            ActionVariant::Service { name } => {
                match name.as_str() {
                    "speak" => self.speak(&ctx.text).await,
                    "copy" => clipboard::copy_text(self.clipboard.as_ref(), &ctx.text),
                    other => warn!("unknown service '{}'", other),
                }
                ActionOutput::None
            }
            ActionVariant::KeyCombo { keys } => {
                match &self.keyboard {
                    Some(keyboard) => {
                        if let Err(e) = keyboard.press_named_combo(keys) {
                            warn!("key combo failed: {}", e);
                        }
                    }
                    None => warn!("no virtual keyboard available for key combo"),
                }
                ActionOutput::None
            }
            ActionVariant::Translate { target } => self.translate(*target, ctx).await,
            ActionVariant::Gpt { prompt, tools } => {
                self.start_chat(action, ctx, prompt, tools.clone())
            }
            ActionVariant::RunCommand {
                command,
                plugin_dir,
            } => {
                let Some((program, args)) = command.split_first() else {
                    return ActionOutput::None;
                };
                let env = run_command::selection_env(ctx, &action.generic.identifier, &action.options);
                match run_command::execute_command(
                    plugin_dir,
                    program,
                    args,
                    env,
                    &self.config.extra_path_dirs,
                )
                .await
                {
                    Ok(output) => self.apply_after_effect(action, ctx, output).await,
                    Err(e) => {
                        // Spawn failure, non-zero exit, and timeout all
                        // degrade to "no output".
                        warn!("command action '{}' failed: {}", action.generic.identifier, e);
                        ActionOutput::None
                    }
                }
            }
        }
    }

    async fn apply_after_effect(
        &self,
        action: &ResolvedAction,
        ctx: &SelectedTextContext,
        output: String,
    ) -> ActionOutput {
        match action.generic.after {
            AfterEffect::Paste if ctx.editable => {
                self.backend.simulate_paste(&output).await;
                ActionOutput::None
            }
            AfterEffect::Copy => {
                clipboard::copy_text(self.clipboard.as_ref(), &output);
                ActionOutput::None
            }
            AfterEffect::Show => ActionOutput::Text(output),
            _ => ActionOutput::None,
        }
    }

    fn open_template(&self, template: &str, action: &ResolvedAction, ctx: &SelectedTextContext) {
        let encoded = urlencoding::encode(&ctx.text);
        let url = replace_options(template, &encoded, &action.options);
        builtin::open_url(&url);
    }

    async fn speak(&self, text: &str) {
        if let Err(e) = self.tts.speak(text).await {
            warn!("speak failed: {}", e);
        }
    }

    async fn translate(&self, target: TranslateTarget, ctx: &SelectedTextContext) -> ActionOutput {
        let prompt = builtin::translation_prompt(target, &ctx.text);
        let transport = match OpenAiTransport::new(
            &self.config.ai_host,
            &self.config.ai_api_key,
            &self.config.ai_translation_model,
        ) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("translation transport: {}", e);
                return ActionOutput::None;
            }
        };
        let session = ChatSession::new(
            Arc::new(transport),
            prompt,
            Vec::new(),
            HashMap::new(),
            Vec::new(),
        );

        let mut collected = String::new();
        match session
            .chat_one(&ctx.text, |delta| collected.push_str(delta))
            .await
        {
            Ok(()) => ActionOutput::Text(collected),
            Err(e) => {
                warn!("translation failed: {}", e);
                ActionOutput::None
            }
        }
    }

    fn start_chat(
        &self,
        action: &ResolvedAction,
        ctx: &SelectedTextContext,
        prompt: &str,
        tools: Vec<FunctionDefinition>,
    ) -> ActionOutput {
        let mut session =
            match session::create_session(&self.config, prompt, tools, action.options.clone()) {
                Ok(session) => session,
                Err(e) => {
                    warn!("chat session: {}", e);
                    return ActionOutput::None;
                }
            };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (follow_tx, mut follow_rx) = mpsc::unbounded_channel::<String>();
        let chat_ctx = ChatContext::from(ctx);

        let task = tokio::spawn(async move {
            session.chat(&chat_ctx, &event_tx).await;
            while let Some(message) = follow_rx.recv().await {
                session.chat_follow(&message, &event_tx).await;
            }
        });

        ActionOutput::Chat(ChatHandle {
            events: event_rx,
            follow: follow_tx,
            task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{ActionMeta, RunCommandSpec, UrlActionSpec};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        pasted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CaptureBackend for RecordingBackend {
        async fn foreground_app_id(&self) -> Option<String> {
            None
        }
        async fn focused_selection_text(&self, _app_id: &str) -> String {
            String::new()
        }
        async fn is_focused_element_editable(&self) -> Option<bool> {
            None
        }
        async fn browser_selection_and_url(&self, _app_id: &str) -> Option<(String, String)> {
            None
        }
        async fn simulate_copy_and_read(&self) -> String {
            String::new()
        }
        async fn simulate_paste(&self, text: &str) {
            self.pasted.lock().unwrap().push(text.to_string());
        }
    }

    #[derive(Default)]
    struct MemClipboard(Mutex<Option<String>>);

    impl Clipboard for MemClipboard {
        fn read(&self) -> Option<String> {
            self.0.lock().unwrap().clone()
        }
        fn write(&self, text: &str) {
            *self.0.lock().unwrap() = Some(text.to_string());
        }
    }

    #[derive(Debug)]
    struct NullTts(Mutex<Vec<String>>);

    #[async_trait]
    impl TtsEngine for NullTts {
        async fn speak(&self, text: &str) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
        fn name(&self) -> &str {
            "null"
        }
    }

    struct Fixture {
        executor: Executor,
        backend: Arc<RecordingBackend>,
        clipboard: Arc<MemClipboard>,
        tts: Arc<NullTts>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(RecordingBackend::default());
        let clipboard = Arc::new(MemClipboard::default());
        let tts = Arc::new(NullTts(Mutex::new(Vec::new())));
        let executor = Executor::new(
            Arc::new(Config::default()),
            backend.clone(),
            clipboard.clone(),
            tts.clone(),
            None,
        );
        Fixture {
            executor,
            backend,
            clipboard,
            tts,
        }
    }

    fn shell_action(command: &[&str], after: AfterEffect) -> ResolvedAction {
        ResolvedAction {
            generic: GenericAction {
                identifier: "test.shell".into(),
                title: "Shell".into(),
                icon: String::new(),
                after,
            },
            variant: ActionVariant::RunCommand {
                command: command.iter().map(|s| s.to_string()).collect(),
                plugin_dir: std::env::temp_dir(),
            },
            options: HashMap::new(),
        }
    }

    fn ctx(text: &str, editable: bool) -> SelectedTextContext {
        SelectedTextContext {
            text: text.into(),
            app_id: "test.app".into(),
            editable,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_shell_action_show_yields_output() {
        let f = fixture();
        let action = shell_action(&["echo", "hi"], AfterEffect::Show);
        match f.executor.execute(&action, &ctx("x", false)).await {
            ActionOutput::Text(text) => assert_eq!(text, "hi\n"),
            _ => panic!("expected text output"),
        }
    }

    #[tokio::test]
    async fn test_paste_after_effect_when_editable() {
        let f = fixture();
        let action = shell_action(&["echo", "-n", "pasted"], AfterEffect::Paste);
        match f.executor.execute(&action, &ctx("x", true)).await {
            ActionOutput::None => {}
            _ => panic!("expected no surfaced output"),
        }
        assert_eq!(*f.backend.pasted.lock().unwrap(), vec!["pasted"]);
    }

    #[tokio::test]
    async fn test_paste_skipped_when_not_editable() {
        let f = fixture();
        let action = shell_action(&["echo", "-n", "pasted"], AfterEffect::Paste);
        f.executor.execute(&action, &ctx("x", false)).await;
        assert!(f.backend.pasted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_after_effect() {
        let f = fixture();
        let action = shell_action(&["echo", "-n", "copied"], AfterEffect::Copy);
        f.executor.execute(&action, &ctx("x", false)).await;
        assert_eq!(f.clipboard.read().as_deref(), Some("copied"));
    }

    #[tokio::test]
    async fn test_failing_command_degrades_to_no_output() {
        let f = fixture();
        let action = shell_action(&["sh", "-c", "exit 1"], AfterEffect::Show);
        match f.executor.execute(&action, &ctx("x", false)).await {
            ActionOutput::None => {}
            _ => panic!("failure must not surface output"),
        }
    }

    #[tokio::test]
    async fn test_copy_builtin_copies_selection() {
        let f = fixture();
        let action = ResolvedAction {
            generic: GenericAction {
                identifier: builtin::COPY_ID.into(),
                title: "Copy".into(),
                icon: String::new(),
                after: AfterEffect::None,
            },
            variant: ActionVariant::Copy,
            options: HashMap::new(),
        };
        f.executor.execute(&action, &ctx("the selection", false)).await;
        assert_eq!(f.clipboard.read().as_deref(), Some("the selection"));
    }

    #[tokio::test]
    async fn test_speak_builtin_reaches_tts() {
        let f = fixture();
        let action = ResolvedAction {
            generic: GenericAction {
                identifier: builtin::SPEAK_ID.into(),
                title: "Speak".into(),
                icon: String::new(),
                after: AfterEffect::None,
            },
            variant: ActionVariant::Speak,
            options: HashMap::new(),
        };
        f.executor.execute(&action, &ctx("read me", false)).await;
        assert_eq!(*f.tts.0.lock().unwrap(), vec!["read me"]);
    }

    #[test]
    fn test_after_effect_parse() {
        assert_eq!(AfterEffect::parse("paste"), AfterEffect::Paste);
        assert_eq!(AfterEffect::parse("copy"), AfterEffect::Copy);
        assert_eq!(AfterEffect::parse("show"), AfterEffect::Show);
        assert_eq!(AfterEffect::parse(""), AfterEffect::None);
        assert_eq!(AfterEffect::parse("unknown"), AfterEffect::None);
    }

    #[test]
    fn test_manifest_variant_first_present_wins() {
        let mut action = ManifestAction {
            meta: ActionMeta {
                icon: String::new(),
                title: "t".into(),
                after: String::new(),
                identifier: "id".into(),
                regex: None,
            },
            url: Some(UrlActionSpec {
                url: "https://x/{selected.text}".into(),
            }),
            service: None,
            keycombo: None,
            gpt: None,
            run_command: Some(RunCommandSpec {
                command: vec!["echo".into()],
                plugin_path: PathBuf::new(),
            }),
        };

        let resolved = resolve_manifest_action(&action, HashMap::new()).unwrap();
        assert!(matches!(resolved.variant, ActionVariant::Url { .. }));

        action.url = None;
        let resolved = resolve_manifest_action(&action, HashMap::new()).unwrap();
        assert!(matches!(resolved.variant, ActionVariant::RunCommand { .. }));

        action.run_command = None;
        assert!(resolve_manifest_action(&action, HashMap::new()).is_none());
    }

    #[test]
    fn test_title_render_roundtrip() {
        let action = ResolvedAction {
            generic: GenericAction {
                identifier: "id".into(),
                title: "Search {options.engine} for {selected.text}".into(),
                icon: String::new(),
                after: AfterEffect::None,
            },
            variant: ActionVariant::WebSearch,
            options: HashMap::from([("engine".to_string(), "ddg".to_string())]),
        };
        let once = action.rendered_title("query");
        assert_eq!(once, "Search ddg for query");
        // Idempotent templating with no side effects.
        let listing = action.rendered_title("");
        assert_eq!(listing, action.rendered_title(""));
    }
}
