//! textpop - selection-triggered action bar for the Linux desktop
//!
//! Watches global mouse/keyboard events, captures the selected text of the
//! foreground application, and dispatches configured actions on it.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use textpop::actions::catalog::ActionCatalog;
use textpop::actions::{ActionOutput, Executor, ResolvedAction};
use textpop::capture::command_backend::CommandClipboard;
use textpop::capture::{CommandBackend, ContextBuilder, SelectedTextContext};
use textpop::clipboard::{ClipMonitor, Clipboard, KeySynth};
use textpop::config::{self, Config, ConfigurationStore};
use textpop::dispatch::{ActionSurface, CloseMode, Dispatcher};
use textpop::error::{PopError, PopResult};
use textpop::input::{self, SharedKeyboard};
use textpop::plugins::PluginRegistry;
use textpop::tts;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Install a plugin from a directory, then exit
    #[arg(long)]
    install_plugin: Option<std::path::PathBuf>,

    /// Run this action automatically on every capture (headless mode)
    #[arg(long)]
    auto_action: Option<String>,
}

/// Headless surface: logs every capture's action bar, and when an
/// auto-action is configured, executes it. Real UIs implement
/// [`ActionSurface`] out of tree.
struct LogSurface {
    executor: Arc<Executor>,
    auto_action: Option<String>,
}

impl ActionSurface for LogSurface {
    fn show_bar(&self, ctx: &SelectedTextContext, actions: Vec<ResolvedAction>) {
        let titles: Vec<String> = actions.iter().map(|a| a.rendered_title(&ctx.text)).collect();
        info!("📋 '{}' from {} -> [{}]", ctx.text, ctx.app_id, titles.join(", "));

        let Some(wanted) = &self.auto_action else {
            return;
        };
        let Some(action) = actions.into_iter().find(|a| &a.generic.identifier == wanted) else {
            warn!("auto action '{}' not in the resolved list", wanted);
            return;
        };

        let executor = Arc::clone(&self.executor);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            match executor.execute(&action, &ctx).await {
                ActionOutput::None => {}
                ActionOutput::Text(text) => info!("💬 {}", text),
                ActionOutput::Chat(mut handle) => {
                    while let Some((index, message)) = handle.events.recv().await {
                        info!("💬 [{}] {:?}: {}", index, message.role, message.content);
                    }
                }
            }
        });
    }

    fn close_popbar(&self, _mode: CloseMode) -> bool {
        false
    }

    fn close_all(&self, _mode: CloseMode) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("✂️ textpop v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    let store = Arc::new(RwLock::new(ConfigurationStore::load()));
    let mut registry = PluginRegistry::new(
        config::extensions_dir(),
        config::config_dir().join("plugin_options.json"),
    )?;

    if let Some(source) = args.install_plugin {
        registry.install(&source)?;
        return Ok(());
    }
    let registry = Arc::new(RwLock::new(registry));

    // Pasteboard plumbing shared by the capture and paste paths
    let monitor = Arc::new(ClipMonitor::new());
    let clipboard: Arc<dyn Clipboard> = Arc::new(CommandClipboard::new(&config));
    let keyboard = match SharedKeyboard::new() {
        Ok(keyboard) => Some(Arc::new(keyboard)),
        Err(e) => {
            warn!("⚠️ Could not create virtual keyboard: {}", e);
            warn!("   Copy-simulation capture and key combos are disabled");
            None
        }
    };
    let keys: Arc<dyn KeySynth> = match &keyboard {
        Some(keyboard) => Arc::clone(keyboard) as Arc<dyn KeySynth>,
        None => Arc::new(NoKeys),
    };

    let backend = Arc::new(CommandBackend::new(
        &config,
        Arc::clone(&clipboard),
        keys,
        Arc::clone(&monitor),
    ));
    let builder = ContextBuilder::new(backend.clone(), config.self_app_id.clone());

    let tts_engine = tts::create_engine(&config.tts_engine).await?;
    let executor = Arc::new(Executor::new(
        Arc::clone(&config),
        backend,
        clipboard,
        tts_engine,
        keyboard,
    ));

    let catalog = Arc::new(ActionCatalog::new(store, registry));
    let surface = Arc::new(LogSurface {
        executor,
        auto_action: args.auto_action,
    });
    let mut dispatcher = Dispatcher::new(builder, catalog, surface);

    let events = input::start_listener();
    info!("✅ textpop ready - select some text");
    dispatcher.run(events).await;

    Ok(())
}

/// Key synthesis stub for hosts without uinput access.
struct NoKeys;

impl KeySynth for NoKeys {
    fn press_copy(&self) -> PopResult<()> {
        Err(PopError::Input("no virtual keyboard".into()))
    }
    fn press_paste(&self) -> PopResult<()> {
        Err(PopError::Input("no virtual keyboard".into()))
    }
}
