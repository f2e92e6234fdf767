//! Shared fixtures for integration tests

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tempfile::TempDir;

use textpop::actions::catalog::ActionCatalog;
use textpop::actions::ResolvedAction;
use textpop::capture::{CaptureBackend, ContextBuilder, SelectedTextContext};
use textpop::config::ConfigurationStore;
use textpop::dispatch::{ActionSurface, CloseMode, Dispatcher};
use textpop::plugins::PluginRegistry;

/// Backend with a scriptable selection; editable reports false.
pub struct FakeBackend {
    pub app_id: String,
    pub selection: Mutex<String>,
    pub pasted: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new(app_id: &str, selection: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            selection: Mutex::new(selection.to_string()),
            pasted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CaptureBackend for FakeBackend {
    async fn foreground_app_id(&self) -> Option<String> {
        Some(self.app_id.clone())
    }
    async fn focused_selection_text(&self, _app_id: &str) -> String {
        self.selection.lock().unwrap().clone()
    }
    async fn is_focused_element_editable(&self) -> Option<bool> {
        Some(false)
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

/// Surface that records what it was asked to show.
#[derive(Default)]
pub struct RecordingSurface {
    pub shown: Mutex<Vec<(SelectedTextContext, Vec<ResolvedAction>)>>,
}

impl ActionSurface for RecordingSurface {
    fn show_bar(&self, ctx: &SelectedTextContext, actions: Vec<ResolvedAction>) {
        self.shown.lock().unwrap().push((ctx.clone(), actions));
    }
    fn close_popbar(&self, _mode: CloseMode) -> bool {
        false
    }
    fn close_all(&self, _mode: CloseMode) -> bool {
        false
    }
}

pub struct TestContext {
    pub temp_dir: TempDir,
    pub dispatcher: Dispatcher,
    pub backend: Arc<FakeBackend>,
    pub surface: Arc<RecordingSurface>,
    pub registry: Arc<RwLock<PluginRegistry>>,
}

impl TestContext {
    /// Wire a dispatcher over fakes, with `manifests` installed as plugin
    /// directories named `plugin0`, `plugin1`, ...
    pub fn new(app_id: &str, selection: &str, manifests: &[&str]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let extensions = temp_dir.path().join("extensions");

        for (i, manifest) in manifests.iter().enumerate() {
            let plugin_dir = extensions.join(format!("plugin{i}"));
            std::fs::create_dir_all(&plugin_dir).expect("Failed to create plugin dir");
            std::fs::write(plugin_dir.join("plugin.yaml"), manifest)
                .expect("Failed to write manifest");
        }

        let registry = Arc::new(RwLock::new(
            PluginRegistry::new(extensions, temp_dir.path().join("options.json"))
                .expect("Failed to build registry"),
        ));
        let store = Arc::new(RwLock::new(ConfigurationStore::default()));
        let catalog = Arc::new(ActionCatalog::new(store, registry.clone()));

        let backend = Arc::new(FakeBackend::new(app_id, selection));
        let surface = Arc::new(RecordingSurface::default());
        let builder = ContextBuilder::new(backend.clone(), "textpop");
        let dispatcher = Dispatcher::new(builder, catalog, surface.clone());

        Self {
            temp_dir,
            dispatcher,
            backend,
            surface,
            registry,
        }
    }
}
