//! Plugin registry
//!
//! Plugins live one-per-directory under the extensions dir, each described
//! by a `plugin.yaml` manifest. The registry reloads wholesale on
//! install/remove; a malformed manifest skips that plugin only.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chat::functions::FunctionDefinition;

/// Declared plugin option.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionSpec {
    pub identifier: String,
    #[serde(rename = "type", default)]
    pub kind: OptionKind,
    #[serde(rename = "defaultVal", default)]
    pub default_val: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Boolean,
    #[default]
    String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginInfo {
    pub icon: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "minCoreVersion", default)]
    pub min_core_version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionSpec>,

    // Not part of the manifest.
    #[serde(skip)]
    pub enabled: bool,
    #[serde(skip)]
    pub plugin_dir: PathBuf,
}

/// App/URL applicability filters. Absent filters match everything; declared
/// but empty lists match nothing; a hit in either list is sufficient.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Supported {
    #[serde(default)]
    pub apps: Option<Vec<SupportedApp>>,
    #[serde(default)]
    pub urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupportedApp {
    #[serde(rename = "bundleID")]
    pub app_id: String,
}

impl Supported {
    pub fn matches(&self, app_id: &str, url: &str) -> bool {
        if self.apps.is_none() && self.urls.is_none() {
            return true;
        }
        let app_hit = self
            .apps
            .as_ref()
            .is_some_and(|apps| apps.iter().any(|a| a.app_id == app_id));
        let url_hit = self
            .urls
            .as_ref()
            .is_some_and(|urls| urls.iter().any(|u| !u.is_empty() && url.contains(u.as_str())));
        app_hit || url_hit
    }
}

/// Display metadata shared by every action kind.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionMeta {
    pub icon: String,
    pub title: String,
    #[serde(default)]
    pub after: String,
    pub identifier: String,
    #[serde(default)]
    pub regex: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlActionSpec {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceActionSpec {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeycomboActionSpec {
    pub keycombo: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GptActionSpec {
    pub prompt: String,
    #[serde(default)]
    pub tools: Option<Vec<FunctionDefinition>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunCommandSpec {
    pub command: Vec<String>,
    /// Commands execute in the plugin's directory; filled at load time.
    #[serde(skip)]
    pub plugin_path: PathBuf,
}

/// One manifest action: exactly one of the trailing variant fields is
/// populated; the first present wins at resolution time.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestAction {
    pub meta: ActionMeta,
    #[serde(default)]
    pub url: Option<UrlActionSpec>,
    #[serde(default)]
    pub service: Option<ServiceActionSpec>,
    #[serde(default)]
    pub keycombo: Option<KeycomboActionSpec>,
    #[serde(default)]
    pub gpt: Option<GptActionSpec>,
    #[serde(rename = "runCommand", default)]
    pub run_command: Option<RunCommandSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plugin {
    pub info: PluginInfo,
    #[serde(default)]
    pub supported: Option<Supported>,
    #[serde(default)]
    pub actions: Vec<ManifestAction>,
}

impl Plugin {
    /// Whether this plugin's actions apply to the given context.
    pub fn applies_to(&self, app_id: &str, url: &str) -> bool {
        self.supported
            .as_ref()
            .map_or(true, |s| s.matches(app_id, url))
    }
}

/// Persisted per-plugin state: option values and disabled set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OptionsStore {
    #[serde(default)]
    values: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    disabled: HashSet<String>,
}

const MANIFEST_NAME: &str = "plugin.yaml";
const OPTIONS_FILE: &str = "plugin_options.json";
const LOCAL_ICON_PREFIX: &str = "file://./";

/// Manages installed plugins and their option values.
pub struct PluginRegistry {
    extensions_dir: PathBuf,
    options_path: PathBuf,
    options: OptionsStore,
    pub plugins: Vec<Plugin>,
}

impl PluginRegistry {
    pub fn new(extensions_dir: PathBuf, options_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&extensions_dir)
            .with_context(|| format!("creating {}", extensions_dir.display()))?;

        let options = match fs::read_to_string(&options_path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("⚠️ plugin options invalid, starting empty: {}", e);
                OptionsStore::default()
            }),
            Err(_) => OptionsStore::default(),
        };

        let mut registry = Self {
            extensions_dir,
            options_path,
            options,
            plugins: Vec::new(),
        };
        registry.load_plugins();
        Ok(registry)
    }

    /// Scan the extensions directory and load every manifest. A plugin that
    /// fails to parse is skipped; the rest keep loading.
    pub fn load_plugins(&mut self) {
        let mut list = Vec::new();

        let entries = match fs::read_dir(&self.extensions_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("⚠️ cannot read extensions dir: {}", e);
                self.plugins = list;
                return;
            }
        };

        for entry in entries.flatten() {
            let plugin_dir = entry.path();
            if !plugin_dir.is_dir() {
                continue;
            }
            let manifest = plugin_dir.join(MANIFEST_NAME);
            if !manifest.exists() {
                continue;
            }
            match self.load_one(&plugin_dir, &manifest) {
                Ok(plugin) => {
                    debug!("loaded plugin '{}'", plugin.info.name);
                    list.push(plugin);
                }
                Err(e) => warn!("⚠️ skipping plugin {}: {}", plugin_dir.display(), e),
            }
        }

        info!("🔌 {} plugin(s) loaded", list.len());
        self.plugins = list;
    }

    fn load_one(&self, plugin_dir: &Path, manifest: &Path) -> Result<Plugin> {
        let content = fs::read_to_string(manifest)?;
        let mut plugin: Plugin = serde_yaml_ng::from_str(&content)?;

        plugin.info.plugin_dir = plugin_dir.to_path_buf();
        plugin.info.enabled = !self.options.disabled.contains(&plugin.info.name);
        plugin.info.icon = resolve_icon(&plugin.info.icon, plugin_dir);

        for action in &mut plugin.actions {
            action.meta.icon = resolve_icon(&action.meta.icon, plugin_dir);

            if let Some(run_command) = &mut action.run_command {
                run_command.plugin_path = plugin_dir.to_path_buf();
            }
            if let Some(gpt) = &mut action.gpt {
                if let Some(tools) = &mut gpt.tools {
                    for tool in tools {
                        tool.workdir = Some(plugin_dir.to_path_buf());
                    }
                }
            }

            // An uncompilable applicability regex disables itself, not the action.
            if let Some(pattern) = &action.meta.regex {
                if let Err(e) = Regex::new(pattern) {
                    warn!(
                        "⚠️ invalid regex on action '{}': {}",
                        action.meta.identifier, e
                    );
                    action.meta.regex = None;
                }
            }
        }

        Ok(plugin)
    }

    /// Install a plugin by copying its directory into the extensions dir,
    /// then reload everything.
    pub fn install(&mut self, source: &Path) -> Result<()> {
        let name = source
            .file_name()
            .context("plugin source has no directory name")?;
        let target = self.extensions_dir.join(name);
        copy_dir(source, &target)?;
        info!("🔌 installed plugin from {}", source.display());
        self.load_plugins();
        Ok(())
    }

    /// Remove an installed plugin directory and its stored options.
    pub fn remove(&mut self, plugin_name: &str) -> Result<()> {
        if let Some(plugin) = self.plugins.iter().find(|p| p.info.name == plugin_name) {
            fs::remove_dir_all(&plugin.info.plugin_dir)?;
        }
        self.options.values.remove(plugin_name);
        self.options.disabled.remove(plugin_name);
        self.save_options()?;
        self.load_plugins();
        Ok(())
    }

    /// Current option values for a plugin: stored value, else declared
    /// default (`false` for booleans).
    pub fn option_values(&self, info: &PluginInfo) -> HashMap<String, String> {
        let stored = self.options.values.get(&info.name);
        let mut values = HashMap::new();
        for option in &info.options {
            let value = stored
                .and_then(|m| m.get(&option.identifier).cloned())
                .or_else(|| option.default_val.clone())
                .unwrap_or_else(|| match option.kind {
                    OptionKind::Boolean => "false".to_string(),
                    OptionKind::String => String::new(),
                });
            values.insert(option.identifier.clone(), value);
        }
        values
    }

    pub fn set_option(&mut self, plugin_name: &str, identifier: &str, value: String) -> Result<()> {
        self.options
            .values
            .entry(plugin_name.to_string())
            .or_default()
            .insert(identifier.to_string(), value);
        self.save_options()
    }

    pub fn set_enabled(&mut self, plugin_name: &str, enabled: bool) -> Result<()> {
        if enabled {
            self.options.disabled.remove(plugin_name);
        } else {
            self.options.disabled.insert(plugin_name.to_string());
        }
        for plugin in &mut self.plugins {
            if plugin.info.name == plugin_name {
                plugin.info.enabled = enabled;
            }
        }
        self.save_options()
    }

    fn save_options(&self) -> Result<()> {
        if let Some(parent) = self.options_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.options_path, serde_json::to_string_pretty(&self.options)?)?;
        Ok(())
    }
}

/// Icons starting with the relative-file marker resolve against the plugin dir.
fn resolve_icon(icon: &str, plugin_dir: &Path) -> String {
    match icon.strip_prefix(LOCAL_ICON_PREFIX) {
        Some(rel) => format!("file://{}", plugin_dir.join(rel).display()),
        None => icon.to_string(),
    }
}

fn copy_dir(source: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        fs::remove_dir_all(target)?;
    }
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(source)?;
        let dest = target.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
