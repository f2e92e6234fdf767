//! Configuration
//!
//! Two documents live under the config directory: `config.json` with daemon
//! settings (AI endpoints, backend commands, search template) and
//! `user_configuration.json` with the per-app/per-URL action lists.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Actions
    pub search_url: String,

    // AI
    pub ai_host: String,
    pub ai_api_key: String,
    pub ai_model: String,
    pub ai_translation_model: String,

    // Speech
    pub tts_engine: String,

    // Capture backend (external tools, argv form)
    pub app_id_command: Vec<String>,
    pub selection_command: Vec<String>,
    pub browser_url_command: Vec<String>,
    pub clipboard_read_command: Vec<String>,
    pub clipboard_write_command: Vec<String>,

    /// Identifier reported for this daemon's own windows; captures from it
    /// are always discarded.
    pub self_app_id: String,

    /// Directories prepended to PATH for plugin commands and chat tools.
    #[serde(default)]
    pub extra_path_dirs: Vec<String>,

    // Meta
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_url: "https://www.google.com/search?q={selected.text}".to_string(),
            ai_host: "https://api.openai.com".to_string(),
            ai_api_key: String::new(),
            ai_model: "gpt-4o".to_string(),
            ai_translation_model: "gpt-4o-mini".to_string(),
            tts_engine: "system".to_string(),
            app_id_command: vec![
                "xdotool".into(),
                "getactivewindow".into(),
                "getwindowclassname".into(),
            ],
            selection_command: vec!["xclip".into(), "-o".into(), "-selection".into(), "primary".into()],
            browser_url_command: Vec::new(),
            clipboard_read_command: vec![
                "xclip".into(),
                "-o".into(),
                "-selection".into(),
                "clipboard".into(),
            ],
            clipboard_write_command: vec![
                "xclip".into(),
                "-i".into(),
                "-selection".into(),
                "clipboard".into(),
            ],
            self_app_id: "textpop".to_string(),
            extra_path_dirs: vec!["/usr/local/bin".into(), "/usr/local/sbin".into()],
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Load config from file or create default
    pub fn load() -> Result<Self> {
        let config_path = config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            match serde_json::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    // Graceful degradation: log warning and use defaults
                    tracing::warn!("⚠️ Config file corrupted or invalid, using defaults: {}", e);
                    // Backup corrupt file for debugging
                    let backup_path = config_path.with_extension("json.corrupt");
                    let _ = std::fs::rename(&config_path, &backup_path);
                    Ok(Self::default())
                }
            }
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("textpop")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Directory plugins are installed into.
pub fn extensions_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("textpop")
        .join("extensions")
}

pub type ActionId = String;

/// Action list for a specific app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppCondition {
    #[serde(rename = "bundleID")]
    pub app_id: String,
    pub actions: Vec<ActionId>,
}

/// Action list for URLs containing a substring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlCondition {
    pub url: String,
    pub actions: Vec<ActionId>,
}

/// User-defined action ordering, persisted as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfiguration {
    #[serde(rename = "defaultActions", default)]
    pub default_actions: Vec<ActionId>,
    #[serde(rename = "appConditions", default)]
    pub app_conditions: Vec<AppCondition>,
    #[serde(rename = "urlConditions", default)]
    pub url_conditions: Vec<UrlCondition>,
}

/// Reads and saves the user action configuration. Unresolvable action ids are
/// the catalog's problem, not the store's: they are kept as written.
#[derive(Debug, Default)]
pub struct ConfigurationStore {
    pub user: UserConfiguration,
}

impl ConfigurationStore {
    const FILE_NAME: &'static str = "user_configuration.json";

    pub fn load() -> Self {
        let path = config_dir().join(Self::FILE_NAME);
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(user) => Self { user },
                Err(e) => {
                    tracing::warn!("⚠️ user configuration invalid, starting empty: {}", e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = config_dir().join(Self::FILE_NAME);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&self.user)?)?;
        Ok(())
    }

    /// Exact app match wins; otherwise a condition synthesized from the
    /// default actions, if any are configured.
    pub fn app_condition(&self, app_id: &str) -> Option<AppCondition> {
        for condition in &self.user.app_conditions {
            if condition.app_id == app_id {
                return Some(condition.clone());
            }
        }
        if !self.user.default_actions.is_empty() {
            return Some(AppCondition {
                app_id: app_id.to_string(),
                actions: self.user.default_actions.clone(),
            });
        }
        None
    }

    /// First URL condition whose substring the page URL contains.
    pub fn url_condition(&self, url: &str) -> Option<UrlCondition> {
        self.user
            .url_conditions
            .iter()
            .find(|condition| url.contains(&condition.url))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.search_url.contains("{selected.text}"));
        assert_eq!(config.tts_engine, "system");
        assert_eq!(config.self_app_id, "textpop");
        assert!(!config.app_id_command.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).expect("Failed to serialize");
        let restored: Config = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(config.search_url, restored.search_url);
        assert_eq!(config.selection_command, restored.selection_command);
    }

    #[test]
    fn test_user_configuration_wire_format() {
        let doc = r#"{
            "defaultActions": ["textpop.copy"],
            "appConditions": [{"bundleID": "org.mozilla.firefox", "actions": ["a", "b"]}],
            "urlConditions": [{"url": "github.com", "actions": ["c"]}]
        }"#;
        let user: UserConfiguration = serde_json::from_str(doc).unwrap();
        assert_eq!(user.default_actions, vec!["textpop.copy"]);
        assert_eq!(user.app_conditions[0].app_id, "org.mozilla.firefox");
        assert_eq!(user.url_conditions[0].url, "github.com");
    }

    #[test]
    fn test_app_condition_falls_back_to_defaults() {
        let store = ConfigurationStore {
            user: UserConfiguration {
                default_actions: vec!["x".into()],
                app_conditions: vec![AppCondition {
                    app_id: "code".into(),
                    actions: vec!["y".into()],
                }],
                url_conditions: Vec::new(),
            },
        };

        assert_eq!(store.app_condition("code").unwrap().actions, vec!["y"]);
        assert_eq!(store.app_condition("other").unwrap().actions, vec!["x"]);

        let empty = ConfigurationStore::default();
        assert!(empty.app_condition("other").is_none());
    }

    #[test]
    fn test_url_condition_first_substring_match() {
        let store = ConfigurationStore {
            user: UserConfiguration {
                default_actions: Vec::new(),
                app_conditions: Vec::new(),
                url_conditions: vec![
                    UrlCondition {
                        url: "github.com".into(),
                        actions: vec!["gh".into()],
                    },
                    UrlCondition {
                        url: "git".into(),
                        actions: vec!["git".into()],
                    },
                ],
            },
        };

        let hit = store.url_condition("https://github.com/x").unwrap();
        assert_eq!(hit.actions, vec!["gh"]);
        assert!(store.url_condition("https://example.com").is_none());
    }
}
