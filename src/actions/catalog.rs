//! Action catalog
//!
//! Resolves the ordered, duplicate-free action list for a capture from user
//! configuration, installed plugins, and the built-in system actions.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::capture::SelectedTextContext;
use crate::chat::render::replace_options;
use crate::config::ConfigurationStore;
use crate::plugins::PluginRegistry;

use super::builtin;
use super::{resolve_manifest_action, ResolvedAction};

pub struct ActionCatalog {
    store: Arc<RwLock<ConfigurationStore>>,
    registry: Arc<RwLock<PluginRegistry>>,
}

impl ActionCatalog {
    pub fn new(
        store: Arc<RwLock<ConfigurationStore>>,
        registry: Arc<RwLock<PluginRegistry>>,
    ) -> Self {
        Self { store, registry }
    }

    /// The ordered action list to display for this capture. Resolution is
    /// idempotent: the same configuration and context always yield the same
    /// identifier sequence, with no duplicates.
    pub fn resolve(&self, ctx: &SelectedTextContext) -> Vec<ResolvedAction> {
        let url = ctx.web_page_url.as_deref().unwrap_or("");
        let store = match self.store.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let registry = match self.registry.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Everything currently available, in canonical order: search first,
        // plugin actions, then the trailing builtins.
        let mut available = builtin::head_builtins();
        for plugin in &registry.plugins {
            if !plugin.info.enabled || !plugin.applies_to(&ctx.app_id, url) {
                continue;
            }
            let options = registry.option_values(&plugin.info);
            for manifest_action in &plugin.actions {
                if let Some(mut resolved) = resolve_manifest_action(manifest_action, options.clone())
                {
                    // Listing-time render: option values only, no selected text.
                    resolved.generic.title = replace_options(&resolved.generic.title, "", &options);
                    available.push(resolved);
                }
            }
        }
        available.extend(builtin::tail_builtins());

        // Configured identifier lists. When both an app and a URL condition
        // match, the final list is their union with URL-scoped actions
        // first.
        let mut configured: Vec<String> = Vec::new();
        if !url.is_empty() {
            if let Some(condition) = store.url_condition(url) {
                configured.extend(condition.actions);
            }
        }
        if let Some(condition) = store.app_condition(&ctx.app_id) {
            configured.extend(condition.actions);
        }

        let ordered = if configured.is_empty() {
            available
        } else {
            let find =
                |id: &str| available.iter().find(|a| a.generic.identifier == id).cloned();
            let mut out = builtin::head_builtins()
                .iter()
                .filter_map(|a| find(&a.generic.identifier))
                .collect::<Vec<_>>();
            for id in &configured {
                match find(id) {
                    Some(action) => out.push(action),
                    None => debug!("dropping unresolvable action id '{}'", id),
                }
            }
            out.extend(
                builtin::tail_builtins()
                    .iter()
                    .filter_map(|a| find(&a.generic.identifier)),
            );
            out
        };

        dedup_by_identifier(ordered)
    }
}

fn dedup_by_identifier(actions: Vec<ResolvedAction>) -> Vec<ResolvedAction> {
    let mut seen = HashSet::new();
    actions
        .into_iter()
        .filter(|action| seen.insert(action.generic.identifier.clone()))
        .collect()
}
