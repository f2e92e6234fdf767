//! Built-in system actions
//!
//! Search, copy, speak and the two fixed translation directions. These
//! bracket whatever the user/plugins configured: search leads the bar, the
//! rest trail it.

use std::collections::HashMap;

use tracing::warn;

use super::{ActionVariant, AfterEffect, GenericAction, ResolvedAction, TranslateTarget};

pub const WEBSEARCH_ID: &str = "textpop.websearch";
pub const TRANSLATION_CN_ID: &str = "textpop.translation.cn";
pub const TRANSLATION_EN_ID: &str = "textpop.translation.en";
pub const COPY_ID: &str = "textpop.copy";
pub const SPEAK_ID: &str = "textpop.speak";

fn builtin(identifier: &str, title: &str, icon: &str, variant: ActionVariant) -> ResolvedAction {
    ResolvedAction {
        generic: GenericAction {
            identifier: identifier.to_string(),
            title: title.to_string(),
            icon: icon.to_string(),
            after: AfterEffect::None,
        },
        variant,
        options: HashMap::new(),
    }
}

/// Builtins shown before the configured actions.
pub fn head_builtins() -> Vec<ResolvedAction> {
    vec![builtin(
        WEBSEARCH_ID,
        "Search",
        "symbol:magnifyingglass",
        ActionVariant::WebSearch,
    )]
}

/// Builtins shown after the configured actions.
pub fn tail_builtins() -> Vec<ResolvedAction> {
    vec![
        builtin(
            TRANSLATION_CN_ID,
            "Translate to Chinese",
            "symbol:character.square",
            ActionVariant::Translate {
                target: TranslateTarget::Chinese,
            },
        ),
        builtin(
            TRANSLATION_EN_ID,
            "Translate to English",
            "symbol:e.square",
            ActionVariant::Translate {
                target: TranslateTarget::English,
            },
        ),
        builtin(
            COPY_ID,
            "Copy",
            "symbol:doc.on.clipboard",
            ActionVariant::Copy,
        ),
        builtin(SPEAK_ID, "Speak", "symbol:play.circle", ActionVariant::Speak),
    ]
}

/// Open a URL with the desktop's default handler.
pub fn open_url(url: &str) {
    if let Err(e) = std::process::Command::new("xdg-open").arg(url).spawn() {
        warn!("cannot open {}: {}", url, e);
    }
}

/// A bare word (letters and hyphens only) gets the dictionary-style
/// translation prompt; anything longer gets the passage prompt.
pub fn is_word(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_alphabetic() || c == '-')
}

pub fn translation_prompt(target: TranslateTarget, text: &str) -> String {
    let prompt = match target {
        TranslateTarget::Chinese if is_word(text.trim()) => {
            "Translate the following word to Chinese, explaining its different meanings in \
             detail, and providing examples in the original language with translations. Use \
             markdown format for the reply, with the word as the first line title. The word \
             is: {selected.text}"
        }
        TranslateTarget::Chinese => {
            "You are a professional translator proficient in Simplified Chinese. Translate the \
             following content into Chinese. Rule: reply with the translated content directly. \
             The content is: {selected.text}"
        }
        TranslateTarget::English => {
            "You are a professional translator proficient in English. Translate the following \
             content into English. Rule: reply with the translated content directly. The \
             content is: {selected.text}"
        }
    };
    prompt.to_string()
}
