//! Prompt and title templating
//!
//! Placeholder substitution for action titles, chat prompts, and tool
//! display templates. Substitution is plain string replacement with no
//! side effects, so re-rendering with the same inputs is idempotent.

use std::collections::HashMap;

use super::ChatContext;

/// Replace `{selected.text}` and `{options.<id>}` placeholders.
pub fn replace_options(
    content: &str,
    selected_text: &str,
    options: &HashMap<String, String>,
) -> String {
    let mut out = content.replace("{selected.text}", selected_text);
    for (key, value) in options {
        out = out.replace(&format!("{{options.{key}}}"), value);
    }
    out
}

/// Replace the capture-context placeholders a chat prompt may reference.
pub fn render_chat_content(content: &str, ctx: &ChatContext) -> String {
    content
        .replace("{selected.webpage_url}", &ctx.web_page_url)
        .replace("{selected.bundle_id}", &ctx.app_id)
}

/// Render a tool display template against the tool's JSON arguments: each
/// `{key}` is replaced with the value at that key. A template whose
/// arguments fail to parse is returned untouched.
pub fn render_template(template: &str, arguments_json: &str) -> String {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str(arguments_json) else {
        return template.to_string();
    };
    let mut out = template.to_string();
    for (key, value) in map {
        let rendered = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        out = out.replace(&format!("{{{key}}}"), &rendered);
    }
    out
}
