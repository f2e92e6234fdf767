//! Function tools
//!
//! Plugin-declared function tools the model may call during a round, plus
//! the two built-ins every tool-enabled session carries: image generation
//! and inline-SVG preview.

use std::collections::HashMap;
use std::path::PathBuf;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actions::run_command::execute_command;
use crate::error::{PopError, PopResult};

use super::transport::ToolSpec;

pub const IMAGE_TOOL_NAME: &str = "generate_image";
pub const SVG_TOOL_NAME: &str = "display_svg";

/// A plugin-declared function tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    /// Only a-z, A-Z, 0-9, underscore or hyphen; max length 64.
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters, embedded as a string.
    pub parameters: String,
    /// Command executed when the model calls this function; the accumulated
    /// arguments JSON is appended as the final argv element.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Execution directory, pinned to the plugin dir at load time.
    #[serde(skip)]
    pub workdir: Option<PathBuf>,
    /// Whether the raw result is shown in the transcript; defaults to true.
    #[serde(rename = "showResult", default)]
    pub show_result: Option<bool>,
    /// Display template rendered against the call arguments.
    #[serde(default)]
    pub template: Option<String>,
}

impl FunctionDefinition {
    pub fn parameters_schema(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.parameters).ok()
    }

    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self
                .parameters_schema()
                .unwrap_or_else(|| serde_json::json!({"type": "object"})),
        }
    }

    /// Run the command behind this function with the model's arguments.
    pub async fn run(
        &self,
        arguments: &str,
        options: &HashMap<String, String>,
        extra_path: &[String],
    ) -> PopResult<Option<String>> {
        let Some(command) = &self.command else {
            return Ok(None);
        };
        let Some((program, rest)) = command.split_first() else {
            return Ok(None);
        };
        let workdir = self
            .workdir
            .clone()
            .ok_or_else(|| PopError::Chat(format!("tool '{}' has no workdir", self.name)))?;

        let mut args: Vec<String> = rest.to_vec();
        args.push(arguments.to_string());

        let mut env = HashMap::new();
        for (key, value) in options {
            env.insert(format!("SELECTED_OPTIONS_{}", key.to_uppercase()), value.clone());
        }

        let output = execute_command(&workdir, program, &args, env, extra_path).await?;
        Ok(Some(output))
    }
}

/// Built-in image generation tool definition.
pub fn image_tool_spec() -> ToolSpec {
    ToolSpec {
        name: IMAGE_TOOL_NAME.to_string(),
        description: "When the user asks for a picture, create an English prompt the image \
                      model can use and call this tool with it. The URL of the generated \
                      image will be returned."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "the prompt sent to the image model"
                }
            }
        }),
    }
}

/// Built-in SVG preview tool definition.
pub fn svg_tool_spec() -> ToolSpec {
    ToolSpec {
        name: SVG_TOOL_NAME.to_string(),
        description: "When the user asks you to create an SVG, use this tool to display it."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "raw": {
                    "type": "string",
                    "description": "SVG content"
                }
            }
        }),
    }
}

#[derive(Debug, Deserialize)]
pub struct ImagePrompt {
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
struct SvgData {
    raw: String,
}

/// Write the SVG payload to a temp file and open it with the default handler.
pub fn open_svg_preview(arguments_json: &str) -> PopResult<()> {
    let data: SvgData = serde_json::from_str(arguments_json)?;

    let suffix: u32 = rand::thread_rng().gen();
    let path = std::env::temp_dir().join(format!("textpop_svg_{suffix}.svg"));
    std::fs::write(&path, data.raw)?;
    debug!("svg preview at {}", path.display());

    std::process::Command::new("xdg-open")
        .arg(&path)
        .spawn()
        .map_err(|e| PopError::Chat(format!("cannot open svg preview: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_spec_with_schema() {
        let def = FunctionDefinition {
            name: "word_count".into(),
            description: "counts words".into(),
            parameters: r#"{"type":"object","properties":{"text":{"type":"string"}}}"#.into(),
            command: None,
            workdir: None,
            show_result: None,
            template: None,
        };
        let spec = def.to_spec();
        assert_eq!(spec.name, "word_count");
        assert_eq!(spec.parameters["properties"]["text"]["type"], "string");
    }

    #[test]
    fn test_to_spec_with_bad_schema_falls_back() {
        let def = FunctionDefinition {
            name: "broken".into(),
            description: String::new(),
            parameters: "not json".into(),
            command: None,
            workdir: None,
            show_result: None,
            template: None,
        };
        assert_eq!(def.to_spec().parameters["type"], "object");
    }

    #[tokio::test]
    async fn test_run_appends_arguments() {
        let def = FunctionDefinition {
            name: "echoer".into(),
            description: String::new(),
            parameters: "{}".into(),
            command: Some(vec!["echo".into(), "-n".into()]),
            workdir: Some(std::env::temp_dir()),
            show_result: None,
            template: None,
        };
        let out = def
            .run(r#"{"x":1}"#, &HashMap::new(), &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn test_run_without_command_is_none() {
        let def = FunctionDefinition {
            name: "noop".into(),
            description: String::new(),
            parameters: "{}".into(),
            command: None,
            workdir: None,
            show_result: None,
            template: None,
        };
        assert!(def.run("{}", &HashMap::new(), &[]).await.unwrap().is_none());
    }
}
