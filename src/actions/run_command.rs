//! External command execution
//!
//! Runs plugin commands and chat tools: merged stdout+stderr, a 60-second
//! wall-clock cap after which the process is killed, and the selection
//! context passed through a fixed set of environment variables.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::capture::SelectedTextContext;
use crate::error::{PopError, PopResult};

/// Wall-clock limit for any spawned command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variables every plugin command receives.
pub fn selection_env(
    ctx: &SelectedTextContext,
    action_identifier: &str,
    options: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env = HashMap::from([
        ("SELECTED_TEXT".to_string(), ctx.text.clone()),
        ("SELECTED_BUNDLEID".to_string(), ctx.app_id.clone()),
        ("SELECTED_ACTION".to_string(), action_identifier.to_string()),
        (
            "SELECTED_WEBPAGE_URL".to_string(),
            ctx.web_page_url.clone().unwrap_or_default(),
        ),
        ("SELECTED_URLS".to_string(), ctx.urls.join("\n")),
    ]);
    for (key, value) in options {
        env.insert(format!("SELECTED_OPTIONS_{}", key.to_uppercase()), value.clone());
    }
    env
}

/// PATH for spawned commands: the configured extra dirs prepended to the
/// inherited value.
fn build_path(extra_path: &[String]) -> String {
    let inherited = std::env::var("PATH").unwrap_or_default();
    if extra_path.is_empty() {
        inherited
    } else {
        format!("{}:{}", extra_path.join(":"), inherited)
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Resolve a command name: absolute path, then the working directory, then
/// the (already prefixed) PATH.
fn find_executable(command: &str, workdir: &Path, path: &str) -> Option<PathBuf> {
    let direct = Path::new(command);
    if direct.is_absolute() {
        return is_executable(direct).then(|| direct.to_path_buf());
    }

    let local = workdir.join(command);
    if is_executable(&local) {
        return Some(local);
    }

    for dir in path.split(':') {
        let candidate = Path::new(dir).join(command);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

pub async fn execute_command(
    workdir: &Path,
    program: &str,
    args: &[String],
    env: HashMap<String, String>,
    extra_path: &[String],
) -> PopResult<String> {
    execute_command_with_timeout(workdir, program, args, env, extra_path, COMMAND_TIMEOUT).await
}

pub async fn execute_command_with_timeout(
    workdir: &Path,
    program: &str,
    args: &[String],
    env: HashMap<String, String>,
    extra_path: &[String],
    timeout: Duration,
) -> PopResult<String> {
    let path = build_path(extra_path);
    let executable = find_executable(program, workdir, &path)
        .ok_or_else(|| PopError::Action(format!("executable not found: {program}")))?;

    debug!("running {} {:?} in {}", executable.display(), args, workdir.display());

    let child = Command::new(&executable)
        .args(args)
        .current_dir(workdir)
        .env_clear()
        .envs(&env)
        .env("PATH", &path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PopError::Action(format!("spawn {program}: {e}")))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| PopError::Action(format!("wait {program}: {e}")))?,
        Err(_) => {
            // kill_on_drop reaps the child when the future is dropped.
            warn!("command '{}' killed after {:?}", program, timeout);
            return Err(PopError::Action(format!("{program} timed out")));
        }
    };

    let mut merged = output.stdout;
    merged.extend_from_slice(&output.stderr);
    let text = String::from_utf8_lossy(&merged).to_string();

    if !output.status.success() {
        return Err(PopError::Action(format!(
            "{program} exited with {}: {text}",
            output.status
        )));
    }
    Ok(text)
}
