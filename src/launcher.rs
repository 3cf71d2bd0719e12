//! Opens task terminals by driving the editor's own command line, for when no
//! bridge is reachable.

use crate::model::Task;
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;

const GOTO_SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("editor command '{0}' not found on PATH")]
    EditorNotFound(String),
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write terminal config {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{command} exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },
}

/// Opens one terminal for one task.
pub trait TerminalLauncher: Sync {
    fn launch(&self, task: &Task) -> Result<(), LaunchError>;
}

/// Terminal profile handed to `terminal.create`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TerminalConfig<'a> {
    name: &'a str,
    cwd: &'a str,
    icon: &'a str,
    color: &'a str,
    env: BTreeMap<String, String>,
    shell_args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    initial_command: Option<String>,
}

impl<'a> From<&'a Task> for TerminalConfig<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            name: &task.name,
            cwd: &task.path,
            icon: &task.icon,
            color: &task.icon_color,
            env: BTreeMap::new(),
            shell_args: Vec::new(),
            initial_command: (!task.cmds.is_empty()).then(|| task.command_line()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EditorCliLauncher {
    command: PathBuf,
    config_dir: PathBuf,
}

impl EditorCliLauncher {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            config_dir: env::temp_dir(),
        }
    }

    #[cfg(test)]
    fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = dir.into();
        self
    }

    /// Resolves an editor CLI (`code`, `code-insiders`, or a configured
    /// command) on `PATH`.
    pub fn resolve(name: &str) -> Result<Self, LaunchError> {
        let command = which::which(name).map_err(|_| LaunchError::EditorNotFound(name.to_string()))?;
        tracing::debug!(command = %command.display(), "resolved editor cli");
        Ok(Self::new(command))
    }

    fn run(&self, args: &[String]) -> Result<(), LaunchError> {
        let display = self.command.display().to_string();
        let output = Command::new(&self.command)
            .args(args)
            .output()
            .map_err(|source| LaunchError::Spawn {
                command: display.clone(),
                source,
            })?;
        if output.status.success() {
            return Ok(());
        }
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(LaunchError::CommandFailed {
            command: display,
            status: output.status.to_string(),
            output: text.trim().to_string(),
        })
    }

    /// Writes the profile to a freshly created, randomly named file. Creation
    /// is exclusive, so a name planted in the shared temp dir is never reused.
    fn write_terminal_config(&self, task: &Task) -> Result<NamedTempFile, LaunchError> {
        let mut file = tempfile::Builder::new()
            .prefix("vstr-terminal-")
            .suffix(".json")
            .tempfile_in(&self.config_dir)
            .map_err(|source| LaunchError::ConfigFile {
                path: self.config_dir.clone(),
                source,
            })?;
        serde_json::to_writer_pretty(&mut file, &TerminalConfig::from(task))
            .map_err(io::Error::from)
            .and_then(|()| file.flush())
            .map_err(|source| LaunchError::ConfigFile {
                path: file.path().to_path_buf(),
                source,
            })?;
        Ok(file)
    }
}

impl TerminalLauncher for EditorCliLauncher {
    fn launch(&self, task: &Task) -> Result<(), LaunchError> {
        self.run(&[
            "--new-window=false".to_string(),
            "--goto".to_string(),
            task.path.clone(),
        ])?;
        thread::sleep(GOTO_SETTLE);

        let config = self.write_terminal_config(task)?;
        let path = config.path().to_path_buf();
        let result = self.run(&[
            "--command".to_string(),
            format!("terminal.create:{}", path.display()),
        ]);
        if let Err(err) = config.close() {
            tracing::debug!(path = %path.display(), error = %err, "failed to remove terminal config");
        }
        result
    }
}
