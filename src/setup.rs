//! First-run check that the bridge extension is present in the editor, with
//! an offer to install it through the editor's own CLI.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

pub const BRIDGE_EXTENSION_ID: &str = "DieGopherLT.vstr-bridge";
pub const BRIDGE_EXTENSION_URL: &str = "https://github.com/DieGopherLT/VSTR-Bridge";
const EDITOR_CANDIDATES: [&str; 2] = ["code", "code-insiders"];

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no editor CLI found on PATH (tried {0})")]
    EditorNotFound(String),
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
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

impl SetupError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SetupError::EditorNotFound(_) => "editor_not_found",
            SetupError::Spawn { .. } => "editor_spawn_failed",
            SetupError::CommandFailed { .. } => "extension_install_failed",
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            SetupError::EditorNotFound(_) | SetupError::Spawn { .. } => {
                "Put the editor CLI on PATH, or set launch.editor_command in the config."
            }
            SetupError::CommandFailed { .. } => {
                "Install the extension manually from https://github.com/DieGopherLT/VSTR-Bridge."
            }
        }
    }
}

/// Lists and installs extensions through an editor CLI.
#[derive(Debug, Clone)]
pub struct ExtensionInstaller {
    command: PathBuf,
}

impl ExtensionInstaller {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// The configured editor command, or the first of `code` and
    /// `code-insiders` found on `PATH`.
    pub fn resolve(configured: Option<&str>) -> Result<Self, SetupError> {
        let candidates: Vec<&str> = match configured {
            Some(command) => vec![command],
            None => EDITOR_CANDIDATES.to_vec(),
        };
        candidates
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Self::new)
            .ok_or_else(|| SetupError::EditorNotFound(candidates.join(", ")))
    }

    pub fn command(&self) -> &Path {
        &self.command
    }

    pub fn is_installed(&self) -> Result<bool, SetupError> {
        let listing = self.run(&["--list-extensions"])?;
        Ok(listing
            .lines()
            .any(|line| line.trim().eq_ignore_ascii_case(BRIDGE_EXTENSION_ID)))
    }

    /// Installs the bridge extension and returns the CLI's output.
    pub fn install(&self) -> Result<String, SetupError> {
        self.run(&["--install-extension", BRIDGE_EXTENSION_ID])
    }

    fn run(&self, args: &[&str]) -> Result<String, SetupError> {
        let display = self.command.display().to_string();
        let output = Command::new(&self.command)
            .args(args)
            .output()
            .map_err(|source| SetupError::Spawn {
                command: display.clone(),
                source,
            })?;
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(SetupError::CommandFailed {
                command: display,
                status: output.status.to_string(),
                output: text.trim().to_string(),
            });
        }
        tracing::debug!(command = %self.command.display(), ?args, "editor cli finished");
        Ok(text.trim().to_string())
    }
}
