//! Finds the editor process that (transitively) spawned this CLI, so the
//! right bridge can be picked when several editors are open.

use crate::config::expand_path;
use std::path::PathBuf;
use thiserror::Error;

pub const MAX_ANCESTRY_DEPTH: usize = 10;
const EDITOR_MARKERS: [&str; 2] = ["code", "electron"];

#[derive(Debug, Error)]
pub enum ProcessTreeError {
    #[error("editor parent process not found: {0}")]
    ParentNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub ppid: Option<u32>,
    pub name: String,
    pub command_line: String,
}

/// Source of process ancestry. The system implementation reads the OS
/// process table; tests substitute a fixed tree.
pub trait ParentProcessLocator {
    fn current_parent_pid(&self) -> Option<u32>;
    fn lookup(&self, pid: u32) -> Option<ProcessEntry>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorProcess {
    pub pid: u32,
    pub name: String,
    pub command_line: String,
    pub insiders: bool,
}

impl EditorProcess {
    /// Workspace folder the editor was opened on: the `--folder-uri`
    /// argument when present, else the first absolute argument that is an
    /// existing directory.
    pub fn workspace_path(&self) -> Option<PathBuf> {
        let parts: Vec<&str> = self.command_line.split(' ').collect();
        for (idx, part) in parts.iter().enumerate() {
            let uri = if *part == "--folder-uri" {
                parts.get(idx + 1).copied()
            } else {
                part.strip_prefix("--folder-uri=")
            };
            if let Some(uri) = uri.filter(|uri| !uri.is_empty()) {
                return Some(PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri)));
            }
        }
        parts
            .iter()
            .filter(|part| part.starts_with('/') || part.starts_with("~/"))
            .map(|part| PathBuf::from(expand_path(part)))
            .find(|candidate| candidate.is_dir())
    }

    /// Editor CLI matching the detected build.
    pub fn cli_command(&self) -> &'static str {
        if self.insiders {
            "code-insiders"
        } else {
            "code"
        }
    }
}

pub fn is_editor_process(name: &str) -> bool {
    let lower = name.to_lowercase();
    EDITOR_MARKERS.iter().any(|marker| lower.contains(marker))
}

pub fn detect_parent_editor(
    locator: &dyn ParentProcessLocator,
) -> Result<EditorProcess, ProcessTreeError> {
    let mut current = locator.current_parent_pid().ok_or_else(|| {
        ProcessTreeError::ParentNotFound("parent process id unavailable".to_string())
    })?;
    for _ in 0..MAX_ANCESTRY_DEPTH {
        if current == 0 {
            break;
        }
        let entry = locator.lookup(current).ok_or_else(|| {
            ProcessTreeError::ParentNotFound(format!("failed to inspect process {current}"))
        })?;
        if is_editor_process(&entry.name) {
            tracing::debug!(pid = entry.pid, name = %entry.name, "found editor ancestor");
            return Ok(EditorProcess {
                pid: entry.pid,
                insiders: entry.name.to_lowercase().contains("insiders"),
                name: entry.name,
                command_line: entry.command_line,
            });
        }
        match entry.ppid {
            Some(parent) if parent != current => current = parent,
            _ => break,
        }
    }
    Err(ProcessTreeError::ParentNotFound(format!(
        "no editor process within {MAX_ANCESTRY_DEPTH} ancestors"
    )))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessLocator;

impl ParentProcessLocator for SystemProcessLocator {
    fn current_parent_pid(&self) -> Option<u32> {
        #[cfg(unix)]
        {
            Some(std::os::unix::process::parent_id())
        }
        #[cfg(not(unix))]
        {
            None
        }
    }

    fn lookup(&self, pid: u32) -> Option<ProcessEntry> {
        lookup_process(pid)
    }
}

#[cfg(target_os = "linux")]
fn lookup_process(pid: u32) -> Option<ProcessEntry> {
    use std::fs;

    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let (name, ppid) = parse_proc_stat(&stat)?;
    let command_line = fs::read(format!("/proc/{pid}/cmdline"))
        .map(|raw| {
            raw.split(|byte| *byte == 0)
                .filter(|arg| !arg.is_empty())
                .map(|arg| String::from_utf8_lossy(arg).to_string())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    Some(ProcessEntry {
        pid,
        ppid: Some(ppid),
        name,
        command_line,
    })
}

#[cfg(all(unix, not(target_os = "linux")))]
fn lookup_process(pid: u32) -> Option<ProcessEntry> {
    use std::path::Path;
    use std::process::Command;

    let pid_arg = pid.to_string();
    let field = |column: &str| -> Option<String> {
        let output = Command::new("ps")
            .args(["-o", column, "-p", pid_arg.as_str()])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    };
    let ppid = field("ppid=")?.parse::<u32>().ok();
    let comm = field("comm=")?;
    let name = Path::new(&comm)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or(comm);
    let command_line = field("args=").unwrap_or_default();
    Some(ProcessEntry {
        pid,
        ppid,
        name,
        command_line,
    })
}

#[cfg(not(unix))]
fn lookup_process(_pid: u32) -> Option<ProcessEntry> {
    None
}

/// Splits `/proc/<pid>/stat` into the command name and parent pid. The name
/// sits in parentheses and may itself contain spaces or parentheses.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_stat(stat: &str) -> Option<(String, u32)> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let name = stat.get(open + 1..close)?.to_string();
    let mut rest = stat[close + 1..].split_whitespace();
    let _state = rest.next()?;
    let ppid = rest.next()?.parse::<u32>().ok()?;
    Some((name, ppid))
}
