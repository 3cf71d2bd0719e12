//! Flat-file JSON store for tasks and workspaces.
//!
//! `tasks.json` holds `{"tasks": [...]}` and `workspaces.json` holds
//! `{"workspaces": [...]}`. Names are unique ignoring ASCII case.

use crate::config::ensure_parent;
use crate::model::{Task, Workspace};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed store {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{kind} '{name}' already exists")]
    Duplicate { kind: &'static str, name: String },
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    #[error("invalid import file {path}: {reason}")]
    InvalidImport { path: PathBuf, reason: String },
}

/// The lookups the runners need. Kept narrow so runners can be tested with an
/// in-memory catalog.
pub trait TaskCatalog {
    fn find_task(&self, name: &str) -> Result<Option<Task>, RepositoryError>;
    fn find_workspace(&self, name: &str) -> Result<Option<Workspace>, RepositoryError>;
    fn list_tasks(&self) -> Result<Vec<Task>, RepositoryError>;
    fn list_workspaces(&self) -> Result<Vec<Workspace>, RepositoryError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkspaceFile {
    #[serde(default)]
    workspaces: Vec<Workspace>,
}

#[derive(Debug, Clone)]
pub struct JsonRepository {
    tasks_file: PathBuf,
    workspaces_file: PathBuf,
}

impl JsonRepository {
    pub fn new(tasks_file: PathBuf, workspaces_file: PathBuf) -> Self {
        Self {
            tasks_file,
            workspaces_file,
        }
    }

    pub fn tasks_file(&self) -> &Path {
        &self.tasks_file
    }

    pub fn save_task(&self, task: Task) -> Result<(), RepositoryError> {
        let mut content: TaskFile = read_store(&self.tasks_file)?;
        if content.tasks.iter().any(|t| t.matches_name(&task.name)) {
            return Err(RepositoryError::Duplicate {
                kind: "task",
                name: task.name,
            });
        }
        content.tasks.push(task);
        write_store(&self.tasks_file, &content)
    }

    pub fn update_task(&self, original_name: &str, updated: Task) -> Result<(), RepositoryError> {
        let mut content: TaskFile = read_store(&self.tasks_file)?;
        if !updated.matches_name(original_name)
            && content.tasks.iter().any(|t| t.matches_name(&updated.name))
        {
            return Err(RepositoryError::Duplicate {
                kind: "task",
                name: updated.name,
            });
        }
        let slot = content
            .tasks
            .iter_mut()
            .find(|t| t.matches_name(original_name))
            .ok_or_else(|| RepositoryError::NotFound {
                kind: "task",
                name: original_name.to_string(),
            })?;
        *slot = updated;
        write_store(&self.tasks_file, &content)
    }

    pub fn delete_task(&self, name: &str) -> Result<(), RepositoryError> {
        let mut content: TaskFile = read_store(&self.tasks_file)?;
        let before = content.tasks.len();
        content.tasks.retain(|t| !t.matches_name(name));
        if content.tasks.len() == before {
            return Err(RepositoryError::NotFound {
                kind: "task",
                name: name.to_string(),
            });
        }
        write_store(&self.tasks_file, &content)
    }

    /// Appends every task from a JSON array file. The whole batch is
    /// rejected when any name collides, so a failed import writes nothing.
    pub fn import_tasks(&self, path: &Path) -> Result<usize, RepositoryError> {
        let raw = fs::read_to_string(path).map_err(|source| RepositoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let batch: Vec<Task> =
            serde_json::from_str(&raw).map_err(|err| RepositoryError::InvalidImport {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        if batch.is_empty() {
            return Err(RepositoryError::InvalidImport {
                path: path.to_path_buf(),
                reason: "file contains no tasks".to_string(),
            });
        }
        let mut content: TaskFile = read_store(&self.tasks_file)?;
        for (idx, task) in batch.iter().enumerate() {
            if task.name.trim().is_empty() {
                return Err(RepositoryError::InvalidImport {
                    path: path.to_path_buf(),
                    reason: format!("task #{} has an empty name", idx + 1),
                });
            }
            let clashes_existing = content.tasks.iter().any(|t| t.matches_name(&task.name));
            let clashes_batch = batch[..idx].iter().any(|t| t.matches_name(&task.name));
            if clashes_existing || clashes_batch {
                return Err(RepositoryError::Duplicate {
                    kind: "task",
                    name: task.name.clone(),
                });
            }
        }
        let count = batch.len();
        content.tasks.extend(batch);
        write_store(&self.tasks_file, &content)?;
        Ok(count)
    }

    pub fn save_workspace(&self, workspace: Workspace) -> Result<(), RepositoryError> {
        let mut content: WorkspaceFile = read_store(&self.workspaces_file)?;
        if content
            .workspaces
            .iter()
            .any(|ws| ws.matches_name(&workspace.name))
        {
            return Err(RepositoryError::Duplicate {
                kind: "workspace",
                name: workspace.name,
            });
        }
        content.workspaces.push(workspace);
        write_store(&self.workspaces_file, &content)
    }

    pub fn delete_workspace(&self, name: &str) -> Result<(), RepositoryError> {
        let mut content: WorkspaceFile = read_store(&self.workspaces_file)?;
        let before = content.workspaces.len();
        content.workspaces.retain(|ws| !ws.matches_name(name));
        if content.workspaces.len() == before {
            return Err(RepositoryError::NotFound {
                kind: "workspace",
                name: name.to_string(),
            });
        }
        write_store(&self.workspaces_file, &content)
    }
}

impl TaskCatalog for JsonRepository {
    fn find_task(&self, name: &str) -> Result<Option<Task>, RepositoryError> {
        let content: TaskFile = read_store(&self.tasks_file)?;
        Ok(content.tasks.into_iter().find(|t| t.matches_name(name)))
    }

    fn find_workspace(&self, name: &str) -> Result<Option<Workspace>, RepositoryError> {
        let content: WorkspaceFile = read_store(&self.workspaces_file)?;
        Ok(content.workspaces.into_iter().find(|ws| ws.matches_name(name)))
    }

    fn list_tasks(&self) -> Result<Vec<Task>, RepositoryError> {
        let content: TaskFile = read_store(&self.tasks_file)?;
        Ok(content.tasks)
    }

    fn list_workspaces(&self) -> Result<Vec<Workspace>, RepositoryError> {
        let content: WorkspaceFile = read_store(&self.workspaces_file)?;
        Ok(content.workspaces)
    }
}

fn read_store<T>(path: &Path) -> Result<T, RepositoryError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(RepositoryError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw).map_err(|source| RepositoryError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_store<T: Serialize>(path: &Path, content: &T) -> Result<(), RepositoryError> {
    let io_err = |source| RepositoryError::Io {
        path: path.to_path_buf(),
        source,
    };
    ensure_parent(path).map_err(io_err)?;
    let text = serde_json::to_string_pretty(content).map_err(|source| RepositoryError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let tmp_path = parent.join(format!(
        ".{}.tmp.{}.{}",
        path.file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "vstr".to_string()),
        std::process::id(),
        ts
    ));
    fs::write(&tmp_path, text).map_err(io_err)?;
    fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}
