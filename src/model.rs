use serde::{Deserialize, Serialize};

/// A named terminal: working directory, commands to type into it, and the
/// icon/color the editor shows on its tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub cmds: Vec<String>,
    #[serde(default)]
    pub icon: String,
    #[serde(default, rename = "iconColor")]
    pub icon_color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Terminal colors the editor accepts for a tab icon.
pub const ANSI_COLORS: [&str; 16] = [
    "terminal.ansiBlack",
    "terminal.ansiRed",
    "terminal.ansiGreen",
    "terminal.ansiYellow",
    "terminal.ansiBlue",
    "terminal.ansiMagenta",
    "terminal.ansiCyan",
    "terminal.ansiWhite",
    "terminal.ansiBrightBlack",
    "terminal.ansiBrightRed",
    "terminal.ansiBrightGreen",
    "terminal.ansiBrightYellow",
    "terminal.ansiBrightBlue",
    "terminal.ansiBrightMagenta",
    "terminal.ansiBrightCyan",
    "terminal.ansiBrightWhite",
];

impl Task {
    /// Every problem with the task's fields, empty when it can be saved.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("name is required".to_string());
        }
        if self.path.trim().is_empty() {
            problems.push("path is required".to_string());
        }
        if self.cmds.iter().all(|cmd| cmd.trim().is_empty()) {
            problems.push("at least one command is required".to_string());
        }
        if self.icon.trim().is_empty() {
            problems.push("icon is required".to_string());
        }
        if !ANSI_COLORS.contains(&self.icon_color.as_str()) {
            problems.push(format!("invalid icon color '{}'", self.icon_color));
        }
        problems
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Commands chained the way a single shell line runs them.
    pub fn command_line(&self) -> String {
        self.cmds.join(" && ")
    }
}

impl Workspace {
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Body of `POST /task`, and one entry of a workspace body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskPayload<'a> {
    pub name: &'a str,
    pub path: &'a str,
    pub cmds: &'a [String],
    pub icon: &'a str,
    #[serde(rename = "iconColor")]
    pub icon_color: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspacePayload<'a> {
    pub name: &'a str,
    pub tasks: Vec<TaskPayload<'a>>,
}

impl<'a> From<&'a Task> for TaskPayload<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            name: &task.name,
            path: &task.path,
            cmds: &task.cmds,
            icon: &task.icon,
            icon_color: &task.icon_color,
        }
    }
}

impl<'a> From<&'a Workspace> for WorkspacePayload<'a> {
    fn from(workspace: &'a Workspace) -> Self {
        Self {
            name: &workspace.name,
            tasks: workspace.tasks.iter().map(TaskPayload::from).collect(),
        }
    }
}
