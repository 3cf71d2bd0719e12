//! Ties discovery, authentication and the bridge clients together behind
//! "run this task" / "run this workspace".

use crate::auth::AuthError;
use crate::client::{BridgeClient, ClientError, LegacyClient, SecureClient, TaskFailure};
use crate::config::{BridgeMode, LaunchSettings, Settings};
use crate::descriptor::BridgeInfo;
use crate::discovery::{BridgeChooser, Discovery, DiscoveryError};
use crate::launcher::{EditorCliLauncher, LaunchError, TerminalLauncher};
use crate::model::{Task, Workspace};
use crate::process_tree::{detect_parent_editor, ParentProcessLocator, ProcessTreeError};
use crate::repository::{RepositoryError, TaskCatalog};
use dialoguer::console::style;
use serde::Serialize;
use std::sync::mpsc;
use std::thread;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("bridge discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("failed to load bridge credentials: {0}")]
    Auth(#[from] AuthError),
    #[error("failed to connect to bridge: {0}")]
    Connection(#[source] ClientError),
    #[error("editor not found: {0}")]
    EditorNotFound(String),
    #[error("task '{0}' not found")]
    TaskNotFound(String),
    #[error("workspace '{0}' not found")]
    WorkspaceNotFound(String),
    #[error("workspace '{0}' has no tasks")]
    EmptyWorkspace(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Execution(ClientError),
    #[error("failed to launch {} terminal(s): {}", .0.len(), join_failures(.0))]
    LaunchFailures(Vec<TaskFailure>),
}

fn join_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(TaskFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ProcessTreeError> for RunnerError {
    fn from(err: ProcessTreeError) -> Self {
        RunnerError::EditorNotFound(err.to_string())
    }
}

impl RunnerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RunnerError::Discovery(err) => err.error_code(),
            RunnerError::Auth(err) => err.error_code(),
            RunnerError::Connection(err) | RunnerError::Execution(err) => err.error_code(),
            RunnerError::EditorNotFound(_) => "editor_not_found",
            RunnerError::TaskNotFound(_) => "task_not_found",
            RunnerError::WorkspaceNotFound(_) => "workspace_not_found",
            RunnerError::EmptyWorkspace(_) => "empty_workspace",
            RunnerError::Repository(_) => "repository_error",
            RunnerError::LaunchFailures(_) => "launch_failures",
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            RunnerError::Discovery(err) => Some(err.hint()),
            RunnerError::Auth(err) => Some(err.hint()),
            RunnerError::Connection(err) | RunnerError::Execution(err) => err.hint(),
            RunnerError::EditorNotFound(_) => Some(
                "Run vstr from a terminal inside the editor, or set launch.editor_command.",
            ),
            RunnerError::TaskNotFound(_) => Some("List tasks with `vstr task list`."),
            RunnerError::WorkspaceNotFound(_) => Some("List workspaces with `vstr workspace list`."),
            RunnerError::EmptyWorkspace(_) => Some("Recreate the workspace with at least one --task."),
            RunnerError::Repository(_) => Some("Check the tasks and workspaces files."),
            RunnerError::LaunchFailures(_) => None,
        }
    }
}

/// What a run dispatched, for the JSON envelope.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub kind: &'static str,
    pub name: String,
    pub tasks: Vec<String>,
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

pub trait TaskRunner {
    fn run_task(&self, name: &str) -> Result<RunSummary, RunnerError>;
    fn run_workspace(&self, name: &str) -> Result<RunSummary, RunnerError>;
}

/// Opens the runner for the configured mode.
pub fn open_runner<'a>(
    settings: &Settings,
    catalog: &'a dyn TaskCatalog,
    chooser: &dyn BridgeChooser,
    announce: bool,
) -> Result<Box<dyn TaskRunner + 'a>, RunnerError> {
    match settings.mode {
        BridgeMode::Local => Ok(Box::new(
            LocalRunner::detect(&settings.launch, catalog)?.announce(announce),
        )),
        BridgeMode::Secure | BridgeMode::Legacy => Ok(Box::new(
            Runner::connect(settings, catalog, chooser)?.announce(announce),
        )),
    }
}

fn find_task(catalog: &dyn TaskCatalog, name: &str) -> Result<Task, RunnerError> {
    catalog
        .find_task(name)?
        .ok_or_else(|| RunnerError::TaskNotFound(name.to_string()))
}

fn find_workspace(catalog: &dyn TaskCatalog, name: &str) -> Result<Workspace, RunnerError> {
    let workspace = catalog
        .find_workspace(name)?
        .ok_or_else(|| RunnerError::WorkspaceNotFound(name.to_string()))?;
    if workspace.tasks.is_empty() {
        return Err(RunnerError::EmptyWorkspace(workspace.name));
    }
    Ok(workspace)
}

fn print_task_details(heading: &str, task: &Task) {
    println!("{}", style(heading).bold().cyan());
    println!("  {} {}", style("Name:").bold(), task.name);
    println!("  {} {}", style("Path:").bold(), task.path);
    println!("  {}", style("Commands:").bold());
    for (idx, cmd) in task.cmds.iter().enumerate() {
        println!("    {}. {}", idx + 1, cmd);
    }
}

fn print_workspace(workspace: &Workspace) {
    println!(
        "{} {} ({} tasks)",
        style("Workspace:").bold().cyan(),
        workspace.name,
        workspace.tasks.len()
    );
    for task in &workspace.tasks {
        println!("  {} {} {}", style("-").dim(), task.name, style(&task.path).dim());
    }
}

/// A session against one discovered bridge.
pub struct Runner<'a> {
    client: Box<dyn BridgeClient>,
    bridge: BridgeInfo,
    mode: BridgeMode,
    catalog: &'a dyn TaskCatalog,
    announce: bool,
}

impl<'a> Runner<'a> {
    /// Discovers a bridge for the configured mode, authenticates (secure
    /// mode) and checks that it answers. `local` is handled by
    /// [`open_runner`] and connects like `legacy` here.
    pub fn connect(
        settings: &Settings,
        catalog: &'a dyn TaskCatalog,
        chooser: &dyn BridgeChooser,
    ) -> Result<Self, RunnerError> {
        let discovery = Discovery::new(settings.discovery.clone());
        Self::connect_with(settings, &discovery, catalog, chooser)
    }

    pub fn connect_with(
        settings: &Settings,
        discovery: &Discovery,
        catalog: &'a dyn TaskCatalog,
        chooser: &dyn BridgeChooser,
    ) -> Result<Self, RunnerError> {
        let host = &settings.discovery.host;
        let (bridge, client): (BridgeInfo, Box<dyn BridgeClient>) = match settings.mode {
            BridgeMode::Secure => {
                let bridge = discovery.discover_secure_bridge()?;
                let mut client = SecureClient::new(host, bridge.port, settings.request_timeout)
                    .map_err(RunnerError::Connection)?;
                if let Some(path) = &bridge.descriptor_path {
                    client.load_auth(path)?;
                }
                client.test_connection().map_err(RunnerError::Connection)?;
                (bridge, Box::new(client))
            }
            BridgeMode::Legacy | BridgeMode::Local => {
                let bridge = discovery.discover_bridge(chooser)?;
                let client = LegacyClient::new(host, bridge.port, settings.request_timeout)
                    .map_err(RunnerError::Connection)?;
                client.test_connection().map_err(RunnerError::Connection)?;
                (bridge, Box::new(client))
            }
        };
        tracing::info!(
            port = bridge.port,
            workspace = %bridge.display_name(),
            mode = settings.mode.as_str(),
            "connected to bridge"
        );
        Ok(Self {
            client,
            bridge,
            mode: settings.mode,
            catalog,
            announce: false,
        })
    }

    pub fn announce(mut self, announce: bool) -> Self {
        self.announce = announce;
        self
    }

    fn print_bridge(&self) {
        println!(
            "{} {} (port {})",
            style("Bridge:").bold().cyan(),
            self.bridge.display_name(),
            self.bridge.port
        );
    }

    fn summary(&self, kind: &'static str, name: String, tasks: Vec<String>) -> RunSummary {
        RunSummary {
            kind,
            name,
            tasks,
            mode: self.mode.as_str(),
            port: Some(self.client.port()),
        }
    }
}

impl TaskRunner for Runner<'_> {
    fn run_task(&self, name: &str) -> Result<RunSummary, RunnerError> {
        let task = find_task(self.catalog, name)?;
        if self.announce {
            let heading = match self.mode {
                BridgeMode::Secure => "SECURE TASK DETAILS",
                _ => "TASK DETAILS",
            };
            self.print_bridge();
            print_task_details(heading, &task);
        }
        self.client
            .execute_task(&task)
            .map_err(RunnerError::Execution)?;
        tracing::info!(task = %task.name, port = self.client.port(), "task dispatched");
        Ok(self.summary("task", task.name.clone(), vec![task.name]))
    }

    fn run_workspace(&self, name: &str) -> Result<RunSummary, RunnerError> {
        let workspace = find_workspace(self.catalog, name)?;
        if self.announce {
            self.print_bridge();
            print_workspace(&workspace);
        }
        self.client
            .execute_workspace(&workspace)
            .map_err(RunnerError::Execution)?;
        tracing::info!(workspace = %workspace.name, tasks = workspace.tasks.len(), "workspace dispatched");
        let tasks = workspace.tasks.iter().map(|task| task.name.clone()).collect();
        Ok(self.summary("workspace", workspace.name, tasks))
    }
}

/// Launches terminals through the editor CLI, without a bridge.
pub struct LocalRunner<'a> {
    launcher: Box<dyn TerminalLauncher + 'a>,
    settings: LaunchSettings,
    catalog: &'a dyn TaskCatalog,
    announce: bool,
}

impl<'a> LocalRunner<'a> {
    pub fn new(
        launcher: Box<dyn TerminalLauncher + 'a>,
        settings: LaunchSettings,
        catalog: &'a dyn TaskCatalog,
    ) -> Self {
        Self {
            launcher,
            settings,
            catalog,
            announce: false,
        }
    }

    /// Uses `launch.editor_command` when configured; otherwise finds the
    /// editor this CLI runs under and picks its CLI build.
    pub fn detect(settings: &LaunchSettings, catalog: &'a dyn TaskCatalog) -> Result<Self, RunnerError> {
        Self::detect_with(settings, catalog, &crate::process_tree::SystemProcessLocator)
    }

    pub fn detect_with(
        settings: &LaunchSettings,
        catalog: &'a dyn TaskCatalog,
        locator: &dyn ParentProcessLocator,
    ) -> Result<Self, RunnerError> {
        let command = match settings.editor_command.as_deref() {
            Some(command) => command.to_string(),
            None => {
                let editor = detect_parent_editor(locator)?;
                tracing::debug!(pid = editor.pid, name = %editor.name, "launching through parent editor");
                editor.cli_command().to_string()
            }
        };
        let launcher = EditorCliLauncher::resolve(&command).map_err(|err| match err {
            LaunchError::EditorNotFound(name) => {
                RunnerError::EditorNotFound(format!("'{name}' is not on PATH"))
            }
            other => RunnerError::EditorNotFound(other.to_string()),
        })?;
        Ok(Self::new(Box::new(launcher), settings.clone(), catalog))
    }

    pub fn announce(mut self, announce: bool) -> Self {
        self.announce = announce;
        self
    }

    /// Launches every task; failures are collected, never short-circuit.
    pub fn launch_all(&self, tasks: &[Task]) -> Vec<TaskFailure> {
        if self.settings.parallel {
            self.launch_parallel(tasks)
        } else {
            self.launch_sequential(tasks)
        }
    }

    fn launch_sequential(&self, tasks: &[Task]) -> Vec<TaskFailure> {
        let mut failures = Vec::new();
        for (idx, task) in tasks.iter().enumerate() {
            if let Err(err) = self.launcher.launch(task) {
                tracing::warn!(task = %task.name, error = %err, "terminal launch failed");
                failures.push(TaskFailure {
                    task: task.name.clone(),
                    error: err.to_string(),
                });
            }
            if idx + 1 < tasks.len() && !self.settings.delay.is_zero() {
                thread::sleep(self.settings.delay);
            }
        }
        failures
    }

    fn launch_parallel(&self, tasks: &[Task]) -> Vec<TaskFailure> {
        let (tx, rx) = mpsc::channel();
        let launcher = self.launcher.as_ref();
        thread::scope(|scope| {
            for (idx, task) in tasks.iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move || {
                    let _ = tx.send((idx, task, launcher.launch(task)));
                });
            }
        });
        drop(tx);

        let mut failures: Vec<(usize, TaskFailure)> = rx
            .into_iter()
            .filter_map(|(idx, task, result)| {
                result.err().map(|err| {
                    tracing::warn!(task = %task.name, error = %err, "terminal launch failed");
                    (
                        idx,
                        TaskFailure {
                            task: task.name.clone(),
                            error: err.to_string(),
                        },
                    )
                })
            })
            .collect();
        failures.sort_by_key(|(idx, _)| *idx);
        failures.into_iter().map(|(_, failure)| failure).collect()
    }

    fn summary(kind: &'static str, name: String, tasks: Vec<String>) -> RunSummary {
        RunSummary {
            kind,
            name,
            tasks,
            mode: BridgeMode::Local.as_str(),
            port: None,
        }
    }
}

impl TaskRunner for LocalRunner<'_> {
    fn run_task(&self, name: &str) -> Result<RunSummary, RunnerError> {
        let task = find_task(self.catalog, name)?;
        if self.announce {
            print_task_details("TASK DETAILS", &task);
        }
        let failures = self.launch_all(std::slice::from_ref(&task));
        if !failures.is_empty() {
            return Err(RunnerError::LaunchFailures(failures));
        }
        Ok(Self::summary("task", task.name.clone(), vec![task.name]))
    }

    fn run_workspace(&self, name: &str) -> Result<RunSummary, RunnerError> {
        let workspace = find_workspace(self.catalog, name)?;
        if self.announce {
            print_workspace(&workspace);
        }
        let failures = self.launch_all(&workspace.tasks);
        if !failures.is_empty() {
            return Err(RunnerError::LaunchFailures(failures));
        }
        let tasks = workspace.tasks.iter().map(|task| task.name.clone()).collect();
        Ok(Self::summary("workspace", workspace.name, tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DiscoverySettings};
    use crate::test_support::{StubBridge, StubResponse};
    use serde_json::json;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct MemoryCatalog {
        tasks: Vec<Task>,
        workspaces: Vec<Workspace>,
    }

    impl TaskCatalog for MemoryCatalog {
        fn find_task(&self, name: &str) -> Result<Option<Task>, RepositoryError> {
            Ok(self.tasks.iter().find(|task| task.matches_name(name)).cloned())
        }

        fn find_workspace(&self, name: &str) -> Result<Option<Workspace>, RepositoryError> {
            Ok(self
                .workspaces
                .iter()
                .find(|workspace| workspace.matches_name(name))
                .cloned())
        }

        fn list_tasks(&self) -> Result<Vec<Task>, RepositoryError> {
            Ok(self.tasks.clone())
        }

        fn list_workspaces(&self) -> Result<Vec<Workspace>, RepositoryError> {
            Ok(self.workspaces.clone())
        }
    }

    struct NeverChoose;

    impl BridgeChooser for NeverChoose {
        fn choose(&self, _bridges: &[BridgeInfo]) -> Result<String, DiscoveryError> {
            Err(DiscoveryError::Prompt("no terminal".to_string()))
        }
    }

    fn build_task() -> Task {
        Task {
            name: "build".to_string(),
            path: "/work/api".to_string(),
            cmds: vec!["cargo build".to_string()],
            icon: "tools".to_string(),
            icon_color: "terminal.ansiBlue".to_string(),
        }
    }

    fn catalog() -> MemoryCatalog {
        MemoryCatalog {
            tasks: vec![build_task()],
            workspaces: vec![
                Workspace {
                    name: "stack".to_string(),
                    tasks: vec![build_task()],
                },
                Workspace {
                    name: "hollow".to_string(),
                    tasks: Vec::new(),
                },
            ],
        }
    }

    fn settings(dir: &Path, mode: BridgeMode) -> Settings {
        let mut cfg = Config::default();
        cfg.bridge.mode = mode;
        cfg.bridge.request_timeout_sec = 5;
        let mut settings = Settings::resolve(&cfg, dir);
        settings.discovery = DiscoverySettings {
            bridge_dir: dir.join("vstr-bridge"),
            host: "127.0.0.1".to_string(),
            port_env: "VSTR_TEST_UNUSED_PORT".to_string(),
            probe_timeout: Duration::from_millis(500),
            prune_stale: false,
        };
        settings
    }

    #[cfg(unix)]
    fn set_mode(path: &Path, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[cfg(not(unix))]
    fn set_mode(_path: &Path, _mode: u32) {}

    fn secure_descriptor(port: u16) -> (TempDir, PathBuf) {
        let root = tempdir().unwrap();
        let dir = root.path().join("vstr-bridge");
        fs::create_dir(&dir).unwrap();
        set_mode(&dir, 0o700);
        let path = dir.join(format!("bridge-{port}.json"));
        fs::write(
            &path,
            json!({
                "port": port,
                "pid": 4242,
                "instance_id": 1,
                "workspace_path": "/work/api",
                "workspace_name": "api",
                "timestamp": "2026-10-18T09:30:00Z",
                "auth_token": "a".repeat(32),
                "secure": true,
            })
            .to_string(),
        )
        .unwrap();
        set_mode(&path, 0o600);
        (root, path)
    }

    fn connect_secure<'a>(
        root: &Path,
        catalog: &'a MemoryCatalog,
    ) -> Result<Runner<'a>, RunnerError> {
        let settings = settings(root, BridgeMode::Secure);
        let discovery = Discovery::new(settings.discovery.clone()).with_port_hint(None);
        Runner::connect_with(&settings, &discovery, catalog, &NeverChoose)
    }

    #[test]
    fn secure_run_task_posts_exact_payload() {
        let bridge = StubBridge::secure_ok();
        let (root, _) = secure_descriptor(bridge.port());
        let catalog = catalog();
        let runner = connect_secure(root.path(), &catalog).expect("connect");
        assert_eq!(runner.bridge.workspace_name, "api");

        let summary = runner.run_task("BUILD").expect("run");
        assert_eq!(summary.port, Some(bridge.port()));
        assert_eq!(summary.mode, "secure");

        let posted = bridge.requests_to("/task");
        assert_eq!(posted.len(), 1);
        assert_eq!(
            posted[0].json(),
            json!({
                "name": "build",
                "path": "/work/api",
                "cmds": ["cargo build"],
                "icon": "tools",
                "iconColor": "terminal.ansiBlue",
            })
        );
        assert_eq!(
            posted[0].headers.get("authorization").map(String::as_str),
            Some(format!("Bearer {}", "a".repeat(32)).as_str())
        );
    }

    #[test]
    fn blocked_task_is_policy_error() {
        let bridge = StubBridge::start(|request| match request.path.as_str() {
            "/ping" => StubResponse::json(200, json!({"status": "ok", "secure": true})),
            _ => StubResponse::json(403, json!({"success": false, "error": "blocked"})),
        });
        let (root, _) = secure_descriptor(bridge.port());
        let catalog = catalog();
        let runner = connect_secure(root.path(), &catalog).unwrap();
        let err = runner.run_task("build").unwrap_err();
        assert!(matches!(err, RunnerError::Execution(ClientError::PolicyBlocked(_))));
        assert!(err.to_string().contains("blocked"));
        assert_eq!(err.error_code(), "policy_blocked");
    }

    #[test]
    fn rejected_token_is_connection_error() {
        let bridge = StubBridge::start(|_| StubResponse::empty(401));
        let (root, _) = secure_descriptor(bridge.port());
        let catalog = catalog();
        let err = connect_secure(root.path(), &catalog).err().expect("must fail");
        assert!(matches!(
            err,
            RunnerError::Connection(ClientError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn missing_bridge_directory_keeps_discovery_kind() {
        let root = tempdir().unwrap();
        let catalog = catalog();
        let err = connect_secure(root.path(), &catalog).err().expect("must fail");
        assert!(matches!(
            err,
            RunnerError::Discovery(DiscoveryError::BridgeDirectoryNotFound(_))
        ));
        assert!(err.hint().is_some());
    }

    #[test]
    fn unknown_names_and_empty_workspaces_fail_before_dispatch() {
        let bridge = StubBridge::secure_ok();
        let (root, _) = secure_descriptor(bridge.port());
        let catalog = catalog();
        let runner = connect_secure(root.path(), &catalog).unwrap();
        assert!(matches!(runner.run_task("deploy"), Err(RunnerError::TaskNotFound(_))));
        assert!(matches!(
            runner.run_workspace("nope"),
            Err(RunnerError::WorkspaceNotFound(_))
        ));
        assert!(matches!(
            runner.run_workspace("hollow"),
            Err(RunnerError::EmptyWorkspace(_))
        ));
        assert!(bridge.requests_to("/task").is_empty());
        assert!(bridge.requests_to("/workspace").is_empty());
    }

    #[test]
    fn secure_workspace_posts_all_tasks() {
        let bridge = StubBridge::secure_ok();
        let (root, _) = secure_descriptor(bridge.port());
        let catalog = catalog();
        let runner = connect_secure(root.path(), &catalog).unwrap();
        let summary = runner.run_workspace("stack").unwrap();
        assert_eq!(summary.tasks, vec!["build".to_string()]);
        let posted = bridge.requests_to("/workspace");
        assert_eq!(posted[0].json()["name"], "stack");
        assert_eq!(posted[0].json()["tasks"][0]["iconColor"], "terminal.ansiBlue");
    }

    #[test]
    fn legacy_runner_uses_live_descriptor() {
        let bridge = StubBridge::start(|request| match request.path.as_str() {
            "/ping" => StubResponse::json(200, json!({"status": "ok", "workspace": "api"})),
            _ => StubResponse::json(200, json!({"success": true, "results": []})),
        });
        let root = tempdir().unwrap();
        let dir = root.path().join("vstr-bridge");
        fs::create_dir(&dir).unwrap();
        fs::write(
            dir.join(format!("bridge-{}.json", bridge.port())),
            json!({"port": bridge.port(), "instance_id": 1, "workspace_name": "api"}).to_string(),
        )
        .unwrap();

        let settings = settings(root.path(), BridgeMode::Legacy);
        let discovery = Discovery::new(settings.discovery.clone())
            .with_port_hint(None)
            .with_locator(NoParent);
        let catalog = catalog();
        let runner = Runner::connect_with(&settings, &discovery, &catalog, &NeverChoose).unwrap();
        runner.run_workspace("stack").unwrap();
        assert!(bridge
            .requests()
            .iter()
            .all(|request| !request.headers.contains_key("authorization")));
    }

    struct NoParent;

    impl ParentProcessLocator for NoParent {
        fn current_parent_pid(&self) -> Option<u32> {
            None
        }

        fn lookup(&self, _pid: u32) -> Option<crate::process_tree::ProcessEntry> {
            None
        }
    }

    struct RecordingLauncher {
        calls: Mutex<Vec<(String, Instant)>>,
        fail: Vec<&'static str>,
    }

    impl RecordingLauncher {
        fn failing(fail: Vec<&'static str>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    impl TerminalLauncher for &RecordingLauncher {
        fn launch(&self, task: &Task) -> Result<(), LaunchError> {
            self.calls
                .lock()
                .unwrap()
                .push((task.name.clone(), Instant::now()));
            if self.fail.contains(&task.name.as_str()) {
                return Err(LaunchError::EditorNotFound(format!("{}-cli", task.name)));
            }
            Ok(())
        }
    }

    fn named(name: &str) -> Task {
        Task {
            name: name.to_string(),
            path: format!("/work/{name}"),
            ..Task::default()
        }
    }

    fn local_catalog() -> MemoryCatalog {
        MemoryCatalog {
            tasks: vec![named("api")],
            workspaces: vec![Workspace {
                name: "full".to_string(),
                tasks: vec![named("api"), named("web"), named("db"), named("queue")],
            }],
        }
    }

    fn launch_settings(parallel: bool, delay_ms: u64) -> LaunchSettings {
        LaunchSettings {
            parallel,
            delay: Duration::from_millis(delay_ms),
            editor_command: None,
        }
    }

    #[test]
    fn sequential_launch_waits_between_tasks_and_keeps_going() {
        let launcher = RecordingLauncher::failing(vec!["web"]);
        let catalog = local_catalog();
        let runner = LocalRunner::new(Box::new(&launcher), launch_settings(false, 30), &catalog);
        let err = runner.run_workspace("full").unwrap_err();
        match &err {
            RunnerError::LaunchFailures(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].task, "web");
            }
            other => panic!("unexpected {other}"),
        }
        let calls = launcher.calls.lock().unwrap();
        let names: Vec<&str> = calls.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["api", "web", "db", "queue"]);
        for pair in calls.windows(2) {
            assert!(pair[1].1.duration_since(pair[0].1) >= Duration::from_millis(30));
        }
    }

    #[test]
    fn parallel_launch_reports_every_failure_in_order() {
        let launcher = RecordingLauncher::failing(vec!["queue", "api"]);
        let catalog = local_catalog();
        let runner = LocalRunner::new(Box::new(&launcher), launch_settings(true, 0), &catalog);
        match runner.run_workspace("full").unwrap_err() {
            RunnerError::LaunchFailures(failures) => {
                let names: Vec<&str> = failures.iter().map(|f| f.task.as_str()).collect();
                assert_eq!(names, vec!["api", "queue"]);
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(launcher.calls.lock().unwrap().len(), 4);
    }

    #[test]
    fn local_single_task_succeeds() {
        let launcher = RecordingLauncher::failing(Vec::new());
        let catalog = local_catalog();
        let runner = LocalRunner::new(Box::new(&launcher), launch_settings(false, 0), &catalog);
        let summary = runner.run_task("API").unwrap();
        assert_eq!(summary.mode, "local");
        assert!(summary.port.is_none());
    }

    #[test]
    fn local_detection_without_editor_fails() {
        let catalog = local_catalog();
        let err = LocalRunner::detect_with(&launch_settings(false, 0), &catalog, &NoParent)
            .err()
            .expect("no editor");
        assert!(matches!(err, RunnerError::EditorNotFound(_)));
        assert_eq!(err.error_code(), "editor_not_found");
    }
}
