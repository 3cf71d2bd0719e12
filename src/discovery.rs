//! Locates a running bridge through the descriptor files it drops into the
//! shared bridge directory.
//!
//! The secure path trusts only owner-only descriptors carrying a full token
//! and picks the most recent instance. The legacy path walks a chain of
//! hints (port env var, editor ancestry, live listing) and falls back to
//! asking the user.

use crate::auth::{owner_only, validate_file_permissions};
use crate::config::DiscoverySettings;
use crate::descriptor::{is_descriptor_file_name, read_descriptor, BridgeInfo};
use crate::process_tree::{detect_parent_editor, ParentProcessLocator, SystemProcessLocator};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const PORT_HINT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("bridge directory not found: {0}")]
    BridgeDirectoryNotFound(PathBuf),
    #[error("bridge directory {0} has insecure permissions")]
    InsecureDirectoryPermissions(PathBuf),
    #[error("failed to read bridge directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no valid secure bridges found")]
    NoValidBridgeFound,
    #[error("no running bridge found")]
    NoBridgeFound,
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("bridge selection prompt failed: {0}")]
    Prompt(String),
}

impl DiscoveryError {
    pub fn error_code(&self) -> &'static str {
        match self {
            DiscoveryError::BridgeDirectoryNotFound(_) => "bridge_directory_not_found",
            DiscoveryError::InsecureDirectoryPermissions(_) => "insecure_directory_permissions",
            DiscoveryError::ReadDirectory { .. } => "bridge_directory_unreadable",
            DiscoveryError::NoValidBridgeFound => "no_valid_bridge",
            DiscoveryError::NoBridgeFound => "no_bridge",
            DiscoveryError::InvalidSelection(_) => "invalid_selection",
            DiscoveryError::Prompt(_) => "prompt_failed",
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            DiscoveryError::BridgeDirectoryNotFound(_) | DiscoveryError::NoBridgeFound => {
                "Make sure the editor is running with the vstr bridge extension enabled."
            }
            DiscoveryError::InsecureDirectoryPermissions(_) => {
                "Check directory ownership and permissions (should be 0700)."
            }
            DiscoveryError::ReadDirectory { .. } => "Check that the bridge directory is readable.",
            DiscoveryError::NoValidBridgeFound => {
                "Enable secure mode in the bridge extension and restart the editor."
            }
            DiscoveryError::InvalidSelection(_) => "Enter one of the listed numbers.",
            DiscoveryError::Prompt(_) => "Run from an interactive terminal or set the port hint variable.",
        }
    }
}

/// Body of a legacy `/ping`.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct PingReply {
    pub workspace: String,
}

/// Answers whether a bridge listens on a port.
pub trait LivenessProbe {
    fn ping(&self, port: u16, timeout: Duration) -> Option<PingReply>;
}

/// Asks the user to pick among several live bridges. Returns the raw answer;
/// discovery interprets it as a 1-based index.
pub trait BridgeChooser {
    fn choose(&self, bridges: &[BridgeInfo]) -> Result<String, DiscoveryError>;
}

#[derive(Debug, Clone)]
pub struct HttpProbe {
    host: String,
}

impl HttpProbe {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl LivenessProbe for HttpProbe {
    fn ping(&self, port: u16, timeout: Duration) -> Option<PingReply> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .ok()?;
        let response = client
            .get(format!("http://{}:{}/ping", self.host, port))
            .send()
            .ok()?;
        if response.status().as_u16() != 200 {
            return None;
        }
        Some(response.json().unwrap_or_default())
    }
}

pub struct Discovery {
    settings: DiscoverySettings,
    probe: Box<dyn LivenessProbe>,
    locator: Box<dyn ParentProcessLocator>,
    port_hint: Option<String>,
}

impl Discovery {
    pub fn new(settings: DiscoverySettings) -> Self {
        let probe = HttpProbe::new(settings.host.clone());
        let port_hint = env::var(&settings.port_env).ok();
        Self {
            settings,
            probe: Box::new(probe),
            locator: Box::new(SystemProcessLocator),
            port_hint,
        }
    }

    #[cfg(test)]
    pub fn with_probe(mut self, probe: impl LivenessProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    #[cfg(test)]
    pub fn with_locator(mut self, locator: impl ParentProcessLocator + 'static) -> Self {
        self.locator = Box::new(locator);
        self
    }

    #[cfg(test)]
    pub fn with_port_hint(mut self, hint: Option<String>) -> Self {
        self.port_hint = hint;
        self
    }

    pub fn bridge_dir(&self) -> &Path {
        &self.settings.bridge_dir
    }

    /// Most recent secure bridge whose descriptor passes every check.
    pub fn discover_secure_bridge(&self) -> Result<BridgeInfo, DiscoveryError> {
        let dir = &self.settings.bridge_dir;
        let meta = match fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => meta,
            _ => return Err(DiscoveryError::BridgeDirectoryNotFound(dir.clone())),
        };
        if !owner_only(&meta) {
            return Err(DiscoveryError::InsecureDirectoryPermissions(dir.clone()));
        }

        let mut candidates = Vec::new();
        for path in self.descriptor_files()? {
            if !validate_file_permissions(&path) {
                tracing::warn!(path = %path.display(), "skipping bridge file with insecure permissions");
                continue;
            }
            let validated = read_descriptor(&path).and_then(|raw| raw.validate_secure(&path));
            match validated {
                Ok(info) => candidates.push(info),
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "skipping invalid bridge file")
                }
            }
        }

        let best = candidates
            .into_iter()
            .reduce(|best, next| {
                if next.instance_id > best.instance_id {
                    next
                } else {
                    best
                }
            })
            .ok_or(DiscoveryError::NoValidBridgeFound)?;
        tracing::debug!(port = best.port, instance_id = best.instance_id, "selected secure bridge");
        Ok(best)
    }

    /// Unauthenticated discovery: port hint, then the editor this CLI runs
    /// under, then the live listing (asking `chooser` when ambiguous).
    pub fn discover_bridge(&self, chooser: &dyn BridgeChooser) -> Result<BridgeInfo, DiscoveryError> {
        if let Some(info) = self.bridge_from_port_hint() {
            return Ok(info);
        }

        let bridges = self.list_available_bridges()?;

        if let Some(info) = self.bridge_for_parent_editor(&bridges) {
            return Ok(info);
        }

        match bridges.len() {
            0 => Err(DiscoveryError::NoBridgeFound),
            1 => bridges.into_iter().next().ok_or(DiscoveryError::NoBridgeFound),
            count => {
                let answer = chooser.choose(&bridges)?;
                let index = parse_selection(&answer, count)?;
                bridges
                    .into_iter()
                    .nth(index)
                    .ok_or_else(|| DiscoveryError::InvalidSelection(answer.trim().to_string()))
            }
        }
    }

    /// Descriptors with a usable port whose bridge answers the probe, newest
    /// first. Dead descriptors are deleted when pruning is enabled.
    pub fn list_available_bridges(&self) -> Result<Vec<BridgeInfo>, DiscoveryError> {
        if !self.settings.bridge_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut bridges = Vec::new();
        for path in self.descriptor_files()? {
            let info = match read_descriptor(&path).and_then(|raw| raw.validate_legacy(&path)) {
                Ok(info) => info,
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "skipping unreadable bridge file");
                    continue;
                }
            };
            if self.is_bridge_operative(info.port) {
                bridges.push(info);
            } else if self.settings.prune_stale {
                tracing::debug!(path = %path.display(), "removing stale bridge file");
                if let Err(err) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove stale bridge file");
                }
            }
        }
        bridges.sort_by(|a, b| b.instance_id.cmp(&a.instance_id));
        Ok(bridges)
    }

    pub fn is_bridge_operative(&self, port: u16) -> bool {
        self.probe.ping(port, self.settings.probe_timeout).is_some()
    }

    fn bridge_from_port_hint(&self) -> Option<BridgeInfo> {
        let raw = self.port_hint.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        let var = &self.settings.port_env;
        let Some(port) = raw.parse::<u16>().ok().filter(|port| *port > 0) else {
            tracing::warn!(var = %var, value = %raw, "ignoring invalid bridge port hint");
            return None;
        };
        match self.probe.ping(port, PORT_HINT_TIMEOUT) {
            Some(reply) => {
                tracing::debug!(port, workspace = %reply.workspace, "using bridge from port hint");
                Some(BridgeInfo::from_port(port, reply.workspace))
            }
            None => {
                tracing::warn!(var = %var, port, "bridge from port hint is not responding");
                None
            }
        }
    }

    fn bridge_for_parent_editor(&self, bridges: &[BridgeInfo]) -> Option<BridgeInfo> {
        let editor = match detect_parent_editor(self.locator.as_ref()) {
            Ok(editor) => editor,
            Err(err) => {
                tracing::debug!(error = %err, "no editor ancestor");
                return None;
            }
        };
        let workspace = editor.workspace_path()?;
        let found = match_workspace(bridges, &workspace).cloned();
        if let Some(info) = &found {
            tracing::debug!(port = info.port, workspace = %workspace.display(), "matched bridge to parent editor");
        }
        found
    }

    fn descriptor_files(&self) -> Result<Vec<PathBuf>, DiscoveryError> {
        let dir = &self.settings.bridge_dir;
        let entries = fs::read_dir(dir).map_err(|source| DiscoveryError::ReadDirectory {
            path: dir.clone(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
            .filter(|entry| is_descriptor_file_name(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect();
        files.sort();
        Ok(files)
    }
}

/// Exact workspace match first; otherwise the bridge whose workspace sits
/// closest below `workspace` (fewest extra path components), newest instance
/// on ties.
pub fn match_workspace<'a>(bridges: &'a [BridgeInfo], workspace: &Path) -> Option<&'a BridgeInfo> {
    let usable = || {
        bridges
            .iter()
            .filter(|info| !info.workspace_path.trim().is_empty())
    };
    if let Some(exact) = usable().find(|info| Path::new(&info.workspace_path) == workspace) {
        return Some(exact);
    }
    let depth = |info: &BridgeInfo| Path::new(&info.workspace_path).components().count();
    usable()
        .filter(|info| Path::new(&info.workspace_path).starts_with(workspace))
        .min_by(|a, b| {
            depth(*a)
                .cmp(&depth(*b))
                .then_with(|| b.instance_id.cmp(&a.instance_id))
        })
}

fn parse_selection(answer: &str, count: usize) -> Result<usize, DiscoveryError> {
    let trimmed = answer.trim();
    trimmed
        .parse::<usize>()
        .ok()
        .filter(|choice| (1..=count).contains(choice))
        .map(|choice| choice - 1)
        .ok_or_else(|| DiscoveryError::InvalidSelection(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_tree::ProcessEntry;
    use crate::test_support::{StubBridge, StubResponse};
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use tempfile::{tempdir, TempDir};

    struct FakeProbe {
        alive: BTreeMap<u16, String>,
    }

    impl FakeProbe {
        fn alive(ports: &[(u16, &str)]) -> Self {
            Self {
                alive: ports
                    .iter()
                    .map(|(port, name)| (*port, name.to_string()))
                    .collect(),
            }
        }
    }

    impl LivenessProbe for FakeProbe {
        fn ping(&self, port: u16, _timeout: Duration) -> Option<PingReply> {
            self.alive.get(&port).map(|workspace| PingReply {
                workspace: workspace.clone(),
            })
        }
    }

    struct NoEditor;

    impl ParentProcessLocator for NoEditor {
        fn current_parent_pid(&self) -> Option<u32> {
            None
        }

        fn lookup(&self, _pid: u32) -> Option<ProcessEntry> {
            None
        }
    }

    struct EditorAt(String);

    impl ParentProcessLocator for EditorAt {
        fn current_parent_pid(&self) -> Option<u32> {
            Some(77)
        }

        fn lookup(&self, pid: u32) -> Option<ProcessEntry> {
            (pid == 77).then(|| ProcessEntry {
                pid,
                ppid: Some(1),
                name: "code".to_string(),
                command_line: format!("/usr/share/code/code --folder-uri file://{}", self.0),
            })
        }
    }

    struct ScriptedChooser {
        answer: String,
        offered: RefCell<Vec<u16>>,
    }

    impl ScriptedChooser {
        fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                offered: RefCell::new(Vec::new()),
            }
        }
    }

    impl BridgeChooser for ScriptedChooser {
        fn choose(&self, bridges: &[BridgeInfo]) -> Result<String, DiscoveryError> {
            *self.offered.borrow_mut() = bridges.iter().map(|info| info.port).collect();
            Ok(self.answer.clone())
        }
    }

    fn settings(dir: &Path) -> DiscoverySettings {
        DiscoverySettings {
            bridge_dir: dir.to_path_buf(),
            host: "127.0.0.1".to_string(),
            port_env: "VSTR".to_string(),
            probe_timeout: Duration::from_millis(200),
            prune_stale: true,
        }
    }

    fn discovery(dir: &Path, probe: FakeProbe) -> Discovery {
        Discovery::new(settings(dir))
            .with_probe(probe)
            .with_locator(NoEditor)
            .with_port_hint(None)
    }

    fn bridge_dir() -> (TempDir, PathBuf) {
        let root = tempdir().unwrap();
        let dir = root.path().join("vstr-bridge");
        fs::create_dir(&dir).unwrap();
        set_mode(&dir, 0o700);
        (root, dir)
    }

    #[cfg(unix)]
    fn set_mode(path: &Path, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[cfg(not(unix))]
    fn set_mode(_path: &Path, _mode: u32) {}

    fn write_descriptor(dir: &Path, port: u16, instance_id: i64, token_len: usize, workspace: &str) -> PathBuf {
        let path = dir.join(format!("bridge-{port}.json"));
        let body = json!({
            "port": port,
            "pid": 4000 + i64::from(port % 100),
            "instance_id": instance_id,
            "workspace_path": workspace,
            "workspace_name": Path::new(workspace).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
            "timestamp": "2026-10-18T09:30:00Z",
            "auth_token": "x".repeat(token_len),
            "secure": true,
        });
        fs::write(&path, body.to_string()).unwrap();
        set_mode(&path, 0o600);
        path
    }

    #[test]
    fn highest_instance_id_wins() {
        let (_root, dir) = bridge_dir();
        write_descriptor(&dir, 9005, 5, 32, "/work/a");
        write_descriptor(&dir, 9007, 7, 32, "/work/b");
        let info = discovery(&dir, FakeProbe::alive(&[]))
            .discover_secure_bridge()
            .expect("bridge");
        assert_eq!(info.instance_id, 7);
        assert_eq!(info.port, 9007);
        assert_eq!(info.descriptor_path, Some(dir.join("bridge-9007.json")));
    }

    #[test]
    fn only_valid_descriptors_compete() {
        let (_root, dir) = bridge_dir();
        write_descriptor(&dir, 9001, 1, 32, "/work/a");
        write_descriptor(&dir, 9003, 3, 40, "/work/c");
        // Highest id but token too short.
        write_descriptor(&dir, 9009, 9, 16, "/work/z");
        // Highest id among the broken ones: readable by others.
        let loose = write_descriptor(&dir, 9008, 8, 32, "/work/y");
        set_mode(&loose, 0o644);
        fs::write(dir.join("bridge-9010.json"), "{ not json").unwrap();
        set_mode(&dir.join("bridge-9010.json"), 0o600);
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let info = discovery(&dir, FakeProbe::alive(&[]))
            .discover_secure_bridge()
            .expect("bridge");
        #[cfg(unix)]
        assert_eq!(info.instance_id, 3);
        #[cfg(not(unix))]
        assert_eq!(info.instance_id, 8);
    }

    #[test]
    fn no_descriptors_means_no_valid_bridge() {
        let (_root, dir) = bridge_dir();
        let err = discovery(&dir, FakeProbe::alive(&[]))
            .discover_secure_bridge()
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoValidBridgeFound));
    }

    #[test]
    fn all_invalid_descriptors_means_no_valid_bridge() {
        let (_root, dir) = bridge_dir();
        write_descriptor(&dir, 9001, 1, 10, "/work/a");
        write_descriptor(&dir, 9002, 2, 31, "/work/b");
        let err = discovery(&dir, FakeProbe::alive(&[]))
            .discover_secure_bridge()
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoValidBridgeFound));
    }

    #[test]
    fn missing_directory_is_reported() {
        let root = tempdir().unwrap();
        let err = discovery(&root.path().join("vstr-bridge"), FakeProbe::alive(&[]))
            .discover_secure_bridge()
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::BridgeDirectoryNotFound(_)));
        assert_eq!(err.error_code(), "bridge_directory_not_found");
    }

    #[cfg(unix)]
    #[test]
    fn shared_directory_is_rejected() {
        let (_root, dir) = bridge_dir();
        write_descriptor(&dir, 9001, 1, 32, "/work/a");
        set_mode(&dir, 0o755);
        let err = discovery(&dir, FakeProbe::alive(&[]))
            .discover_secure_bridge()
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InsecureDirectoryPermissions(_)));
    }

    #[test]
    fn listing_keeps_live_bridges_newest_first_and_prunes_dead() {
        let (_root, dir) = bridge_dir();
        write_descriptor(&dir, 9001, 1, 0, "/work/a");
        write_descriptor(&dir, 9002, 2, 0, "/work/b");
        let dead = write_descriptor(&dir, 9003, 3, 0, "/work/c");
        let bridges = discovery(&dir, FakeProbe::alive(&[(9001, "a"), (9002, "b")]))
            .list_available_bridges()
            .unwrap();
        let ports: Vec<u16> = bridges.iter().map(|info| info.port).collect();
        assert_eq!(ports, vec![9002, 9001]);
        assert!(!dead.exists());
    }

    #[test]
    fn listing_leaves_dead_files_when_pruning_is_off() {
        let (_root, dir) = bridge_dir();
        let dead = write_descriptor(&dir, 9003, 3, 0, "/work/c");
        let mut cfg = settings(&dir);
        cfg.prune_stale = false;
        let bridges = Discovery::new(cfg)
            .with_probe(FakeProbe::alive(&[]))
            .list_available_bridges()
            .unwrap();
        assert!(bridges.is_empty());
        assert!(dead.exists());
    }

    #[test]
    fn http_ping_treats_non_200_as_dead() {
        let http = HttpProbe::new("127.0.0.1");
        let failing = StubBridge::start(|_| StubResponse::empty(500));
        assert!(http.ping(failing.port(), Duration::from_secs(2)).is_none());

        let live = StubBridge::start(|_| {
            StubResponse::json(200, json!({"status": "ok", "workspace": "api"}))
        });
        let reply = http.ping(live.port(), Duration::from_secs(2)).expect("alive");
        assert_eq!(reply.workspace, "api");
    }

    #[test]
    fn listing_prunes_bridge_answering_errors() {
        let failing = StubBridge::start(|_| StubResponse::empty(500));
        let (_root, dir) = bridge_dir();
        let path = write_descriptor(&dir, failing.port(), 1, 0, "/work/a");
        let mut cfg = settings(&dir);
        cfg.probe_timeout = Duration::from_secs(2);
        let bridges = Discovery::new(cfg)
            .with_port_hint(None)
            .list_available_bridges()
            .unwrap();
        assert!(bridges.is_empty());
        assert!(!path.exists());
        assert_eq!(failing.requests_to("/ping").len(), 1);
    }

    #[test]
    fn listing_missing_directory_is_empty() {
        let root = tempdir().unwrap();
        let bridges = discovery(&root.path().join("absent"), FakeProbe::alive(&[]))
            .list_available_bridges()
            .unwrap();
        assert!(bridges.is_empty());
    }

    #[test]
    fn port_hint_wins_when_alive() {
        let (_root, dir) = bridge_dir();
        write_descriptor(&dir, 9001, 1, 0, "/work/a");
        let info = discovery(&dir, FakeProbe::alive(&[(9001, "a"), (7777, "hinted")]))
            .with_port_hint(Some("7777".to_string()))
            .discover_bridge(&ScriptedChooser::new("1"))
            .unwrap();
        assert_eq!(info.port, 7777);
        assert_eq!(info.workspace_name, "hinted");
        assert!(info.descriptor_path.is_none());
    }

    #[test]
    fn dead_or_garbage_port_hint_falls_through() {
        let (_root, dir) = bridge_dir();
        write_descriptor(&dir, 9001, 1, 0, "/work/a");
        for hint in ["7777", "not-a-port", "0"] {
            let info = discovery(&dir, FakeProbe::alive(&[(9001, "a")]))
                .with_port_hint(Some(hint.to_string()))
                .discover_bridge(&ScriptedChooser::new("1"))
                .unwrap();
            assert_eq!(info.port, 9001, "hint {hint}");
        }
    }

    #[test]
    fn parent_editor_workspace_selects_bridge() {
        let (_root, dir) = bridge_dir();
        write_descriptor(&dir, 9001, 1, 0, "/work/api");
        write_descriptor(&dir, 9002, 2, 0, "/work/web");
        let info = discovery(&dir, FakeProbe::alive(&[(9001, "api"), (9002, "web")]))
            .with_locator(EditorAt("/work/api".to_string()))
            .discover_bridge(&ScriptedChooser::new("x"))
            .unwrap();
        assert_eq!(info.port, 9001);
    }

    #[test]
    fn single_live_bridge_is_selected_without_prompt() {
        let (_root, dir) = bridge_dir();
        write_descriptor(&dir, 9001, 1, 0, "/work/a");
        let chooser = ScriptedChooser::new("2");
        let info = discovery(&dir, FakeProbe::alive(&[(9001, "a")]))
            .discover_bridge(&chooser)
            .unwrap();
        assert_eq!(info.port, 9001);
        assert!(chooser.offered.borrow().is_empty());
    }

    #[test]
    fn several_bridges_go_through_chooser() {
        let (_root, dir) = bridge_dir();
        write_descriptor(&dir, 9001, 1, 0, "/work/a");
        write_descriptor(&dir, 9002, 2, 0, "/work/b");
        let probe = || FakeProbe::alive(&[(9001, "a"), (9002, "b")]);

        let chooser = ScriptedChooser::new(" 2 ");
        let info = discovery(&dir, probe()).discover_bridge(&chooser).unwrap();
        assert_eq!(*chooser.offered.borrow(), vec![9002, 9001]);
        assert_eq!(info.port, 9001);

        for bad in ["0", "3", "two", ""] {
            let err = discovery(&dir, probe())
                .discover_bridge(&ScriptedChooser::new(bad))
                .unwrap_err();
            assert!(matches!(err, DiscoveryError::InvalidSelection(_)), "answer {bad:?}");
        }
    }

    #[test]
    fn nothing_alive_is_no_bridge() {
        let (_root, dir) = bridge_dir();
        write_descriptor(&dir, 9001, 1, 0, "/work/a");
        let err = discovery(&dir, FakeProbe::alive(&[]))
            .discover_bridge(&ScriptedChooser::new("1"))
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoBridgeFound));
    }

    fn info_at(port: u16, instance_id: i64, workspace: &str) -> BridgeInfo {
        BridgeInfo {
            instance_id,
            workspace_path: workspace.to_string(),
            ..BridgeInfo::from_port(port, String::new())
        }
    }

    fn matched(bridges: &[BridgeInfo], hint: &str) -> Option<u16> {
        match_workspace(bridges, Path::new(hint)).map(|info| info.port)
    }

    #[test]
    fn workspace_match_accepts_bridge_below_editor_folder() {
        let bridges = vec![info_at(9001, 1, "/work/api/server")];
        assert_eq!(matched(&bridges, "/work/api"), Some(9001));
    }

    #[test]
    fn workspace_match_prefers_exact_then_closest_descendant() {
        let bridges = vec![
            info_at(1, 1, "/work/api/server"),
            info_at(2, 2, "/work/api/server/worker"),
            info_at(3, 3, "/work/web/app"),
            info_at(4, 4, "/work/web/site"),
            info_at(5, 5, ""),
            info_at(6, 6, "/work/apix"),
        ];
        assert_eq!(matched(&bridges, "/work/api/server"), Some(1));
        assert_eq!(matched(&bridges, "/work/api"), Some(1));
        // Same depth: newest instance wins.
        assert_eq!(matched(&bridges, "/work/web"), Some(4));
        // A bridge for a parent folder is not a match.
        assert_eq!(matched(&bridges, "/work/api/server/worker/src"), None);
        assert_eq!(matched(&bridges, "/srv"), None);
        // Component-wise: "/work/apix" is not inside "/work/ap".
        assert_eq!(matched(&bridges, "/work/ap"), None);
    }

    #[test]
    fn parent_folder_bridge_is_not_picked_for_sibling_editor() {
        let bridges = vec![info_at(1, 1, "/work")];
        assert_eq!(matched(&bridges, "/work/web"), None);
    }
}
