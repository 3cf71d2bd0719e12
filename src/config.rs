use clap::ValueEnum;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");
pub const BRIDGE_DIR_NAME: &str = "vstr-bridge";
pub const DEFAULT_PORT_ENV: &str = "VSTR";

const SECURE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const LEGACY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Invalid(String),
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub setup_complete: bool,
    pub paths: Paths,
    pub bridge: Bridge,
    pub launch: Launch,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub tasks_file: String,
    pub workspaces_file: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Bridge {
    pub mode: BridgeMode,
    pub host: String,
    pub directory: String,
    pub port_env: String,
    pub probe_timeout_ms: u64,
    pub request_timeout_sec: u64,
    pub prune_stale: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Launch {
    pub parallel: bool,
    pub delay_ms: u64,
    pub editor_command: String,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    #[default]
    Secure,
    Legacy,
    Local,
}

impl BridgeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeMode::Secure => "secure",
            BridgeMode::Legacy => "legacy",
            BridgeMode::Local => "local",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            setup_complete: false,
            paths: Paths::default(),
            bridge: Bridge::default(),
            launch: Launch::default(),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            tasks_file: "".to_string(),
            workspaces_file: "".to_string(),
        }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self {
            mode: BridgeMode::default(),
            host: "localhost".to_string(),
            directory: "".to_string(),
            port_env: DEFAULT_PORT_ENV.to_string(),
            probe_timeout_ms: 1000,
            request_timeout_sec: 0,
            prune_stale: true,
        }
    }
}

impl Default for Launch {
    fn default() -> Self {
        Self {
            parallel: false,
            delay_ms: 500,
            editor_command: "".to_string(),
        }
    }
}

/// Where discovery looks and how it probes candidates.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub bridge_dir: PathBuf,
    pub host: String,
    pub port_env: String,
    pub probe_timeout: Duration,
    pub prune_stale: bool,
}

#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub parallel: bool,
    pub delay: Duration,
    pub editor_command: Option<String>,
}

/// Fully resolved runtime settings. Built once in `main` and passed down;
/// nothing below the CLI reads the environment for paths on its own.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: BridgeMode,
    pub discovery: DiscoverySettings,
    pub request_timeout: Duration,
    pub tasks_file: PathBuf,
    pub workspaces_file: PathBuf,
    pub launch: LaunchSettings,
}

impl Settings {
    pub fn resolve(cfg: &Config, config_dir: &Path) -> Settings {
        let bridge_dir = if cfg.bridge.directory.trim().is_empty() {
            resolve_bridge_directory(env::consts::OS, |key| env::var(key).ok())
        } else {
            PathBuf::from(expand_path(cfg.bridge.directory.trim()))
        };
        let port_env = if cfg.bridge.port_env.trim().is_empty() {
            DEFAULT_PORT_ENV.to_string()
        } else {
            cfg.bridge.port_env.trim().to_string()
        };
        let request_timeout = match cfg.bridge.request_timeout_sec {
            0 if cfg.bridge.mode == BridgeMode::Legacy => LEGACY_REQUEST_TIMEOUT,
            0 => SECURE_REQUEST_TIMEOUT,
            secs => Duration::from_secs(secs),
        };
        let editor_command = Some(cfg.launch.editor_command.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Settings {
            mode: cfg.bridge.mode,
            discovery: DiscoverySettings {
                bridge_dir,
                host: cfg.bridge.host.trim().to_string(),
                port_env,
                probe_timeout: Duration::from_millis(cfg.bridge.probe_timeout_ms),
                prune_stale: cfg.bridge.prune_stale,
            },
            request_timeout,
            tasks_file: resolve_store_path(&cfg.paths.tasks_file, config_dir, "tasks.json"),
            workspaces_file: resolve_store_path(
                &cfg.paths.workspaces_file,
                config_dir,
                "workspaces.json",
            ),
            launch: LaunchSettings {
                parallel: cfg.launch.parallel,
                delay: Duration::from_millis(cfg.launch.delay_ms),
                editor_command,
            },
        }
    }
}

fn resolve_store_path(configured: &str, config_dir: &Path, file_name: &str) -> PathBuf {
    if configured.trim().is_empty() {
        return config_dir.join(file_name);
    }
    PathBuf::from(expand_path(configured.trim()))
}

/// Temp root used by the bridge extension, keyed by host OS so the lookup
/// order can be tested without touching the real environment.
pub fn resolve_bridge_directory<F>(os: &str, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
    let tmp_root = if os == "windows" {
        non_empty("TEMP")
            .or_else(|| non_empty("TMP"))
            .unwrap_or_else(|| r"C:\Windows\Temp".to_string())
    } else {
        non_empty("TMPDIR").unwrap_or_else(|| "/tmp".to_string())
    };
    PathBuf::from(tmp_root).join(BRIDGE_DIR_NAME)
}

pub fn resolve_config_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var("VSTR_CONFIG") {
        return PathBuf::from(path);
    }
    default_config_dir().join("config.yaml")
}

pub fn default_config_dir() -> PathBuf {
    if let Ok(path) = env::var("VSTR_CONFIG_DIR") {
        return PathBuf::from(path);
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".config");
    base.push("vstr");
    base
}

pub fn config_dir_from_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_dir)
}

pub fn read_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_config_from_str(&content)
}

/// A missing config file is not an error: the bundled defaults apply.
pub fn load_config_or_default(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    read_config(path)
}

fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.version != 1 {
        return Err(ConfigError::Invalid(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    if cfg.bridge.host.trim().is_empty() {
        return Err(ConfigError::Invalid("bridge.host must not be empty".to_string()));
    }
    if cfg.bridge.probe_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "bridge.probe_timeout_ms must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Records a finished `vstr setup` by flipping the top-level
/// `setup_complete` key, keeping the rest of the file (comments included) as
/// written. A missing file starts from the bundled defaults.
pub fn mark_setup_complete(path: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    let current = if path.exists() {
        fs::read_to_string(path).map_err(io_err)?
    } else {
        DEFAULT_CONFIG_YAML.to_string()
    };
    let patched = patch_setup_complete(&current);
    if !read_config_from_str(&patched)?.setup_complete {
        return Err(ConfigError::Invalid(
            "failed to record setup completion".to_string(),
        ));
    }
    ensure_parent(path).map_err(io_err)?;
    fs::write(path, patched).map_err(io_err)
}

fn patch_setup_complete(yaml: &str) -> String {
    let mut found = false;
    let mut lines: Vec<String> = yaml
        .lines()
        .map(|line| {
            if line.starts_with("setup_complete:") {
                found = true;
                "setup_complete: true".to_string()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !found {
        lines.push("setup_complete: true".to_string());
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn expand_path(input: &str) -> String {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}

pub fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
