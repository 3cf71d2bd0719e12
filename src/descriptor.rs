//! Descriptor files written by bridge instances into the shared bridge
//! directory (`bridge-<port>.json`).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const MIN_TOKEN_LEN: usize = 32;
pub const DESCRIPTOR_PREFIX: &str = "bridge-";
pub const DESCRIPTOR_SUFFIX: &str = ".json";

/// Raw descriptor as found on disk. Numeric fields are wide so that out of
/// range values reach validation instead of failing the decode.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeDescriptor {
    pub port: i64,
    pub pid: i64,
    pub instance_id: i64,
    pub workspace_path: String,
    pub workspace_name: String,
    pub timestamp: String,
    pub auth_token: String,
    pub secure: bool,
}

/// A validated bridge instance.
#[derive(Clone, PartialEq, Eq)]
pub struct BridgeInfo {
    pub port: u16,
    pub pid: u32,
    pub instance_id: i64,
    pub workspace_path: String,
    pub workspace_name: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub auth_token: String,
    pub secure: bool,
    /// File this info was read from; `None` for bridges reached through the
    /// port hint.
    pub descriptor_path: Option<PathBuf>,
}

impl fmt::Debug for BridgeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeDescriptor")
            .field("port", &self.port)
            .field("pid", &self.pid)
            .field("instance_id", &self.instance_id)
            .field("workspace_path", &self.workspace_path)
            .field("workspace_name", &self.workspace_name)
            .field("timestamp", &self.timestamp)
            .field("auth_token", &redact(&self.auth_token))
            .field("secure", &self.secure)
            .finish()
    }
}

impl fmt::Debug for BridgeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeInfo")
            .field("port", &self.port)
            .field("pid", &self.pid)
            .field("instance_id", &self.instance_id)
            .field("workspace_path", &self.workspace_path)
            .field("workspace_name", &self.workspace_name)
            .field("timestamp", &self.timestamp)
            .field("auth_token", &redact(&self.auth_token))
            .field("secure", &self.secure)
            .field("descriptor_path", &self.descriptor_path)
            .finish()
    }
}

fn redact(token: &str) -> &'static str {
    if token.is_empty() {
        "<none>"
    } else {
        "<redacted>"
    }
}

impl BridgeInfo {
    /// Info for a bridge reached directly by port, with no descriptor file.
    pub fn from_port(port: u16, workspace_name: String) -> Self {
        Self {
            port,
            pid: 0,
            instance_id: 0,
            workspace_path: String::new(),
            workspace_name,
            timestamp: None,
            auth_token: String::new(),
            secure: false,
            descriptor_path: None,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.workspace_name.trim().is_empty() {
            "(unnamed workspace)"
        } else {
            &self.workspace_name
        }
    }
}

pub fn is_descriptor_file_name(name: &str) -> bool {
    name.starts_with(DESCRIPTOR_PREFIX)
        && name.ends_with(DESCRIPTOR_SUFFIX)
        && name.len() > DESCRIPTOR_PREFIX.len() + DESCRIPTOR_SUFFIX.len()
}

pub fn read_descriptor(path: &Path) -> Result<BridgeDescriptor, String> {
    let data = fs::read_to_string(path).map_err(|err| format!("failed to read file: {err}"))?;
    serde_json::from_str(&data).map_err(|err| format!("invalid JSON: {err}"))
}

pub fn valid_port(port: i64) -> Result<u16, String> {
    u16::try_from(port)
        .ok()
        .filter(|port| *port > 0)
        .ok_or_else(|| format!("invalid port number: {port}"))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl BridgeDescriptor {
    /// Checks applied to descriptors on the authenticated path: port range,
    /// live-looking pid, token length and the secure flag, in that order.
    pub fn validate_secure(self, path: &Path) -> Result<BridgeInfo, String> {
        let port = valid_port(self.port)?;
        let pid = u32::try_from(self.pid)
            .ok()
            .filter(|pid| *pid > 0)
            .ok_or_else(|| format!("invalid PID: {}", self.pid))?;
        if self.auth_token.len() < MIN_TOKEN_LEN {
            return Err("invalid auth token length".to_string());
        }
        if !self.secure {
            return Err("bridge is not in secure mode".to_string());
        }
        Ok(self.into_info(port, pid, path))
    }

    /// The unauthenticated path only needs somewhere to connect to.
    pub fn validate_legacy(self, path: &Path) -> Result<BridgeInfo, String> {
        let port = valid_port(self.port)?;
        let pid = u32::try_from(self.pid).unwrap_or(0);
        Ok(self.into_info(port, pid, path))
    }

    fn into_info(self, port: u16, pid: u32, path: &Path) -> BridgeInfo {
        BridgeInfo {
            port,
            pid,
            instance_id: self.instance_id,
            timestamp: parse_timestamp(&self.timestamp),
            workspace_path: self.workspace_path,
            workspace_name: self.workspace_name,
            auth_token: self.auth_token,
            secure: self.secure,
            descriptor_path: Some(path.to_path_buf()),
        }
    }
}
