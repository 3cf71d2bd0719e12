use crate::descriptor::{read_descriptor, MIN_TOKEN_LEN};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const USER_AGENT: &str = concat!("vstr-cli/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("bridge info file {0} has insecure permissions")]
    InsecurePermissions(PathBuf),
    #[error("failed to read bridge info {path}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("bridge is not running in secure mode")]
    NotSecureMode,
    #[error("invalid auth token length")]
    InvalidToken,
}

impl AuthError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InsecurePermissions(_) => "insecure_permissions",
            AuthError::Read { .. } => "bridge_file_unreadable",
            AuthError::NotSecureMode => "not_secure_mode",
            AuthError::InvalidToken => "invalid_token",
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            AuthError::InsecurePermissions(_) => {
                "Check file ownership and permissions (should be 0600 or 0700)."
            }
            AuthError::Read { .. } => {
                "The bridge file may be mid-write or corrupted; restart the bridge extension."
            }
            AuthError::NotSecureMode => {
                "Enable secure mode in the bridge extension settings."
            }
            AuthError::InvalidToken => {
                "The bridge token may be corrupted or expired; restart the bridge extension."
            }
        }
    }
}

/// Holds the bearer token for one bridge session.
#[derive(Default)]
pub struct AuthManager {
    token: Option<String>,
}

impl fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthManager")
            .field("token_loaded", &self.token.is_some())
            .finish()
    }
}

impl AuthManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the token from a descriptor file. The file must be owner-only,
    /// decode cleanly, declare secure mode and carry a full length token.
    pub fn load_token_from_bridge(&mut self, path: &Path) -> Result<(), AuthError> {
        if !self.validate_file_permissions(path) {
            return Err(AuthError::InsecurePermissions(path.to_path_buf()));
        }
        let descriptor = read_descriptor(path).map_err(|reason| AuthError::Read {
            path: path.to_path_buf(),
            reason,
        })?;
        if !descriptor.secure {
            return Err(AuthError::NotSecureMode);
        }
        if descriptor.auth_token.len() < MIN_TOKEN_LEN {
            return Err(AuthError::InvalidToken);
        }
        tracing::debug!(path = %path.display(), "loaded bridge auth token");
        self.token = Some(descriptor.auth_token);
        Ok(())
    }

    /// Headers for an authenticated request, or `None` when no token has
    /// been loaded and the request goes out unauthenticated.
    pub fn auth_headers(&self) -> Option<BTreeMap<&'static str, String>> {
        let token = self.token.as_ref()?;
        let mut headers = BTreeMap::new();
        headers.insert("Authorization", format!("Bearer {token}"));
        headers.insert("User-Agent", USER_AGENT.to_string());
        Some(headers)
    }

    pub fn validate_file_permissions(&self, path: &Path) -> bool {
        validate_file_permissions(path)
    }
}

/// True when only the owner can access `path`. Hosts without unix mode bits
/// only require the file to exist.
pub fn validate_file_permissions(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    owner_only(&meta)
}

#[cfg(unix)]
pub(crate) fn owner_only(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o077 == 0
}

#[cfg(not(unix))]
pub(crate) fn owner_only(_meta: &fs::Metadata) -> bool {
    true
}
