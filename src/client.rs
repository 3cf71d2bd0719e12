//! HTTP clients for one discovered bridge.
//!
//! `SecureClient` sends the bearer token from the descriptor file on every
//! request and insists the bridge reports secure mode. `LegacyClient` talks
//! to older, unauthenticated bridges and additionally checks the per-task
//! results a legacy bridge returns for workspaces.

use crate::auth::{AuthError, AuthManager};
use crate::model::{Task, TaskPayload, Workspace, WorkspacePayload};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const PING_TIMEOUT: Duration = Duration::from_secs(30);
pub const TASK_TIMEOUT: Duration = Duration::from_secs(60);
pub const WORKSPACE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("command blocked by security policy: {0}")]
    PolicyBlocked(String),
    #[error("request failed ({status}): {message}")]
    UnexpectedStatus { status: u16, message: String },
    #[error("bridge is not running in secure mode")]
    NotSecureMode,
    #[error("invalid response from bridge: {0}")]
    InvalidResponse(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] reqwest::Error),
    #[error("some tasks failed: {}", join_failures(.0))]
    TaskFailures(Vec<TaskFailure>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub task: String,
    pub error: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.task, self.error)
    }
}

fn join_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(TaskFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ClientError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ClientError::AuthenticationFailed(_) => "authentication_failed",
            ClientError::RateLimited(_) => "rate_limited",
            ClientError::PolicyBlocked(_) => "policy_blocked",
            ClientError::UnexpectedStatus { .. } => "unexpected_status",
            ClientError::NotSecureMode => "not_secure_mode",
            ClientError::InvalidResponse(_) => "invalid_response",
            ClientError::ConnectionFailed(_) => "connection_failed",
            ClientError::TaskFailures(_) => "task_failures",
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ClientError::AuthenticationFailed(_) => Some(
                "The bridge may have regenerated its token; restart the editor or the bridge extension.",
            ),
            ClientError::RateLimited(_) => Some("Too many requests; wait a few minutes and retry."),
            ClientError::PolicyBlocked(_) => {
                Some("The bridge rejected this command as potentially unsafe.")
            }
            ClientError::NotSecureMode => {
                Some("Enable secure mode in the bridge extension settings.")
            }
            ClientError::ConnectionFailed(_) => {
                Some("Check that the editor and the bridge extension are running.")
            }
            ClientError::UnexpectedStatus { .. }
            | ClientError::InvalidResponse(_)
            | ClientError::TaskFailures(_) => None,
        }
    }
}

/// Operations every bridge flavour supports.
pub trait BridgeClient {
    fn port(&self) -> u16;
    fn test_connection(&self) -> Result<(), ClientError>;
    fn execute_task(&self, task: &Task) -> Result<(), ClientError>;
    fn execute_workspace(&self, workspace: &Workspace) -> Result<(), ClientError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiResponse {
    error: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SecurePing {
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    security_features: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WorkspaceResults {
    results: Vec<TaskResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaskResult {
    task: String,
    success: bool,
    error: String,
}

/// Shared transport: one blocking client bound to `http://<host>:<port>`.
#[derive(Debug)]
struct Transport {
    http: Client,
    base_url: String,
    port: u16,
}

impl Transport {
    fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .no_proxy()
            .build()
            .map_err(ClientError::ConnectionFailed)?;
        Ok(Self {
            http,
            base_url: format!("http://{host}:{port}"),
            port,
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(format!("{}{}", self.base_url, path))
    }

    fn post<T: Serialize>(&self, path: &str, body: &T) -> RequestBuilder {
        self.http.post(format!("{}{}", self.base_url, path)).json(body)
    }
}

fn send(request: RequestBuilder, timeout: Duration) -> Result<Response, ClientError> {
    request
        .timeout(timeout)
        .send()
        .map_err(ClientError::ConnectionFailed)
}

fn with_auth(mut request: RequestBuilder, auth: &AuthManager) -> RequestBuilder {
    if let Some(headers) = auth.auth_headers() {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

/// Maps a non-200 bridge response to its error kind. The body is read as
/// `{success, error, message}`; whatever text is present is carried along.
fn error_from_response(response: Response) -> ClientError {
    let status = response.status();
    let raw = response.text().unwrap_or_default();
    let parsed: ApiResponse = serde_json::from_str(&raw).unwrap_or_default();
    let message = [parsed.error, parsed.message, raw.trim().to_string()]
        .into_iter()
        .find(|text| !text.trim().is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("no details").to_string());
    classify_status(status, message)
}

fn classify_status(status: StatusCode, message: String) -> ClientError {
    match status.as_u16() {
        401 => ClientError::AuthenticationFailed(message),
        403 => ClientError::PolicyBlocked(message),
        429 => ClientError::RateLimited(message),
        code => ClientError::UnexpectedStatus {
            status: code,
            message,
        },
    }
}

fn expect_ok(response: Response) -> Result<Response, ClientError> {
    if response.status() == StatusCode::OK {
        Ok(response)
    } else {
        Err(error_from_response(response))
    }
}

#[derive(Debug)]
pub struct SecureClient {
    transport: Transport,
    auth: AuthManager,
}

impl SecureClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            transport: Transport::new(host, port, timeout)?,
            auth: AuthManager::new(),
        })
    }

    pub fn load_auth(&mut self, descriptor_path: &Path) -> Result<(), AuthError> {
        self.auth.load_token_from_bridge(descriptor_path)
    }
}

impl BridgeClient for SecureClient {
    fn port(&self) -> u16 {
        self.transport.port
    }

    fn test_connection(&self) -> Result<(), ClientError> {
        let request = with_auth(self.transport.get("/ping"), &self.auth);
        let response = send(request, PING_TIMEOUT)?;
        match response.status().as_u16() {
            200 => {}
            401 => return Err(ClientError::AuthenticationFailed("invalid token".to_string())),
            429 => return Err(ClientError::RateLimited("too many requests".to_string())),
            status => {
                return Err(ClientError::UnexpectedStatus {
                    status,
                    message: response.text().unwrap_or_default().trim().to_string(),
                })
            }
        }
        let ping: SecurePing = response
            .json()
            .map_err(|err| ClientError::InvalidResponse(format!("invalid ping response: {err}")))?;
        if !ping.secure {
            return Err(ClientError::NotSecureMode);
        }
        tracing::debug!(features = ?ping.security_features, "secure bridge answered ping");
        Ok(())
    }

    fn execute_task(&self, task: &Task) -> Result<(), ClientError> {
        let request = with_auth(self.transport.post("/task", &TaskPayload::from(task)), &self.auth);
        expect_ok(send(request, TASK_TIMEOUT)?)?;
        Ok(())
    }

    fn execute_workspace(&self, workspace: &Workspace) -> Result<(), ClientError> {
        let request = with_auth(
            self.transport
                .post("/workspace", &WorkspacePayload::from(workspace)),
            &self.auth,
        );
        expect_ok(send(request, WORKSPACE_TIMEOUT)?)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct LegacyClient {
    transport: Transport,
}

impl LegacyClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            transport: Transport::new(host, port, timeout)?,
        })
    }
}

impl BridgeClient for LegacyClient {
    fn port(&self) -> u16 {
        self.transport.port
    }

    fn test_connection(&self) -> Result<(), ClientError> {
        let response = send(self.transport.get("/ping"), PING_TIMEOUT)?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(ClientError::UnexpectedStatus {
                status,
                message: format!("bridge returned status {status}"),
            });
        }
        Ok(())
    }

    fn execute_task(&self, task: &Task) -> Result<(), ClientError> {
        let request = self.transport.post("/task", &TaskPayload::from(task));
        expect_ok(send(request, TASK_TIMEOUT)?)?;
        Ok(())
    }

    fn execute_workspace(&self, workspace: &Workspace) -> Result<(), ClientError> {
        let request = self
            .transport
            .post("/workspace", &WorkspacePayload::from(workspace));
        let response = expect_ok(send(request, WORKSPACE_TIMEOUT)?)?;
        let raw = response
            .text()
            .map_err(|err| ClientError::InvalidResponse(err.to_string()))?;
        if raw.trim().is_empty() {
            return Ok(());
        }
        let outcome: WorkspaceResults = serde_json::from_str(&raw)
            .map_err(|err| ClientError::InvalidResponse(format!("failed to parse response: {err}")))?;
        let failures: Vec<TaskFailure> = outcome
            .results
            .into_iter()
            .filter(|result| !result.success)
            .map(|result| TaskFailure {
                task: result.task,
                error: result.error,
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ClientError::TaskFailures(failures))
        }
    }
}
