//! Tool-client multiplexer for the Allen runtime.
//!
//! A single [`ToolClient`] holds persistent sessions to many external tool
//! servers and exposes synchronous-looking invocations backed by the async
//! runtime. Sessions are opened lazily the first time a server is needed,
//! capability descriptions are cached per session, and a server whose session
//! cannot be opened is marked `unavailable` so agents skip advertising it.

pub mod protocol;
pub mod testing;
pub mod transport;

use allen_contract::{ErrorKind, McpServerSpec};
use async_trait::async_trait;
use futures::future::join_all;
use protocol::CapabilityDefinition;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use transport::{StdioTransport, ToolTransport, TransportError};

/// Default per-call timeout, overridable per invocation.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ToolClientError {
    #[error("no startup config for tool server '{0}'")]
    UnknownServer(String),

    #[error("tool server '{0}' is marked unavailable")]
    Unavailable(String),

    #[error("failed to open session to tool server '{server}': {detail}")]
    SessionOpen { server: String, detail: String },

    #[error("tool invocation on '{server}' failed: {detail}")]
    Invoke { server: String, detail: String },

    #[error("tool invocation on '{server}' timed out after {timeout:?}")]
    Timeout { server: String, timeout: Duration },
}

impl ToolClientError {
    /// Error kind recorded into the failing step's result.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolClientError::UnknownServer(_)
            | ToolClientError::Unavailable(_)
            | ToolClientError::SessionOpen { .. } => ErrorKind::ToolSessionOpen,
            ToolClientError::Invoke { .. } => ErrorKind::ToolInvoke,
            ToolClientError::Timeout { .. } => ErrorKind::ToolTimeout,
        }
    }
}

/// Opens transports for server specs. The production connector spawns stdio
/// child processes; tests substitute fakes.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        server_name: &str,
        spec: &McpServerSpec,
    ) -> Result<Arc<dyn ToolTransport>, TransportError>;
}

/// Production connector: stdio child processes.
pub struct StdioConnector {
    handshake_timeout: Duration,
}

impl Default for StdioConnector {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl TransportConnector for StdioConnector {
    async fn connect(
        &self,
        server_name: &str,
        spec: &McpServerSpec,
    ) -> Result<Arc<dyn ToolTransport>, TransportError> {
        let transport = StdioTransport::connect(server_name, spec, self.handshake_timeout).await?;
        Ok(Arc::new(transport))
    }
}

#[derive(Clone)]
enum SessionEntry {
    Live(Arc<dyn ToolTransport>),
    Unavailable,
}

/// One invocation of a bulk [`ToolClient::invoke_many`] call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub server: String,
    pub capability: String,
    pub arguments: Value,
    pub timeout: Option<Duration>,
}

/// Process-wide multiplexer over tool-server sessions.
pub struct ToolClient {
    server_config: HashMap<String, McpServerSpec>,
    connector: Arc<dyn TransportConnector>,
    /// Read-mostly session map; registration swaps a fresh copy in.
    sessions: RwLock<Arc<HashMap<String, SessionEntry>>>,
    descriptions: RwLock<HashMap<String, Vec<CapabilityDefinition>>>,
    default_timeout: Duration,
}

impl ToolClient {
    pub fn new(server_config: HashMap<String, McpServerSpec>) -> Self {
        Self::with_connector(server_config, Arc::new(StdioConnector::default()))
    }

    pub fn with_connector(
        server_config: HashMap<String, McpServerSpec>,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        Self {
            server_config,
            connector,
            sessions: RwLock::new(Arc::new(HashMap::new())),
            descriptions: RwLock::new(HashMap::new()),
            default_timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }

    /// Names of all configured servers.
    pub fn configured_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.server_config.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether the server has a live session or could still open one.
    pub fn is_available(&self, server_name: &str) -> bool {
        if !self.server_config.contains_key(server_name) {
            return false;
        }
        let sessions = self.sessions.read().unwrap().clone();
        !matches!(sessions.get(server_name), Some(SessionEntry::Unavailable))
    }

    fn session_entry(&self, server_name: &str) -> Option<SessionEntry> {
        self.sessions.read().unwrap().get(server_name).cloned()
    }

    fn store_entry(&self, server_name: &str, entry: SessionEntry) {
        let mut guard = self.sessions.write().unwrap();
        let mut next: HashMap<String, SessionEntry> = (**guard).clone();
        next.insert(server_name.to_string(), entry);
        *guard = Arc::new(next);
    }

    /// Open (or return) the session for `server_name`.
    ///
    /// A failed open leaves a persistent `unavailable` mark; callers that
    /// want to retry must [`ToolClient::reopen`] explicitly.
    pub async fn connect(&self, server_name: &str) -> Result<Arc<dyn ToolTransport>, ToolClientError> {
        match self.session_entry(server_name) {
            Some(SessionEntry::Live(transport)) => return Ok(transport),
            Some(SessionEntry::Unavailable) => {
                return Err(ToolClientError::Unavailable(server_name.to_string()))
            }
            None => {}
        }

        let spec = self
            .server_config
            .get(server_name)
            .ok_or_else(|| ToolClientError::UnknownServer(server_name.to_string()))?;

        match self.connector.connect(server_name, spec).await {
            Ok(transport) => {
                // Another caller may have connected concurrently; first one wins.
                if let Some(SessionEntry::Live(existing)) = self.session_entry(server_name) {
                    return Ok(existing);
                }
                self.store_entry(server_name, SessionEntry::Live(transport.clone()));
                info!(server = %server_name, "tool-server session opened");
                Ok(transport)
            }
            Err(e) => {
                warn!(server = %server_name, error = %e, "tool-server session open failed; marking unavailable");
                self.store_entry(server_name, SessionEntry::Unavailable);
                Err(ToolClientError::SessionOpen {
                    server: server_name.to_string(),
                    detail: e.to_string(),
                })
            }
        }
    }

    /// Drop any existing session (or unavailable mark) and reconnect,
    /// re-fetching the capability description cache.
    pub async fn reopen(&self, server_name: &str) -> Result<(), ToolClientError> {
        {
            let mut guard = self.sessions.write().unwrap();
            let mut next: HashMap<String, SessionEntry> = (**guard).clone();
            next.remove(server_name);
            *guard = Arc::new(next);
        }
        self.descriptions.write().unwrap().remove(server_name);
        self.connect(server_name).await?;
        self.describe(server_name).await?;
        Ok(())
    }

    /// Capability description list, cached once per session.
    pub async fn describe(
        &self,
        server_name: &str,
    ) -> Result<Vec<CapabilityDefinition>, ToolClientError> {
        if let Some(cached) = self.descriptions.read().unwrap().get(server_name) {
            return Ok(cached.clone());
        }

        let transport = self.connect(server_name).await?;
        let defs = transport
            .list_capabilities()
            .await
            .map_err(|e| ToolClientError::Invoke {
                server: server_name.to_string(),
                detail: e.to_string(),
            })?;
        self.descriptions
            .write()
            .unwrap()
            .insert(server_name.to_string(), defs.clone());
        Ok(defs)
    }

    /// Invoke one capability; blocks the calling task until the result or
    /// the timeout (default 30s) arrives.
    pub async fn invoke(
        &self,
        server_name: &str,
        capability_name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ToolClientError> {
        let transport = self.connect(server_name).await?;
        let timeout = timeout.unwrap_or(self.default_timeout);
        transport
            .call_capability(capability_name, arguments, timeout)
            .await
            .map_err(|e| match e {
                TransportError::Timeout(t) => ToolClientError::Timeout {
                    server: server_name.to_string(),
                    timeout: t,
                },
                other => ToolClientError::Invoke {
                    server: server_name.to_string(),
                    detail: other.to_string(),
                },
            })
    }

    /// Bulk invocation: run all invocations concurrently and join on every
    /// completion handle. Result order matches input order.
    pub async fn invoke_many(
        &self,
        invocations: Vec<Invocation>,
    ) -> Vec<Result<Value, ToolClientError>> {
        join_all(invocations.into_iter().map(|inv| async move {
            self.invoke(&inv.server, &inv.capability, inv.arguments, inv.timeout)
                .await
        }))
        .await
    }

    /// Close every session. Child processes die with their transports.
    pub fn close(&self) {
        let mut guard = self.sessions.write().unwrap();
        *guard = Arc::new(HashMap::new());
        self.descriptions.write().unwrap().clear();
        info!("tool client closed all sessions");
    }
}
