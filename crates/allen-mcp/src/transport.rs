//! Stdio transport: line-delimited JSON-RPC over a child process.

use crate::protocol::{
    initialize_params, CallCapabilityParams, CallCapabilityResult, CapabilityDefinition,
    InitializeResult, JsonRpcId, JsonRpcMessage, JsonRpcNotification, JsonRpcPayload,
    JsonRpcRequest, ListCapabilitiesResult, ServerCapabilities,
};
use allen_contract::McpServerSpec;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn tool server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool-server connection closed")]
    ConnectionClosed,

    #[error("tool call timed out after {0:?}")]
    Timeout(Duration),

    #[error("tool server returned an error: {0}")]
    Server(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("wire decode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A live session to one tool server.
///
/// Implementations must be safe for concurrent callers: invocations from
/// different agents multiplex over the same session.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Capability flags captured during the initialize handshake.
    fn capabilities(&self) -> ServerCapabilities;

    /// Fetch the capability list.
    async fn list_capabilities(&self) -> Result<Vec<CapabilityDefinition>, TransportError>;

    /// Invoke one capability, bounded by `timeout`.
    async fn call_capability(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError>;
}

struct WriteRequest {
    line: String,
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value, TransportError>>>>>;

/// Stdio session: spawns the configured command and speaks newline-delimited
/// JSON-RPC over its stdin/stdout. A writer task serializes concurrent
/// senders; a reader task correlates responses by request id.
pub struct StdioTransport {
    write_tx: mpsc::Sender<WriteRequest>,
    pending: PendingMap,
    next_id: AtomicI64,
    alive: Arc<AtomicBool>,
    capabilities: ServerCapabilities,
    _child: Arc<tokio::sync::Mutex<Child>>,
}

impl StdioTransport {
    /// Spawn the server process and run the initialize handshake.
    pub async fn connect(
        server_name: &str,
        spec: &McpServerSpec,
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = &spec.env {
            for (key, value) in env {
                cmd.env(key, value);
            }
        }

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            command: spec.command.clone(),
            source,
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Protocol("no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Protocol("no stdout pipe".to_string()))?;

        let alive = Arc::new(AtomicBool::new(true));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (write_tx, mut write_rx) = mpsc::channel::<WriteRequest>(256);
        let alive_writer = Arc::clone(&alive);
        tokio::spawn(async move {
            while let Some(req) = write_rx.recv().await {
                if !alive_writer.load(Ordering::SeqCst) {
                    break;
                }
                if stdin.write_all(req.line.as_bytes()).await.is_err()
                    || stdin.flush().await.is_err()
                {
                    alive_writer.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        let pending_reader = Arc::clone(&pending);
        let alive_reader = Arc::clone(&alive);
        let server = server_name.to_string();
        let mut reader = BufReader::new(stdout);
        tokio::spawn(async move {
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => {
                        alive_reader.store(false, Ordering::SeqCst);
                        break;
                    }
                    Ok(_) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcMessage>(&line) {
                            Ok(JsonRpcMessage::Response(response)) => {
                                if let JsonRpcId::Number(id) = response.id {
                                    let tx = pending_reader.lock().unwrap().remove(&id);
                                    if let Some(tx) = tx {
                                        let _ = tx.send(map_payload(response.payload));
                                    }
                                }
                            }
                            Ok(JsonRpcMessage::Notification(note)) => {
                                debug!(server = %server, method = %note.method, "tool-server notification");
                            }
                            Ok(JsonRpcMessage::Request(_)) => {}
                            Err(e) => {
                                warn!(server = %server, error = %e, "unparseable tool-server line");
                            }
                        }
                    }
                }
            }
            pending_reader.lock().unwrap().clear();
        });

        let mut transport = Self {
            write_tx,
            pending,
            next_id: AtomicI64::new(1),
            alive,
            capabilities: ServerCapabilities::default(),
            _child: Arc::new(tokio::sync::Mutex::new(child)),
        };

        let init = transport
            .request("initialize", Some(initialize_params()), handshake_timeout)
            .await?;
        let init: InitializeResult = serde_json::from_value(init)?;
        transport.capabilities = init.capabilities;

        transport
            .notify("notifications/initialized", Some(json!({})))
            .await?;

        Ok(transport)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let note = JsonRpcNotification::new(method, params);
        let line = format!("{}\n", serde_json::to_string(&note)?);
        self.write_tx
            .send(WriteRequest { line })
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(JsonRpcId::Number(id), method, params);
        let line = format!("{}\n", serde_json::to_string(&request)?);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        if self.write_tx.send(WriteRequest { line }).await.is_err() {
            self.pending.lock().unwrap().remove(&id);
            return Err(TransportError::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.pending.lock().unwrap().remove(&id);
                Err(TransportError::ConnectionClosed)
            }
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(TransportError::Timeout(timeout))
            }
        }
    }
}

fn map_payload(payload: JsonRpcPayload) -> Result<Value, TransportError> {
    match payload {
        JsonRpcPayload::Success { result } => Ok(result),
        JsonRpcPayload::Error { error } => Err(TransportError::Server(error.to_string())),
    }
}

#[async_trait]
impl ToolTransport for StdioTransport {
    fn capabilities(&self) -> ServerCapabilities {
        self.capabilities.clone()
    }

    async fn list_capabilities(&self) -> Result<Vec<CapabilityDefinition>, TransportError> {
        let result = self
            .request("tools/list", Some(json!({})), Duration::from_secs(30))
            .await?;
        let list: ListCapabilitiesResult = serde_json::from_value(result)?;
        Ok(list.tools)
    }

    async fn call_capability(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let params = CallCapabilityParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        let result = self
            .request("tools/call", Some(serde_json::to_value(&params)?), timeout)
            .await?;
        let call: CallCapabilityResult = serde_json::from_value(result)?;
        if call.is_error == Some(true) {
            return Err(TransportError::Server(call.error_text().to_string()));
        }
        Ok(call.text_value())
    }
}
