//! Transport fakes for tests in dependent crates.

use crate::protocol::{CapabilityDefinition, ServerCapabilities};
use crate::transport::{ToolTransport, TransportError};
use crate::TransportConnector;
use allen_contract::McpServerSpec;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Transport that echoes every call and records it.
pub struct EchoTransport {
    capabilities: Vec<CapabilityDefinition>,
    /// `(capability, arguments)` of every call, for assertions.
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl EchoTransport {
    pub fn new(capability_names: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            capabilities: capability_names
                .iter()
                .map(|n| CapabilityDefinition::new(*n))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ToolTransport for EchoTransport {
    fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: Some(json!({})),
            ..Default::default()
        }
    }

    async fn list_capabilities(&self) -> Result<Vec<CapabilityDefinition>, TransportError> {
        Ok(self.capabilities.clone())
    }

    async fn call_capability(
        &self,
        name: &str,
        arguments: Value,
        _timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        Ok(json!({ "echo": { "capability": name, "arguments": arguments } }))
    }
}

/// Connector serving pre-registered transports; unknown servers fail to
/// open, which marks them unavailable.
#[derive(Default)]
pub struct StaticConnector {
    transports: Mutex<HashMap<String, Arc<dyn ToolTransport>>>,
}

impl StaticConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, server: &str, transport: Arc<dyn ToolTransport>) {
        self.transports
            .lock()
            .unwrap()
            .insert(server.to_string(), transport);
    }
}

#[async_trait]
impl TransportConnector for StaticConnector {
    async fn connect(
        &self,
        server_name: &str,
        _spec: &McpServerSpec,
    ) -> Result<Arc<dyn ToolTransport>, TransportError> {
        self.transports
            .lock()
            .unwrap()
            .get(server_name)
            .cloned()
            .ok_or_else(|| {
                TransportError::Protocol(format!("no transport registered for '{server_name}'"))
            })
    }
}

/// A command spec that never has to actually run.
pub fn dummy_spec() -> McpServerSpec {
    McpServerSpec {
        command: "tool-server".to_string(),
        args: Vec::new(),
        env: None,
    }
}
