//! Error kinds shared across the runtime.
//!
//! Executors never raise past their own boundary: every failure is
//! materialized into the owning step's `execute_result` together with one of
//! these kinds, and stage recovery is driven by the synchronizer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of runtime error kinds.
///
/// The serialized form is the stable `subsystem/variant` string that shows up
/// in step results and on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Startup-time configuration error (fatal).
    #[serde(rename = "config/invalid")]
    Config,
    /// No executor registered for the step's `(type, name)` pair.
    #[serde(rename = "router/unknown-executor")]
    RouterUnknownExecutor,
    /// LLM output failed to match the skill's return format.
    #[serde(rename = "executor/parse")]
    ExecutorParse,
    /// LLM call exceeded the configured timeout.
    #[serde(rename = "executor/llm-timeout")]
    ExecutorLlmTimeout,
    /// LLM transport failure (connection, HTTP, decode).
    #[serde(rename = "executor/llm-transport")]
    ExecutorLlmTransport,
    /// Tool-server session could not be opened (or is marked unavailable).
    #[serde(rename = "tool/session-open")]
    ToolSessionOpen,
    /// Tool invocation failed server-side.
    #[serde(rename = "tool/invoke")]
    ToolInvoke,
    /// Tool invocation exceeded its timeout.
    #[serde(rename = "tool/timeout")]
    ToolTimeout,
    /// Message named a receiver that does not exist (or no receiver at all).
    #[serde(rename = "dispatch/unknown-receiver")]
    DispatchUnknownReceiver,
    /// A cross-entity invariant was violated (programmer error, fatal).
    #[serde(rename = "sync/invariant-violated")]
    SyncInvariantViolated,
}

impl ErrorKind {
    /// Stable string form, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config/invalid",
            ErrorKind::RouterUnknownExecutor => "router/unknown-executor",
            ErrorKind::ExecutorParse => "executor/parse",
            ErrorKind::ExecutorLlmTimeout => "executor/llm-timeout",
            ErrorKind::ExecutorLlmTransport => "executor/llm-transport",
            ErrorKind::ToolSessionOpen => "tool/session-open",
            ErrorKind::ToolInvoke => "tool/invoke",
            ErrorKind::ToolTimeout => "tool/timeout",
            ErrorKind::DispatchUnknownReceiver => "dispatch/unknown-receiver",
            ErrorKind::SyncInvariantViolated => "sync/invariant-violated",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Startup-time configuration errors. These are fatal: the system refuses to
/// boot on any of them.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no role config named 'manager' was found in {0}")]
    MissingManager(String),

    #[error("duplicate role config name: {0}")]
    DuplicateRole(String),

    #[error("role config {0} has neither llm_config nor human_config")]
    MissingDriver(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_serializes_to_stable_strings() {
        let json = serde_json::to_string(&ErrorKind::ToolSessionOpen).unwrap();
        assert_eq!(json, "\"tool/session-open\"");
        let back: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorKind::ToolSessionOpen);
    }

    #[test]
    fn display_matches_serde_form() {
        for kind in [
            ErrorKind::RouterUnknownExecutor,
            ErrorKind::ExecutorParse,
            ErrorKind::DispatchUnknownReceiver,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json.trim_matches('"'), kind.to_string());
        }
    }
}
