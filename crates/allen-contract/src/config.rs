//! Configuration types: role configs for LLM and human agents, skill
//! configs, and tool-server startup specs.
//!
//! The concrete config front end (directory layout, YAML rendering) is a
//! plug-in concern; this module defines the serde shapes and a JSON loader.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Supported LLM API flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    Openai,
    Ollama,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

fn default_timeout_secs() -> u64 {
    600
}

/// Per-agent LLM configuration block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_type: ApiType,
    #[serde(default)]
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Per-call timeout in seconds; expiry fails the step with
    /// `executor/llm-timeout`.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
}

/// Operator account block for human-driven agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanConfig {
    /// May be empty on first use; the generated id is persisted back.
    #[serde(default)]
    pub agent_id: String,
    pub password: String,
    #[serde(default)]
    pub level: u32,
}

/// One role config file: identity, permissions, and the driving config
/// (LLM or human).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_config: Option<LlmConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_config: Option<HumanConfig>,
}

impl RoleConfig {
    /// Load a single role config from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Write the role config back (used to persist a generated human agent
    /// id on first bind).
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let raw = serde_json::to_string_pretty(self).expect("role config is serializable");
        std::fs::write(path, raw).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Load every `*.json` role config in a directory. Requires a distinguished
/// config named `manager`; rejects duplicate names and driverless roles.
pub fn load_role_dir(dir: impl AsRef<Path>) -> Result<Vec<RoleConfig>, ConfigError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut roles: Vec<RoleConfig> = Vec::new();
    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    for path in paths {
        let role = RoleConfig::from_path(&path)?;
        if roles.iter().any(|r| r.name == role.name) {
            return Err(ConfigError::DuplicateRole(role.name));
        }
        if role.llm_config.is_none() && role.human_config.is_none() {
            return Err(ConfigError::MissingDriver(role.name));
        }
        roles.push(role);
    }

    if !roles.iter().any(|r| r.name == "manager") {
        return Err(ConfigError::MissingManager(dir.display().to_string()));
    }
    Ok(roles)
}

/// Startup spec for one tool-server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
}

/// One tool-server config file: usage guide plus process spec(s).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub use_guide: ToolUseGuide,
    pub config: McpServersBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUseGuide {
    pub tool_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServersBlock {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, McpServerSpec>,
}

/// One skill config file: usage guide plus the prompt contract.
///
/// `return_format` must name the delimiters the executor extracts, e.g.
/// `<planned_step>…</planned_step>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillConfig {
    pub use_guide: SkillUseGuide,
    pub use_prompt: SkillUsePrompt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillUseGuide {
    pub skill_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillUsePrompt {
    pub skill_prompt: String,
    pub return_format: String,
}

/// Failed-stage policy: strict fails the stage as soon as any participating
/// agent fails; lenient finishes the stage regardless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePolicy {
    #[default]
    Strict,
    Lenient,
}
