//! Executor contract and implementations.
//!
//! An executor is the implementation behind one `(step kind, name)` pair. It
//! runs under the owning agent's lock, mutates the agent's state (step
//! result, persistent memory, dialogue), and emits an `ExecuteOutput` whose
//! application is the synchronizer's job. Executors never raise past their
//! boundary: every failure is materialized into the step.

pub mod base;
pub mod skills;
pub mod tool;

use crate::llm::LlmClient;
use allen_contract::{AgentState, ExecuteOutput, SkillConfig};
use allen_mcp::ToolClient;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared handles an executor may use. Built per agent: `llm` is present for
/// LLM-driven agents only.
#[derive(Clone)]
pub struct ExecutorContext {
    /// The agent's LLM client (skill executors).
    pub llm: Option<LlmClient>,
    /// Process-wide tool client (tool executors, permission summaries).
    pub tools: Arc<ToolClient>,
    /// Skill name → prompt contract.
    pub skill_configs: Arc<HashMap<String, SkillConfig>>,
    /// Tool-server name → one-line usage description.
    pub tool_guides: Arc<HashMap<String, String>>,
    /// Global system prompt, first section of every skill prompt.
    pub system_prompt: Arc<str>,
}

/// The single operation every skill and tool implements.
///
/// Contract: transition the step to `running` at entry; on exit set it to
/// `finished` or `failed` and populate `execute_result`; append any
/// self-authored persistent-memory fragment; fill
/// `execute_output.update_stage_agent_state` and `send_shared_message`.
#[async_trait]
pub trait Executor: Send + Sync + std::fmt::Debug {
    async fn execute(
        &self,
        step_id: &str,
        agent: &mut AgentState,
        cx: &ExecutorContext,
    ) -> ExecuteOutput;
}
