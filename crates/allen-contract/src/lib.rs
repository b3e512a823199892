//! Core data model and contracts for the Allen multi-agent runtime.
//!
//! This crate carries the four-level state model (Task → Stage → Step plus
//! per-agent state), the inter-agent message format, the `ExecuteOutput`
//! emitted by executors, the executor contract itself, config types, and the
//! error kinds shared across the runtime. It holds no runtime machinery: the
//! synchronizer, dispatcher, and agent loops live in `allen-runtime`.

pub mod config;
pub mod error;
pub mod message;
pub mod output;
pub mod state;

pub use config::{
    ApiType, HumanConfig, LlmConfig, McpServerSpec, McpServersBlock, RoleConfig, SkillConfig,
    SkillUseGuide, SkillUsePrompt, StagePolicy, ToolServerConfig, ToolUseGuide,
};
pub use error::{ConfigError, ErrorKind};
pub use message::{Message, NO_RELATIVE, NO_STAGE, NO_TASK, TASK_ENDED};
pub use output::{
    AddStage, AddTask, ExecuteOutput, SharedNote, StageAgentCompletion, StagePlan,
    UpdateAgentPermissions, UpdateStageAgentState, UpdateTaskState,
};
pub use state::agent::{
    AgentState, ChatRole, ChatTurn, DialogueContext, PrivateMessage, WorkingState,
};
pub use state::stage::{StageAgentState, StageExecutionState, StageState};
pub use state::step::{
    AgentStep, ExecuteResult, StepExecutionState, StepKind, StepQuery, StepState,
};
pub use state::task::{SharedMessage, TaskExecutionState, TaskState};

/// Agent identifier (uuid v4 string, or an operator-supplied id for humans).
pub type AgentId = String;
/// Task identifier (uuid v4 string).
pub type TaskId = String;
/// Stage identifier (uuid v4 string).
pub type StageId = String;
/// Step identifier (uuid v4 string).
pub type StepId = String;
/// Correlation id for a waiting message send.
pub type WaitingId = String;

/// Generate a fresh uuid-v4 id string.
pub fn gen_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
