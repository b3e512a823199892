//! `ExecuteOutput`: the mutations an executor hands to the synchronizer.
//!
//! Every field is independent and idempotent; the synchronizer applies them
//! in a fixed order with `send_message` always last so a recipient cannot
//! observe a stale stage.

use crate::message::Message;
use crate::state::stage::StageAgentState;
use crate::state::task::TaskExecutionState;
use crate::{AgentId, StageId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Set one agent's participation state on a stage; re-evaluates the stage
/// completion predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStageAgentState {
    pub task_id: TaskId,
    pub stage_id: StageId,
    pub agent_id: AgentId,
    pub state: StageAgentState,
}

/// Record one agent's completion summary on a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAgentCompletion {
    pub task_id: TaskId,
    pub stage_id: StageId,
    pub agent_id: AgentId,
    pub completion_summary: String,
}

/// A summary line to append to the task's shared log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedNote {
    pub task_id: TaskId,
    pub stage_id: StageId,
    pub agent_id: AgentId,
    pub role: String,
    pub content: String,
}

/// Register a new task managed by `manager_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTask {
    pub task_name: String,
    pub task_intention: String,
    pub manager_id: AgentId,
}

/// One stage of an `AddStage` plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    pub stage_intention: String,
    /// agent id → responsibility string.
    pub agent_allocation: BTreeMap<AgentId, String>,
}

/// Append fully-formed stages to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddStage {
    pub task_id: TaskId,
    pub stages: Vec<StagePlan>,
}

/// Explicit override of a task's execution state (manager early
/// termination / delivery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTaskState {
    pub task_id: TaskId,
    pub state: TaskExecutionState,
    /// Task summary recorded alongside a terminal transition.
    pub summary: Option<String>,
}

/// Replace another agent's tool or skill permission set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAgentPermissions {
    pub agent_id: AgentId,
    pub names: Vec<String>,
}

/// The full set of cross-entity mutations emitted by one executor run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_stage_agent_state: Option<UpdateStageAgentState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_stage_agent_completion: Option<StageAgentCompletion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_shared_message: Option<SharedNote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_task: Option<AddTask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_stage: Option<AddStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_task_state: Option<UpdateTaskState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_agent_tools: Option<UpdateAgentPermissions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_agent_skills: Option<UpdateAgentPermissions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_message: Option<Message>,
}

impl ExecuteOutput {
    pub fn is_empty(&self) -> bool {
        self.update_stage_agent_state.is_none()
            && self.update_stage_agent_completion.is_none()
            && self.send_shared_message.is_none()
            && self.add_task.is_none()
            && self.add_stage.is_none()
            && self.update_task_state.is_none()
            && self.update_agent_tools.is_none()
            && self.update_agent_skills.is_none()
            && self.send_message.is_none()
    }
}
