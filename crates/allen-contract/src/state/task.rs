//! Task state: a user-originated unit of work carrying stages, a group of
//! agents, and a shared message log.

use crate::state::stage::{StageExecutionState, StageState};
use crate::{AgentId, StageId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;

/// Default retention window of the shared message log.
pub const DEFAULT_SHARED_LOG_RETENTION: usize = 512;

/// Execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskExecutionState {
    Init,
    Running,
    Finished,
    Failed,
}

impl TaskExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskExecutionState::Finished | TaskExecutionState::Failed
        )
    }
}

/// One entry of the task-scoped shared log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedMessage {
    pub timestamp: DateTime<Utc>,
    pub agent_id: AgentId,
    pub role: String,
    pub stage_id: StageId,
    pub content: String,
}

/// A complete task: ordered stages, participating group, shared log.
///
/// Tasks are created by a manager agent's task-creation step and never
/// destroyed; terminal tasks are retained for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: TaskId,
    /// Short human-facing name.
    pub task_name: String,
    /// Free-text task goal.
    pub task_intention: String,
    /// Agent that manages this task. Always a member of `task_group`.
    pub task_manager: AgentId,
    /// All agents participating in this task.
    pub task_group: Vec<AgentId>,
    /// Ordered stages; at most one is `running` at any instant.
    pub stages: Vec<StageState>,
    /// Append-only shared log with a bounded retention window.
    shared_log: VecDeque<SharedMessage>,
    /// Keep-last-N bound on the shared log.
    shared_log_retention: usize,
    pub execution_state: TaskExecutionState,
    pub task_summary: String,
}

impl TaskState {
    pub fn new(
        task_name: impl Into<String>,
        task_intention: impl Into<String>,
        task_manager: impl Into<AgentId>,
    ) -> Self {
        let task_manager = task_manager.into();
        Self {
            task_id: crate::gen_id(),
            task_name: task_name.into(),
            task_intention: task_intention.into(),
            task_group: vec![task_manager.clone()],
            task_manager,
            stages: Vec::new(),
            shared_log: VecDeque::new(),
            shared_log_retention: DEFAULT_SHARED_LOG_RETENTION,
            execution_state: TaskExecutionState::Init,
            task_summary: String::new(),
        }
    }

    /// Override the shared-log retention window.
    #[must_use]
    pub fn with_shared_log_retention(mut self, retention: usize) -> Self {
        self.shared_log_retention = retention.max(1);
        self
    }

    pub fn stage(&self, stage_id: &str) -> Option<&StageState> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }

    pub fn stage_mut(&mut self, stage_id: &str) -> Option<&mut StageState> {
        self.stages.iter_mut().find(|s| s.stage_id == stage_id)
    }

    /// Append a stage at the end of the plan and fold its allocation into the
    /// task group.
    pub fn add_stage(&mut self, stage: StageState) {
        debug_assert_eq!(stage.task_id, self.task_id);
        self.absorb_group(stage.agent_allocation.keys());
        self.stages.push(stage);
    }

    /// Insert a stage right after the last stage that has started (retry
    /// path); appends when no stage has started yet.
    pub fn insert_next_stage(&mut self, stage: StageState) {
        debug_assert_eq!(stage.task_id, self.task_id);
        self.absorb_group(stage.agent_allocation.keys());
        let insert_at = self
            .stages
            .iter()
            .rposition(|s| s.execution_state != StageExecutionState::Init)
            .map(|i| i + 1);
        match insert_at {
            Some(i) => self.stages.insert(i, stage),
            None => self.stages.push(stage),
        }
    }

    fn absorb_group<'a>(&mut self, agent_ids: impl Iterator<Item = &'a AgentId>) {
        for id in agent_ids {
            if !self.task_group.contains(id) {
                self.task_group.push(id.clone());
            }
        }
    }

    /// Add agents to the task group (idempotent).
    pub fn add_group_members(&mut self, agent_ids: &[AgentId]) {
        self.absorb_group(agent_ids.iter());
    }

    /// The stage currently running, if any.
    pub fn running_stage(&self) -> Option<&StageState> {
        self.stages
            .iter()
            .find(|s| s.execution_state == StageExecutionState::Running)
    }

    /// The stage that should run next: the running stage if one exists,
    /// otherwise the first `init` stage after the last terminal one.
    pub fn current_or_next_stage(&self) -> Option<&StageState> {
        if let Some(stage) = self.running_stage() {
            return Some(stage);
        }
        let next_index = self
            .stages
            .iter()
            .rposition(|s| s.execution_state.is_terminal())
            .map_or(0, |i| i + 1);
        self.stages
            .get(next_index)
            .filter(|s| s.execution_state == StageExecutionState::Init)
    }

    /// Task completion predicate: every stage terminal and the last one
    /// finished. A task with zero stages is complete by definition.
    pub fn all_stages_settled(&self) -> bool {
        self.stages.iter().all(|s| s.execution_state.is_terminal())
    }

    /// Append to the shared log, evicting beyond the retention window.
    pub fn add_shared_message(
        &mut self,
        agent_id: impl Into<AgentId>,
        role: impl Into<String>,
        stage_id: impl Into<StageId>,
        content: impl Into<String>,
    ) {
        self.shared_log.push_back(SharedMessage {
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            role: role.into(),
            stage_id: stage_id.into(),
            content: content.into(),
        });
        while self.shared_log.len() > self.shared_log_retention {
            self.shared_log.pop_front();
        }
    }

    /// Most recent `limit` shared-log entries, oldest first.
    pub fn shared_context(&self, limit: usize) -> Vec<&SharedMessage> {
        let skip = self.shared_log.len().saturating_sub(limit);
        self.shared_log.iter().skip(skip).collect()
    }

    pub fn shared_log_len(&self) -> usize {
        self.shared_log.len()
    }

    /// Read-only snapshot for dashboard inspection. The shared log is
    /// materialized as a list per the placeholder rules.
    pub fn snapshot(&self) -> Value {
        json!({
            "kind": "task",
            "task_id": self.task_id,
            "task_name": self.task_name,
            "task_intention": self.task_intention,
            "task_manager": self.task_manager,
            "task_group": self.task_group,
            "stages": self.stages.iter().map(|s| s.stage_id.clone()).collect::<Vec<_>>(),
            "shared_log": self.shared_log,
            "execution_state": self.execution_state,
            "task_summary": self.task_summary,
        })
    }
}
