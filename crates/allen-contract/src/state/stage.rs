//! Stage state: one ordered sub-phase of a task.

use crate::config::StagePolicy;
use crate::{AgentId, StageId, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Execution state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageExecutionState {
    Init,
    Running,
    Finished,
    Failed,
}

impl StageExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageExecutionState::Finished | StageExecutionState::Failed
        )
    }
}

/// Per-agent participation state within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageAgentState {
    Idle,
    Working,
    Finished,
    Failed,
}

impl StageAgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageAgentState::Finished | StageAgentState::Failed)
    }
}

/// One sub-phase of a task, with an agent allocation and a completion
/// predicate over the participating agents' states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageState {
    pub task_id: TaskId,
    pub stage_id: StageId,
    /// Free-text stage goal, filled by the planning manager.
    pub stage_intention: String,
    /// agent id → human-readable responsibility string.
    pub agent_allocation: BTreeMap<AgentId, String>,
    pub execution_state: StageExecutionState,
    /// agent id → participation state; initialized to `idle` for every
    /// allocated agent.
    pub agent_states: BTreeMap<AgentId, StageAgentState>,
    /// agent id → completion summary submitted by that agent.
    pub completion_summary: BTreeMap<AgentId, String>,
}

impl StageState {
    pub fn new(
        task_id: impl Into<TaskId>,
        stage_intention: impl Into<String>,
        agent_allocation: BTreeMap<AgentId, String>,
    ) -> Self {
        let agent_states = agent_allocation
            .keys()
            .map(|id| (id.clone(), StageAgentState::Idle))
            .collect();
        Self {
            task_id: task_id.into(),
            stage_id: crate::gen_id(),
            stage_intention: stage_intention.into(),
            agent_allocation,
            execution_state: StageExecutionState::Init,
            agent_states,
            completion_summary: BTreeMap::new(),
        }
    }

    /// Set one agent's participation state. Unknown agents are ignored: only
    /// allocated agents participate in the completion predicate.
    pub fn update_agent_state(&mut self, agent_id: &str, state: StageAgentState) {
        if self.agent_allocation.contains_key(agent_id) {
            self.agent_states.insert(agent_id.to_string(), state);
        }
    }

    /// Record one agent's completion summary.
    pub fn update_agent_completion(&mut self, agent_id: &str, summary: impl Into<String>) {
        if self.agent_allocation.contains_key(agent_id) {
            self.completion_summary
                .insert(agent_id.to_string(), summary.into());
        }
    }

    /// Completion predicate: every allocated agent is finished or failed.
    /// An empty allocation is complete by definition.
    pub fn is_complete(&self) -> bool {
        self.agent_allocation
            .keys()
            .all(|id| self.agent_states.get(id).is_some_and(|s| s.is_terminal()))
    }

    /// Whether any allocated agent failed its stage goal.
    pub fn any_agent_failed(&self) -> bool {
        self.agent_states
            .values()
            .any(|s| *s == StageAgentState::Failed)
    }

    /// Terminal state the stage settles into once complete, given the
    /// configured failure policy.
    pub fn terminal_state(&self, policy: StagePolicy) -> StageExecutionState {
        match policy {
            StagePolicy::Strict if self.any_agent_failed() => StageExecutionState::Failed,
            _ => StageExecutionState::Finished,
        }
    }

    /// Read-only snapshot for dashboard inspection.
    pub fn snapshot(&self) -> Value {
        json!({
            "kind": "stage",
            "task_id": self.task_id,
            "stage_id": self.stage_id,
            "stage_intention": self.stage_intention,
            "agent_allocation": self.agent_allocation,
            "execution_state": self.execution_state,
            "agent_states": self.agent_states,
            "completion_summary": self.completion_summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation(ids: &[&str]) -> BTreeMap<AgentId, String> {
        ids.iter()
            .map(|id| (id.to_string(), format!("goal of {id}")))
            .collect()
    }

    #[test]
    fn new_stage_starts_idle() {
        let stage = StageState::new("t1", "collect data", allocation(&["a1", "a2"]));
        assert_eq!(stage.execution_state, StageExecutionState::Init);
        assert!(stage
            .agent_states
            .values()
            .all(|s| *s == StageAgentState::Idle));
        assert!(!stage.is_complete());
    }

    #[test]
    fn empty_allocation_is_complete_immediately() {
        let stage = StageState::new("t1", "noop", BTreeMap::new());
        assert!(stage.is_complete());
        assert_eq!(
            stage.terminal_state(StagePolicy::Strict),
            StageExecutionState::Finished
        );
    }

    #[test]
    fn completion_requires_every_allocated_agent_terminal() {
        let mut stage = StageState::new("t1", "write", allocation(&["a1", "a2"]));
        stage.update_agent_state("a1", StageAgentState::Finished);
        assert!(!stage.is_complete());
        stage.update_agent_state("a2", StageAgentState::Failed);
        assert!(stage.is_complete());
        assert_eq!(
            stage.terminal_state(StagePolicy::Strict),
            StageExecutionState::Failed
        );
        assert_eq!(
            stage.terminal_state(StagePolicy::Lenient),
            StageExecutionState::Finished
        );
    }

    #[test]
    fn unallocated_agents_are_ignored() {
        let mut stage = StageState::new("t1", "write", allocation(&["a1"]));
        stage.update_agent_state("ghost", StageAgentState::Finished);
        assert!(!stage.agent_states.contains_key("ghost"));
        stage.update_agent_completion("ghost", "done");
        assert!(stage.completion_summary.is_empty());
    }
}
