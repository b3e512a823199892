//! Step state and the per-agent step container.
//!
//! A step is the smallest unit of agent execution: exactly one skill
//! invocation or one tool invocation. Completed steps are retained in the
//! agent's historical list for inspection; only pending work sits in the todo
//! view.

use crate::error::ErrorKind;
use crate::{AgentId, StageId, StepId, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;

/// Step flavor: LLM-driven skill or external tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Skill,
    Tool,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Skill => f.write_str("skill"),
            StepKind::Tool => f.write_str("tool"),
        }
    }
}

/// Execution state of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecutionState {
    /// Created, ready to run.
    Init,
    /// Awaiting instruction fill from a prior step (tool steps only).
    Pending,
    /// Executor is running.
    Running,
    /// Parked by the dispatcher until a correlated reply arrives.
    Awaiting,
    /// Completed successfully.
    Finished,
    /// Completed with a materialized error.
    Failed,
}

impl StepExecutionState {
    /// Whether the step has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepExecutionState::Finished | StepExecutionState::Failed)
    }
}

/// Structured outcome of a step execution.
///
/// Present exactly when the step is finished or failed. On failure the raw
/// upstream response is preserved in `data` and `error_kind` names the
/// failure class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    /// Parsed result on success; raw upstream response on failure.
    pub data: Value,
    /// Set when the step failed.
    pub error_kind: Option<ErrorKind>,
}

impl ExecuteResult {
    pub fn success(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            error_kind: None,
        }
    }

    pub fn failure(kind: ErrorKind, raw: impl Into<Value>) -> Self {
        Self {
            data: raw.into(),
            error_kind: Some(kind),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error_kind.is_some()
    }
}

/// A single execution step of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub task_id: TaskId,
    pub stage_id: StageId,
    pub agent_id: AgentId,
    pub step_id: StepId,
    /// Short free-text intent, filled by the creating step.
    pub step_intention: String,
    pub kind: StepKind,
    /// Skill or tool-server name resolved through the router.
    pub executor: String,
    pub execution_state: StepExecutionState,
    /// Request prompt body for skill steps.
    pub text_content: String,
    /// Structured invocation payload for tool steps, produced by
    /// `instruction_generation`. A tool step may not run until this is set.
    pub instruction_content: Option<Value>,
    /// Outcome; non-empty iff the step is finished or failed.
    pub execute_result: Option<ExecuteResult>,
}

impl StepState {
    pub fn new(
        task_id: impl Into<TaskId>,
        stage_id: impl Into<StageId>,
        agent_id: impl Into<AgentId>,
        step_intention: impl Into<String>,
        kind: StepKind,
        executor: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            stage_id: stage_id.into(),
            agent_id: agent_id.into(),
            step_id: crate::gen_id(),
            step_intention: step_intention.into(),
            kind,
            executor: executor.into(),
            execution_state: StepExecutionState::Init,
            text_content: String::new(),
            instruction_content: None,
            execute_result: None,
        }
    }

    /// Set the request prompt body.
    #[must_use]
    pub fn with_text_content(mut self, text: impl Into<String>) -> Self {
        self.text_content = text.into();
        self
    }

    /// Create the step in `pending` state (tool steps awaiting instruction
    /// fill).
    #[must_use]
    pub fn pending(mut self) -> Self {
        self.execution_state = StepExecutionState::Pending;
        self
    }

    /// Fill the structured invocation payload and release a pending step back
    /// to `init`.
    pub fn fill_instruction(&mut self, instruction: Value) {
        self.instruction_content = Some(instruction);
        if self.execution_state == StepExecutionState::Pending {
            self.execution_state = StepExecutionState::Init;
        }
    }

    /// Read-only snapshot for dashboard inspection.
    pub fn snapshot(&self) -> Value {
        json!({
            "kind": "step",
            "task_id": self.task_id,
            "stage_id": self.stage_id,
            "agent_id": self.agent_id,
            "step_id": self.step_id,
            "step_intention": self.step_intention,
            "type": self.kind,
            "executor": self.executor,
            "execution_state": self.execution_state,
            "text_content": self.text_content,
            "instruction_content": self.instruction_content,
            "execute_result": self.execute_result,
        })
    }
}

/// Lookup filter for [`AgentStep::query`]. Any subset of the three ids may be
/// set; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct StepQuery {
    pub step_id: Option<StepId>,
    pub stage_id: Option<StageId>,
    pub task_id: Option<TaskId>,
}

impl StepQuery {
    fn matches(&self, step: &StepState) -> bool {
        self.step_id.as_ref().map_or(true, |id| *id == step.step_id)
            && self.stage_id.as_ref().map_or(true, |id| *id == step.stage_id)
            && self.task_id.as_ref().map_or(true, |id| *id == step.task_id)
    }
}

/// Per-agent step container: the full historical step list plus a FIFO todo
/// view of step ids awaiting execution.
///
/// The live queue an agent loop blocks on is the channel owned by its handle;
/// the `todo` deque here mirrors that channel so inspection snapshots can
/// materialize it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub agent_id: AgentId,
    todo: VecDeque<StepId>,
    steps: Vec<StepState>,
}

impl AgentStep {
    pub fn new(agent_id: impl Into<AgentId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            todo: VecDeque::new(),
            steps: Vec::new(),
        }
    }

    /// Append a step to the list; unless it is already past `init`, enqueue
    /// its id in the todo view. Returns whether the step was enqueued.
    pub fn add_step(&mut self, step: StepState) -> bool {
        let enqueue = matches!(
            step.execution_state,
            StepExecutionState::Init | StepExecutionState::Pending
        );
        if enqueue {
            self.todo.push_back(step.step_id.clone());
        }
        self.steps.push(step);
        enqueue
    }

    /// Pop the next todo step id, mirroring a dequeue from the live channel.
    pub fn pop_todo(&mut self) -> Option<StepId> {
        self.todo.pop_front()
    }

    /// Re-enqueue a step id (waiting release path).
    pub fn push_todo(&mut self, step_id: StepId) {
        self.todo.push_back(step_id);
    }

    pub fn todo_len(&self) -> usize {
        self.todo.len()
    }

    /// Materialized todo view for inspection.
    pub fn todo_ids(&self) -> Vec<StepId> {
        self.todo.iter().cloned().collect()
    }

    pub fn step(&self, step_id: &str) -> Option<&StepState> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut StepState> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    /// All steps matching the query, in creation order.
    pub fn query(&self, query: &StepQuery) -> Vec<&StepState> {
        self.steps.iter().filter(|s| query.matches(s)).collect()
    }

    /// Most recently created step, if any.
    pub fn last_step(&self) -> Option<&StepState> {
        self.steps.last()
    }

    pub fn steps(&self) -> &[StepState] {
        &self.steps
    }

    /// Mutate a single step's execution state in place.
    pub fn update_step_status(&mut self, step_id: &str, state: StepExecutionState) {
        if let Some(step) = self.step_mut(step_id) {
            step.execution_state = state;
        }
    }

    /// Drop all steps scoped to a stage (stage teardown). Terminal steps are
    /// kept for history.
    pub fn remove_stage_steps(&mut self, stage_id: &str) {
        self.todo.retain(|id| {
            self.steps
                .iter()
                .find(|s| s.step_id == *id)
                .map_or(true, |s| s.stage_id != stage_id)
        });
        self.steps
            .retain(|s| s.stage_id != stage_id || s.execution_state.is_terminal());
    }
}
