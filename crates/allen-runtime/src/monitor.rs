//! Read-only state accessors backing the external dashboard.
//!
//! Non-serializable runtime fields are rendered as placeholders by the
//! snapshot methods of each state type: a queue by its current size, a deque
//! by its materialized list, a lock by its held/free status.

use crate::agent::AgentDirectory;
use crate::sync::SyncState;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// The four inspectable state kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Task,
    Stage,
    Agent,
    Step,
}

impl StateKind {
    /// Parse the dashboard's `?type=` parameter.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "task" => Some(StateKind::Task),
            "stage" => Some(StateKind::Stage),
            "agent" => Some(StateKind::Agent),
            "step" => Some(StateKind::Step),
            _ => None,
        }
    }
}

/// Snapshot provider over the synchronizer's tasks and the agent directory.
#[derive(Clone)]
pub struct StateMonitor {
    sync: Arc<SyncState>,
    directory: Arc<dyn AgentDirectory>,
}

impl StateMonitor {
    pub fn new(sync: Arc<SyncState>, directory: Arc<dyn AgentDirectory>) -> Self {
        Self { sync, directory }
    }

    /// All states of one kind: `{state_id: snapshot}`.
    pub async fn states_of(&self, kind: StateKind) -> Value {
        let mut out = Map::new();
        match kind {
            StateKind::Task => {
                for task_arc in self.sync.all_tasks() {
                    let task = match task_arc.try_lock() {
                        Ok(task) => task,
                        Err(_) => continue,
                    };
                    out.insert(task.task_id.clone(), task.snapshot());
                }
            }
            StateKind::Stage => {
                for task_arc in self.sync.all_tasks() {
                    let Ok(task) = task_arc.try_lock() else {
                        continue;
                    };
                    for stage in &task.stages {
                        out.insert(stage.stage_id.clone(), stage.snapshot());
                    }
                }
            }
            StateKind::Agent => {
                for handle in self.directory.all_handles() {
                    let snapshot = match handle.state.try_lock() {
                        Ok(state) => state.snapshot(),
                        // The lock placeholder: executor currently holds it.
                        Err(_) => json!({
                            "kind": "agent",
                            "agent_id": handle.agent_id,
                            "name": handle.name,
                            "state_lock": "held",
                        }),
                    };
                    out.insert(handle.agent_id.clone(), snapshot);
                }
            }
            StateKind::Step => {
                for handle in self.directory.all_handles() {
                    let Ok(state) = handle.state.try_lock() else {
                        continue;
                    };
                    for step in state.agent_step.steps() {
                        out.insert(step.step_id.clone(), step.snapshot());
                    }
                }
            }
        }
        Value::Object(out)
    }

    /// Single state detail by id, searching every kind.
    pub async fn state(&self, id: &str) -> Option<Value> {
        for kind in [
            StateKind::Task,
            StateKind::Stage,
            StateKind::Agent,
            StateKind::Step,
        ] {
            if let Value::Object(map) = self.states_of(kind).await {
                if let Some(found) = map.get(id) {
                    return Some(found.clone());
                }
            }
        }
        None
    }

    /// Full serializable view of all four kinds (offline-save hook).
    pub async fn export_states(&self) -> Value {
        json!({
            "tasks": self.states_of(StateKind::Task).await,
            "stages": self.states_of(StateKind::Stage).await,
            "agents": self.states_of(StateKind::Agent).await,
            "steps": self.states_of(StateKind::Step).await,
        })
    }
}
