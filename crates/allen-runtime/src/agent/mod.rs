//! Agents: handles, message-receipt paths, and the per-agent action loop.
//!
//! Human and LLM agents are variants of one capability — run loop, message
//! receipt, state serialization — not a subclass hierarchy. The differences
//! live behind [`AgentDriver`]: the human variant's loop is driven by UI
//! events (step records are added retroactively), and its message receipt
//! indexes into private conversations instead of spawning a step.

pub mod human;
pub mod llm;
pub mod worker;

use allen_contract::{AgentId, AgentState, Message, StepExecutionState, StepId, StepState};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// What drives the agent: an LLM loop or a human operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentDriver {
    Llm,
    Human,
}

/// Shared handle to one agent: its state, its queue wakeup, and its driver.
#[derive(Clone)]
pub struct AgentHandle {
    pub agent_id: AgentId,
    pub name: String,
    pub driver: AgentDriver,
    pub state: Arc<Mutex<AgentState>>,
    notify: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
}

impl AgentHandle {
    pub fn new(state: AgentState, driver: AgentDriver) -> Self {
        Self {
            agent_id: state.agent_id.clone(),
            name: state.name.clone(),
            driver,
            state: Arc::new(Mutex::new(state)),
            notify: Arc::new(Notify::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Append a step to the agent's queue and wake its worker.
    pub async fn add_step(&self, step: StepState) {
        {
            let mut state = self.state.lock().await;
            state.note_working_memory(&step.task_id, &step.stage_id, &step.step_id);
            state.agent_step.add_step(step);
        }
        self.notify.notify_one();
    }

    /// Deliver a message, invoked from the dispatcher's task.
    pub async fn receive_message(&self, message: &Message) {
        match self.driver {
            AgentDriver::Llm => llm::receive_message(self, message).await,
            AgentDriver::Human => human::receive_message(self, message).await,
        }
    }

    /// Release a step parked in `awaiting`: record the correlated reply into
    /// its result and (for LLM agents) enqueue a follow-up step digesting it.
    pub async fn release_waiting(&self, step_id: &StepId, reply: &Message) {
        match self.driver {
            AgentDriver::Llm => llm::release_waiting(self, step_id, reply).await,
            AgentDriver::Human => human::release_waiting(self, step_id, reply).await,
        }
    }

    /// Id of the agent's most recent step parked in `awaiting`.
    pub async fn awaiting_step_id(&self) -> Option<StepId> {
        let state = self.state.lock().await;
        state
            .agent_step
            .steps()
            .iter()
            .rev()
            .find(|s| s.execution_state == StepExecutionState::Awaiting)
            .map(|s| s.step_id.clone())
    }

    /// Ask the worker loop to exit after the current step.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    pub(crate) fn wake(&self) {
        self.notify.notify_one();
    }

    /// Read-only state snapshot for dashboard inspection.
    pub async fn snapshot(&self) -> serde_json::Value {
        self.state.lock().await.snapshot()
    }
}

/// Name-or-id directory of live agents. Implemented by the system
/// container's registry; the synchronizer and dispatcher reach agents only
/// through this seam.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Look up a live agent by id (or unique name).
    fn handle(&self, agent_id: &str) -> Option<AgentHandle>;

    /// Look up a live agent, instantiating it from role config (or the
    /// default LLM config) when absent. Returns `None` only when
    /// instantiation is impossible.
    async fn ensure_agent(&self, agent_id: &str) -> Option<AgentHandle>;

    /// All live handles.
    fn all_handles(&self) -> Vec<AgentHandle>;
}
