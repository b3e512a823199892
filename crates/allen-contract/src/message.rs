//! Inter-agent message format.
//!
//! Every cross-agent communication in the system travels as a [`Message`]
//! through the dispatcher. Messages are routed by receiver id; replies are
//! correlated with their sender's parked step through `waiting_id` /
//! `return_waiting_id`.

use crate::{AgentId, StageId, TaskId, WaitingId};
use serde::{Deserialize, Serialize};

/// Sentinel `stage_relative` value for messages not tied to any stage.
pub const NO_RELATIVE: &str = "no_relative";

/// Sentinel task id for steps that run before any task exists (bootstrap
/// task-creation steps).
pub const NO_TASK: &str = "no_task";

/// Sentinel stage id for steps not scoped to a stage.
pub const NO_STAGE: &str = "no_stage";

/// Content of the synthetic reply delivered when a task terminates while a
/// sender is still waiting.
pub const TASK_ENDED: &str = "task-ended";

/// A routed inter-agent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Task this message belongs to.
    pub task_id: TaskId,
    /// Sending agent.
    pub sender_id: AgentId,
    /// Receiving agents. Group messages list several receivers but share one
    /// `waiting_id`.
    pub receivers: Vec<AgentId>,
    /// Message body.
    pub content: String,
    /// Stage id this message is scoped to, or [`NO_RELATIVE`].
    pub stage_relative: StageId,
    /// Whether the receiver owes a reply.
    pub need_reply: bool,
    /// Whether the sender blocks until a correlated reply arrives.
    pub waiting: bool,
    /// Correlation id registered by the dispatcher when `waiting` is set.
    pub waiting_id: Option<WaitingId>,
    /// Echo of a prior `waiting_id` when this message is itself a reply.
    pub return_waiting_id: Option<WaitingId>,
}

impl Message {
    /// Plain non-blocking message.
    pub fn new(
        task_id: impl Into<TaskId>,
        sender_id: impl Into<AgentId>,
        receivers: Vec<AgentId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            sender_id: sender_id.into(),
            receivers,
            content: content.into(),
            stage_relative: NO_RELATIVE.to_string(),
            need_reply: false,
            waiting: false,
            waiting_id: None,
            return_waiting_id: None,
        }
    }

    /// Scope the message to a stage.
    #[must_use]
    pub fn with_stage(mut self, stage_id: impl Into<StageId>) -> Self {
        self.stage_relative = stage_id.into();
        self
    }

    /// Mark the message as requiring a reply.
    #[must_use]
    pub fn with_need_reply(mut self) -> Self {
        self.need_reply = true;
        self
    }

    /// Block the sender until the reply correlated by `waiting_id` arrives.
    /// Implies `need_reply`.
    #[must_use]
    pub fn with_waiting(mut self, waiting_id: impl Into<WaitingId>) -> Self {
        self.need_reply = true;
        self.waiting = true;
        self.waiting_id = Some(waiting_id.into());
        self
    }

    /// Mark the message as a reply correlated to `return_waiting_id`.
    #[must_use]
    pub fn with_return_waiting_id(mut self, id: impl Into<WaitingId>) -> Self {
        self.return_waiting_id = Some(id.into());
        self
    }

    /// Whether this message is scoped to a stage.
    pub fn is_stage_relative(&self) -> bool {
        self.stage_relative != NO_RELATIVE
    }
}
