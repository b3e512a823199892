//! Human-agent message paths.
//!
//! A human agent's loop is driven by operator actions through the system
//! container; incoming messages surface in private conversations and create
//! no step. Step records are added retroactively when the operator acts.

use crate::agent::AgentHandle;
use allen_contract::{
    ExecuteResult, Message, PrivateMessage, StepExecutionState, StepId, WorkingState,
};
use chrono::Utc;
use serde_json::json;
use tracing::debug;

/// Deliver a message to a human agent: append it to the private conversation
/// with the sender and leave the step queue untouched.
pub(crate) async fn receive_message(handle: &AgentHandle, message: &Message) {
    let mut state = handle.state.lock().await;
    state
        .conversation_privates
        .entry(message.sender_id.clone())
        .or_default()
        .push(PrivateMessage {
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            stage_relative: message.stage_relative.clone(),
            timestamp: Utc::now(),
            need_reply: message.need_reply,
            waiting: message.waiting,
            return_waiting_id: message.waiting_id.clone(),
        });
    debug!(
        agent_id = %handle.agent_id,
        sender = %message.sender_id,
        "private message recorded for operator"
    );
}

/// Release a human agent's retroactive awaiting step: record the reply into
/// the step and surface it in the private conversation. No step is created.
pub(crate) async fn release_waiting(handle: &AgentHandle, step_id: &StepId, reply: &Message) {
    let mut state = handle.state.lock().await;
    if let Some(step) = state.agent_step.step_mut(step_id) {
        if step.execution_state != StepExecutionState::Awaiting {
            return;
        }
        step.execute_result = Some(ExecuteResult::success(json!({
            "reply": reply.content,
            "from": reply.sender_id,
        })));
        step.execution_state = StepExecutionState::Finished;
    }
    state.working_state = WorkingState::Idle;
    state
        .conversation_privates
        .entry(reply.sender_id.clone())
        .or_default()
        .push(PrivateMessage {
            sender_id: reply.sender_id.clone(),
            content: reply.content.clone(),
            stage_relative: reply.stage_relative.clone(),
            timestamp: Utc::now(),
            need_reply: false,
            waiting: false,
            return_waiting_id: reply.return_waiting_id.clone(),
        });
}
