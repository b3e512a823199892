//! LLM-agent message paths.

use crate::agent::AgentHandle;
use allen_contract::{
    ExecuteResult, Message, StepExecutionState, StepId, StepKind, StepState, WorkingState,
};
use serde_json::json;
use tracing::debug;

/// Deliver a message to an LLM agent: atomically append a `reply_message`
/// step (or `process_message` when no reply is owed) with the incoming
/// message embedded as context.
pub(crate) async fn receive_message(handle: &AgentHandle, message: &Message) {
    let executor = if message.need_reply {
        "reply_message"
    } else {
        "process_message"
    };

    let mut step = StepState::new(
        message.task_id.clone(),
        message.stage_relative.clone(),
        handle.agent_id.clone(),
        format!("handle a message from {}", message.sender_id),
        StepKind::Skill,
        executor,
    )
    .with_text_content(format!(
        "Incoming message from agent {}:\n{}",
        message.sender_id, message.content
    ));
    step.instruction_content = serde_json::to_value(message).ok();

    debug!(
        agent_id = %handle.agent_id,
        sender = %message.sender_id,
        executor,
        "message received; step enqueued"
    );
    handle.add_step(step).await;
}

/// Release an awaiting step with the correlated reply: finish it with the
/// reply recorded, then enqueue a `process_message` follow-up carrying the
/// reply so the agent digests it in order.
pub(crate) async fn release_waiting(handle: &AgentHandle, step_id: &StepId, reply: &Message) {
    let follow_up = {
        let mut state = handle.state.lock().await;
        let Some(step) = state.agent_step.step_mut(step_id) else {
            return;
        };
        if step.execution_state != StepExecutionState::Awaiting {
            return;
        }
        step.execute_result = Some(ExecuteResult::success(json!({
            "reply": reply.content,
            "from": reply.sender_id,
        })));
        step.execution_state = StepExecutionState::Finished;
        let (task_id, stage_id) = (step.task_id.clone(), step.stage_id.clone());
        state.working_state = WorkingState::Working;

        let mut follow_up = StepState::new(
            task_id,
            stage_id,
            handle.agent_id.clone(),
            format!("digest the reply from {}", reply.sender_id),
            StepKind::Skill,
            "process_message",
        )
        .with_text_content(format!(
            "Reply from agent {}:\n{}",
            reply.sender_id, reply.content
        ));
        follow_up.instruction_content = serde_json::to_value(reply).ok();
        state.note_working_memory(
            &follow_up.task_id,
            &follow_up.stage_id,
            &follow_up.step_id,
        );
        state.agent_step.add_step(follow_up.clone());
        follow_up
    };
    debug!(
        agent_id = %handle.agent_id,
        step_id = %follow_up.step_id,
        "waiting released; follow-up step enqueued"
    );
    handle.wake();
}
