//! `send_message`: compose and emit a message to other agents.
//!
//! A waiting send parks the emitting step in `awaiting` (the dispatcher
//! registers the correlation and later releases it); a plain send finishes
//! immediately.

use crate::executor::base::{base_output, extract_json_block, finish_step, llm_turn, parse_failure};
use crate::executor::{Executor, ExecutorContext};
use allen_contract::{
    gen_id, AgentState, ExecuteOutput, Message, StageAgentState, StepExecutionState, WorkingState,
    NO_RELATIVE,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const NAME: &str = "send_message";
const TAG: &str = "send_message";

#[derive(Debug, Deserialize)]
struct ComposedMessage {
    receivers: Vec<String>,
    message: String,
    #[serde(default)]
    stage_relative: Option<String>,
    #[serde(default)]
    need_reply: bool,
    #[serde(default)]
    waiting: bool,
}

#[derive(Debug)]
pub struct SendMessageSkill;

#[async_trait]
impl Executor for SendMessageSkill {
    async fn execute(
        &self,
        step_id: &str,
        agent: &mut AgentState,
        cx: &ExecutorContext,
    ) -> ExecuteOutput {
        let turn = match llm_turn(cx, agent, step_id, NAME).await {
            Ok(turn) => turn,
            Err(output) => return output,
        };
        let Some(step) = agent.agent_step.step(step_id).cloned() else {
            return ExecuteOutput::default();
        };

        let Some(composed) = extract_json_block::<ComposedMessage>(&turn.response, TAG) else {
            return parse_failure(agent, &step, NAME, &turn.response);
        };

        let mut message = Message::new(
            step.task_id.clone(),
            agent.agent_id.clone(),
            composed.receivers,
            composed.message.clone(),
        )
        .with_stage(
            composed
                .stage_relative
                .unwrap_or_else(|| step.stage_id.clone()),
        );
        if message.stage_relative.is_empty() {
            message.stage_relative = NO_RELATIVE.to_string();
        }
        if composed.need_reply {
            message = message.with_need_reply();
        }

        let mut output;
        if composed.waiting {
            // Park the emitting step; the dispatcher owns the release.
            message = message.with_waiting(gen_id());
            if let Some(own) = agent.agent_step.step_mut(step_id) {
                own.execution_state = StepExecutionState::Awaiting;
            }
            agent.working_state = WorkingState::Awaiting;
            output = base_output(
                agent,
                &step,
                StageAgentState::Working,
                "send_message: waiting for a reply",
            );
        } else {
            finish_step(agent, step_id, json!({ "sent": composed.message }));
            output = base_output(agent, &step, StageAgentState::Working, "send_message finished");
        }
        output.send_message = Some(message);
        output
    }
}
