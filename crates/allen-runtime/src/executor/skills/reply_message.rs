//! `reply_message`: digest an incoming message and reply to its sender,
//! echoing the sender's `waiting_id` so a blocked sender is released.
//!
//! The incoming message is embedded as JSON in the step's
//! `instruction_content` by the receive path.

use crate::executor::base::{base_output, extract_block, finish_step, llm_turn, parse_failure};
use crate::executor::{Executor, ExecutorContext};
use allen_contract::{AgentState, ExecuteOutput, Message, StageAgentState};
use async_trait::async_trait;
use serde_json::json;

const NAME: &str = "reply_message";
const TAG: &str = "reply_message";

#[derive(Debug)]
pub struct ReplyMessageSkill;

#[async_trait]
impl Executor for ReplyMessageSkill {
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

        let incoming: Option<Message> = step
            .instruction_content
            .clone()
            .and_then(|v| serde_json::from_value(v).ok());
        let Some(incoming) = incoming else {
            return parse_failure(agent, &step, NAME, "step carries no embedded message");
        };

        match extract_block(&turn.response, TAG) {
            None => parse_failure(agent, &step, NAME, &turn.response),
            Some(reply_text) => {
                let mut reply = Message::new(
                    incoming.task_id.clone(),
                    agent.agent_id.clone(),
                    vec![incoming.sender_id.clone()],
                    reply_text.clone(),
                )
                .with_stage(incoming.stage_relative.clone());
                if let Some(waiting_id) = &incoming.waiting_id {
                    reply = reply.with_return_waiting_id(waiting_id.clone());
                }

                finish_step(agent, step_id, json!({ "reply": reply_text }));
                let mut output = base_output(
                    agent,
                    &step,
                    StageAgentState::Working,
                    format!("replied to {}", incoming.sender_id),
                );
                output.send_message = Some(reply);
                output
            }
        }
    }
}
