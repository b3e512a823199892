//! `process_message`: digest an incoming message that needs no reply.

use crate::executor::base::{base_output, extract_block, finish_step, llm_turn, parse_failure};
use crate::executor::{Executor, ExecutorContext};
use allen_contract::{AgentState, ExecuteOutput, StageAgentState};
use async_trait::async_trait;
use serde_json::json;

const NAME: &str = "process_message";
const TAG: &str = "process_message";

#[derive(Debug)]
pub struct ProcessMessageSkill;

#[async_trait]
impl Executor for ProcessMessageSkill {
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

        match extract_block(&turn.response, TAG) {
            None => parse_failure(agent, &step, NAME, &turn.response),
            Some(digest) => {
                finish_step(agent, step_id, json!({ "digest": digest }));
                base_output(
                    agent,
                    &step,
                    StageAgentState::Working,
                    "process_message finished",
                )
            }
        }
    }
}
