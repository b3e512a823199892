//! `quick_think`: one-shot text generation without historical step context.

use crate::executor::base::{base_output, finish_step, llm_turn, parse_failure, extract_block};
use crate::executor::{Executor, ExecutorContext};
use allen_contract::{AgentState, ExecuteOutput, StageAgentState};
use async_trait::async_trait;
use serde_json::json;

const NAME: &str = "quick_think";
const TAG: &str = "quick_think";

#[derive(Debug)]
pub struct QuickThinkSkill;

#[async_trait]
impl Executor for QuickThinkSkill {
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
            Some(text) => {
                finish_step(agent, step_id, json!({ "text": text }));
                base_output(
                    agent,
                    &step,
                    StageAgentState::Working,
                    format!("quick_think finished: {}", step.step_intention),
                )
            }
        }
    }
}
