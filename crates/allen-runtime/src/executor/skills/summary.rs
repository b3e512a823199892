//! `summary`: summarize the agent's stage work and flip its participation
//! state to `finished`, recording the completion summary on the stage.

use crate::executor::base::{
    base_output, extract_block, finish_step, llm_turn, parse_failure,
};
use crate::executor::{Executor, ExecutorContext};
use allen_contract::{
    AgentState, ExecuteOutput, StageAgentCompletion, StageAgentState,
};
use async_trait::async_trait;
use serde_json::json;

const NAME: &str = "summary";
const TAG: &str = "stage_summary";

#[derive(Debug)]
pub struct SummarySkill;

#[async_trait]
impl Executor for SummarySkill {
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
            Some(summary) => {
                finish_step(agent, step_id, json!({ "summary": summary }));
                let mut output = base_output(
                    agent,
                    &step,
                    StageAgentState::Finished,
                    format!("stage goal finished: {summary}"),
                );
                output.update_stage_agent_completion = Some(StageAgentCompletion {
                    task_id: step.task_id.clone(),
                    stage_id: step.stage_id.clone(),
                    agent_id: agent.agent_id.clone(),
                    completion_summary: summary,
                });
                output
            }
        }
    }
}
