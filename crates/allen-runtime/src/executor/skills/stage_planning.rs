//! `stage_planning`: manager-only decomposition of a task into stages.

use crate::executor::base::{base_output, extract_json_block, finish_step, llm_turn, parse_failure};
use crate::executor::{Executor, ExecutorContext};
use allen_contract::{
    AddStage, AgentState, ExecuteOutput, StageAgentState, StagePlan,
};
use async_trait::async_trait;
use serde_json::json;

const NAME: &str = "stage_planning";
const TAG: &str = "stage_planning";

#[derive(Debug)]
pub struct StagePlanningSkill;

#[async_trait]
impl Executor for StagePlanningSkill {
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

        let Some(stages) = extract_json_block::<Vec<StagePlan>>(&turn.response, TAG) else {
            return parse_failure(agent, &step, NAME, &turn.response);
        };

        finish_step(agent, step_id, json!({ "planned_stages": stages.len() }));
        let mut output = base_output(
            agent,
            &step,
            StageAgentState::Working,
            format!("stage_planning finished: {} stage(s)", stages.len()),
        );
        output.add_stage = Some(AddStage {
            task_id: step.task_id.clone(),
            stages,
        });
        output
    }
}
