//! `reflection`: review the stage's executed steps against the stage goal
//! and adjust the plan.
//!
//! The prompt carries the full step history of the stage (executed and still
//! queued). When the goal is not yet met the skill appends corrective steps;
//! when it is, it appends the closing `summary` step. An empty adjustment is
//! treated as a parse failure, matching the planning contract.

use super::planning::{append_planned_steps, permitted, PlannedStep};
use crate::executor::base::{
    base_output, extract_json_block, finish_step, history_steps_section, llm_turn_with_history,
    parse_failure,
};
use crate::executor::{Executor, ExecutorContext};
use allen_contract::{AgentState, ExecuteOutput, StageAgentState};
use async_trait::async_trait;
use serde_json::json;

const NAME: &str = "reflection";
const TAG: &str = "reflection_step";

#[derive(Debug)]
pub struct ReflectionSkill;

#[async_trait]
impl Executor for ReflectionSkill {
    async fn execute(
        &self,
        step_id: &str,
        agent: &mut AgentState,
        cx: &ExecutorContext,
    ) -> ExecuteOutput {
        let stage_id = agent
            .agent_step
            .step(step_id)
            .map(|step| step.stage_id.clone());
        let history =
            stage_id.map(|stage_id| history_steps_section(agent, &stage_id, step_id));

        let turn = match llm_turn_with_history(cx, agent, step_id, NAME, history).await {
            Ok(turn) => turn,
            Err(output) => return output,
        };
        let Some(step) = agent.agent_step.step(step_id).cloned() else {
            return ExecuteOutput::default();
        };

        let Some(planned) = extract_json_block::<Vec<PlannedStep>>(&turn.response, TAG) else {
            return parse_failure(agent, &step, NAME, &turn.response);
        };
        let planned = permitted(agent, planned);
        if planned.is_empty() {
            return parse_failure(agent, &step, NAME, &turn.response);
        }

        let added = append_planned_steps(agent, &step, planned);

        finish_step(agent, step_id, json!({ "reflection_steps": added }));
        base_output(
            agent,
            &step,
            StageAgentState::Working,
            format!("reflection finished: {added} step(s) queued"),
        )
    }
}
