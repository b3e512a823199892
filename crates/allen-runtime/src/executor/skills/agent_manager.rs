//! `agent_manager`: management skill mutating another agent's permission
//! sets through the synchronizer.

use crate::executor::base::{base_output, extract_json_block, finish_step, llm_turn, parse_failure};
use crate::executor::{Executor, ExecutorContext};
use allen_contract::{
    AgentState, ExecuteOutput, StageAgentState, UpdateAgentPermissions,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const NAME: &str = "agent_manager";
const TAG: &str = "agent_manager";

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum AgentInstruction {
    UpdateTools {
        agent_id: String,
        names: Vec<String>,
    },
    UpdateSkills {
        agent_id: String,
        names: Vec<String>,
    },
}

#[derive(Debug)]
pub struct AgentManagerSkill;

#[async_trait]
impl Executor for AgentManagerSkill {
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

        let Some(instruction) = extract_json_block::<AgentInstruction>(&turn.response, TAG) else {
            return parse_failure(agent, &step, NAME, &turn.response);
        };

        finish_step(agent, step_id, json!({ "applied": format!("{instruction:?}") }));
        let mut output = base_output(
            agent,
            &step,
            StageAgentState::Working,
            "agent_manager finished",
        );
        match instruction {
            AgentInstruction::UpdateTools { agent_id, names } => {
                output.update_agent_tools = Some(UpdateAgentPermissions { agent_id, names });
            }
            AgentInstruction::UpdateSkills { agent_id, names } => {
                output.update_agent_skills = Some(UpdateAgentPermissions { agent_id, names });
            }
        }
        output
    }
}
