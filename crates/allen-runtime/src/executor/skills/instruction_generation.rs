//! `instruction_generation`: fill the structured invocation payload of the
//! next pending tool step in the same stage.

use crate::executor::base::{
    base_output, extract_json_block, fail_step, finish_step, llm_turn, parse_failure,
};
use crate::executor::{Executor, ExecutorContext};
use allen_contract::{
    AgentState, ErrorKind, ExecuteOutput, StageAgentState, StepExecutionState, StepKind,
};
use async_trait::async_trait;
use serde_json::{json, Value};

const NAME: &str = "instruction_generation";
const TAG: &str = "tool_instruction";

#[derive(Debug)]
pub struct InstructionGenerationSkill;

#[async_trait]
impl Executor for InstructionGenerationSkill {
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

        let Some(instruction) = extract_json_block::<Value>(&turn.response, TAG) else {
            return parse_failure(agent, &step, NAME, &turn.response);
        };

        // Fill the next pending tool step of the same stage.
        let target_id = agent
            .agent_step
            .steps()
            .iter()
            .find(|s| {
                s.stage_id == step.stage_id
                    && s.kind == StepKind::Tool
                    && s.execution_state == StepExecutionState::Pending
            })
            .map(|s| s.step_id.clone());

        let Some(target_id) = target_id else {
            fail_step(
                agent,
                step_id,
                ErrorKind::ExecutorParse,
                "no pending tool step to fill",
            );
            return base_output(
                agent,
                &step,
                StageAgentState::Failed,
                "instruction_generation failed: no pending tool step",
            );
        };

        if let Some(target) = agent.agent_step.step_mut(&target_id) {
            target.fill_instruction(instruction.clone());
        }
        finish_step(
            agent,
            step_id,
            json!({ "filled_step": target_id, "instruction": instruction }),
        );
        base_output(
            agent,
            &step,
            StageAgentState::Working,
            "instruction_generation finished",
        )
    }
}
