//! `task_manager`: manager-only task lifecycle operations — create a task,
//! deliver it with a summary, or terminate it early.

use crate::executor::base::{base_output, extract_json_block, finish_step, llm_turn, parse_failure};
use crate::executor::{Executor, ExecutorContext};
use allen_contract::{
    AddTask, AgentState, ExecuteOutput, StageAgentState, TaskExecutionState, UpdateTaskState,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

const NAME: &str = "task_manager";
const TAG: &str = "task_manager";

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum TaskInstruction {
    AddTask {
        task_name: String,
        task_intention: String,
    },
    FinishTask {
        task_id: String,
        #[serde(default)]
        summary: String,
    },
    FailTask {
        task_id: String,
        #[serde(default)]
        summary: String,
    },
}

#[derive(Debug)]
pub struct TaskManagerSkill;

#[async_trait]
impl Executor for TaskManagerSkill {
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

        let Some(instruction) = extract_json_block::<TaskInstruction>(&turn.response, TAG) else {
            return parse_failure(agent, &step, NAME, &turn.response);
        };

        finish_step(agent, step_id, json!({ "instruction": format!("{instruction:?}") }));
        let mut output = base_output(
            agent,
            &step,
            StageAgentState::Working,
            "task_manager finished",
        );
        match instruction {
            TaskInstruction::AddTask {
                task_name,
                task_intention,
            } => {
                output.add_task = Some(AddTask {
                    task_name,
                    task_intention,
                    manager_id: agent.agent_id.clone(),
                });
            }
            TaskInstruction::FinishTask { task_id, summary } => {
                output.update_task_state = Some(UpdateTaskState {
                    task_id,
                    state: TaskExecutionState::Finished,
                    summary: Some(summary),
                });
            }
            TaskInstruction::FailTask { task_id, summary } => {
                output.update_task_state = Some(UpdateTaskState {
                    task_id,
                    state: TaskExecutionState::Failed,
                    summary: Some(summary),
                });
            }
        }
        output
    }
}
