//! `planning`: decompose the agent's stage goal into concrete steps.
//!
//! The first step of every assigned agent in a stage. Planned tool steps are
//! created `pending` and an `instruction_generation` step is inserted ahead
//! of each one unless the plan already provides it. The planned-step shape
//! and the append loop are shared with `reflection`, which plans the same
//! way against the stage history.

use crate::executor::base::{base_output, extract_json_block, finish_step, llm_turn, parse_failure};
use crate::executor::{Executor, ExecutorContext};
use allen_contract::{AgentState, ExecuteOutput, StageAgentState, StepKind, StepState};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

const NAME: &str = "planning";
const TAG: &str = "planned_step";

/// One step of a plan, as skills return it.
#[derive(Debug, Deserialize)]
pub(super) struct PlannedStep {
    pub(super) step_intention: String,
    #[serde(rename = "type")]
    pub(super) kind: StepKind,
    pub(super) executor: String,
    #[serde(default)]
    pub(super) text_content: String,
}

/// Keep only steps the agent has permission for.
pub(super) fn permitted(agent: &AgentState, planned: Vec<PlannedStep>) -> Vec<PlannedStep> {
    planned
        .into_iter()
        .filter(|p| {
            let allowed = match p.kind {
                StepKind::Skill => agent.has_skill(&p.executor),
                StepKind::Tool => agent.has_tool(&p.executor),
            };
            if !allowed {
                warn!(
                    agent_id = %agent.agent_id,
                    executor = %p.executor,
                    "dropping planned step outside the agent's permissions"
                );
            }
            allowed
        })
        .collect()
}

/// Append planned steps to the agent's queue, inserting an
/// `instruction_generation` step ahead of each tool step unless the plan
/// already provides one. Returns how many steps were queued.
pub(super) fn append_planned_steps(
    agent: &mut AgentState,
    parent: &StepState,
    planned: Vec<PlannedStep>,
) -> usize {
    let mut added = 0usize;
    let mut last_executor = String::new();
    for p in planned {
        if p.kind == StepKind::Tool && last_executor != "instruction_generation" {
            let fill = StepState::new(
                parent.task_id.clone(),
                parent.stage_id.clone(),
                agent.agent_id.clone(),
                format!("generate the invocation for tool '{}'", p.executor),
                StepKind::Skill,
                "instruction_generation",
            )
            .with_text_content(p.text_content.clone());
            push_step(agent, fill);
            added += 1;
        }
        last_executor = p.executor.clone();

        let mut next = StepState::new(
            parent.task_id.clone(),
            parent.stage_id.clone(),
            agent.agent_id.clone(),
            p.step_intention,
            p.kind,
            p.executor,
        )
        .with_text_content(p.text_content);
        if p.kind == StepKind::Tool {
            next = next.pending();
        }
        push_step(agent, next);
        added += 1;
    }
    added
}

fn push_step(agent: &mut AgentState, step: StepState) {
    agent.note_working_memory(&step.task_id, &step.stage_id, &step.step_id);
    agent.agent_step.add_step(step);
}

#[derive(Debug)]
pub struct PlanningSkill;

#[async_trait]
impl Executor for PlanningSkill {
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

        let Some(planned) = extract_json_block::<Vec<PlannedStep>>(&turn.response, TAG) else {
            return parse_failure(agent, &step, NAME, &turn.response);
        };
        let planned = permitted(agent, planned);
        if planned.is_empty() {
            return parse_failure(agent, &step, NAME, &turn.response);
        }

        let added = append_planned_steps(agent, &step, planned);

        finish_step(agent, step_id, json!({ "planned_steps": added }));
        base_output(
            agent,
            &step,
            StageAgentState::Working,
            format!("planning finished: {added} step(s) queued"),
        )
    }
}
