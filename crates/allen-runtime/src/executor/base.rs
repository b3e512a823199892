//! Shared executor machinery: prompt assembly, delimited-block extraction,
//! persistent-memory application, and step/result bookkeeping.
//!
//! Prompt assembly follows the fixed ordering `system → role → (goal →
//! rules) → memory` so skill authors only ever override the rules block.

use crate::executor::ExecutorContext;
use allen_contract::{
    AgentState, ErrorKind, ExecuteOutput, ExecuteResult, SharedNote, StageAgentState,
    StepExecutionState, StepState, UpdateStageAgentState,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Marker tag for self-authored persistent-memory fragments.
pub const PERSISTENT_MEMORY_TAG: &str = "persistent_memory";

/// Extract the content of the last `<tag>…</tag>` block that lies outside
/// fenced code spans. Returns `None` when no complete block exists.
pub fn extract_block(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let mut last: Option<String> = None;
    for segment in unfenced_segments(text) {
        let mut cursor = 0;
        while let Some(start) = segment[cursor..].find(&open) {
            let content_start = cursor + start + open.len();
            match segment[content_start..].find(&close) {
                Some(end) => {
                    last = Some(segment[content_start..content_start + end].trim().to_string());
                    cursor = content_start + end + close.len();
                }
                None => break,
            }
        }
    }
    last
}

/// Split `text` into the segments outside ``` fences.
fn unfenced_segments(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut in_fence = false;
    let mut segment_start = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            if in_fence {
                segment_start = offset + line.len();
            } else if offset > segment_start {
                segments.push(&text[segment_start..offset]);
            }
            in_fence = !in_fence;
        }
        offset += line.len();
    }
    if !in_fence && offset > segment_start {
        segments.push(&text[segment_start..offset]);
    }
    segments
}

/// Extract and JSON-decode the last `<tag>` block.
pub fn extract_json_block<T: DeserializeOwned>(text: &str, tag: &str) -> Option<T> {
    let block = extract_block(text, tag)?;
    serde_json::from_str(&block).ok()
}

/// Append the `<persistent_memory>` fragment of `response` (if any) to the
/// agent's persistent memory. Heading-depth filtering happens inside the
/// agent state.
pub fn apply_persistent_memory(agent: &mut AgentState, response: &str) {
    if let Some(fragment) = extract_block(response, PERSISTENT_MEMORY_TAG) {
        if !fragment.is_empty() {
            debug!(agent_id = %agent.agent_id, "appending persistent-memory fragment");
            agent.append_persistent_memory(&fragment);
        }
    }
}

/// Assemble a skill prompt per the fixed section ordering. History-aware
/// skills insert their step-history section between the step block and the
/// memory block.
pub fn assemble_skill_prompt(
    cx: &ExecutorContext,
    agent: &AgentState,
    step: &StepState,
    skill_name: &str,
    history: Option<&str>,
) -> String {
    let mut out = Vec::new();

    out.push("# System\n".to_string());
    out.push(format!("{}\n", cx.system_prompt));

    out.push("# Role\n".to_string());
    out.push(format!(
        "## Background\nname: {}\nrole: {}\nprofile: {}\n",
        agent.name, agent.role, agent.profile
    ));
    out.push(permission_summary(cx, agent));

    out.push("# Current step\n".to_string());
    out.push(format!("## Intention\n{}\n", step.step_intention));
    out.push(format!("## Goal\n{}\n", step.text_content));
    if let Some(config) = cx.skill_configs.get(skill_name) {
        out.push(format!(
            "## Rules\n{}\n\n### Return format\n{}\n",
            config.use_prompt.skill_prompt, config.use_prompt.return_format
        ));
    }

    if let Some(history) = history {
        out.push("# History steps\n".to_string());
        out.push(history.to_string());
    }

    out.push("# Persistent memory\n".to_string());
    out.push(format!(
        "Only heading levels of depth three or deeper may appear in fragments \
         you author between <{tag}> and </{tag}>.\n",
        tag = PERSISTENT_MEMORY_TAG
    ));
    out.push(format!("## Content\n{}\n", agent.persistent_memory));

    out.join("\n")
}

/// The stage's step history (executed and still queued), excluding the step
/// currently running. Feeds history-aware skills such as `reflection`.
pub fn history_steps_section(agent: &AgentState, stage_id: &str, current_step_id: &str) -> String {
    let mut out = String::new();
    for step in agent.agent_step.steps() {
        if step.stage_id != stage_id || step.step_id == current_step_id {
            continue;
        }
        let result = step
            .execute_result
            .as_ref()
            .map(|r| r.data.to_string())
            .unwrap_or_else(|| "(not executed yet)".to_string());
        out.push_str(&format!(
            "- {} `{}` [{:?}]: {}\n  result: {}\n",
            step.kind, step.executor, step.execution_state, step.step_intention, result
        ));
    }
    out
}

/// The role section's summary of the agent's skill and tool permissions.
fn permission_summary(cx: &ExecutorContext, agent: &AgentState) -> String {
    let mut out = String::from("## Available skills and tools\n");
    for skill in &agent.skills {
        let description = cx
            .skill_configs
            .get(skill)
            .map(|c| c.use_guide.description.as_str())
            .unwrap_or("");
        out.push_str(&format!("- skill `{skill}`: {description}\n"));
    }
    for tool in &agent.tools {
        // Servers marked unavailable are not advertised.
        if !cx.tools.is_available(tool) {
            continue;
        }
        let description = cx.tool_guides.get(tool).map(String::as_str).unwrap_or("");
        out.push_str(&format!("- tool `{tool}`: {description}\n"));
    }
    out
}

/// Transition the step to `running`.
pub fn mark_running(agent: &mut AgentState, step_id: &str) {
    agent
        .agent_step
        .update_step_status(step_id, StepExecutionState::Running);
}

/// Finish the step with a successful result.
pub fn finish_step(agent: &mut AgentState, step_id: &str, data: impl Into<Value>) {
    if let Some(step) = agent.agent_step.step_mut(step_id) {
        step.execute_result = Some(ExecuteResult::success(data));
        step.execution_state = StepExecutionState::Finished;
    }
}

/// Fail the step, preserving the raw upstream response.
pub fn fail_step(agent: &mut AgentState, step_id: &str, kind: ErrorKind, raw: impl Into<Value>) {
    if let Some(step) = agent.agent_step.step_mut(step_id) {
        step.execute_result = Some(ExecuteResult::failure(kind, raw));
        step.execution_state = StepExecutionState::Failed;
    }
}

/// The mandatory `ExecuteOutput` fields: the agent's stage state plus a
/// shared-log summary line.
pub fn base_output(
    agent: &AgentState,
    step: &StepState,
    state: StageAgentState,
    note: impl Into<String>,
) -> ExecuteOutput {
    ExecuteOutput {
        update_stage_agent_state: Some(UpdateStageAgentState {
            task_id: step.task_id.clone(),
            stage_id: step.stage_id.clone(),
            agent_id: agent.agent_id.clone(),
            state,
        }),
        send_shared_message: Some(SharedNote {
            task_id: step.task_id.clone(),
            stage_id: step.stage_id.clone(),
            agent_id: agent.agent_id.clone(),
            role: agent.role.clone(),
            content: note.into(),
        }),
        ..Default::default()
    }
}

/// Outcome of the shared LLM-skill preamble: the full response text.
pub struct LlmTurn {
    pub response: String,
}

/// Shared front half of every LLM skill: mark running, assemble the prompt,
/// call the LLM, apply persistent memory.
///
/// On any LLM failure the step is failed and the ready-made failed
/// `ExecuteOutput` is returned as `Err`.
pub async fn llm_turn(
    cx: &ExecutorContext,
    agent: &mut AgentState,
    step_id: &str,
    skill_name: &str,
) -> Result<LlmTurn, ExecuteOutput> {
    llm_turn_with_history(cx, agent, step_id, skill_name, None).await
}

/// [`llm_turn`] with a step-history section in the prompt (history-aware
/// skills).
pub async fn llm_turn_with_history(
    cx: &ExecutorContext,
    agent: &mut AgentState,
    step_id: &str,
    skill_name: &str,
    history: Option<String>,
) -> Result<LlmTurn, ExecuteOutput> {
    mark_running(agent, step_id);

    let step = match agent.agent_step.step(step_id) {
        Some(step) => step.clone(),
        None => return Err(ExecuteOutput::default()),
    };

    let Some(llm) = cx.llm.clone() else {
        fail_step(
            agent,
            step_id,
            ErrorKind::ExecutorLlmTransport,
            "agent has no llm client",
        );
        return Err(base_output(
            agent,
            &step,
            StageAgentState::Failed,
            format!("{skill_name} failed: no llm client"),
        ));
    };

    // The assembled prompt already carries the system section; no separate
    // preamble message is sent.
    let prompt = assemble_skill_prompt(cx, agent, &step, skill_name, history.as_deref());
    let mut dialogue = agent.dialogue.clone();
    let result = llm.call("", &prompt, &mut dialogue).await;
    agent.dialogue = dialogue;

    match result {
        Ok(response) => {
            apply_persistent_memory(agent, &response);
            Ok(LlmTurn { response })
        }
        Err(e) => {
            fail_step(agent, step_id, e.kind(), e.to_string());
            Err(base_output(
                agent,
                &step,
                StageAgentState::Failed,
                format!("{skill_name} failed: {}", e.kind()),
            ))
        }
    }
}

/// Shared back half of a parse failure: fail the step with the raw response
/// preserved and report a failed stage state.
pub fn parse_failure(
    agent: &mut AgentState,
    step: &StepState,
    skill_name: &str,
    response: &str,
) -> ExecuteOutput {
    fail_step(
        agent,
        &step.step_id,
        ErrorKind::ExecutorParse,
        response.to_string(),
    );
    base_output(
        agent,
        step,
        StageAgentState::Failed,
        format!("{skill_name} failed: executor/parse"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_block_takes_last_occurrence() {
        let text = "<note>first</note>\nchatter\n<note>second</note>";
        assert_eq!(extract_block(text, "note").unwrap(), "second");
    }

    #[test]
    fn extract_block_ignores_fenced_code_spans() {
        let text = "```\n<note>inside fence</note>\n```\n<note>outside</note>\n";
        assert_eq!(extract_block(text, "note").unwrap(), "outside");

        let only_fenced = "```\n<note>inside</note>\n```\n";
        assert!(extract_block(only_fenced, "note").is_none());
    }

    #[test]
    fn extract_block_requires_closing_tag() {
        assert!(extract_block("<note>unterminated", "note").is_none());
    }

    #[test]
    fn extract_json_block_decodes_typed_payloads() {
        #[derive(serde::Deserialize)]
        struct Payload {
            n: u32,
        }
        let text = "noise <data>{\"n\": 7}</data> trailing";
        let payload: Payload = extract_json_block(text, "data").unwrap();
        assert_eq!(payload.n, 7);
        assert!(extract_json_block::<Payload>("<data>not json</data>", "data").is_none());
    }

    #[test]
    fn apply_persistent_memory_appends_fragment() {
        let mut agent = AgentState::new("a1", "tester");
        apply_persistent_memory(
            &mut agent,
            "reply body <persistent_memory>### note\nkeep going</persistent_memory>",
        );
        assert_eq!(agent.persistent_memory, "### note\nkeep going");
    }
}
