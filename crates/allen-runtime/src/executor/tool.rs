//! Tool executor: runs one tool step against the tool-client multiplexer.
//!
//! One instance is registered under every configured tool-server name; the
//! step's `executor` field names the server. Supports a bulk form where the
//! instruction carries several invocations joined within the one step.

use crate::executor::base::{base_output, fail_step, finish_step, mark_running};
use crate::executor::{Executor, ExecutorContext};
use allen_contract::{
    AgentState, ErrorKind, ExecuteOutput, StageAgentState, StepExecutionState,
};
use allen_mcp::Invocation;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
struct SingleInvocation {
    capability: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolInstruction {
    Bulk { invocations: Vec<SingleInvocation> },
    Single(SingleInvocation),
}

#[derive(Debug)]
pub struct ToolExecutor;

#[async_trait]
impl Executor for ToolExecutor {
    async fn execute(
        &self,
        step_id: &str,
        agent: &mut AgentState,
        cx: &ExecutorContext,
    ) -> ExecuteOutput {
        let Some(step) = agent.agent_step.step(step_id).cloned() else {
            return ExecuteOutput::default();
        };
        let server = step.executor.clone();

        // A step still pending means its instruction fill never happened.
        if step.execution_state == StepExecutionState::Pending
            || step.instruction_content.is_none()
        {
            fail_step(
                agent,
                step_id,
                ErrorKind::ToolInvoke,
                "tool step has no instruction_content",
            );
            return base_output(
                agent,
                &step,
                StageAgentState::Failed,
                format!("tool '{server}' failed: missing instruction"),
            );
        }

        mark_running(agent, step_id);

        if !agent.has_tool(&server) {
            fail_step(
                agent,
                step_id,
                ErrorKind::ToolInvoke,
                format!("tool server '{server}' is not in the agent's permission set"),
            );
            return base_output(
                agent,
                &step,
                StageAgentState::Failed,
                format!("tool '{server}' failed: not permitted"),
            );
        }

        let instruction: Result<ToolInstruction, _> =
            serde_json::from_value(step.instruction_content.clone().unwrap_or(Value::Null));
        let instruction = match instruction {
            Ok(instruction) => instruction,
            Err(e) => {
                fail_step(
                    agent,
                    step_id,
                    ErrorKind::ToolInvoke,
                    format!("malformed tool instruction: {e}"),
                );
                return base_output(
                    agent,
                    &step,
                    StageAgentState::Failed,
                    format!("tool '{server}' failed: malformed instruction"),
                );
            }
        };

        let result = match instruction {
            ToolInstruction::Single(inv) => {
                info!(server = %server, capability = %inv.capability, "invoking tool");
                cx.tools
                    .invoke(
                        &server,
                        &inv.capability,
                        inv.arguments,
                        inv.timeout_secs.map(Duration::from_secs),
                    )
                    .await
                    .map(|value| json!({ "result": value }))
            }
            ToolInstruction::Bulk { invocations } => {
                info!(server = %server, count = invocations.len(), "bulk tool invocation");
                let invocations: Vec<Invocation> = invocations
                    .into_iter()
                    .map(|inv| Invocation {
                        server: server.clone(),
                        capability: inv.capability,
                        arguments: inv.arguments,
                        timeout: inv.timeout_secs.map(Duration::from_secs),
                    })
                    .collect();
                let outcomes = cx.tools.invoke_many(invocations).await;
                // One failed invocation fails the whole step; partial results
                // are preserved in the step result.
                let mut values = Vec::new();
                let mut first_error = None;
                for outcome in outcomes {
                    match outcome {
                        Ok(value) => values.push(value),
                        Err(e) => {
                            if first_error.is_none() {
                                first_error = Some(e);
                            }
                            values.push(Value::Null);
                        }
                    }
                }
                match first_error {
                    None => Ok(json!({ "results": values })),
                    Some(e) => Err(e),
                }
            }
        };

        match result {
            Ok(data) => {
                finish_step(agent, step_id, data);
                base_output(
                    agent,
                    &step,
                    StageAgentState::Working,
                    format!("tool '{server}' finished"),
                )
            }
            Err(e) => {
                let kind = e.kind();
                fail_step(agent, step_id, kind, e.to_string());
                base_output(
                    agent,
                    &step,
                    StageAgentState::Failed,
                    format!("tool '{server}' failed: {kind}"),
                )
            }
        }
    }
}
