//! The per-agent action loop.
//!
//! One tokio task per agent. The loop blocks on the agent's step queue,
//! resolves each step to an executor through the router, runs it under the
//! agent's state lock, and hands the executor's output to the synchronizer.
//! A shutdown request terminates the loop once the queue drains to it.

use crate::agent::AgentHandle;
use crate::executor::base::{base_output, fail_step};
use crate::executor::ExecutorContext;
use crate::router::Router;
use crate::sync::SyncState;
use allen_contract::{ErrorKind, StageAgentState, WorkingState};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Run one agent's action loop until shutdown.
pub async fn run_agent_worker(
    handle: AgentHandle,
    router: Router,
    sync: Arc<SyncState>,
    cx: ExecutorContext,
) {
    info!(agent_id = %handle.agent_id, name = %handle.name, "agent worker started");
    loop {
        // Block on the queue; an empty queue is idle, never busy-waiting.
        let step_id = loop {
            if handle.is_shutdown() {
                info!(agent_id = %handle.agent_id, "agent worker stopped");
                return;
            }
            let popped = {
                let mut state = handle.state.lock().await;
                if state.working_state == WorkingState::Awaiting {
                    // Parked on an outstanding waiting message: no further
                    // steps run until the dispatcher releases the wait.
                    None
                } else {
                    match state.agent_step.pop_todo() {
                        Some(id) => {
                            state.working_state = WorkingState::Working;
                            Some(id)
                        }
                        None => {
                            if state.working_state == WorkingState::Working {
                                state.working_state = WorkingState::Idle;
                            }
                            None
                        }
                    }
                }
            };
            match popped {
                Some(id) => break id,
                None => handle.notified().await,
            }
        };

        // Steps already released to `init` elsewhere are still accepted;
        // executors that see `pending` fail fast on their own.
        let route_info = {
            let state = handle.state.lock().await;
            state
                .agent_step
                .step(&step_id)
                .map(|s| (s.kind, s.executor.clone()))
        };
        let Some((kind, executor_name)) = route_info else {
            debug!(agent_id = %handle.agent_id, step_id = %step_id, "dequeued step no longer exists");
            continue;
        };

        let output = match router.route(kind, &executor_name) {
            Ok(executor) => {
                // The state lock is held across the full run: executor
                // writes take priority during a step.
                let mut state = handle.state.lock().await;
                executor.execute(&step_id, &mut state, &cx).await
            }
            Err(e) => {
                error!(agent_id = %handle.agent_id, step_id = %step_id, error = %e, "router rejected step");
                let mut state = handle.state.lock().await;
                fail_step(
                    &mut state,
                    &step_id,
                    ErrorKind::RouterUnknownExecutor,
                    e.to_string(),
                );
                match state.agent_step.step(&step_id).cloned() {
                    Some(step) => base_output(
                        &state,
                        &step,
                        StageAgentState::Failed,
                        format!("step failed: {}", ErrorKind::RouterUnknownExecutor),
                    ),
                    None => continue,
                }
            }
        };

        sync.sync(output).await;
    }
}
