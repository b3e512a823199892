//! Synchronizer idempotence laws, dispatcher correlation laws, and boundary
//! behaviors, driven against stub agents with no live workers.

mod common;

use allen_contract::{
    AddStage, AddTask, AgentState, ExecuteOutput, Message, SharedNote, StageAgentState,
    StageExecutionState, StagePlan, StagePolicy, StepExecutionState, StepKind, StepState,
    TaskExecutionState, UpdateStageAgentState,
};
use allen_runtime::agent::{AgentDirectory, AgentDriver, AgentHandle};
use allen_runtime::dispatch::{run_dispatcher, DispatchCommand};
use allen_runtime::sync::SyncState;
use async_trait::async_trait;
use common::eventually;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(2);

/// Directory of pre-built handles; never instantiates anything.
#[derive(Default)]
struct StubDirectory {
    handles: RwLock<HashMap<String, AgentHandle>>,
}

impl StubDirectory {
    fn with_llm_agents(ids: &[&str]) -> Arc<Self> {
        let dir = Self::default();
        for id in ids {
            let handle = AgentHandle::new(AgentState::new(*id, *id), AgentDriver::Llm);
            dir.handles.write().unwrap().insert(id.to_string(), handle);
        }
        Arc::new(dir)
    }
}

#[async_trait]
impl AgentDirectory for StubDirectory {
    fn handle(&self, agent_id: &str) -> Option<AgentHandle> {
        self.handles.read().unwrap().get(agent_id).cloned()
    }

    async fn ensure_agent(&self, agent_id: &str) -> Option<AgentHandle> {
        self.handle(agent_id)
    }

    fn all_handles(&self) -> Vec<AgentHandle> {
        self.handles.read().unwrap().values().cloned().collect()
    }
}

fn allocation(ids: &[&str]) -> BTreeMap<String, String> {
    ids.iter()
        .map(|id| (id.to_string(), "goal".to_string()))
        .collect()
}

async fn task_id_of(sync: &SyncState) -> String {
    sync.task_ids().first().cloned().expect("task registered")
}

fn add_task_output() -> ExecuteOutput {
    ExecuteOutput {
        add_task: Some(AddTask {
            task_name: "demo".to_string(),
            task_intention: "demonstrate".to_string(),
            manager_id: "mgr".to_string(),
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn add_task_is_idempotent() {
    let directory = StubDirectory::with_llm_agents(&["mgr"]);
    let (tx, _rx) = mpsc::unbounded_channel();
    let sync = SyncState::new(directory.clone(), tx, StagePolicy::Strict);

    sync.sync(add_task_output()).await;
    sync.sync(add_task_output()).await;

    assert_eq!(sync.task_ids().len(), 1);
    // Exactly one stage_planning step reached the manager.
    let manager = directory.handle("mgr").unwrap();
    let state = manager.state.lock().await;
    assert_eq!(state.agent_step.steps().len(), 1);
    assert_eq!(state.agent_step.steps()[0].executor, "stage_planning");
}

#[tokio::test]
async fn add_stage_is_idempotent_and_activates_once() {
    let directory = StubDirectory::with_llm_agents(&["mgr", "a1"]);
    let (tx, _rx) = mpsc::unbounded_channel();
    let sync = SyncState::new(directory.clone(), tx, StagePolicy::Strict);

    sync.sync(add_task_output()).await;
    let task_id = task_id_of(&sync).await;

    let add_stage = ExecuteOutput {
        add_stage: Some(AddStage {
            task_id: task_id.clone(),
            stages: vec![StagePlan {
                stage_intention: "work".to_string(),
                agent_allocation: allocation(&["a1"]),
            }],
        }),
        ..Default::default()
    };
    sync.sync(add_stage.clone()).await;
    sync.sync(add_stage).await;

    let task = sync.task(&task_id).unwrap();
    let task = task.lock().await;
    assert_eq!(task.stages.len(), 1);
    assert_eq!(task.stages[0].execution_state, StageExecutionState::Running);
    assert_eq!(task.execution_state, TaskExecutionState::Running);
    assert!(task.task_group.contains(&"a1".to_string()));
    drop(task);

    // Exactly one planning step reached the assigned agent.
    let agent = directory.handle("a1").unwrap();
    let state = agent.state.lock().await;
    assert_eq!(state.agent_step.steps().len(), 1);
    assert_eq!(state.agent_step.steps()[0].executor, "planning");
}

#[tokio::test]
async fn stage_agent_state_update_is_idempotent_and_settles_the_task() {
    let directory = StubDirectory::with_llm_agents(&["mgr", "a1"]);
    let (tx, _rx) = mpsc::unbounded_channel();
    let sync = SyncState::new(directory.clone(), tx, StagePolicy::Strict);

    sync.sync(add_task_output()).await;
    let task_id = task_id_of(&sync).await;
    sync.sync(ExecuteOutput {
        add_stage: Some(AddStage {
            task_id: task_id.clone(),
            stages: vec![StagePlan {
                stage_intention: "work".to_string(),
                agent_allocation: allocation(&["a1"]),
            }],
        }),
        ..Default::default()
    })
    .await;

    let stage_id = {
        let task = sync.task(&task_id).unwrap();
        let task = task.lock().await;
        task.stages[0].stage_id.clone()
    };

    let finish = ExecuteOutput {
        update_stage_agent_state: Some(UpdateStageAgentState {
            task_id: task_id.clone(),
            stage_id: stage_id.clone(),
            agent_id: "a1".to_string(),
            state: StageAgentState::Finished,
        }),
        ..Default::default()
    };
    sync.sync(finish.clone()).await;
    let snapshot_once = {
        let task = sync.task(&task_id).unwrap();
        let task = task.lock().await;
        (task.execution_state, task.stages[0].execution_state, task.shared_log_len())
    };
    sync.sync(finish).await;
    let snapshot_twice = {
        let task = sync.task(&task_id).unwrap();
        let task = task.lock().await;
        (task.execution_state, task.stages[0].execution_state, task.shared_log_len())
    };

    assert_eq!(snapshot_once.0, TaskExecutionState::Finished);
    assert_eq!(snapshot_once.1, StageExecutionState::Finished);
    assert_eq!(snapshot_once, snapshot_twice);
}

#[tokio::test]
async fn strict_policy_fails_the_stage_when_any_agent_fails() {
    let directory = StubDirectory::with_llm_agents(&["mgr", "a1", "a2"]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sync = SyncState::new(directory.clone(), tx, StagePolicy::Strict);

    sync.sync(add_task_output()).await;
    let task_id = task_id_of(&sync).await;
    sync.sync(ExecuteOutput {
        add_stage: Some(AddStage {
            task_id: task_id.clone(),
            stages: vec![StagePlan {
                stage_intention: "work".to_string(),
                agent_allocation: allocation(&["a1", "a2"]),
            }],
        }),
        ..Default::default()
    })
    .await;
    let stage_id = {
        let task = sync.task(&task_id).unwrap();
        let task = task.lock().await;
        task.stages[0].stage_id.clone()
    };

    for (agent, state) in [("a1", StageAgentState::Finished), ("a2", StageAgentState::Failed)] {
        sync.sync(ExecuteOutput {
            update_stage_agent_state: Some(UpdateStageAgentState {
                task_id: task_id.clone(),
                stage_id: stage_id.clone(),
                agent_id: agent.to_string(),
                state,
            }),
            ..Default::default()
        })
        .await;
    }

    let task = sync.task(&task_id).unwrap();
    let task = task.lock().await;
    assert_eq!(task.stages[0].execution_state, StageExecutionState::Failed);
    // The task is left running for remediation.
    assert_eq!(task.execution_state, TaskExecutionState::Running);
    drop(task);

    // The manager is notified about the failed stage.
    let mut saw_notice = false;
    while let Ok(command) = rx.try_recv() {
        if let DispatchCommand::Deliver(message) = command {
            if message.receivers == vec!["mgr".to_string()] && message.content.contains("failed") {
                saw_notice = true;
            }
        }
    }
    assert!(saw_notice, "no failure notice for the manager");
}

#[tokio::test]
async fn empty_stage_finishes_immediately_and_zero_stage_task_finishes_empty() {
    let directory = StubDirectory::with_llm_agents(&["mgr"]);
    let (tx, _rx) = mpsc::unbounded_channel();
    let sync = SyncState::new(directory.clone(), tx, StagePolicy::Strict);

    sync.sync(add_task_output()).await;
    let task_id = task_id_of(&sync).await;

    // An empty allocation settles the stage immediately upon activation,
    // and with nothing left the task finishes.
    sync.sync(ExecuteOutput {
        add_stage: Some(AddStage {
            task_id: task_id.clone(),
            stages: vec![StagePlan {
                stage_intention: "noop".to_string(),
                agent_allocation: BTreeMap::new(),
            }],
        }),
        ..Default::default()
    })
    .await;

    let task = sync.task(&task_id).unwrap();
    let task = task.lock().await;
    assert_eq!(task.stages[0].execution_state, StageExecutionState::Finished);
    assert_eq!(task.execution_state, TaskExecutionState::Finished);
    assert!(task.task_summary.is_empty());
}

#[tokio::test]
async fn shared_log_collapses_reapplied_notes() {
    let directory = StubDirectory::with_llm_agents(&["mgr"]);
    let (tx, _rx) = mpsc::unbounded_channel();
    let sync = SyncState::new(directory.clone(), tx, StagePolicy::Strict);

    sync.sync(add_task_output()).await;
    let task_id = task_id_of(&sync).await;

    let note = ExecuteOutput {
        send_shared_message: Some(SharedNote {
            task_id: task_id.clone(),
            stage_id: "s1".to_string(),
            agent_id: "mgr".to_string(),
            role: "manager".to_string(),
            content: "progress".to_string(),
        }),
        ..Default::default()
    };
    sync.sync(note.clone()).await;
    sync.sync(note).await;

    let task = sync.task(&task_id).unwrap();
    assert_eq!(task.lock().await.shared_log_len(), 1);
}

/// Craft an agent whose last step is parked in `awaiting`.
async fn park_awaiting_step(handle: &AgentHandle) -> String {
    let mut state = handle.state.lock().await;
    let mut step = StepState::new("t1", "s1", handle.agent_id.clone(), "waiting send", StepKind::Skill, "send_message");
    step.execution_state = StepExecutionState::Awaiting;
    let id = step.step_id.clone();
    state.agent_step.add_step(step);
    id
}

#[tokio::test]
async fn matching_reply_releases_the_sender_exactly_once() {
    let directory = StubDirectory::with_llm_agents(&["sender", "receiver"]);
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_dispatcher(rx, directory.clone()));

    let sender = directory.handle("sender").unwrap();
    let step_id = park_awaiting_step(&sender).await;

    let ask = Message::new("t1", "sender", vec!["receiver".to_string()], "ping")
        .with_waiting("wait-1");
    tx.send(DispatchCommand::Deliver(ask)).unwrap();

    let reply = Message::new("t1", "receiver", vec!["sender".to_string()], "pong")
        .with_return_waiting_id("wait-1");
    tx.send(DispatchCommand::Deliver(reply.clone())).unwrap();
    tx.send(DispatchCommand::Deliver(reply)).unwrap();

    assert!(
        eventually(WAIT, || async {
            let state = sender.state.lock().await;
            state
                .agent_step
                .step(&step_id)
                .is_some_and(|s| s.execution_state == StepExecutionState::Finished)
        })
        .await,
        "waiting step was not released"
    );

    // Give the duplicate a chance to (incorrectly) create more follow-ups.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let state = sender.state.lock().await;
    let follow_ups = state
        .agent_step
        .steps()
        .iter()
        .filter(|s| s.executor == "process_message")
        .count();
    assert_eq!(follow_ups, 1, "duplicated reply must be discarded");
}

#[tokio::test]
async fn zero_receivers_and_unknown_receivers_bounce_back_to_the_sender() {
    let directory = StubDirectory::with_llm_agents(&["sender"]);
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_dispatcher(rx, directory.clone()));

    let sender = directory.handle("sender").unwrap();

    tx.send(DispatchCommand::Deliver(Message::new(
        "t1",
        "sender",
        Vec::new(),
        "to nobody",
    )))
    .unwrap();
    tx.send(DispatchCommand::Deliver(Message::new(
        "t1",
        "sender",
        vec!["ghost".to_string()],
        "to a ghost",
    )))
    .unwrap();

    assert!(
        eventually(WAIT, || async {
            let state = sender.state.lock().await;
            state
                .agent_step
                .steps()
                .iter()
                .filter(|s| s.text_content.contains("delivery-error (dispatch/unknown-receiver)"))
                .count()
                == 2
        })
        .await,
        "delivery errors did not bounce back to the sender"
    );
}

#[tokio::test]
async fn step_list_serialization_is_a_fixed_point() {
    let mut agent = AgentState::new("a1", "tester");
    let mut step = StepState::new("t1", "s1", "a1", "do things", StepKind::Skill, "quick_think")
        .with_text_content("text");
    step.execution_state = StepExecutionState::Finished;
    step.execute_result = Some(allen_contract::ExecuteResult::success(
        serde_json::json!({"text": "done"}),
    ));
    agent.agent_step.add_step(step);
    agent.agent_step.add_step(StepState::new(
        "t1",
        "s1",
        "a1",
        "next",
        StepKind::Skill,
        "summary",
    ));

    let first = serde_json::to_value(&agent.agent_step).unwrap();
    let decoded: allen_contract::AgentStep = serde_json::from_value(first.clone()).unwrap();
    let second = serde_json::to_value(&decoded).unwrap();
    assert_eq!(first, second);
}
