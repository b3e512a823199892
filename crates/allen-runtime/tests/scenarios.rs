//! End-to-end scenarios driven through the full system container with
//! scripted inference.

mod common;

use allen_contract::{
    ExecuteOutput, ErrorKind, Message, StageExecutionState, StepExecutionState,
    TaskExecutionState, UpdateTaskState,
};
use allen_mcp::testing::{dummy_spec, StaticConnector};
use allen_runtime::llm::testing::ScriptedFactory;
use allen_runtime::Mas;
use common::{all_skills, eventually, human_role, llm_role};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn singleton_task_runs_to_finished() {
    let factory = ScriptedFactory::new();
    factory.script_for_model(
        "mgr1",
        [
            r#"<task_manager>{"action":"add_task","task_name":"hello","task_intention":"say hello"}</task_manager>"#,
            r#"<stage_planning>[{"stage_intention":"reply to the user","agent_allocation":{"manager":"reply"}}]</stage_planning>"#,
            r#"<planned_step>[{"step_intention":"produce the greeting","type":"skill","executor":"quick_think","text_content":"say hello"},{"step_intention":"wrap up","type":"skill","executor":"summary","text_content":"summarize the stage"}]</planned_step>"#,
            r#"<quick_think>hello there</quick_think>"#,
            r#"<stage_summary>greeted the user</stage_summary>"#,
        ],
    );

    let mas = Mas::builder()
        .with_role(llm_role("manager", "mgr1", &all_skills(), &[]))
        .with_chat_factory(factory)
        .build()
        .unwrap();
    mas.submit_task("say hello").await;

    let sync = mas.sync_state();
    assert!(
        eventually(WAIT, || async {
            let ids = sync.task_ids();
            match ids.first().and_then(|id| sync.task(id)) {
                Some(task) => {
                    task.lock().await.execution_state == TaskExecutionState::Finished
                }
                None => false,
            }
        })
        .await,
        "task never finished"
    );

    let ids = sync.task_ids();
    let task_arc = sync.task(&ids[0]).unwrap();
    let task = task_arc.lock().await;
    assert_eq!(task.stages.len(), 1);

    let manager = mas.agent("manager").unwrap();
    let stage = &task.stages[0];
    assert_eq!(
        stage.agent_allocation.get(&manager.agent_id).map(String::as_str),
        Some("reply")
    );
    assert_eq!(stage.execution_state, StageExecutionState::Finished);
    drop(task);

    let state = manager.state.lock().await;
    let quick_think = state
        .agent_step
        .steps()
        .iter()
        .find(|s| s.executor == "quick_think")
        .expect("quick_think step exists");
    assert_eq!(quick_think.execution_state, StepExecutionState::Finished);
    let text = quick_think.execute_result.as_ref().unwrap().data["text"]
        .as_str()
        .unwrap();
    assert!(!text.is_empty());
}

#[tokio::test]
async fn two_agent_question_and_answer_releases_the_waiting_sender() {
    let factory = ScriptedFactory::new();
    factory.script_for_model(
        "mgr2",
        [
            r#"<task_manager>{"action":"add_task","task_name":"qa","task_intention":"write something"}</task_manager>"#,
            r#"<stage_planning>[{"stage_intention":"decide the topic","agent_allocation":{"manager":"ask writer","writer":"answer"}}]</stage_planning>"#,
            r#"<planned_step>[{"step_intention":"ask the writer","type":"skill","executor":"send_message","text_content":"ask what to write"}]</planned_step>"#,
            r#"<send_message>{"receivers":["writer"],"message":"what should I write?","need_reply":true,"waiting":true}</send_message>"#,
            r#"<process_message>noted the writer's answer</process_message>"#,
        ],
    );
    // The writer's reply_message step may interleave with its planned
    // steps, so its script routes by delimiter instead of by order.
    let writer_script = factory.tag_script_for_model("writer2");
    writer_script.on(
        "planned_step",
        r#"[{"step_intention":"stand by for questions","type":"skill","executor":"quick_think","text_content":"stand by"}]"#,
    );
    writer_script.on("quick_think", "standing by");
    writer_script.on("reply_message", "write about rust");

    let mas = Mas::builder()
        .with_role(llm_role("manager", "mgr2", &all_skills(), &[]))
        .with_role(llm_role(
            "writer",
            "writer2",
            &[
                "planning",
                "quick_think",
                "summary",
                "send_message",
                "process_message",
                "reply_message",
            ],
            &[],
        ))
        .with_chat_factory(factory)
        .build()
        .unwrap();
    mas.submit_task("write something").await;

    // The writer's queue gains a reply_message step promptly after dispatch.
    let writer = mas.agent("writer").unwrap();
    assert!(
        eventually(WAIT, || async {
            let state = writer.state.lock().await;
            state
                .agent_step
                .steps()
                .iter()
                .any(|s| s.executor == "reply_message")
        })
        .await,
        "writer never received a reply_message step"
    );

    // The writer's reply releases the manager's waiting step.
    let manager = mas.agent("manager").unwrap();
    assert!(
        eventually(WAIT, || async {
            let state = manager.state.lock().await;
            state.agent_step.steps().iter().any(|s| {
                s.executor == "send_message"
                    && s.execution_state == StepExecutionState::Finished
                    && s.execute_result
                        .as_ref()
                        .is_some_and(|r| r.data["reply"] == "write about rust")
            })
        })
        .await,
        "manager's waiting step was not released with the reply"
    );

    // The manager's next step (the follow-up digest) runs after release.
    assert!(
        eventually(WAIT, || async {
            let state = manager.state.lock().await;
            state.agent_step.steps().iter().any(|s| {
                s.executor == "process_message"
                    && s.execution_state == StepExecutionState::Finished
            })
        })
        .await,
        "manager's follow-up step never ran"
    );
}

#[tokio::test]
async fn tool_session_open_failure_fails_step_and_stage() {
    let factory = ScriptedFactory::new();
    factory.script_for_model(
        "mgr3",
        [
            r#"<task_manager>{"action":"add_task","task_name":"research","task_intention":"search the web"}</task_manager>"#,
            r#"<stage_planning>[{"stage_intention":"run the search","agent_allocation":{"worker":"search the web"}}]</stage_planning>"#,
            r#"<process_message>acknowledged the failure</process_message>"#,
        ],
    );
    factory.script_for_model(
        "worker3",
        [
            r#"<planned_step>[{"step_intention":"look it up","type":"tool","executor":"search","text_content":"find rust news"}]</planned_step>"#,
            r#"<tool_instruction>{"capability":"lookup","arguments":{"q":"rust"}}</tool_instruction>"#,
        ],
    );

    // No transport is registered for "search": session open fails and the
    // server is marked unavailable.
    let mas = Mas::builder()
        .with_role(llm_role("manager", "mgr3", &all_skills(), &[]))
        .with_role(llm_role(
            "worker",
            "worker3",
            &[
                "planning",
                "instruction_generation",
                "quick_think",
                "summary",
                "process_message",
                "reply_message",
            ],
            &["search"],
        ))
        .with_tool_server("search", dummy_spec(), "web search")
        .with_tool_connector(StaticConnector::new())
        .with_chat_factory(factory)
        .build()
        .unwrap();
    mas.submit_task("search the web").await;

    let worker = mas.agent("worker").unwrap();
    assert!(
        eventually(WAIT, || async {
            let state = worker.state.lock().await;
            state.agent_step.steps().iter().any(|s| {
                s.executor == "search"
                    && s.execution_state == StepExecutionState::Failed
                    && s.execute_result
                        .as_ref()
                        .is_some_and(|r| r.error_kind == Some(ErrorKind::ToolSessionOpen))
            })
        })
        .await,
        "tool step did not fail with tool/session-open"
    );

    let sync = mas.sync_state();
    assert!(
        eventually(WAIT, || async {
            let ids = sync.task_ids();
            match ids.first().and_then(|id| sync.task(id)) {
                Some(task) => {
                    let task = task.lock().await;
                    task.stages
                        .first()
                        .is_some_and(|s| s.execution_state == StageExecutionState::Failed)
                }
                None => false,
            }
        })
        .await,
        "stage did not fail after the agent failed"
    );

    // A failed last stage leaves the task running for remediation.
    let ids = sync.task_ids();
    let task = sync.task(&ids[0]).unwrap();
    assert_eq!(
        task.lock().await.execution_state,
        TaskExecutionState::Running
    );
}

#[tokio::test]
async fn waiting_sender_is_released_when_the_task_ends() {
    let factory = ScriptedFactory::new();
    factory.script_for_model(
        "mgr4",
        [
            r#"<task_manager>{"action":"add_task","task_name":"stall","task_intention":"coordinate"}</task_manager>"#,
            r#"<stage_planning>[{"stage_intention":"coordinate","agent_allocation":{"alice":"ask bob","bob":"stand by"}}]</stage_planning>"#,
        ],
    );
    factory.script_for_model(
        "alice4",
        [
            r#"<planned_step>[{"step_intention":"ask bob","type":"skill","executor":"send_message","text_content":"ask bob"}]</planned_step>"#,
            r#"<send_message>{"receivers":["bob"],"message":"are you there?","need_reply":true,"waiting":true}</send_message>"#,
            r#"<process_message>the task ended while waiting</process_message>"#,
        ],
    );
    // bob's script stays empty: its replies never parse, so it never
    // answers alice.

    let mas = Mas::builder()
        .with_role(llm_role("manager", "mgr4", &all_skills(), &[]))
        .with_role(llm_role(
            "alice",
            "alice4",
            &["planning", "send_message", "process_message", "reply_message", "summary"],
            &[],
        ))
        .with_role(llm_role(
            "bob",
            "bob4",
            &["planning", "process_message", "reply_message", "summary"],
            &[],
        ))
        .with_chat_factory(factory)
        .build()
        .unwrap();
    mas.submit_task("coordinate").await;

    let alice = mas.agent("alice").unwrap();
    assert!(
        eventually(WAIT, || async {
            let state = alice.state.lock().await;
            state
                .agent_step
                .steps()
                .iter()
                .any(|s| s.execution_state == StepExecutionState::Awaiting)
        })
        .await,
        "alice never parked on the waiting send"
    );

    // The manager marks the task failed before bob ever replies.
    let sync = mas.sync_state();
    let task_id = sync.task_ids().first().cloned().unwrap();
    sync.sync(ExecuteOutput {
        update_task_state: Some(UpdateTaskState {
            task_id: task_id.clone(),
            state: TaskExecutionState::Failed,
            summary: Some("terminated early".to_string()),
        }),
        ..Default::default()
    })
    .await;

    assert!(
        eventually(WAIT, || async {
            let state = alice.state.lock().await;
            state.agent_step.steps().iter().any(|s| {
                s.executor == "send_message"
                    && s.execution_state == StepExecutionState::Finished
                    && s.execute_result
                        .as_ref()
                        .is_some_and(|r| r.data["reply"] == "task-ended")
            })
        })
        .await,
        "alice's awaiting step did not receive the synthetic task-ended reply"
    );

    // Her queue resumes with the follow-up digest.
    assert!(
        eventually(WAIT, || async {
            let state = alice.state.lock().await;
            state
                .agent_step
                .steps()
                .iter()
                .any(|s| s.executor == "process_message")
        })
        .await,
        "alice's queue did not resume"
    );

    let task = sync.task(&task_id).unwrap();
    assert_eq!(task.lock().await.execution_state, TaskExecutionState::Failed);
}

#[tokio::test]
async fn human_agent_relays_private_messages_without_steps() {
    let factory = ScriptedFactory::new();
    let mas = Mas::builder()
        .with_role(llm_role("manager", "mgr6", &all_skills(), &[]))
        .with_role(human_role("operator", "human-1", "secret"))
        .with_chat_factory(factory)
        .build()
        .unwrap();

    let manager = mas.agent("manager").unwrap();
    let operator = mas.agent("operator").unwrap();
    assert_eq!(operator.agent_id, "human-1");

    // An LLM agent sends the human a private message.
    mas.sync_state()
        .sync(ExecuteOutput {
            send_message: Some(Message::new(
                "task-x",
                manager.agent_id.clone(),
                vec![operator.agent_id.clone()],
                "hello operator",
            )),
            ..Default::default()
        })
        .await;

    assert!(
        eventually(WAIT, || async {
            let state = operator.state.lock().await;
            state
                .conversation_privates
                .get(&manager.agent_id)
                .is_some_and(|msgs| msgs.len() == 1)
        })
        .await,
        "private conversation did not record the message"
    );

    // No automatic step is created for a human agent.
    {
        let state = operator.state.lock().await;
        assert_eq!(state.agent_step.todo_len(), 0);
        assert!(state.agent_step.steps().is_empty());
    }

    // The dashboard serialization of the human shows the message.
    let snapshot = mas
        .monitor()
        .state(&operator.agent_id)
        .await
        .expect("operator snapshot");
    assert!(snapshot.to_string().contains("hello operator"));

    // Operator login validates against the account block.
    let ok = mas.bind_human_agent("human-1", "secret").await;
    assert!(ok.success);
    let bad = mas.bind_human_agent("human-1", "wrong").await;
    assert!(!bad.success);
}

#[tokio::test]
async fn human_operator_messages_create_retroactive_step_records() {
    let factory = ScriptedFactory::new();
    factory.script_for_model(
        "mgr7",
        [r#"<reply_message>hello human</reply_message>"#],
    );
    let mas = Mas::builder()
        .with_role(llm_role("manager", "mgr7", &all_skills(), &[]))
        .with_role(human_role("operator", "human-2", "pw"))
        .with_chat_factory(factory)
        .build()
        .unwrap();

    let operator = mas.agent("operator").unwrap();
    mas.send_private_message(
        "human-2",
        "task-y",
        "manager",
        "please reply",
        None,
        true,
        true,
        None,
    )
    .await
    .unwrap();

    // The operator action left a retroactive awaiting step.
    {
        let state = operator.state.lock().await;
        let step = state.agent_step.last_step().expect("retroactive step");
        assert_eq!(step.executor, "send_message");
        assert_eq!(step.execution_state, StepExecutionState::Awaiting);
    }

    // The manager replies; the operator's wait releases and the reply lands
    // in the private conversation.
    assert!(
        eventually(WAIT, || async {
            let state = operator.state.lock().await;
            state.agent_step.last_step().is_some_and(|s| {
                s.execution_state == StepExecutionState::Finished
                    && s.execute_result
                        .as_ref()
                        .is_some_and(|r| r.data["reply"] == "hello human")
            })
        })
        .await,
        "operator's waiting step was not released by the manager's reply"
    );
}
