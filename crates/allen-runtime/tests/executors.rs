//! Executor-level behavior: prompt contract outcomes, parse failures,
//! persistent-memory extraction, planning expansion, tool fail-fast paths.

use allen_contract::{
    AgentState, ErrorKind, StageAgentState, StepExecutionState, StepKind, StepState, WorkingState,
};
use allen_mcp::testing::{dummy_spec, EchoTransport, StaticConnector};
use allen_mcp::ToolClient;
use allen_runtime::executor::skills::{
    PlanningSkill, QuickThinkSkill, ReflectionSkill, SendMessageSkill, SummarySkill,
};
use allen_runtime::executor::tool::ToolExecutor;
use allen_runtime::executor::{Executor, ExecutorContext};
use allen_runtime::llm::testing::{scripted_config, ScriptedChat};
use allen_runtime::llm::LlmClient;
use allen_runtime::skill_defaults::default_skill_configs;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn agent(skills: &[&str], tools: &[&str]) -> AgentState {
    let mut agent = AgentState::new("a1", "tester");
    agent.role = "test role".to_string();
    AgentState::set_permissions(
        &mut agent.skills,
        skills.iter().map(|s| s.to_string()).collect(),
    );
    AgentState::set_permissions(
        &mut agent.tools,
        tools.iter().map(|t| t.to_string()).collect(),
    );
    agent
}

fn cx_with_replies(replies: &[&str]) -> ExecutorContext {
    let chat = ScriptedChat::new(replies.iter().copied());
    cx_with_chat_and_tools(Some(chat), StaticConnector::new(), &[])
}

fn cx_with_chat_and_tools(
    chat: Option<Arc<ScriptedChat>>,
    connector: Arc<StaticConnector>,
    servers: &[&str],
) -> ExecutorContext {
    let config: HashMap<_, _> = servers
        .iter()
        .map(|s| (s.to_string(), dummy_spec()))
        .collect();
    ExecutorContext {
        llm: chat.map(|c| LlmClient::new(c, scripted_config("m"))),
        tools: Arc::new(ToolClient::with_connector(config, connector)),
        skill_configs: Arc::new(default_skill_configs()),
        tool_guides: Arc::new(HashMap::new()),
        system_prompt: Arc::from("system prompt"),
    }
}

fn skill_step(agent: &mut AgentState, executor: &str, text: &str) -> String {
    let step = StepState::new("t1", "s1", "a1", "test step", StepKind::Skill, executor)
        .with_text_content(text);
    let id = step.step_id.clone();
    agent.agent_step.add_step(step);
    id
}

#[tokio::test]
async fn quick_think_finishes_with_extracted_text() {
    let cx = cx_with_replies(&["thinking <quick_think>the answer</quick_think>"]);
    let mut agent = agent(&["quick_think"], &[]);
    let step_id = skill_step(&mut agent, "quick_think", "answer the question");

    let output = QuickThinkSkill.execute(&step_id, &mut agent, &cx).await;

    let step = agent.agent_step.step(&step_id).unwrap();
    assert_eq!(step.execution_state, StepExecutionState::Finished);
    assert_eq!(step.execute_result.as_ref().unwrap().data["text"], "the answer");
    let update = output.update_stage_agent_state.unwrap();
    assert_eq!(update.state, StageAgentState::Working);
    assert!(output.send_shared_message.is_some());
}

#[tokio::test]
async fn quick_think_parse_failure_preserves_raw_response() {
    let cx = cx_with_replies(&["no delimiters here"]);
    let mut agent = agent(&["quick_think"], &[]);
    let step_id = skill_step(&mut agent, "quick_think", "answer");

    let output = QuickThinkSkill.execute(&step_id, &mut agent, &cx).await;

    let step = agent.agent_step.step(&step_id).unwrap();
    assert_eq!(step.execution_state, StepExecutionState::Failed);
    let result = step.execute_result.as_ref().unwrap();
    assert_eq!(result.error_kind, Some(ErrorKind::ExecutorParse));
    assert_eq!(result.data, json!("no delimiters here"));
    assert_eq!(
        output.update_stage_agent_state.unwrap().state,
        StageAgentState::Failed
    );
}

#[tokio::test]
async fn skill_output_appends_persistent_memory_without_dedup() {
    let response = "<quick_think>ok</quick_think>\
                    <persistent_memory>### note\nkeep going</persistent_memory>";
    let cx = cx_with_replies(&[response, response]);
    let mut agent = agent(&["quick_think"], &[]);

    let first = skill_step(&mut agent, "quick_think", "one");
    QuickThinkSkill.execute(&first, &mut agent, &cx).await;
    assert_eq!(agent.persistent_memory, "### note\nkeep going");

    let second = skill_step(&mut agent, "quick_think", "two");
    QuickThinkSkill.execute(&second, &mut agent, &cx).await;
    assert_eq!(
        agent.persistent_memory,
        "### note\nkeep going\n### note\nkeep going"
    );
}

#[tokio::test]
async fn planning_inserts_instruction_generation_before_tool_steps() {
    let cx = cx_with_replies(&[r#"<planned_step>[
        {"step_intention":"look it up","type":"tool","executor":"search","text_content":"find it"},
        {"step_intention":"wrap up","type":"skill","executor":"summary","text_content":"done"}
    ]</planned_step>"#]);
    let mut agent = agent(
        &["planning", "instruction_generation", "summary"],
        &["search"],
    );
    let step_id = skill_step(&mut agent, "planning", "plan the stage");

    PlanningSkill.execute(&step_id, &mut agent, &cx).await;

    let executors: Vec<&str> = agent
        .agent_step
        .steps()
        .iter()
        .skip(1)
        .map(|s| s.executor.as_str())
        .collect();
    assert_eq!(executors, vec!["instruction_generation", "search", "summary"]);

    let tool_step = agent
        .agent_step
        .steps()
        .iter()
        .find(|s| s.kind == StepKind::Tool)
        .unwrap();
    assert_eq!(tool_step.execution_state, StepExecutionState::Pending);
    assert!(tool_step.instruction_content.is_none());
}

#[tokio::test]
async fn planning_drops_steps_outside_permissions() {
    let cx = cx_with_replies(&[r#"<planned_step>[
        {"step_intention":"allowed","type":"skill","executor":"quick_think","text_content":"ok"},
        {"step_intention":"not allowed","type":"tool","executor":"browser","text_content":"nope"}
    ]</planned_step>"#]);
    let mut agent = agent(&["planning", "quick_think"], &[]);
    let step_id = skill_step(&mut agent, "planning", "plan");

    PlanningSkill.execute(&step_id, &mut agent, &cx).await;

    assert!(agent
        .agent_step
        .steps()
        .iter()
        .all(|s| s.executor != "browser"));
    assert!(agent
        .agent_step
        .steps()
        .iter()
        .any(|s| s.executor == "quick_think"));
}

#[tokio::test]
async fn reflection_sees_stage_history_and_appends_corrective_steps() {
    let chat = ScriptedChat::new([r#"<reflection_step>[
        {"step_intention":"retry the extraction","type":"skill","executor":"quick_think","text_content":"try again"}
    ]</reflection_step>"#]);
    let cx = cx_with_chat_and_tools(Some(chat.clone()), StaticConnector::new(), &[]);
    let mut agent = agent(&["reflection", "quick_think", "summary"], &[]);

    // A finished prior step whose result the reflection must see.
    let mut prior = StepState::new("t1", "s1", "a1", "extract the data", StepKind::Skill, "quick_think")
        .with_text_content("extract");
    prior.execution_state = StepExecutionState::Finished;
    prior.execute_result = Some(allen_contract::ExecuteResult::success(
        json!({"text": "only half the data"}),
    ));
    agent.agent_step.add_step(prior);

    let step_id = skill_step(&mut agent, "reflection", "check the stage goal");
    let output = ReflectionSkill.execute(&step_id, &mut agent, &cx).await;

    let step = agent.agent_step.step(&step_id).unwrap();
    assert_eq!(step.execution_state, StepExecutionState::Finished);
    assert_eq!(step.execute_result.as_ref().unwrap().data["reflection_steps"], 1);
    assert_eq!(
        output.update_stage_agent_state.unwrap().state,
        StageAgentState::Working
    );

    // The corrective step landed on the queue.
    assert!(agent
        .agent_step
        .steps()
        .iter()
        .any(|s| s.step_intention == "retry the extraction"));

    // The prompt carried the stage history with the prior step's result.
    let prompts = chat.prompts.lock().unwrap();
    assert!(prompts[0].contains("History steps"));
    assert!(prompts[0].contains("only half the data"));
}

#[tokio::test]
async fn reflection_closes_a_met_goal_with_a_summary_step() {
    let cx = cx_with_replies(&[r#"<reflection_step>[
        {"step_intention":"wrap up the stage","type":"skill","executor":"summary","text_content":"summarize"}
    ]</reflection_step>"#]);
    let mut agent = agent(&["reflection", "summary"], &[]);
    let step_id = skill_step(&mut agent, "reflection", "check the stage goal");

    ReflectionSkill.execute(&step_id, &mut agent, &cx).await;

    assert!(agent
        .agent_step
        .steps()
        .iter()
        .any(|s| s.executor == "summary"));
}

#[tokio::test]
async fn reflection_with_nothing_to_append_is_a_parse_failure() {
    let cx = cx_with_replies(&["<reflection_step>[]</reflection_step>"]);
    let mut agent = agent(&["reflection"], &[]);
    let step_id = skill_step(&mut agent, "reflection", "check the stage goal");

    let output = ReflectionSkill.execute(&step_id, &mut agent, &cx).await;

    let step = agent.agent_step.step(&step_id).unwrap();
    assert_eq!(step.execution_state, StepExecutionState::Failed);
    assert_eq!(
        step.execute_result.as_ref().unwrap().error_kind,
        Some(ErrorKind::ExecutorParse)
    );
    assert_eq!(
        output.update_stage_agent_state.unwrap().state,
        StageAgentState::Failed
    );
}

#[tokio::test]
async fn summary_reports_finished_state_and_completion() {
    let cx = cx_with_replies(&["<stage_summary>all done</stage_summary>"]);
    let mut agent = agent(&["summary"], &[]);
    let step_id = skill_step(&mut agent, "summary", "wrap up");

    let output = SummarySkill.execute(&step_id, &mut agent, &cx).await;

    assert_eq!(
        output.update_stage_agent_state.unwrap().state,
        StageAgentState::Finished
    );
    assert_eq!(
        output
            .update_stage_agent_completion
            .unwrap()
            .completion_summary,
        "all done"
    );
}

#[tokio::test]
async fn waiting_send_parks_the_step_and_the_agent() {
    let cx = cx_with_replies(&[
        r#"<send_message>{"receivers":["peer"],"message":"ping","need_reply":true,"waiting":true}</send_message>"#,
    ]);
    let mut agent = agent(&["send_message"], &[]);
    let step_id = skill_step(&mut agent, "send_message", "ask peer");

    let output = SendMessageSkill.execute(&step_id, &mut agent, &cx).await;

    let step = agent.agent_step.step(&step_id).unwrap();
    assert_eq!(step.execution_state, StepExecutionState::Awaiting);
    assert!(step.execute_result.is_none());
    assert_eq!(agent.working_state, WorkingState::Awaiting);

    let message = output.send_message.unwrap();
    assert!(message.waiting);
    assert!(message.need_reply);
    assert!(message.waiting_id.is_some());
    assert_eq!(message.receivers, vec!["peer".to_string()]);
}

#[tokio::test]
async fn tool_step_fails_fast_without_instruction_content() {
    let cx = cx_with_chat_and_tools(None, StaticConnector::new(), &["search"]);
    let mut agent = agent(&[], &["search"]);
    let step = StepState::new("t1", "s1", "a1", "call tool", StepKind::Tool, "search").pending();
    let step_id = step.step_id.clone();
    agent.agent_step.add_step(step);

    ToolExecutor.execute(&step_id, &mut agent, &cx).await;

    let step = agent.agent_step.step(&step_id).unwrap();
    assert_eq!(step.execution_state, StepExecutionState::Failed);
    assert_eq!(
        step.execute_result.as_ref().unwrap().error_kind,
        Some(ErrorKind::ToolInvoke)
    );
}

#[tokio::test]
async fn tool_step_requires_permission() {
    let connector = StaticConnector::new();
    connector.insert("search", EchoTransport::new(&["lookup"]));
    let cx = cx_with_chat_and_tools(None, connector, &["search"]);
    let mut agent = agent(&[], &[]);

    let mut step = StepState::new("t1", "s1", "a1", "call tool", StepKind::Tool, "search");
    step.instruction_content = Some(json!({"capability": "lookup", "arguments": {}}));
    let step_id = step.step_id.clone();
    agent.agent_step.add_step(step);

    ToolExecutor.execute(&step_id, &mut agent, &cx).await;

    let step = agent.agent_step.step(&step_id).unwrap();
    assert_eq!(step.execution_state, StepExecutionState::Failed);
}

#[tokio::test]
async fn tool_step_invokes_and_records_the_result() {
    let connector = StaticConnector::new();
    let transport = EchoTransport::new(&["lookup"]);
    connector.insert("search", transport.clone());
    let cx = cx_with_chat_and_tools(None, connector, &["search"]);
    let mut agent = agent(&[], &["search"]);

    let mut step = StepState::new("t1", "s1", "a1", "call tool", StepKind::Tool, "search");
    step.instruction_content = Some(json!({"capability": "lookup", "arguments": {"q": "rust"}}));
    let step_id = step.step_id.clone();
    agent.agent_step.add_step(step);

    let output = ToolExecutor.execute(&step_id, &mut agent, &cx).await;

    let step = agent.agent_step.step(&step_id).unwrap();
    assert_eq!(step.execution_state, StepExecutionState::Finished);
    let data = &step.execute_result.as_ref().unwrap().data;
    assert_eq!(data["result"]["echo"]["capability"], "lookup");
    assert_eq!(transport.calls.lock().unwrap().len(), 1);
    assert_eq!(
        output.update_stage_agent_state.unwrap().state,
        StageAgentState::Working
    );
}

#[tokio::test]
async fn bulk_tool_invocations_join_on_all_results() {
    let connector = StaticConnector::new();
    let transport = EchoTransport::new(&["a", "b"]);
    connector.insert("search", transport.clone());
    let cx = cx_with_chat_and_tools(None, connector, &["search"]);
    let mut agent = agent(&[], &["search"]);

    let mut step = StepState::new("t1", "s1", "a1", "parallel calls", StepKind::Tool, "search");
    step.instruction_content = Some(json!({
        "invocations": [
            {"capability": "a", "arguments": {"n": 1}},
            {"capability": "b", "arguments": {"n": 2}}
        ]
    }));
    let step_id = step.step_id.clone();
    agent.agent_step.add_step(step);

    ToolExecutor.execute(&step_id, &mut agent, &cx).await;

    let step = agent.agent_step.step(&step_id).unwrap();
    assert_eq!(step.execution_state, StepExecutionState::Finished);
    let results = step.execute_result.as_ref().unwrap().data["results"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(results.len(), 2);
    assert_eq!(transport.calls.lock().unwrap().len(), 2);
}
