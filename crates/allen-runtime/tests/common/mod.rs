//! Shared helpers for the runtime integration suites.
#![allow(dead_code)]

use allen_contract::{ApiType, HumanConfig, LlmConfig, RoleConfig};
use std::future::Future;
use std::time::Duration;

/// Role config for a scripted LLM agent; the model name selects its script.
pub fn llm_role(name: &str, model: &str, skills: &[&str], tools: &[&str]) -> RoleConfig {
    RoleConfig {
        name: name.to_string(),
        role: format!("{name} role"),
        profile: format!("scripted {name}"),
        skills: skills.iter().map(|s| s.to_string()).collect(),
        tools: tools.iter().map(|t| t.to_string()).collect(),
        llm_config: Some(LlmConfig {
            api_type: ApiType::Openai,
            base_url: String::new(),
            model: model.to_string(),
            api_key: String::new(),
            max_tokens: 512,
            temperature: 0.0,
            timeout: 5,
        }),
        human_config: None,
    }
}

/// Role config for a human-driven agent.
pub fn human_role(name: &str, agent_id: &str, password: &str) -> RoleConfig {
    RoleConfig {
        name: name.to_string(),
        role: "human operator".to_string(),
        profile: String::new(),
        skills: vec!["send_message".to_string()],
        tools: Vec::new(),
        llm_config: None,
        human_config: Some(HumanConfig {
            agent_id: agent_id.to_string(),
            password: password.to_string(),
            level: 1,
        }),
    }
}

/// The full built-in skill set, for roles that may be asked to do anything.
pub fn all_skills() -> Vec<&'static str> {
    vec![
        "planning",
        "quick_think",
        "reflection",
        "summary",
        "instruction_generation",
        "send_message",
        "process_message",
        "reply_message",
        "stage_planning",
        "task_manager",
        "agent_manager",
    ]
}

/// Poll an async predicate until it holds or the timeout elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if predicate().await {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
