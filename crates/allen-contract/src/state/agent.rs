//! Per-agent state: identity, permissions, memories, step container, and the
//! rolling dialogue context used by LLM-driven agents.

use crate::config::{HumanConfig, LlmConfig};
use crate::state::step::AgentStep;
use crate::{AgentId, StageId, StepId, TaskId, WaitingId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};

/// Global working state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkingState {
    /// No task involvement yet.
    Unassigned,
    /// Involved in a task but the step queue is empty.
    Idle,
    /// Executing steps.
    Working,
    /// Parked on an outstanding waiting message.
    Awaiting,
}

/// Role of one dialogue turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of the rolling dialogue context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Ring buffer of the last N dialogue turns.
///
/// The system/role preamble is not stored here; executors re-prepend it on
/// every call, so trimming old turns never loses the preamble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueContext {
    context_size: usize,
    turns: VecDeque<ChatTurn>,
}

impl DialogueContext {
    pub fn new(context_size: usize) -> Self {
        Self {
            context_size: context_size.max(1),
            turns: VecDeque::new(),
        }
    }

    /// Append a turn, evicting the oldest beyond `2 * context_size` entries
    /// (a turn-count bound over user/assistant pairs).
    pub fn push(&mut self, role: ChatRole, content: impl Into<String>) {
        self.turns.push_back(ChatTurn {
            role,
            content: content.into(),
        });
        while self.turns.len() > self.context_size * 2 {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ChatTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// One entry of a human agent's private conversation with a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub sender_id: AgentId,
    pub content: String,
    pub stage_relative: StageId,
    pub timestamp: DateTime<Utc>,
    pub need_reply: bool,
    pub waiting: bool,
    pub return_waiting_id: Option<WaitingId>,
}

/// The complete state of one agent. Different agents differ only in their
/// `AgentState`; the surrounding loop code is identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: AgentId,
    pub name: String,
    pub role: String,
    pub profile: String,
    pub working_state: WorkingState,
    /// LLM configuration; `None` for human-driven agents.
    pub llm_config: Option<LlmConfig>,
    /// Operator account info; `None` for LLM-driven agents.
    pub human_config: Option<HumanConfig>,
    /// Task-view of open involvement: task → stage → ordered step ids.
    /// A maintained view; `agent_step` is the canonical record.
    pub working_memory: BTreeMap<TaskId, BTreeMap<StageId, Vec<StepId>>>,
    /// Bounded plain-text scratchpad preserved across tasks/stages/steps.
    /// Only heading levels of depth >= 3 may appear.
    pub persistent_memory: String,
    /// Step queue and historical step list.
    pub agent_step: AgentStep,
    /// Tool-server names this agent may invoke (ordered, deduplicated).
    pub tools: Vec<String>,
    /// Skill names this agent may use (ordered, deduplicated).
    pub skills: Vec<String>,
    /// Rolling dialogue context (LLM agents).
    pub dialogue: DialogueContext,
    /// Peer agent id → ordered private message list (human agents).
    pub conversation_privates: BTreeMap<AgentId, Vec<PrivateMessage>>,
}

impl AgentState {
    pub fn new(agent_id: impl Into<AgentId>, name: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            agent_step: AgentStep::new(agent_id.clone()),
            agent_id,
            name: name.into(),
            role: String::new(),
            profile: String::new(),
            working_state: WorkingState::Unassigned,
            llm_config: None,
            human_config: None,
            working_memory: BTreeMap::new(),
            persistent_memory: String::new(),
            tools: Vec::new(),
            skills: Vec::new(),
            dialogue: DialogueContext::new(15),
            conversation_privates: BTreeMap::new(),
        }
    }

    pub fn is_human(&self) -> bool {
        self.human_config.is_some()
    }

    pub fn has_tool(&self, server_name: &str) -> bool {
        self.tools.iter().any(|t| t == server_name)
    }

    pub fn has_skill(&self, skill_name: &str) -> bool {
        self.skills.iter().any(|s| s == skill_name)
    }

    /// Replace a permission set, keeping order and dropping duplicates.
    pub fn set_permissions(target: &mut Vec<String>, names: Vec<String>) {
        target.clear();
        for name in names {
            if !target.contains(&name) {
                target.push(name);
            }
        }
    }

    /// Append a self-authored fragment to persistent memory.
    ///
    /// Heading lines of depth 1 or 2 are dropped silently; depth >= 3 and
    /// everything else is appended verbatim. No deduplication.
    pub fn append_persistent_memory(&mut self, fragment: &str) {
        let filtered: Vec<&str> = fragment
            .lines()
            .filter(|line| {
                let trimmed = line.trim_start();
                let hashes = trimmed.chars().take_while(|c| *c == '#').count();
                let rest = &trimmed[hashes..];
                let is_heading =
                    hashes > 0 && (rest.is_empty() || rest.starts_with([' ', '\t']));
                !(is_heading && hashes < 3)
            })
            .collect();
        if filtered.is_empty() {
            return;
        }
        if !self.persistent_memory.is_empty() {
            self.persistent_memory.push('\n');
        }
        self.persistent_memory.push_str(&filtered.join("\n"));
    }

    /// Record a step under the working-memory view.
    pub fn note_working_memory(&mut self, task_id: &str, stage_id: &str, step_id: &str) {
        self.working_memory
            .entry(task_id.to_string())
            .or_default()
            .entry(stage_id.to_string())
            .or_default()
            .push(step_id.to_string());
    }

    /// Drop a stage from the working-memory view (stage teardown).
    pub fn forget_stage(&mut self, task_id: &str, stage_id: &str) {
        if let Some(stages) = self.working_memory.get_mut(task_id) {
            stages.remove(stage_id);
            if stages.is_empty() {
                self.working_memory.remove(task_id);
            }
        }
    }

    /// Read-only snapshot for dashboard inspection. The todo queue is
    /// rendered as its current size plus the materialized id list per the
    /// placeholder rules.
    pub fn snapshot(&self) -> Value {
        json!({
            "kind": "agent",
            "agent_id": self.agent_id,
            "name": self.name,
            "role": self.role,
            "profile": self.profile,
            "working_state": self.working_state,
            "driver": if self.is_human() { "human" } else { "llm" },
            "working_memory": self.working_memory,
            "persistent_memory": self.persistent_memory,
            "todo_queue": {
                "len": self.agent_step.todo_len(),
                "step_ids": self.agent_step.todo_ids(),
            },
            "steps": self.agent_step.steps().iter().map(|s| s.step_id.clone()).collect::<Vec<_>>(),
            "tools": self.tools,
            "skills": self.skills,
            "dialogue_turns": self.dialogue.len(),
            "conversation_privates": self.conversation_privates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialogue_context_is_a_ring_buffer() {
        let mut ctx = DialogueContext::new(2);
        for i in 0..6 {
            let role = if i % 2 == 0 {
                ChatRole::User
            } else {
                ChatRole::Assistant
            };
            ctx.push(role, format!("turn {i}"));
        }
        assert_eq!(ctx.len(), 4);
        assert_eq!(ctx.turns().next().unwrap().content, "turn 2");
    }

    #[test]
    fn persistent_memory_drops_shallow_headings() {
        let mut agent = AgentState::new("a1", "tester");
        agent.append_persistent_memory("# title\n## sub\n### note\nkeep going");
        assert_eq!(agent.persistent_memory, "### note\nkeep going");
    }

    #[test]
    fn persistent_memory_appends_without_dedup() {
        let mut agent = AgentState::new("a1", "tester");
        agent.append_persistent_memory("### note\nkeep going");
        agent.append_persistent_memory("### note\nkeep going");
        assert_eq!(
            agent.persistent_memory,
            "### note\nkeep going\n### note\nkeep going"
        );
    }

    #[test]
    fn hash_in_text_is_not_a_heading() {
        let mut agent = AgentState::new("a1", "tester");
        agent.append_persistent_memory("#1 ranked idea\nuse #hashtags");
        assert_eq!(agent.persistent_memory, "#1 ranked idea\nuse #hashtags");
    }

    #[test]
    fn set_permissions_deduplicates_preserving_order() {
        let mut agent = AgentState::new("a1", "tester");
        AgentState::set_permissions(
            &mut agent.tools,
            vec!["search".into(), "browser".into(), "search".into()],
        );
        assert_eq!(agent.tools, vec!["search".to_string(), "browser".into()]);
    }

    #[test]
    fn working_memory_view_tracks_and_forgets() {
        let mut agent = AgentState::new("a1", "tester");
        agent.note_working_memory("t1", "s1", "step-1");
        agent.note_working_memory("t1", "s1", "step-2");
        assert_eq!(agent.working_memory["t1"]["s1"].len(), 2);
        agent.forget_stage("t1", "s1");
        assert!(agent.working_memory.is_empty());
    }
}
