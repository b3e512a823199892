//! Built-in skill executors.
//!
//! Each skill is an LLM-driven step type: it assembles a prompt through the
//! base convention, runs one completion, extracts its delimited block, and
//! emits an `ExecuteOutput`. The concrete prompt wording and return formats
//! come from `SkillConfig`; the delimiter tag of each skill is fixed here.

mod agent_manager;
mod instruction_generation;
mod planning;
mod process_message;
mod quick_think;
mod reflection;
mod reply_message;
mod send_message;
mod stage_planning;
mod summary;
mod task_manager;

pub use agent_manager::AgentManagerSkill;
pub use instruction_generation::InstructionGenerationSkill;
pub use planning::PlanningSkill;
pub use process_message::ProcessMessageSkill;
pub use quick_think::QuickThinkSkill;
pub use reflection::ReflectionSkill;
pub use reply_message::ReplyMessageSkill;
pub use send_message::SendMessageSkill;
pub use stage_planning::StagePlanningSkill;
pub use summary::SummarySkill;
pub use task_manager::TaskManagerSkill;

use crate::router::ExecutorRegistry;
use allen_contract::StepKind;
use std::sync::Arc;

/// Register every built-in skill under its canonical name.
pub fn register_builtin_skills(registry: &mut ExecutorRegistry) {
    registry.register(StepKind::Skill, "planning", Arc::new(PlanningSkill));
    registry.register(StepKind::Skill, "quick_think", Arc::new(QuickThinkSkill));
    registry.register(StepKind::Skill, "reflection", Arc::new(ReflectionSkill));
    registry.register(StepKind::Skill, "summary", Arc::new(SummarySkill));
    registry.register(
        StepKind::Skill,
        "instruction_generation",
        Arc::new(InstructionGenerationSkill),
    );
    registry.register(StepKind::Skill, "send_message", Arc::new(SendMessageSkill));
    registry.register(
        StepKind::Skill,
        "process_message",
        Arc::new(ProcessMessageSkill),
    );
    registry.register(
        StepKind::Skill,
        "reply_message",
        Arc::new(ReplyMessageSkill),
    );
    registry.register(
        StepKind::Skill,
        "stage_planning",
        Arc::new(StagePlanningSkill),
    );
    registry.register(StepKind::Skill, "task_manager", Arc::new(TaskManagerSkill));
    registry.register(
        StepKind::Skill,
        "agent_manager",
        Arc::new(AgentManagerSkill),
    );
}
