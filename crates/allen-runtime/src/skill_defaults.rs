//! Built-in skill configs.
//!
//! Deployments normally load skill configs from files; these defaults keep
//! the system operational without any, and pin the delimiter each executor
//! extracts. The `return_format` of every skill names its delimiters.

use allen_contract::{SkillConfig, SkillUseGuide, SkillUsePrompt};
use std::collections::HashMap;

fn skill(name: &str, description: &str, prompt: &str, return_format: &str) -> (String, SkillConfig) {
    (
        name.to_string(),
        SkillConfig {
            use_guide: SkillUseGuide {
                skill_name: name.to_string(),
                description: description.to_string(),
            },
            use_prompt: SkillUsePrompt {
                skill_prompt: prompt.to_string(),
                return_format: return_format.to_string(),
            },
        },
    )
}

/// Config table for every built-in skill.
pub fn default_skill_configs() -> HashMap<String, SkillConfig> {
    [
        skill(
            "planning",
            "decompose the current stage goal into executable steps",
            "Plan the ordered steps you will execute to reach your stage goal. \
             Use only skills and tools you have permission for. Tool steps \
             need a preceding instruction_generation step.",
            "Return a JSON array between <planned_step> and </planned_step>; \
             each element is {\"step_intention\", \"type\": \"skill\"|\"tool\", \
             \"executor\", \"text_content\"}.",
        ),
        skill(
            "quick_think",
            "one-shot text generation without historical step context",
            "Think through the step goal and produce your answer.",
            "Return the answer between <quick_think> and </quick_think>.",
        ),
        skill(
            "reflection",
            "review executed steps against the stage goal and adjust the plan",
            "Judge from the history steps whether your stage goal is met. If \
             not, append the steps that will meet it; if it is, append a \
             summary step to close out your part of the stage. Use only \
             skills and tools you have permission for.",
            "Return a JSON array between <reflection_step> and \
             </reflection_step>; each element is {\"step_intention\", \
             \"type\": \"skill\"|\"tool\", \"executor\", \"text_content\"}.",
        ),
        skill(
            "summary",
            "summarize the finished stage work and submit completion",
            "Summarize what you accomplished for your stage goal. Submitting \
             this summary marks your part of the stage as finished.",
            "Return the summary between <stage_summary> and </stage_summary>.",
        ),
        skill(
            "instruction_generation",
            "produce the structured invocation for the next tool step",
            "Generate the concrete invocation for the pending tool step, \
             based on the tool's capability description.",
            "Return a JSON object between <tool_instruction> and \
             </tool_instruction>: {\"capability\", \"arguments\", \
             \"timeout_secs\"?} or {\"invocations\": [...]} for a parallel \
             batch.",
        ),
        skill(
            "send_message",
            "send a message to other agents",
            "Compose the message this step intends to send. Set need_reply \
             when you expect an answer and waiting when you must block until \
             it arrives.",
            "Return a JSON object between <send_message> and </send_message>: \
             {\"receivers\": [..], \"message\", \"stage_relative\"?, \
             \"need_reply\"?, \"waiting\"?}.",
        ),
        skill(
            "process_message",
            "digest an incoming message that needs no reply",
            "Read the incoming message and record what it changes for your \
             work.",
            "Return the digest between <process_message> and \
             </process_message>.",
        ),
        skill(
            "reply_message",
            "digest an incoming message and reply to its sender",
            "Read the incoming message and compose your reply to the sender.",
            "Return the reply text between <reply_message> and \
             </reply_message>.",
        ),
        skill(
            "stage_planning",
            "manager only: decompose a task into ordered stages",
            "Split the task into sequential stages and allocate agents to \
             each. Every allocation maps an agent id to its responsibility in \
             that stage.",
            "Return a JSON array between <stage_planning> and \
             </stage_planning>; each element is {\"stage_intention\", \
             \"agent_allocation\": {agent_id: responsibility}}.",
        ),
        skill(
            "task_manager",
            "manager only: create, deliver, or terminate a task",
            "Decide the task lifecycle operation this step calls for.",
            "Return a JSON object between <task_manager> and </task_manager>: \
             {\"action\": \"add_task\", \"task_name\", \"task_intention\"} or \
             {\"action\": \"finish_task\"|\"fail_task\", \"task_id\", \
             \"summary\"}.",
        ),
        skill(
            "agent_manager",
            "management: replace another agent's permission sets",
            "Decide which permission set to replace and with what.",
            "Return a JSON object between <agent_manager> and \
             </agent_manager>: {\"action\": \"update_tools\"|\"update_skills\", \
             \"agent_id\", \"names\": [..]}.",
        ),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_skill_has_a_config_with_delimiters() {
        let configs = default_skill_configs();
        for name in [
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
        ] {
            let config = configs.get(name).unwrap_or_else(|| panic!("missing {name}"));
            assert!(config.use_prompt.return_format.contains('<'));
            assert_eq!(config.use_guide.skill_name, name);
        }
    }
}
