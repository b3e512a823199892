//! System container: owns the agent registry, the synchronizer, the
//! dispatcher, and the tool client; wires startup and the first task.

use crate::agent::{AgentDirectory, AgentDriver, AgentHandle};
use crate::dispatch::{run_dispatcher, DispatchCommand};
use crate::executor::skills::register_builtin_skills;
use crate::executor::tool::ToolExecutor;
use crate::executor::ExecutorContext;
use crate::llm::{ChatExecutorFactory, GenaiFactory, LlmClient};
use crate::monitor::StateMonitor;
use crate::router::{ExecutorRegistry, Router};
use crate::skill_defaults::default_skill_configs;
use crate::sync::SyncState;
use allen_contract::{
    gen_id, AgentId, AgentState, ConfigError, ExecuteOutput, ExecuteResult, LlmConfig,
    McpServerSpec, Message, RoleConfig, SharedNote, SkillConfig, StageAgentCompletion,
    StageAgentState, StagePolicy, StepExecutionState, StepKind, StepState, ToolServerConfig,
    UpdateStageAgentState, WorkingState, NO_STAGE, NO_TASK,
};
use allen_mcp::{ToolClient, TransportConnector};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_SYSTEM_PROMPT: &str = "You are one agent of Allen, a multi-agent system in which \
    agents collaborate on user-submitted tasks through planned stages and steps. Follow the \
    return format of the current skill exactly.";

/// Shared runtime dependencies injected into the registry after the wiring
/// phase, so agent spawns can build workers.
struct RuntimeShared {
    router: Router,
    sync: Arc<SyncState>,
    tools: Arc<ToolClient>,
    skill_configs: Arc<HashMap<String, SkillConfig>>,
    tool_guides: Arc<HashMap<String, String>>,
    system_prompt: Arc<str>,
    chat_factory: Arc<dyn ChatExecutorFactory>,
}

/// Live agent registry; the system's implementation of [`AgentDirectory`].
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, AgentHandle>>,
    names: RwLock<HashMap<String, AgentId>>,
    roles: RwLock<HashMap<String, RoleConfig>>,
    default_llm: Option<LlmConfig>,
    role_dir: Option<PathBuf>,
    runtime: OnceLock<RuntimeShared>,
}

impl AgentRegistry {
    fn new(
        roles: Vec<RoleConfig>,
        default_llm: Option<LlmConfig>,
        role_dir: Option<PathBuf>,
    ) -> Self {
        let roles = roles
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect::<HashMap<_, _>>();
        Self {
            agents: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
            roles: RwLock::new(roles),
            default_llm,
            role_dir,
            runtime: OnceLock::new(),
        }
    }

    fn install(&self, runtime: RuntimeShared) {
        let _ = self.runtime.set(runtime);
    }

    /// Instantiate an agent from a role config and start its worker (LLM
    /// agents only; human loops are driven by operator actions).
    fn spawn_agent(&self, role: &RoleConfig) -> Option<AgentHandle> {
        let runtime = self.runtime.get()?;

        let (agent_id, driver) = match &role.human_config {
            Some(human) if !human.agent_id.is_empty() => {
                (human.agent_id.clone(), AgentDriver::Human)
            }
            Some(_) => (gen_id(), AgentDriver::Human),
            None => (gen_id(), AgentDriver::Llm),
        };

        let mut state = AgentState::new(agent_id.clone(), role.name.clone());
        state.role = role.role.clone();
        state.profile = role.profile.clone();
        AgentState::set_permissions(&mut state.skills, role.skills.clone());
        AgentState::set_permissions(&mut state.tools, role.tools.clone());
        state.human_config = role.human_config.clone();
        state.llm_config = match driver {
            AgentDriver::Human => None,
            AgentDriver::Llm => role
                .llm_config
                .clone()
                .or_else(|| self.default_llm.clone()),
        };
        if driver == AgentDriver::Llm && state.llm_config.is_none() {
            error!(role = %role.name, "llm agent without llm config; not spawned");
            return None;
        }

        // Persist a generated human agent id back to its config file.
        if driver == AgentDriver::Human
            && role.human_config.as_ref().is_some_and(|h| h.agent_id.is_empty())
        {
            if let Some(dir) = &self.role_dir {
                let mut updated = role.clone();
                if let Some(human) = updated.human_config.as_mut() {
                    human.agent_id = agent_id.clone();
                }
                let path = dir.join(format!("{}.json", role.name));
                if let Err(e) = updated.write_to(&path) {
                    warn!(role = %role.name, error = %e, "failed to persist generated human agent id");
                } else {
                    self.roles
                        .write()
                        .unwrap()
                        .insert(updated.name.clone(), updated);
                }
            }
        }

        let handle = AgentHandle::new(state, driver);
        self.agents
            .write()
            .unwrap()
            .insert(agent_id.clone(), handle.clone());
        self.names
            .write()
            .unwrap()
            .insert(role.name.clone(), agent_id.clone());

        if driver == AgentDriver::Llm {
            let llm_config = {
                // Present by construction for LLM agents.
                role.llm_config
                    .clone()
                    .or_else(|| self.default_llm.clone())
            };
            let cx = ExecutorContext {
                llm: llm_config
                    .map(|cfg| LlmClient::new(runtime.chat_factory.for_config(&cfg), cfg)),
                tools: runtime.tools.clone(),
                skill_configs: runtime.skill_configs.clone(),
                tool_guides: runtime.tool_guides.clone(),
                system_prompt: runtime.system_prompt.clone(),
            };
            tokio::spawn(crate::agent::worker::run_agent_worker(
                handle.clone(),
                runtime.router.clone(),
                runtime.sync.clone(),
                cx,
            ));
        }

        info!(agent_id = %agent_id, name = %role.name, driver = ?driver, "agent spawned");
        Some(handle)
    }
}

#[async_trait]
impl AgentDirectory for AgentRegistry {
    fn handle(&self, agent_id: &str) -> Option<AgentHandle> {
        if let Some(handle) = self.agents.read().unwrap().get(agent_id) {
            return Some(handle.clone());
        }
        let id = self.names.read().unwrap().get(agent_id).cloned()?;
        self.agents.read().unwrap().get(&id).cloned()
    }

    async fn ensure_agent(&self, agent_id: &str) -> Option<AgentHandle> {
        if let Some(handle) = self.handle(agent_id) {
            return Some(handle);
        }
        let role = self.roles.read().unwrap().get(agent_id).cloned();
        match role {
            Some(role) => self.spawn_agent(&role),
            None => {
                // Dynamically referenced agent without a predefined role:
                // fall back to the default LLM config.
                self.default_llm.as_ref()?;
                let role = RoleConfig {
                    name: agent_id.to_string(),
                    role: "agent".to_string(),
                    profile: String::new(),
                    skills: vec![
                        "planning".into(),
                        "quick_think".into(),
                        "reflection".into(),
                        "summary".into(),
                        "instruction_generation".into(),
                        "send_message".into(),
                        "process_message".into(),
                        "reply_message".into(),
                    ],
                    tools: Vec::new(),
                    llm_config: self.default_llm.clone(),
                    human_config: None,
                };
                self.spawn_agent(&role)
            }
        }
    }

    fn all_handles(&self) -> Vec<AgentHandle> {
        self.agents.read().unwrap().values().cloned().collect()
    }
}

/// Outcome of a human operator bind attempt.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BindOutcome {
    pub success: bool,
    pub human_agent_id: String,
    pub message: String,
}

/// The multi-agent system container.
pub struct Mas {
    registry: Arc<AgentRegistry>,
    sync: Arc<SyncState>,
    monitor: StateMonitor,
    tools: Arc<ToolClient>,
    dispatch_tx: mpsc::UnboundedSender<DispatchCommand>,
    dispatcher: JoinHandle<()>,
}

impl Mas {
    pub fn builder() -> MasBuilder {
        MasBuilder::default()
    }

    /// Post a user task: the manager issues a task-creation step.
    pub async fn submit_task(&self, intention: &str) {
        let Some(manager) = self.registry.ensure_agent("manager").await else {
            error!("no manager agent; task not submitted");
            return;
        };
        let step = StepState::new(
            NO_TASK,
            NO_STAGE,
            manager.agent_id.clone(),
            "create a task for the user request",
            StepKind::Skill,
            "task_manager",
        )
        .with_text_content(intention.to_string());
        manager.add_step(step).await;
    }

    /// Dashboard accessors.
    pub fn monitor(&self) -> &StateMonitor {
        &self.monitor
    }

    /// Offline-save hook: the full serializable view of all four state
    /// kinds.
    pub async fn export_states(&self) -> serde_json::Value {
        self.monitor.export_states().await
    }

    /// Offline-load hook. Restoring live state is future work; the hook
    /// exists so callers have a stable seam.
    pub fn import_states(&self, _snapshot: serde_json::Value) -> Result<(), &'static str> {
        Err("offline state import is not supported yet")
    }

    pub fn sync_state(&self) -> Arc<SyncState> {
        self.sync.clone()
    }

    pub fn agent(&self, agent_id: &str) -> Option<AgentHandle> {
        self.registry.handle(agent_id)
    }

    pub fn directory(&self) -> Arc<dyn AgentDirectory> {
        self.registry.clone()
    }

    /// Validate an operator login against the agent's account block.
    pub async fn bind_human_agent(&self, human_agent_id: &str, password: &str) -> BindOutcome {
        let Some(handle) = self.registry.handle(human_agent_id) else {
            return BindOutcome {
                success: false,
                human_agent_id: human_agent_id.to_string(),
                message: "no such human agent".to_string(),
            };
        };
        let state = handle.state.lock().await;
        match &state.human_config {
            Some(human) if human.password == password => BindOutcome {
                success: true,
                human_agent_id: state.agent_id.clone(),
                message: "bound".to_string(),
            },
            Some(_) => BindOutcome {
                success: false,
                human_agent_id: human_agent_id.to_string(),
                message: "wrong password".to_string(),
            },
            None => BindOutcome {
                success: false,
                human_agent_id: human_agent_id.to_string(),
                message: "agent is not human-driven".to_string(),
            },
        }
    }

    /// Human operator sends a private message. The step record is inserted
    /// retroactively, after the action.
    pub async fn send_private_message(
        &self,
        human_agent_id: &str,
        task_id: &str,
        receiver: &str,
        content: &str,
        stage_relative: Option<&str>,
        need_reply: bool,
        waiting: bool,
        return_waiting_id: Option<&str>,
    ) -> Result<(), String> {
        self.send_human_message(
            human_agent_id,
            task_id,
            vec![receiver.to_string()],
            content,
            stage_relative,
            need_reply,
            waiting,
            return_waiting_id,
        )
        .await
    }

    /// Human operator sends a group message: per-receiver deliveries sharing
    /// one waiting id.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_group_message(
        &self,
        human_agent_id: &str,
        task_id: &str,
        receivers: Vec<String>,
        content: &str,
        stage_relative: Option<&str>,
        need_reply: bool,
        waiting: bool,
        return_waiting_id: Option<&str>,
    ) -> Result<(), String> {
        self.send_human_message(
            human_agent_id,
            task_id,
            receivers,
            content,
            stage_relative,
            need_reply,
            waiting,
            return_waiting_id,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_human_message(
        &self,
        human_agent_id: &str,
        task_id: &str,
        receivers: Vec<String>,
        content: &str,
        stage_relative: Option<&str>,
        need_reply: bool,
        waiting: bool,
        return_waiting_id: Option<&str>,
    ) -> Result<(), String> {
        let handle = self
            .registry
            .handle(human_agent_id)
            .ok_or_else(|| format!("no such agent: {human_agent_id}"))?;

        let mut message = Message::new(
            task_id.to_string(),
            handle.agent_id.clone(),
            receivers,
            content.to_string(),
        );
        if let Some(stage) = stage_relative {
            message = message.with_stage(stage.to_string());
        }
        if need_reply {
            message = message.with_need_reply();
        }
        if waiting {
            message = message.with_waiting(gen_id());
        }
        if let Some(id) = return_waiting_id {
            message = message.with_return_waiting_id(id.to_string());
        }

        // Retroactive step record for the operator action.
        {
            let mut state = handle.state.lock().await;
            let mut step = StepState::new(
                task_id.to_string(),
                message.stage_relative.clone(),
                handle.agent_id.clone(),
                "operator sent a message",
                StepKind::Skill,
                "send_message",
            )
            .with_text_content(content.to_string());
            if waiting {
                step.execution_state = StepExecutionState::Awaiting;
                state.working_state = WorkingState::Awaiting;
            } else {
                step.execution_state = StepExecutionState::Finished;
                step.execute_result = Some(ExecuteResult::success(json!({ "sent": content })));
            }
            state.note_working_memory(task_id, &step.stage_id.clone(), &step.step_id.clone());
            state.agent_step.add_step(step);
        }

        self.dispatch_tx
            .send(DispatchCommand::Deliver(message))
            .map_err(|_| "dispatcher stopped".to_string())
    }

    /// Human operator submits stage completion; the summary step record is
    /// inserted retroactively and the synchronizer applies the completion.
    pub async fn human_complete_stage(
        &self,
        human_agent_id: &str,
        task_id: &str,
        stage_id: &str,
        summary: &str,
        failed: bool,
    ) -> Result<(), String> {
        let handle = self
            .registry
            .handle(human_agent_id)
            .ok_or_else(|| format!("no such agent: {human_agent_id}"))?;

        let role = {
            let mut state = handle.state.lock().await;
            let mut step = StepState::new(
                task_id.to_string(),
                stage_id.to_string(),
                handle.agent_id.clone(),
                "operator submitted stage completion",
                StepKind::Skill,
                "summary",
            )
            .with_text_content(summary.to_string());
            step.execution_state = if failed {
                StepExecutionState::Failed
            } else {
                StepExecutionState::Finished
            };
            step.execute_result = Some(ExecuteResult::success(json!({ "summary": summary })));
            state.agent_step.add_step(step);
            state.role.clone()
        };

        let output = ExecuteOutput {
            update_stage_agent_state: Some(UpdateStageAgentState {
                task_id: task_id.to_string(),
                stage_id: stage_id.to_string(),
                agent_id: handle.agent_id.clone(),
                state: if failed {
                    StageAgentState::Failed
                } else {
                    StageAgentState::Finished
                },
            }),
            update_stage_agent_completion: Some(StageAgentCompletion {
                task_id: task_id.to_string(),
                stage_id: stage_id.to_string(),
                agent_id: handle.agent_id.clone(),
                completion_summary: summary.to_string(),
            }),
            send_shared_message: Some(SharedNote {
                task_id: task_id.to_string(),
                stage_id: stage_id.to_string(),
                agent_id: handle.agent_id.clone(),
                role,
                content: format!("operator stage completion: {summary}"),
            }),
            ..Default::default()
        };
        self.sync.sync(output).await;
        Ok(())
    }

    /// Stop every agent loop, then the dispatcher, then the tool client.
    pub async fn shutdown(self) {
        for handle in self.registry.all_handles() {
            handle.request_shutdown();
        }
        let _ = self.dispatch_tx.send(DispatchCommand::Shutdown);
        let _ = self.dispatcher.await;
        self.tools.close();
        info!("system shut down");
    }
}

/// Builder wiring the whole system.
pub struct MasBuilder {
    roles: Vec<RoleConfig>,
    skills: HashMap<String, SkillConfig>,
    tool_servers: HashMap<String, McpServerSpec>,
    tool_guides: HashMap<String, String>,
    policy: StagePolicy,
    system_prompt: String,
    chat_factory: Arc<dyn ChatExecutorFactory>,
    tool_connector: Option<Arc<dyn TransportConnector>>,
    default_llm: Option<LlmConfig>,
    role_dir: Option<PathBuf>,
}

impl Default for MasBuilder {
    fn default() -> Self {
        Self {
            roles: Vec::new(),
            skills: default_skill_configs(),
            tool_servers: HashMap::new(),
            tool_guides: HashMap::new(),
            policy: StagePolicy::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            chat_factory: Arc::new(GenaiFactory),
            tool_connector: None,
            default_llm: None,
            role_dir: None,
        }
    }
}

impl MasBuilder {
    #[must_use]
    pub fn with_role(mut self, role: RoleConfig) -> Self {
        self.roles.push(role);
        self
    }

    /// Load every role config in a directory (requires `manager`); generated
    /// human agent ids are persisted back into this directory.
    pub fn with_role_dir(mut self, dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let dir = dir.into();
        let roles = allen_contract::config::load_role_dir(&dir)?;
        self.roles.extend(roles);
        self.role_dir = Some(dir);
        Ok(self)
    }

    #[must_use]
    pub fn with_skill_config(mut self, config: SkillConfig) -> Self {
        self.skills
            .insert(config.use_guide.skill_name.clone(), config);
        self
    }

    #[must_use]
    pub fn with_tool_server(
        mut self,
        name: impl Into<String>,
        spec: McpServerSpec,
        description: impl Into<String>,
    ) -> Self {
        let name = name.into();
        self.tool_guides.insert(name.clone(), description.into());
        self.tool_servers.insert(name, spec);
        self
    }

    /// Fold one tool-server config file into the builder.
    #[must_use]
    pub fn with_tool_server_config(mut self, config: ToolServerConfig) -> Self {
        for (name, spec) in config.config.mcp_servers {
            self.tool_guides
                .insert(name.clone(), config.use_guide.description.clone());
            self.tool_servers.insert(name, spec);
        }
        self
    }

    #[must_use]
    pub fn with_stage_policy(mut self, policy: StagePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Fallback config for agents created dynamically without a predefined
    /// role config.
    #[must_use]
    pub fn with_default_llm(mut self, config: LlmConfig) -> Self {
        self.default_llm = Some(config);
        self
    }

    #[must_use]
    pub fn with_chat_factory(mut self, factory: Arc<dyn ChatExecutorFactory>) -> Self {
        self.chat_factory = factory;
        self
    }

    #[must_use]
    pub fn with_tool_connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.tool_connector = Some(connector);
        self
    }

    /// Wire and start the system: registry, router, tool client, sync,
    /// dispatcher, and every configured agent (the `manager` role is
    /// mandatory).
    pub fn build(self) -> Result<Mas, ConfigError> {
        if !self.roles.iter().any(|r| r.name == "manager") {
            return Err(ConfigError::MissingManager("builder roles".to_string()));
        }

        let registry = Arc::new(AgentRegistry::new(
            self.roles.clone(),
            self.default_llm,
            self.role_dir,
        ));

        let mut executor_registry = ExecutorRegistry::new();
        register_builtin_skills(&mut executor_registry);
        let tool_executor = Arc::new(ToolExecutor);
        for name in self.tool_servers.keys() {
            executor_registry.register(StepKind::Tool, name.clone(), tool_executor.clone());
        }
        let router = executor_registry.into_router();

        let tools = Arc::new(match self.tool_connector {
            Some(connector) => ToolClient::with_connector(self.tool_servers, connector),
            None => ToolClient::new(self.tool_servers),
        });

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let directory: Arc<dyn AgentDirectory> = registry.clone();
        let sync = Arc::new(SyncState::new(
            directory.clone(),
            dispatch_tx.clone(),
            self.policy,
        ));

        registry.install(RuntimeShared {
            router,
            sync: sync.clone(),
            tools: tools.clone(),
            skill_configs: Arc::new(self.skills),
            tool_guides: Arc::new(self.tool_guides),
            system_prompt: Arc::from(self.system_prompt.as_str()),
            chat_factory: self.chat_factory,
        });

        let dispatcher = tokio::spawn(run_dispatcher(dispatch_rx, directory.clone()));

        // Instantiate every configured role at startup.
        for role in &self.roles {
            if registry.handle(&role.name).is_none() {
                registry.spawn_agent(role);
            }
        }

        let monitor = StateMonitor::new(sync.clone(), directory);
        Ok(Mas {
            registry,
            sync,
            monitor,
            tools,
            dispatch_tx,
            dispatcher,
        })
    }
}
