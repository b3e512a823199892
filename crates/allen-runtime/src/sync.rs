//! State synchronizer: the single mutator of task and stage state.
//!
//! Applies the fields of an `ExecuteOutput` in a fixed order, with
//! `send_message` always after state mutations so a recipient cannot observe
//! a stale stage. Tasks are locked individually so unrelated tasks advance
//! in parallel; agent queues are only touched after the task lock is
//! released.

use crate::agent::AgentDirectory;
use crate::dispatch::DispatchCommand;
use allen_contract::{
    AgentId, AgentState, ExecuteOutput, Message, StageExecutionState, StageId, StagePlan,
    StagePolicy, StageState, StepKind, StepState, TaskExecutionState, TaskId, TaskState,
    UpdateStageAgentState, NO_STAGE,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

/// One planning step to enqueue after a stage activation.
struct PlanningAssignment {
    task_id: TaskId,
    stage_id: StageId,
    agent_id: AgentId,
    stage_intention: String,
    responsibility: String,
}

/// Effects of a task-advance pass, applied after the task lock is released.
#[derive(Default)]
struct AdvanceEffects {
    assignments: Vec<PlanningAssignment>,
    ended_task: Option<TaskId>,
    manager_notice: Option<Message>,
}

/// The single synchronizer instance. Holds the `task_id → Task` registry and
/// is the only component permitted to mutate tasks and stages.
pub struct SyncState {
    tasks: RwLock<HashMap<TaskId, Arc<Mutex<TaskState>>>>,
    policy: StagePolicy,
    directory: Arc<dyn AgentDirectory>,
    dispatch_tx: mpsc::UnboundedSender<DispatchCommand>,
    shared_log_retention: usize,
}

impl SyncState {
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        dispatch_tx: mpsc::UnboundedSender<DispatchCommand>,
        policy: StagePolicy,
    ) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            policy,
            directory,
            dispatch_tx,
            shared_log_retention: allen_contract::state::task::DEFAULT_SHARED_LOG_RETENTION,
        }
    }

    #[must_use]
    pub fn with_shared_log_retention(mut self, retention: usize) -> Self {
        self.shared_log_retention = retention;
        self
    }

    /// Handle to one task's state.
    pub fn task(&self, task_id: &str) -> Option<Arc<Mutex<TaskState>>> {
        self.tasks.read().unwrap().get(task_id).cloned()
    }

    /// All registered task handles.
    pub fn all_tasks(&self) -> Vec<Arc<Mutex<TaskState>>> {
        self.tasks.read().unwrap().values().cloned().collect()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.read().unwrap().keys().cloned().collect()
    }

    /// Apply one executor output. Every field is independent and idempotent;
    /// they are applied in the fixed §sync order with `send_message` last.
    pub async fn sync(&self, output: ExecuteOutput) {
        if let Some(update) = &output.update_stage_agent_state {
            self.apply_stage_agent_state(update).await;
        }
        if let Some(completion) = &output.update_stage_agent_completion {
            if let Some(task_arc) = self.task(&completion.task_id) {
                let mut task = task_arc.lock().await;
                if let Some(stage) = task.stage_mut(&completion.stage_id) {
                    stage.update_agent_completion(
                        &completion.agent_id,
                        completion.completion_summary.clone(),
                    );
                }
            }
        }
        if let Some(note) = &output.send_shared_message {
            self.apply_shared_message(note).await;
        }
        if let Some(add) = &output.add_task {
            self.apply_add_task(add).await;
        }
        if let Some(add) = &output.add_stage {
            self.apply_add_stage(add).await;
        }
        if let Some(update) = &output.update_task_state {
            self.apply_task_state(update).await;
        }
        if let Some(update) = &output.update_agent_tools {
            self.apply_permissions(&update.agent_id, update.names.clone(), true)
                .await;
        }
        if let Some(update) = &output.update_agent_skills {
            self.apply_permissions(&update.agent_id, update.names.clone(), false)
                .await;
        }
        if let Some(message) = output.send_message {
            let _ = self.dispatch_tx.send(DispatchCommand::Deliver(message));
        }
    }

    async fn apply_stage_agent_state(&self, update: &UpdateStageAgentState) {
        let Some(task_arc) = self.task(&update.task_id) else {
            // Steps outside any task (bootstrap) report here; nothing to do.
            return;
        };

        let effects = {
            let mut task = task_arc.lock().await;
            let Some(stage) = task.stage_mut(&update.stage_id) else {
                return;
            };
            if stage.execution_state.is_terminal() {
                // Re-applied output; the stage already settled.
                return;
            }
            stage.update_agent_state(&update.agent_id, update.state);
            info!(
                task_id = %update.task_id,
                stage_id = %update.stage_id,
                agent_id = %update.agent_id,
                state = ?update.state,
                "stage agent state updated"
            );

            if !stage.is_complete() {
                return;
            }
            let terminal = stage.terminal_state(self.policy);
            stage.execution_state = terminal;
            let summary = format!(
                "stage '{}' settled as {:?}",
                stage.stage_intention, terminal
            );
            let stage_id = stage.stage_id.clone();
            task.add_shared_message("system", "system", stage_id, summary);
            let mut effects = Self::advance(&mut task);
            if terminal == StageExecutionState::Failed {
                effects.manager_notice = Some(Self::failure_notice(&task, &update.stage_id));
            }
            Self::verify_invariants(&task);
            effects
        };
        self.apply_effects(effects).await;
    }

    async fn apply_shared_message(&self, note: &allen_contract::SharedNote) {
        let Some(task_arc) = self.task(&note.task_id) else {
            return;
        };
        let mut task = task_arc.lock().await;
        // Identical consecutive entries collapse so re-applied outputs leave
        // the log unchanged.
        let duplicate = task.shared_context(1).first().is_some_and(|last| {
            last.agent_id == note.agent_id
                && last.stage_id == note.stage_id
                && last.content == note.content
        });
        if !duplicate {
            task.add_shared_message(
                note.agent_id.clone(),
                note.role.clone(),
                note.stage_id.clone(),
                note.content.clone(),
            );
        }
    }

    async fn apply_add_task(&self, add: &allen_contract::AddTask) {
        // Re-applied outputs must not register a second task.
        let existing = self.all_tasks();
        for arc in existing {
            let task = arc.lock().await;
            if task.task_name == add.task_name
                && task.task_intention == add.task_intention
                && task.task_manager == add.manager_id
                && !task.execution_state.is_terminal()
            {
                return;
            }
        }

        let task = TaskState::new(
            add.task_name.clone(),
            add.task_intention.clone(),
            add.manager_id.clone(),
        )
        .with_shared_log_retention(self.shared_log_retention);
        let task_id = task.task_id.clone();
        info!(task_id = %task_id, manager = %add.manager_id, "task registered");
        self.tasks
            .write()
            .unwrap()
            .insert(task_id.clone(), Arc::new(Mutex::new(task)));

        // The manager plans the stages as its next step.
        if let Some(manager) = self.directory.ensure_agent(&add.manager_id).await {
            let step = StepState::new(
                task_id,
                NO_STAGE,
                add.manager_id.clone(),
                "plan the stages of the new task",
                StepKind::Skill,
                "stage_planning",
            )
            .with_text_content(add.task_intention.clone());
            manager.add_step(step).await;
        } else {
            error!(manager = %add.manager_id, "task manager could not be instantiated");
        }
    }

    async fn apply_add_stage(&self, add: &allen_contract::AddStage) {
        let Some(task_arc) = self.task(&add.task_id) else {
            warn!(task_id = %add.task_id, "add_stage for unknown task");
            return;
        };

        // Resolve allocations to live agent ids before taking the task
        // lock, instantiating absent agents from role config.
        let mut plans: Vec<StagePlan> = Vec::new();
        for plan in &add.stages {
            let mut allocation = BTreeMap::new();
            for (who, responsibility) in &plan.agent_allocation {
                match self.directory.ensure_agent(who).await {
                    Some(handle) => {
                        allocation.insert(handle.agent_id.clone(), responsibility.clone());
                    }
                    None => {
                        warn!(agent = %who, "allocated agent cannot be instantiated; dropped");
                    }
                }
            }
            plans.push(StagePlan {
                stage_intention: plan.stage_intention.clone(),
                agent_allocation: allocation,
            });
        }

        let effects = {
            let mut task = task_arc.lock().await;
            for plan in &plans {
                if Self::has_equivalent_stage(&task, plan) {
                    continue;
                }
                let stage = StageState::new(
                    add.task_id.clone(),
                    plan.stage_intention.clone(),
                    plan.agent_allocation.clone(),
                );
                info!(task_id = %add.task_id, stage_id = %stage.stage_id, "stage added");
                task.add_stage(stage);
            }
            let effects = if task.running_stage().is_none() && !task.execution_state.is_terminal()
            {
                Self::advance(&mut task)
            } else {
                AdvanceEffects::default()
            };
            Self::verify_invariants(&task);
            effects
        };
        self.apply_effects(effects).await;
    }

    async fn apply_task_state(&self, update: &allen_contract::UpdateTaskState) {
        let Some(task_arc) = self.task(&update.task_id) else {
            return;
        };
        let became_terminal = {
            let mut task = task_arc.lock().await;
            let was_terminal = task.execution_state.is_terminal();
            task.execution_state = update.state;
            if let Some(summary) = &update.summary {
                task.task_summary = summary.clone();
            }
            !was_terminal && task.execution_state.is_terminal()
        };
        if became_terminal {
            info!(task_id = %update.task_id, state = ?update.state, "task state overridden to terminal");
            self.finish_task_cleanup(&update.task_id).await;
        }
    }

    async fn apply_permissions(&self, agent_id: &str, names: Vec<String>, tools: bool) {
        let Some(handle) = self.directory.handle(agent_id) else {
            warn!(agent_id = %agent_id, "permission update for unknown agent");
            return;
        };
        let mut state = handle.state.lock().await;
        if tools {
            AgentState::set_permissions(&mut state.tools, names);
        } else {
            AgentState::set_permissions(&mut state.skills, names);
        }
    }

    /// Walk the stage plan: activate the next runnable stage (empty
    /// allocations settle immediately), or settle the task when every stage
    /// is terminal.
    fn advance(task: &mut TaskState) -> AdvanceEffects {
        let mut effects = AdvanceEffects::default();
        loop {
            let next = task
                .current_or_next_stage()
                .map(|s| (s.stage_id.clone(), s.execution_state));
            match next {
                Some((_, StageExecutionState::Running)) => break,
                Some((stage_id, _)) => {
                    let task_id = task.task_id.clone();
                    let Some(stage) = task.stage_mut(&stage_id) else {
                        break;
                    };
                    if stage.agent_allocation.is_empty() {
                        // An empty stage is finished immediately upon
                        // activation.
                        stage.execution_state = StageExecutionState::Finished;
                        let note = format!("stage '{}' had no agents; finished", stage.stage_intention);
                        task.add_shared_message("system", "system", stage_id, note);
                        task.execution_state = TaskExecutionState::Running;
                        continue;
                    }
                    stage.execution_state = StageExecutionState::Running;
                    let intention = stage.stage_intention.clone();
                    for (agent_id, responsibility) in &stage.agent_allocation {
                        effects.assignments.push(PlanningAssignment {
                            task_id: task_id.clone(),
                            stage_id: stage_id.clone(),
                            agent_id: agent_id.clone(),
                            stage_intention: intention.clone(),
                            responsibility: responsibility.clone(),
                        });
                    }
                    task.execution_state = TaskExecutionState::Running;
                    info!(task_id = %task.task_id, stage_id = %stage_id, "stage running");
                    break;
                }
                None => {
                    if task.execution_state.is_terminal() {
                        break;
                    }
                    if task.stages.is_empty() {
                        // Zero stages at planning completion: finished with
                        // an empty summary.
                        task.execution_state = TaskExecutionState::Finished;
                        effects.ended_task = Some(task.task_id.clone());
                        break;
                    }
                    if task.all_stages_settled() {
                        let last_finished = task
                            .stages
                            .last()
                            .is_some_and(|s| s.execution_state == StageExecutionState::Finished);
                        if last_finished {
                            task.execution_state = TaskExecutionState::Finished;
                            task.add_shared_message(
                                "system",
                                "system",
                                NO_STAGE,
                                "all stages finished; task finished",
                            );
                            effects.ended_task = Some(task.task_id.clone());
                        }
                        // A failed last stage leaves the task running: the
                        // manager observes the failure and may remediate.
                    }
                    break;
                }
            }
        }
        effects
    }

    fn has_equivalent_stage(task: &TaskState, plan: &StagePlan) -> bool {
        task.stages.iter().any(|s| {
            !s.execution_state.is_terminal()
                && s.stage_intention == plan.stage_intention
                && s.agent_allocation == plan.agent_allocation
        })
    }

    fn failure_notice(task: &TaskState, stage_id: &str) -> Message {
        let detail = task
            .stage(stage_id)
            .map(|stage| {
                format!(
                    "stage '{}' failed.\nagent states: {:?}\ncompletion summaries: {:?}\n\
                     You may remediate by planning a replacement stage or by \
                     terminating the task.",
                    stage.stage_intention, stage.agent_states, stage.completion_summary
                )
            })
            .unwrap_or_else(|| format!("stage {stage_id} failed"));
        Message::new(
            task.task_id.clone(),
            "system",
            vec![task.task_manager.clone()],
            detail,
        )
        .with_stage(stage_id.to_string())
    }

    async fn apply_effects(&self, effects: AdvanceEffects) {
        for assignment in effects.assignments {
            let Some(handle) = self.directory.ensure_agent(&assignment.agent_id).await else {
                error!(agent_id = %assignment.agent_id, "assigned agent could not be instantiated");
                continue;
            };
            let step = StepState::new(
                assignment.task_id.clone(),
                assignment.stage_id.clone(),
                assignment.agent_id.clone(),
                "plan the steps for the current stage",
                StepKind::Skill,
                "planning",
            )
            .with_text_content(format!(
                "Stage goal: {}\nYour responsibility: {}",
                assignment.stage_intention, assignment.responsibility
            ));
            handle.add_step(step).await;
        }
        if let Some(notice) = effects.manager_notice {
            let _ = self.dispatch_tx.send(DispatchCommand::Deliver(notice));
        }
        if let Some(task_id) = effects.ended_task {
            self.finish_task_cleanup(&task_id).await;
        }
    }

    async fn finish_task_cleanup(&self, task_id: &str) {
        let _ = self
            .dispatch_tx
            .send(DispatchCommand::TaskEnded(task_id.to_string()));
        if let Some(arc) = self.task(task_id) {
            let group = { arc.lock().await.task_group.clone() };
            for agent_id in group {
                if let Some(handle) = self.directory.handle(&agent_id) {
                    let mut state = handle.state.lock().await;
                    state.working_memory.remove(task_id);
                }
            }
        }
    }

    /// Cross-entity invariants re-checked after every mutation. A violation
    /// indicates programmer error and is logged as fatal.
    fn verify_invariants(task: &TaskState) {
        let running = task
            .stages
            .iter()
            .filter(|s| s.execution_state == StageExecutionState::Running)
            .count();
        if running > 1 {
            error!(
                task_id = %task.task_id,
                running,
                "sync/invariant-violated: more than one running stage"
            );
        }
        for stage in &task.stages {
            for agent_id in stage.agent_allocation.keys() {
                if !task.task_group.contains(agent_id) {
                    error!(
                        task_id = %task.task_id,
                        stage_id = %stage.stage_id,
                        agent_id = %agent_id,
                        "sync/invariant-violated: allocated agent missing from task group"
                    );
                }
            }
        }
    }
}
