//! Message dispatcher: the single routing authority for inter-agent
//! messages and reply correlation.
//!
//! One task owns the inbound channel. FIFO order per (sender, receiver)
//! pair follows from the single channel plus per-agent ordered queues; no
//! cross-sender ordering is guaranteed.

use crate::agent::AgentDirectory;
use allen_contract::{AgentId, ErrorKind, Message, StepId, TaskId, WaitingId, TASK_ENDED};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Commands consumed by the dispatcher task.
#[derive(Debug)]
pub enum DispatchCommand {
    /// Route a message to its receivers.
    Deliver(Message),
    /// A task reached a terminal state: release its outstanding waits with a
    /// synthetic `task-ended` reply.
    TaskEnded(TaskId),
    /// Stop the dispatcher.
    Shutdown,
}

struct WaitEntry {
    task_id: TaskId,
    sender_id: AgentId,
    step_id: StepId,
}

/// Run the dispatcher until shutdown.
pub async fn run_dispatcher(
    mut rx: mpsc::UnboundedReceiver<DispatchCommand>,
    directory: Arc<dyn AgentDirectory>,
) {
    info!("message dispatcher started");
    let mut waits: HashMap<WaitingId, WaitEntry> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            DispatchCommand::Shutdown => break,
            DispatchCommand::Deliver(message) => {
                deliver(&directory, &mut waits, message).await;
            }
            DispatchCommand::TaskEnded(task_id) => {
                release_task_waits(&directory, &mut waits, &task_id).await;
            }
        }
    }
    info!("message dispatcher stopped");
}

async fn deliver(
    directory: &Arc<dyn AgentDirectory>,
    waits: &mut HashMap<WaitingId, WaitEntry>,
    message: Message,
) {
    // Reply correlation comes first: a matching reply releases the parked
    // sender exactly once; a duplicated reply is discarded.
    if let Some(return_id) = &message.return_waiting_id {
        match waits.remove(return_id) {
            Some(entry) => {
                if let Some(handle) = directory.handle(&entry.sender_id) {
                    handle.release_waiting(&entry.step_id, &message).await;
                    debug!(
                        waiting_id = %return_id,
                        sender = %entry.sender_id,
                        "waiting sender released"
                    );
                }
            }
            None => {
                debug!(waiting_id = %return_id, "duplicated or stale reply discarded");
            }
        }
        return;
    }

    if message.receivers.is_empty() {
        warn!(sender = %message.sender_id, "message with zero receivers rejected");
        error_reply(directory, &message, "message had no receivers").await;
        return;
    }

    for receiver in &message.receivers {
        match directory.handle(receiver) {
            Some(handle) => handle.receive_message(&message).await,
            None => {
                warn!(receiver = %receiver, "unknown receiver");
                error_reply(
                    directory,
                    &message,
                    &format!("unknown receiver '{receiver}'"),
                )
                .await;
            }
        }
    }

    // Group messages share one waiting id; the first matching reply
    // releases the sender.
    if message.waiting {
        let Some(waiting_id) = message.waiting_id.clone() else {
            warn!(sender = %message.sender_id, "waiting message without waiting_id");
            return;
        };
        let Some(sender) = directory.handle(&message.sender_id) else {
            return;
        };
        match sender.awaiting_step_id().await {
            Some(step_id) => {
                waits.insert(
                    waiting_id,
                    WaitEntry {
                        task_id: message.task_id.clone(),
                        sender_id: message.sender_id.clone(),
                        step_id,
                    },
                );
            }
            None => {
                warn!(sender = %message.sender_id, "waiting message but no awaiting step");
            }
        }
    }
}

/// Deliver a synthetic `dispatch/unknown-receiver` error reply to the sender.
async fn error_reply(directory: &Arc<dyn AgentDirectory>, original: &Message, detail: &str) {
    let Some(sender) = directory.handle(&original.sender_id) else {
        return;
    };
    let error_message = Message::new(
        original.task_id.clone(),
        "system",
        vec![original.sender_id.clone()],
        format!(
            "delivery-error ({}): {detail}",
            ErrorKind::DispatchUnknownReceiver
        ),
    )
    .with_stage(original.stage_relative.clone());
    sender.receive_message(&error_message).await;
}

/// Release every wait scoped to a terminal task with a `task-ended`
/// synthetic reply.
async fn release_task_waits(
    directory: &Arc<dyn AgentDirectory>,
    waits: &mut HashMap<WaitingId, WaitEntry>,
    task_id: &str,
) {
    let released: Vec<(WaitingId, WaitEntry)> = {
        let ids: Vec<WaitingId> = waits
            .iter()
            .filter(|(_, entry)| entry.task_id == task_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| waits.remove(&id).map(|entry| (id, entry)))
            .collect()
    };

    for (waiting_id, entry) in released {
        info!(task_id = %task_id, sender = %entry.sender_id, "releasing wait of ended task");
        let Some(handle) = directory.handle(&entry.sender_id) else {
            continue;
        };
        let synthetic = Message::new(
            task_id.to_string(),
            "system",
            vec![entry.sender_id.clone()],
            TASK_ENDED,
        )
        .with_return_waiting_id(waiting_id);
        handle.release_waiting(&entry.step_id, &synthetic).await;
    }
}
