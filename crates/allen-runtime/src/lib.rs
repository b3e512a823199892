//! Agent execution runtime for Allen.
//!
//! Wires the data model from `allen-contract` into a running system: the
//! executor registry and router, the skill/tool executors, the per-agent
//! action loops, the state synchronizer, the message dispatcher, the LLM
//! client layer, and the system container that owns all of it.

pub mod agent;
pub mod dispatch;
pub mod executor;
pub mod llm;
pub mod monitor;
pub mod router;
pub mod skill_defaults;
pub mod sync;
pub mod system;

pub use agent::{AgentDirectory, AgentDriver, AgentHandle};
pub use dispatch::DispatchCommand;
pub use executor::{Executor, ExecutorContext};
pub use llm::{ChatExecutor, ChatExecutorFactory, GenaiChatExecutor, LlmCallError, LlmClient};
pub use monitor::{StateKind, StateMonitor};
pub use router::{ExecutorRegistry, Router, RouterError};
pub use skill_defaults::default_skill_configs;
pub use sync::SyncState;
pub use system::{AgentRegistry, BindOutcome, Mas, MasBuilder};
