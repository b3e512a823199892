//! Executor registry and router.
//!
//! A process-wide mapping `(step kind, executor name) → executor` is built
//! once by the system container at startup and frozen; routing on the hot
//! path is a lock-free map read.

use crate::executor::Executor;
use allen_contract::StepKind;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no executor registered for {kind} '{name}'")]
    UnknownExecutor { kind: StepKind, name: String },
}

/// Mutable registry used during startup.
#[derive(Default)]
pub struct ExecutorRegistry {
    map: HashMap<(StepKind, String), Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under `(kind, name)`. Later registrations of the
    /// same pair replace earlier ones.
    pub fn register(
        &mut self,
        kind: StepKind,
        name: impl Into<String>,
        executor: Arc<dyn Executor>,
    ) -> &mut Self {
        self.map.insert((kind, name.into()), executor);
        self
    }

    /// Freeze the registry into a router. No further registration is
    /// possible afterwards.
    pub fn into_router(self) -> Router {
        Router {
            map: Arc::new(self.map),
        }
    }
}

/// Immutable routing table.
#[derive(Clone)]
pub struct Router {
    map: Arc<HashMap<(StepKind, String), Arc<dyn Executor>>>,
}

impl Router {
    /// Resolve the executor for a `(kind, name)` pair.
    pub fn route(&self, kind: StepKind, name: &str) -> Result<Arc<dyn Executor>, RouterError> {
        self.map
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| RouterError::UnknownExecutor {
                kind,
                name: name.to_string(),
            })
    }

    /// Registered executor names of one kind, sorted.
    pub fn names_of_kind(&self, kind: StepKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .map
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, n)| n.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorContext;
    use allen_contract::{AgentState, ExecuteOutput};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct NoopExecutor;

    #[async_trait]
    impl Executor for NoopExecutor {
        async fn execute(
            &self,
            _step_id: &str,
            _agent: &mut AgentState,
            _cx: &ExecutorContext,
        ) -> ExecuteOutput {
            ExecuteOutput::default()
        }
    }

    #[test]
    fn routes_registered_pairs_and_rejects_unknown() {
        let mut registry = ExecutorRegistry::new();
        registry.register(StepKind::Skill, "quick_think", Arc::new(NoopExecutor));
        let router = registry.into_router();

        assert!(router.route(StepKind::Skill, "quick_think").is_ok());
        let err = router.route(StepKind::Tool, "quick_think").unwrap_err();
        assert!(matches!(err, RouterError::UnknownExecutor { .. }));
    }

    #[test]
    fn names_of_kind_are_sorted() {
        let mut registry = ExecutorRegistry::new();
        registry.register(StepKind::Skill, "planning", Arc::new(NoopExecutor));
        registry.register(StepKind::Skill, "summary", Arc::new(NoopExecutor));
        registry.register(StepKind::Tool, "search", Arc::new(NoopExecutor));
        let router = registry.into_router();

        assert_eq!(router.names_of_kind(StepKind::Skill), vec!["planning", "summary"]);
        assert_eq!(router.names_of_kind(StepKind::Tool), vec!["search"]);
    }
}
