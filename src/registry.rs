use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::engine::Engine;
use crate::errors::{PlanError, RegistryError};
use crate::matcher::MatchConfig;
use crate::planner::{Planner, UpdatePlan};
use crate::progress::Progress;

/// Plans a rollout. Implemented by [`Planner`]; substituted by tests with a
/// stub that skips talking to a cluster.
#[async_trait]
pub trait PlanFn: Send + Sync {
    async fn plan(&self, namespaces: &[String], config: &MatchConfig) -> Result<UpdatePlan, PlanError>;
}

#[async_trait]
impl PlanFn for Planner {
    async fn plan(&self, namespaces: &[String], config: &MatchConfig) -> Result<UpdatePlan, PlanError> {
        Planner::plan(self, namespaces, config).await
    }
}

/// Executes a plan. Implemented by [`Engine`]; substituted by tests with a
/// stub that returns a pre-built progress without spawning a task.
pub trait ExecuteFn: Send + Sync {
    fn execute(&self, plan: UpdatePlan) -> Arc<Progress>;
}

impl ExecuteFn for Engine {
    fn execute(&self, plan: UpdatePlan) -> Arc<Progress> {
        Engine::execute(self, plan)
    }
}

/// Default reap threshold for finished entries: 10 minutes.
pub const DEFAULT_REAP_THRESHOLD_SECS: i64 = 600;

/// In-memory, single-process index from request id to live [`Progress`].
///
/// The planner and engine are held as trait objects so tests can substitute
/// stubs without touching a real cluster.
pub struct Registry {
    entries: DashMap<Uuid, Arc<Progress>>,
    planner: Arc<dyn PlanFn>,
    engine: Arc<dyn ExecuteFn>,
    reap_threshold: ChronoDuration,
}

impl Registry {
    pub fn new(planner: Arc<dyn PlanFn>, engine: Arc<dyn ExecuteFn>, reap_threshold: ChronoDuration) -> Self {
        Self { entries: DashMap::new(), planner, engine, reap_threshold }
    }

    /// Plans then schedules a rollout. No entry is created if planning fails.
    pub async fn create(&self, namespaces: &[String], config: &MatchConfig) -> Result<(Uuid, Arc<Progress>), RegistryError> {
        let plan = self.planner.plan(namespaces, config).await?;
        Ok(self.schedule(plan))
    }

    /// Submits an already-built plan directly, bypassing the planner.
    pub fn schedule(&self, plan: UpdatePlan) -> (Uuid, Arc<Progress>) {
        let id = Uuid::new_v4();
        let progress = self.engine.execute(plan);
        self.entries.insert(id, progress.clone());
        (id, progress)
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<Progress>, RegistryError> {
        self.entries.get(&id).map(|entry| entry.clone()).ok_or(RegistryError::NotFound)
    }

    /// Parse failure is an invalid-argument condition, distinct from not-found.
    pub fn get_by_string(&self, id: &str) -> Result<Arc<Progress>, RegistryError> {
        let id = Uuid::parse_str(id)?;
        self.get(id)
    }

    /// No-op if `id` is absent.
    pub fn delete(&self, id: Uuid) {
        self.entries.remove(&id);
    }

    /// No-op if `id` does not parse or is absent.
    pub fn delete_by_string(&self, id: &str) {
        if let Ok(id) = Uuid::parse_str(id) {
            self.delete(id);
        }
    }

    /// Removes every entry that finished at least `reap_threshold` ago.
    pub fn cleanup(&self) {
        let now = Utc::now();
        self.entries.retain(|_, progress| match progress.finish_time() {
            Some(finish_time) => now - finish_time < self.reap_threshold,
            None => true,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageReference;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::batch::v1::Job;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum StubPlanner {
        Succeeds(UpdatePlan),
        Fails,
    }

    fn stub_plan_error() -> PlanError {
        PlanError::ListNamespaces(crate::errors::ClusterError::from(kube::Error::Service(
            Box::<dyn std::error::Error + Send + Sync>::from("boom"),
        )))
    }

    #[async_trait]
    impl PlanFn for StubPlanner {
        async fn plan(&self, _namespaces: &[String], _config: &MatchConfig) -> Result<UpdatePlan, PlanError> {
            match self {
                StubPlanner::Succeeds(plan) => Ok(plan.clone()),
                StubPlanner::Fails => Err(stub_plan_error()),
            }
        }
    }

    struct StubEngine {
        calls: AtomicUsize,
    }

    impl StubEngine {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0) }
        }
    }

    impl ExecuteFn for StubEngine {
        fn execute(&self, plan: UpdatePlan) -> Arc<Progress> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (jobs, deployments) = plan.into_parts();
            Arc::new(Progress::new(jobs, deployments))
        }
    }

    fn config() -> MatchConfig {
        MatchConfig::new(ImageReference::parse("xcnt/test:1.0.0"), "stable")
    }

    #[tokio::test]
    async fn create_delegates_to_planner_and_schedules_on_success() {
        let planner = Arc::new(StubPlanner::Succeeds(UpdatePlan::default()));
        let engine = Arc::new(StubEngine::new());
        let registry = Registry::new(planner, engine.clone(), ChronoDuration::seconds(DEFAULT_REAP_THRESHOLD_SECS));

        let (id, progress) = registry.create(&["default".to_string()], &config()).await.unwrap();
        assert!(progress.successful());
        assert!(registry.get(id).is_ok());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn create_returns_plan_error_without_creating_an_entry() {
        let planner = Arc::new(StubPlanner::Fails);
        let engine = Arc::new(StubEngine::new());
        let registry = Registry::new(planner, engine, ChronoDuration::seconds(DEFAULT_REAP_THRESHOLD_SECS));

        let result = registry.create(&["default".to_string()], &config()).await;
        assert!(matches!(result, Err(RegistryError::PlanFailure(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn get_by_string_distinguishes_invalid_id_from_not_found() {
        let planner = Arc::new(StubPlanner::Succeeds(UpdatePlan::default()));
        let engine = Arc::new(StubEngine::new());
        let registry = Registry::new(planner, engine, ChronoDuration::seconds(DEFAULT_REAP_THRESHOLD_SECS));

        assert!(matches!(registry.get_by_string("not-a-uuid"), Err(RegistryError::InvalidId(_))));
        assert!(matches!(registry.get_by_string(&Uuid::new_v4().to_string()), Err(RegistryError::NotFound)));
    }

    #[test]
    fn delete_by_string_is_a_noop_for_unparseable_or_absent_ids() {
        let planner = Arc::new(StubPlanner::Succeeds(UpdatePlan::default()));
        let engine = Arc::new(StubEngine::new());
        let registry = Registry::new(planner, engine, ChronoDuration::seconds(DEFAULT_REAP_THRESHOLD_SECS));

        registry.delete_by_string("garbage");
        registry.delete_by_string(&Uuid::new_v4().to_string());
        assert!(registry.is_empty());
    }

    #[test]
    fn cleanup_reaps_finished_entries_past_the_threshold() {
        let planner = Arc::new(StubPlanner::Succeeds(UpdatePlan::default()));
        let engine = Arc::new(StubEngine::new());
        // a threshold of zero means "reap as soon as finished" for this test.
        let registry = Registry::new(planner, engine, ChronoDuration::zero());

        let finished_id = Uuid::new_v4();
        let finished_progress = Arc::new(Progress::new(Vec::<Job>::new(), Vec::<Deployment>::new()));
        registry.entries.insert(finished_id, finished_progress);

        let running_id = Uuid::new_v4();
        let running_progress = Arc::new(Progress::new(vec![Job::default()], Vec::<Deployment>::new()));
        registry.entries.insert(running_id, running_progress);

        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.cleanup();

        assert!(matches!(registry.get(finished_id), Err(RegistryError::NotFound)));
        assert!(registry.get(running_id).is_ok());
    }
}
