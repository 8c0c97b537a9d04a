use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use tracing::{debug, error, warn};

use crate::cluster::ClusterApi;
use crate::errors::{RollbackError, RollbackFailure};
use crate::finders::ReplicaSetFinder;
use crate::planner::UpdatePlan;
use crate::progress::{self, Progress};

/// Default, and documented-behavior, monitor tick: fixed, no jitter.
pub const DEFAULT_MONITOR_TICK_MS: u64 = 100;

/// Executes an [`UpdatePlan`] against a cluster, producing a shared
/// [`Progress`] handle that the caller can poll or abort.
pub struct Engine {
    cluster: Arc<dyn ClusterApi>,
    monitor_tick: Duration,
}

impl Engine {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self::with_monitor_tick(cluster, Duration::from_millis(DEFAULT_MONITOR_TICK_MS))
    }

    pub fn with_monitor_tick(cluster: Arc<dyn ClusterApi>, monitor_tick: Duration) -> Self {
        Self { cluster, monitor_tick }
    }

    /// Captures the plan, allocates progress, and launches the background
    /// task. Returns immediately; all mutation from here on happens on the
    /// spawned task plus [`Progress::abort`].
    pub fn execute(&self, plan: UpdatePlan) -> Arc<Progress> {
        let (jobs, deployments) = plan.into_parts();
        let progress = Arc::new(Progress::new(jobs, deployments));
        let cluster = self.cluster.clone();
        let task_progress = progress.clone();
        let monitor_tick = self.monitor_tick;
        tokio::spawn(async move { run(cluster, task_progress, monitor_tick).await });
        progress
    }
}

async fn run(cluster: Arc<dyn ClusterApi>, progress: Arc<Progress>, monitor_tick: Duration) {
    if progress.finished() {
        // empty plan: already terminal from construction.
        return;
    }

    if !create_jobs(&cluster, &progress).await {
        return;
    }

    if !apply_deployments(&cluster, &progress).await {
        return;
    }

    monitor_loop(&cluster, &progress, monitor_tick).await;
}

fn namespace_name(namespace: &Option<String>, name: &Option<String>) -> (String, String) {
    (namespace.clone().unwrap_or_default(), name.clone().unwrap_or_default())
}

/// Phase 1. Returns `false` if creation failed (rollout terminated, no rollback).
async fn create_jobs(cluster: &Arc<dyn ClusterApi>, progress: &Progress) -> bool {
    for (index, job) in progress.jobs().into_iter().enumerate() {
        let (namespace, name) = namespace_name(&job.metadata.namespace, &job.metadata.name);
        match cluster.create_job(&namespace, &job).await {
            Ok(created) => progress.set_job(index, created),
            Err(e) => {
                error!(namespace, name, error = %e, "job creation failed, aborting rollout without rollback");
                progress.mark_failed();
                return false;
            }
        }
    }
    true
}

/// Phase 2. Returns `false` if an update failed; already-applied deployments
/// are rolled back before returning.
async fn apply_deployments(cluster: &Arc<dyn ClusterApi>, progress: &Progress) -> bool {
    let mut applied = Vec::new();
    for (index, deployment) in progress.deployments().into_iter().enumerate() {
        let (namespace, name) = namespace_name(&deployment.metadata.namespace, &deployment.metadata.name);
        match cluster.update_deployment(&namespace, &deployment).await {
            Ok(updated) => {
                progress.set_deployment(index, updated.clone());
                applied.push(updated);
            }
            Err(e) => {
                error!(namespace, name, error = %e, "deployment apply failed, rolling back applied deployments");
                progress.mark_failed();
                rollback(cluster, &applied).await;
                return false;
            }
        }
    }
    true
}

/// Phase 3: poll until `progress.finished()`. Individual get failures are
/// logged and skipped; a job failure marks the progress failed and rolls
/// back every deployment in the plan.
async fn monitor_loop(cluster: &Arc<dyn ClusterApi>, progress: &Progress, monitor_tick: Duration) {
    loop {
        if progress.finished() {
            return;
        }

        for (index, job) in progress.jobs().into_iter().enumerate() {
            let (namespace, name) = namespace_name(&job.metadata.namespace, &job.metadata.name);
            match cluster.get_job(&namespace, &name).await {
                Ok(refreshed) => {
                    let failed = progress::job_failed(&refreshed);
                    progress.set_job(index, refreshed);
                    if failed {
                        error!(namespace, name, "monitored job reported a failure, rolling back");
                        progress.mark_failed();
                        rollback(cluster, &progress.deployments()).await;
                        return;
                    }
                }
                Err(e) => debug!(namespace, name, error = %e, "job poll failed, will retry next tick"),
            }
        }

        for (index, deployment) in progress.deployments().into_iter().enumerate() {
            let (namespace, name) = namespace_name(&deployment.metadata.namespace, &deployment.metadata.name);
            match cluster.get_deployment(&namespace, &name).await {
                Ok(refreshed) => progress.set_deployment(index, refreshed),
                Err(e) => debug!(namespace, name, error = %e, "deployment poll failed, will retry next tick"),
            }
        }

        progress.refresh_finish_time();
        if progress.finished() {
            return;
        }
        tokio::time::sleep(monitor_tick).await;
    }
}

/// Reverts every listed deployment to the pod template of its immediately
/// preceding replica set. Stops at the first failure.
async fn rollback(cluster: &Arc<dyn ClusterApi>, deployments: &[Deployment]) {
    for deployment in deployments {
        let (namespace, name) = namespace_name(&deployment.metadata.namespace, &deployment.metadata.name);
        if let Err(e) = rollback_deployment(cluster, deployment).await {
            error!(namespace, name, error = %e, "rollback failed, leaving progress marked failed");
            return;
        }
    }
}

async fn rollback_deployment(cluster: &Arc<dyn ClusterApi>, deployment: &Deployment) -> Result<(), RollbackFailure> {
    let (namespace, name) = namespace_name(&deployment.metadata.namespace, &deployment.metadata.name);
    let finder = ReplicaSetFinder::new(cluster.clone());
    let replica_sets = finder.get_sets_for(deployment).await?;
    if replica_sets.is_empty() {
        return Err(RollbackError::NoReplicaSet.into());
    }

    let target_revision = deployment.metadata.generation.unwrap_or(0) - 1;
    let by_revision = crate::finders::index_by_revision(replica_sets);
    let target = by_revision.get(&target_revision).ok_or(RollbackError::PreviousReplicaSetNotFound)?;

    let mut reverted = deployment.clone();
    if let Some(spec) = reverted.spec.as_mut() {
        spec.template = target.spec.as_ref().and_then(|s| s.template.clone()).unwrap_or_default();
    }
    cluster.update_deployment(&namespace, &reverted).await?;
    warn!(namespace, name, target_revision, "rolled back deployment to previous replica set");
    Ok(())
}
