use thiserror::Error;

/// Failure talking to the cluster orchestration API.
///
/// Wraps the underlying client error so it can still be logged, while giving
/// callers in the core a single type to match on.
#[derive(Debug, Error)]
#[error("cluster API call failed: {source}")]
pub struct ClusterError {
    #[from]
    source: kube::Error,
}

impl ClusterError {
    pub fn source(&self) -> &kube::Error {
        &self.source
    }
}

/// Errors the planner can return while building an [`crate::planner::UpdatePlan`].
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("failed to list deployments: {0}")]
    ListDeployments(#[source] ClusterError),
    #[error("failed to list jobs: {0}")]
    ListJobs(#[source] ClusterError),
    #[error("failed to list namespaces: {0}")]
    ListNamespaces(#[source] ClusterError),
}

/// Errors the rollback path can return; the engine logs these and leaves the
/// progress marked `failed` without retrying.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RollbackError {
    #[error("deployment has no replica sets attached")]
    NoReplicaSet,
    #[error("the replica set preceding the current one was not found")]
    PreviousReplicaSetNotFound,
}

/// Errors that can abort a single deployment's rollback.
#[derive(Debug, Error)]
pub enum RollbackFailure {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Rollback(#[from] RollbackError),
}

/// Errors surfaced synchronously by the [`crate::registry::Registry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no update progress found for the given id")]
    NotFound,
    #[error("id is not a valid UUID")]
    InvalidId(#[from] uuid::Error),
    #[error("failed to plan the update: {0}")]
    PlanFailure(#[from] PlanError),
}
