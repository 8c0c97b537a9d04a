use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::batch::v1::Job;

use crate::cluster::ClusterApi;
use crate::errors::ClusterError;
use crate::matcher::{self, MatchConfig};

/// Annotation holding a replica set's revision relative to its owning deployment.
pub const REPLICA_SET_REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// Returned when listing workloads across namespaces fails partway through:
/// the items already collected are preserved alongside the error that ended
/// the scan, matching the "listing failure propagates immediately, partial
/// result returned alongside it" behavior of the finders.
#[derive(Debug)]
pub struct PartialListError<T> {
    pub collected: Vec<T>,
    pub source: ClusterError,
}

impl<T: fmt::Debug> fmt::Display for PartialListError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listing failed after collecting {} item(s): {}", self.collected.len(), self.source)
    }
}

impl<T: fmt::Debug> std::error::Error for PartialListError<T> {}

/// Enumerates deployments across the configured namespaces that match a [`MatchConfig`].
pub struct DeploymentFinder {
    cluster: Arc<dyn ClusterApi>,
}

impl DeploymentFinder {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    pub async fn list(&self, namespaces: &[String], config: &MatchConfig) -> Result<Vec<Deployment>, PartialListError<Deployment>> {
        let mut deployments = Vec::new();
        for namespace in namespaces {
            match self.list_for(namespace, config).await {
                Ok(namespace_deployments) => deployments.extend(namespace_deployments),
                Err(source) => return Err(PartialListError { collected: deployments, source }),
            }
        }
        Ok(deployments)
    }

    pub async fn list_for(&self, namespace: &str, config: &MatchConfig) -> Result<Vec<Deployment>, ClusterError> {
        let all = self.cluster.list_deployments(namespace).await?;
        Ok(all.into_iter().filter(|deployment| matcher::matches_deployment(config, deployment)).collect())
    }
}

/// Enumerates migration job templates across the configured namespaces that match a [`MatchConfig`].
pub struct JobFinder {
    cluster: Arc<dyn ClusterApi>,
}

impl JobFinder {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    pub async fn list(&self, namespaces: &[String], config: &MatchConfig) -> Result<Vec<Job>, PartialListError<Job>> {
        let mut jobs = Vec::new();
        for namespace in namespaces {
            match self.list_for(namespace, config).await {
                Ok(namespace_jobs) => jobs.extend(namespace_jobs),
                Err(source) => return Err(PartialListError { collected: jobs, source }),
            }
        }
        Ok(jobs)
    }

    pub async fn list_for(&self, namespace: &str, config: &MatchConfig) -> Result<Vec<Job>, ClusterError> {
        let all = self.cluster.list_jobs(namespace).await?;
        Ok(all.into_iter().filter(|job| matcher::matches_job(config, job)).collect())
    }
}

/// Resolves the replica-set history of a deployment, oldest revision first.
pub struct ReplicaSetFinder {
    cluster: Arc<dyn ClusterApi>,
}

impl ReplicaSetFinder {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Replica sets owned by `deployment`, sorted ascending by revision. A
    /// missing or non-integer revision annotation sorts first (`-1`).
    pub async fn get_sets_for(&self, deployment: &Deployment) -> Result<Vec<ReplicaSet>, ClusterError> {
        let namespace = deployment.metadata.namespace.as_deref().unwrap_or_default();
        let deployment_name = deployment.metadata.name.as_deref().unwrap_or_default();
        let all = self.get_sets_for_namespace(namespace).await?;
        let mut owned: Vec<ReplicaSet> = all
            .into_iter()
            .filter(|replica_set| owned_by_deployment(replica_set, deployment_name))
            .collect();
        owned.sort_by_key(revision_of);
        Ok(owned)
    }

    pub async fn get_sets_for_namespace(&self, namespace: &str) -> Result<Vec<ReplicaSet>, ClusterError> {
        self.cluster.list_replica_sets(namespace).await
    }
}

fn owned_by_deployment(replica_set: &ReplicaSet, deployment_name: &str) -> bool {
    replica_set
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|owners| owners.iter().any(|owner| owner.kind == "Deployment" && owner.name == deployment_name))
}

/// Revision annotation as an integer; missing or unparsable yields `-1`.
pub fn revision_of(replica_set: &ReplicaSet) -> i64 {
    replica_set
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(REPLICA_SET_REVISION_ANNOTATION))
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(-1)
}

/// Indexes a slice of replica sets by their revision for rollback lookups.
pub fn index_by_revision(replica_sets: Vec<ReplicaSet>) -> HashMap<i64, ReplicaSet> {
    replica_sets.into_iter().map(|rs| (revision_of(&rs), rs)).collect()
}
