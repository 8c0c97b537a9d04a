use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Node;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::info;

use crate::errors::ClusterError;

/// Narrow capability interface the core needs from the orchestration API.
///
/// Every call may fail; failures are retriable by the caller except where
/// the engine documents otherwise (phase-1 job creation, rollback).
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError>;

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>, ClusterError>;
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, ClusterError>;
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ClusterError>;
    async fn update_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, ClusterError>;
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError>;

    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, ClusterError>;

    /// Used by the HTTP surface's `/health` route to verify API server reachability.
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError>;
}

/// Production [`ClusterApi`] backed by a real `kube::Client`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn replica_sets(&self, namespace: &str) -> Api<ReplicaSet> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>, ClusterError> {
        let namespaces: Api<k8s_openapi::api::core::v1::Namespace> = Api::all(self.client.clone());
        let list = namespaces.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(|ns| ns.name_any()).collect())
    }

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>, ClusterError> {
        let list = self.jobs(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<Job, ClusterError> {
        Ok(self.jobs(namespace).create(&PostParams::default(), job).await?)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job, ClusterError> {
        Ok(self.jobs(namespace).get(name).await?)
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, ClusterError> {
        let list = self.deployments(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn update_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        let name = deployment.name_any();
        Ok(self
            .deployments(namespace)
            .replace(&name, &PostParams::default(), deployment)
            .await?)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        Ok(self.deployments(namespace).get(name).await?)
    }

    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSet>, ClusterError> {
        let list = self.replica_sets(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list.items)
    }
}

/// Builds the in-cluster (or kubeconfig-derived) client and logs the
/// connected API server version.
pub async fn create_client() -> anyhow::Result<Client> {
    let client = Client::try_default().await?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to Kubernetes API server with version {}.{}",
        api_server_info.major, api_server_info.minor
    );
    Ok(client)
}
