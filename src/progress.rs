use std::sync::RwLock;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;

/// `true` once a job has recorded at least one successful pod completion.
pub fn job_finished(job: &Job) -> bool {
    job.status.as_ref().and_then(|status| status.succeeded).unwrap_or(0) > 0
}

/// `true` once a job has recorded at least one failed pod.
pub fn job_failed(job: &Job) -> bool {
    job.status.as_ref().and_then(|status| status.failed).unwrap_or(0) > 0
}

/// `true` once the deployment's controller has observed the latest spec
/// generation and every desired replica is ready.
pub fn deployment_finished(deployment: &Deployment) -> bool {
    let generation = deployment.metadata.generation.unwrap_or(0);
    let status = deployment.status.as_ref();
    let observed_generation = status.and_then(|s| s.observed_generation).unwrap_or(-1);
    let replicas = status.and_then(|s| s.replicas).unwrap_or(0);
    let ready_replicas = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    generation == observed_generation && replicas == ready_replicas
}

struct ProgressState {
    jobs: Vec<Job>,
    deployments: Vec<Deployment>,
    failed: bool,
    finish_time: Option<DateTime<Utc>>,
}

/// Mutable status record tracking a single rollout's execution.
///
/// Written only by its own engine task and by [`Progress::abort`], which may
/// be called from any thread. Readers take a snapshot under the same lock so
/// a caller never observes a torn combination of fields.
pub struct Progress {
    state: RwLock<ProgressState>,
}

impl Progress {
    pub fn new(jobs: Vec<Job>, deployments: Vec<Deployment>) -> Self {
        let state = ProgressState { jobs, deployments, failed: false, finish_time: None };
        let progress = Self { state: RwLock::new(state) };
        progress.refresh_finish_time();
        progress
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.state.read().unwrap().jobs.clone()
    }

    pub fn deployments(&self) -> Vec<Deployment> {
        self.state.read().unwrap().deployments.clone()
    }

    pub fn job_count(&self) -> usize {
        self.state.read().unwrap().jobs.len()
    }

    pub fn deployment_count(&self) -> usize {
        self.state.read().unwrap().deployments.len()
    }

    /// Overwrites the live job reference at `index` with a freshly observed one.
    pub fn set_job(&self, index: usize, job: Job) {
        let mut state = self.state.write().unwrap();
        if let Some(slot) = state.jobs.get_mut(index) {
            *slot = job;
        }
    }

    /// Overwrites the live deployment reference at `index` with a freshly observed one.
    pub fn set_deployment(&self, index: usize, deployment: Deployment) {
        let mut state = self.state.write().unwrap();
        if let Some(slot) = state.deployments.get_mut(index) {
            *slot = deployment;
        }
    }

    /// Marks the progress as failed and, if this is the first terminal
    /// observation, stamps the finish time. Idempotent.
    pub fn mark_failed(&self) {
        {
            let mut state = self.state.write().unwrap();
            state.failed = true;
        }
        self.refresh_finish_time();
    }

    /// Re-evaluates `finished` and stamps `finish_time` on first terminal
    /// transition. Called after every mutation that could change status.
    pub fn refresh_finish_time(&self) {
        let mut state = self.state.write().unwrap();
        if state.finish_time.is_none() && is_finished(&state.jobs, &state.deployments, state.failed) {
            state.finish_time = Some(Utc::now());
        }
    }

    /// Cancels tracking of this rollout. Does not trigger a rollback: this
    /// is "stop tracking", not "undo".
    pub fn abort(&self) {
        self.mark_failed();
    }

    pub fn failed(&self) -> bool {
        self.state.read().unwrap().failed
    }

    pub fn successful(&self) -> bool {
        let state = self.state.read().unwrap();
        is_successful(&state.jobs, &state.deployments)
    }

    pub fn finished(&self) -> bool {
        let state = self.state.read().unwrap();
        is_finished(&state.jobs, &state.deployments, state.failed)
    }

    pub fn finish_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().unwrap().finish_time
    }

    pub fn finished_jobs_count(&self) -> usize {
        self.state.read().unwrap().jobs.iter().filter(|job| job_finished(job)).count()
    }

    pub fn updated_deployments_count(&self) -> usize {
        self.state.read().unwrap().deployments.iter().filter(|d| deployment_finished(d)).count()
    }
}

fn is_successful(jobs: &[Job], deployments: &[Deployment]) -> bool {
    jobs.iter().all(job_finished) && deployments.iter().all(deployment_finished)
}

fn is_finished(jobs: &[Job], deployments: &[Deployment], failed: bool) -> bool {
    failed || is_successful(jobs, deployments)
}
