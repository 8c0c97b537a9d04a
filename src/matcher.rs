use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Container, PodSpec};
use std::collections::BTreeMap;

use crate::image::ImageReference;

/// Annotation carrying the rollout stream a workload opts into.
pub const UPDATE_CLASSIFIER_ANNOTATION: &str = "xcnt.io/update-classifier";

/// Read-only view of what a rollout request is targeting, consumed by the
/// matcher, the finders and the planner.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub image: ImageReference,
    pub classifier: String,
}

impl MatchConfig {
    pub fn new(image: ImageReference, classifier: impl Into<String>) -> Self {
        Self { image, classifier: classifier.into() }
    }
}

/// A workload matches iff its classifier annotation equals the configured
/// classifier *and* some container (or init container) image shares the
/// target image's repository.
pub fn matches_deployment(config: &MatchConfig, deployment: &Deployment) -> bool {
    matches_annotations(config, deployment.metadata.annotations.as_ref())
        && matches_pod_spec(config, pod_spec_of_deployment(deployment))
}

pub fn matches_job(config: &MatchConfig, job: &Job) -> bool {
    matches_annotations(config, job.metadata.annotations.as_ref())
        && matches_pod_spec(config, pod_spec_of_job(job))
}

fn pod_spec_of_deployment(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref()?.template.spec.as_ref()
}

fn pod_spec_of_job(job: &Job) -> Option<&PodSpec> {
    job.spec.as_ref()?.template.spec.as_ref()
}

fn matches_annotations(config: &MatchConfig, annotations: Option<&BTreeMap<String, String>>) -> bool {
    annotations
        .and_then(|a| a.get(UPDATE_CLASSIFIER_ANNOTATION))
        .is_some_and(|value| value == &config.classifier)
}

/// True if any container or init container in `pod_spec` has an image whose
/// repository matches the target image's repository.
pub fn matches_pod_spec(config: &MatchConfig, pod_spec: Option<&PodSpec>) -> bool {
    let Some(pod_spec) = pod_spec else { return false };
    matches_containers(config, &pod_spec.containers)
        || pod_spec
            .init_containers
            .as_deref()
            .is_some_and(|containers| matches_containers(config, containers))
}

fn matches_containers(config: &MatchConfig, containers: &[Container]) -> bool {
    containers
        .iter()
        .any(|container| matches_container(config, container))
}

fn matches_container(config: &MatchConfig, container: &Container) -> bool {
    container
        .image
        .as_deref()
        .is_some_and(|image| config.image.equals_repository(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
    use std::collections::BTreeMap;

    fn deployment_with(annotation: Option<(&str, &str)>, image: &str) -> Deployment {
        let mut annotations = BTreeMap::new();
        if let Some((key, value)) = annotation {
            annotations.insert(key.to_string(), value.to_string());
        }
        Deployment {
            metadata: ObjectMeta { annotations: Some(annotations), ..Default::default() },
            spec: Some(DeploymentSpec {
                selector: LabelSelector::default(),
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container { image: Some(image.to_string()), ..Default::default() }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn config(image: &str, classifier: &str) -> MatchConfig {
        MatchConfig::new(ImageReference::parse(image), classifier)
    }

    #[test]
    fn matches_when_annotation_and_image_repository_match() {
        let deployment = deployment_with(Some((UPDATE_CLASSIFIER_ANNOTATION, "stable")), "xcnt/test:0.9.9");
        assert!(matches_deployment(&config("xcnt/test:1.0.0", "stable"), &deployment));
    }

    #[test]
    fn does_not_match_without_annotation() {
        let deployment = deployment_with(None, "xcnt/test:0.9.9");
        assert!(!matches_deployment(&config("xcnt/test:1.0.0", "stable"), &deployment));
    }

    #[test]
    fn does_not_match_wrong_classifier() {
        let deployment = deployment_with(Some((UPDATE_CLASSIFIER_ANNOTATION, "latest")), "xcnt/test:0.9.9");
        assert!(!matches_deployment(&config("xcnt/test:1.0.0", "stable"), &deployment));
    }

    #[test]
    fn does_not_match_different_repository() {
        let deployment = deployment_with(Some((UPDATE_CLASSIFIER_ANNOTATION, "stable")), "xcnt/other:0.9.9");
        assert!(!matches_deployment(&config("xcnt/test:1.0.0", "stable"), &deployment));
    }

    #[test]
    fn matches_via_init_container() {
        let mut deployment = deployment_with(Some((UPDATE_CLASSIFIER_ANNOTATION, "stable")), "xcnt/other:0.9.9");
        deployment
            .spec
            .as_mut()
            .unwrap()
            .template
            .spec
            .as_mut()
            .unwrap()
            .init_containers = Some(vec![Container { image: Some("xcnt/test:2.0.0".to_string()), ..Default::default() }]);
        assert!(matches_deployment(&config("xcnt/test:1.0.0", "stable"), &deployment));
    }
}
