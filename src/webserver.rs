use std::sync::Arc;

use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::auth::is_authorized;
use crate::cluster::ClusterApi;
use crate::config::Config;
use crate::errors::RegistryError;
use crate::image::ImageReference;
use crate::matcher::MatchConfig;
use crate::progress::Progress;
use crate::registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub cluster: Arc<dyn ClusterApi>,
    pub config: Arc<Config>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/updates", post(create_update))
        .route("/updates/{uuid}", get(get_update).delete(delete_update))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.cluster.list_nodes().await {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(e) => {
            error!(error = %e, "health check failed to list nodes");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateUpdateForm {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    update_classifier: Option<String>,
}

async fn create_update(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<CreateUpdateForm>) -> impl IntoResponse {
    if !authorized(&headers, &state) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let image = form.image.unwrap_or_default();
    let update_classifier = form.update_classifier.unwrap_or_default();
    if image.trim().is_empty() || update_classifier.trim().is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    state.registry.cleanup();

    let namespaces = resolve_namespaces(&state).await;
    let config = MatchConfig::new(ImageReference::parse(&image), update_classifier);

    match state.registry.create(&namespaces, &config).await {
        Ok((id, progress)) => (StatusCode::CREATED, Json(progress_json(id, &progress))).into_response(),
        Err(RegistryError::PlanFailure(e)) => {
            error!(error = %e, "failed to plan update");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!(error = %e, "unexpected registry error while creating update");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn resolve_namespaces(state: &AppState) -> Vec<String> {
    if state.config.autoload_namespaces {
        match state.cluster.list_namespaces().await {
            Ok(namespaces) => namespaces,
            Err(e) => {
                error!(error = %e, "failed to autoload namespaces, falling back to configured list");
                state.config.namespaces.clone()
            }
        }
    } else {
        state.config.namespaces.clone()
    }
}

async fn get_update(State(state): State<AppState>, headers: HeaderMap, Path(uuid): Path<String>) -> impl IntoResponse {
    if !authorized(&headers, &state) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    state.registry.cleanup();

    match state.registry.get_by_string(&uuid) {
        Ok(progress) => (StatusCode::OK, Json(progress_json_from_string(&uuid, &progress))).into_response(),
        Err(RegistryError::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(RegistryError::InvalidId(_)) => StatusCode::BAD_REQUEST.into_response(),
        Err(e) => {
            error!(error = %e, "unexpected registry error while fetching update");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn delete_update(State(state): State<AppState>, headers: HeaderMap, Path(uuid): Path<String>) -> impl IntoResponse {
    if !authorized(&headers, &state) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    state.registry.delete_by_string(&uuid);
    state.registry.cleanup();
    StatusCode::NO_CONTENT
}

fn authorized(headers: &HeaderMap, state: &AppState) -> bool {
    let header_value = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    is_authorized(header_value, &state.config.api_key)
}

#[derive(Debug, Serialize)]
struct ProgressJson {
    uuid: String,
    counts: CountsJson,
    status: StatusJson,
}

#[derive(Debug, Serialize)]
struct CountsJson {
    jobs: CountJson,
    deployments: CountJson,
}

#[derive(Debug, Serialize)]
struct CountJson {
    total: usize,
    updated: usize,
}

#[derive(Debug, Serialize)]
struct StatusJson {
    finish_time: Option<chrono::DateTime<chrono::Utc>>,
    finished: bool,
    failed: bool,
    successful: bool,
}

fn progress_json(id: uuid::Uuid, progress: &Progress) -> ProgressJson {
    progress_json_from_string(&id.to_string(), progress)
}

fn progress_json_from_string(uuid: &str, progress: &Progress) -> ProgressJson {
    ProgressJson {
        uuid: uuid.to_string(),
        counts: CountsJson {
            jobs: CountJson { total: progress.job_count(), updated: progress.finished_jobs_count() },
            deployments: CountJson { total: progress.deployment_count(), updated: progress.updated_deployments_count() },
        },
        status: StatusJson {
            finish_time: progress.finish_time(),
            finished: progress.finished(),
            failed: progress.failed(),
            successful: progress.successful(),
        },
    }
}
