use std::env;
use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{error, info};

mod auth;
mod cluster;
mod config;
mod engine;
mod errors;
mod finders;
mod image;
mod matcher;
mod planner;
mod progress;
mod registry;
mod secret_string;
mod webserver;

use cluster::{ClusterApi, KubeCluster};
use engine::Engine;
use planner::Planner;
use registry::Registry;
use webserver::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("Starting rollout-coordinator {}", env!("CARGO_PKG_VERSION"));

    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Arc::new(config::load_config(&config_path)?);

    info!("Initializing Kubernetes client");
    let client = cluster::create_client().await?;
    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client));

    let planner = Arc::new(Planner::new(cluster.clone()));
    let engine = Arc::new(Engine::with_monitor_tick(cluster.clone(), std::time::Duration::from_millis(config.poll_interval_ms)));
    let reap_threshold = chrono::Duration::seconds(config.reap_threshold_secs);
    let registry = Arc::new(Registry::new(planner, engine, reap_threshold));

    let scheduler = JobScheduler::new().await?;
    let reaper_registry = registry.clone();
    let reaper_job = CronJob::new_async("0 */1 * * * *", move |_uuid, _l| {
        let registry = reaper_registry.clone();
        Box::pin(async move {
            info!("Running registry cleanup");
            registry.cleanup();
        })
    })?;
    scheduler.add(reaper_job).await?;
    scheduler.start().await?;

    let state = AppState { registry, cluster, config: config.clone() };
    let app = webserver::create_app(state);
    let ip: std::net::IpAddr = config.host.parse().unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
    let addr = std::net::SocketAddr::from((ip, config.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "webserver exited with an error");
        return Err(e.into());
    }

    Ok(())
}
