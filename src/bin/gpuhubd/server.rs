//! HTTP server for the control plane daemon.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use gpuhub::client::AgentClient;
use gpuhub::core::db::Database;
use gpuhub::core::ingest::{self, AgentReport, IngestError};
use gpuhub::core::job::{JobRequest, ScheduleError};
use gpuhub::core::scheduler::{CancelOutcome, JobScheduler, SubmitOutcome};
use gpuhub::core::supervisor::Supervisor;
use serde::Deserialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Notify;

/// Shared state behind every handler: the service objects plus the
/// supervisor wake-up handle.
#[derive(Clone)]
struct ServerState {
    scheduler: Arc<JobScheduler>,
    supervisor: Arc<Supervisor>,
    notify: Arc<Notify>,
}

#[derive(Deserialize)]
struct ListJobsQuery {
    #[serde(default)]
    limit: Option<usize>,
}

pub async fn run(config: gpuhub::config::Config) -> anyhow::Result<()> {
    let db_path = match config.daemon.database_path.clone() {
        Some(path) => path,
        None => {
            let data_dir = gpuhub::core::get_data_dir()?;
            std::fs::create_dir_all(&data_dir)?;
            data_dir.join("control-plane.db")
        }
    };
    tracing::info!("Opening state store at {:?}", db_path);
    let db = Database::new(db_path)?;

    let local_hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string());
    tracing::info!(hostname = %local_hostname, "control plane identity");

    let agents = AgentClient::new(
        config.agent.executor_port,
        config.agent.launch_timeout(),
        config.agent.probe_timeout(),
    );
    let scheduler = Arc::new(JobScheduler::new(db, agents, local_hostname));
    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&scheduler),
        config.agent.offline_timeout(),
    ));
    let notify = Arc::new(Notify::new());

    tokio::spawn(
        Arc::clone(&supervisor).run(Arc::clone(&notify), config.supervisor.tick_interval()),
    );

    let app = router(ServerState {
        scheduler,
        supervisor,
        notify,
    });

    let host = &config.daemon.host;
    let port = config.daemon.port;

    // Handle IPv6 literal addresses (e.g., "::1" -> "[::1]")
    let bind_addr = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };

    let addr = tokio::net::lookup_host(&bind_addr)
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve address: {}", bind_addr))?;

    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener: std::net::TcpListener = socket.into();
    std_listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(std_listener)?;

    tracing::info!("Listening on: {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route("/api/v1/agent/report-in", post(agent_report_in))
        .route("/api/v1/jobs/submit", post(submit_job))
        .route("/api/v1/jobs", get(list_jobs))
        .route("/api/v1/jobs/monitor", post(monitor_now))
        .route("/api/v1/jobs/{id}/status", get(get_job_status))
        .route("/api/v1/jobs/{id}/cancel", post(cancel_job))
        .route("/api/v1/jobs/{id}/history", get(get_job_history))
        .route("/api/v1/status", get(get_system_status))
        .with_state(state)
}

async fn create_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

#[axum::debug_handler]
async fn agent_report_in(
    State(state): State<ServerState>,
    Json(report): Json<AgentReport>,
) -> impl IntoResponse {
    match ingest::process_report(state.scheduler.store(), &report, SystemTime::now()) {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "message": format!(
                    "Report from {} processed",
                    report.agent_info.hostname.trim()
                ),
                "gpus_added": outcome.gpus_added,
                "gpus_removed": outcome.gpus_removed,
                "gpus_skipped": outcome.gpus_skipped,
            })),
        ),
        Err(IngestError::Invalid(message)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "status": "error", "message": message })),
        ),
        Err(IngestError::Store(e)) => {
            tracing::error!(error = %e, "failed to store agent report");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "message": "store failure" })),
            )
        }
    }
}

#[axum::debug_handler]
async fn submit_job(
    State(state): State<ServerState>,
    Json(request): Json<JobRequest>,
) -> impl IntoResponse {
    if request.workload_type.trim().is_empty() || request.command.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "message": "workload_type and command cannot be empty"
            })),
        );
    }

    tracing::info!(workload_type = %request.workload_type, "received job submission");

    match state.scheduler.submit(&request).await {
        Ok(SubmitOutcome::Running { job_id, gpu_id, pid }) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "running",
                "job_id": job_id,
                "gpu": gpu_id,
                "pid": pid,
            })),
        ),
        Ok(SubmitOutcome::Queued { job_id }) => {
            // Nudge the supervisor so the queue drains as soon as
            // inventory shows up, not a full tick later.
            state.notify.notify_one();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "queued",
                    "job_id": job_id,
                    "message": "No GPUs available",
                })),
            )
        }
        Ok(SubmitOutcome::Failed { job_id, error }) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "failed",
                "job_id": job_id,
                "error": error,
            })),
        ),
        Err(ScheduleError::GpuNotFound(id)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "message": format!("GPU {id} not found"),
            })),
        ),
        Err(ScheduleError::Internal(e)) => {
            tracing::error!(error = %e, "job submission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "message": "store failure" })),
            )
        }
    }
}

#[axum::debug_handler]
async fn get_job_status(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.scheduler.job_status(id) {
        Ok(Some(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "status": "error", "message": "Job not found" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(job_id = id, error = %e, "failed to load job");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[axum::debug_handler]
async fn list_jobs(
    State(state): State<ServerState>,
    Query(query): Query<ListJobsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50);
    match state.scheduler.list_jobs(limit) {
        Ok(jobs) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "count": jobs.len(),
                "jobs": jobs,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to list jobs");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[axum::debug_handler]
async fn cancel_job(State(state): State<ServerState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.scheduler.cancel(id).await {
        Ok(Some(outcome)) => {
            let status = match outcome {
                CancelOutcome::Cancelled => "cancelled",
                CancelOutcome::AlreadyFinished => "already_finished",
                CancelOutcome::NotRunning => "not_running",
            };
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": status, "job_id": id })),
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "status": "error", "message": "Job not found" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(job_id = id, error = %e, "failed to cancel job");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[axum::debug_handler]
async fn get_job_history(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.scheduler.job_history(id) {
        Ok(Some(history)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "job_id": id,
                "history_count": history.len(),
                "history": history,
            })),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "status": "error", "message": "Job not found" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(job_id = id, error = %e, "failed to load history");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[axum::debug_handler]
async fn monitor_now(State(state): State<ServerState>) -> impl IntoResponse {
    match state.supervisor.tick().await {
        Some(summary) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "message": "Supervision pass completed",
                "summary": summary,
            })),
        ),
        None => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "skipped",
                "message": "Another supervision pass is in flight",
            })),
        ),
    }
}

#[axum::debug_handler]
async fn get_system_status(State(state): State<ServerState>) -> impl IntoResponse {
    match state.scheduler.store().cluster_stats() {
        Ok(stats) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "system_health": if stats.healthy_gpus > 0 { "healthy" } else { "warning" },
                "statistics": stats,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to compute cluster stats");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
