//! The inbound management RPC service.
//!
//! Thin handlers over [`JobRegistry`]: every registry error becomes a
//! `{code: 1, message}` reply and never escapes as an HTTP failure. Requests
//! are served concurrently by axum; the registry's own lock is what keeps
//! concurrent mutations consistent.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::{method, path, RemoveJobArgs, Reply};
use crate::job::{JobDefinition, JobView};
use crate::metrics::{AgentMetrics, MetricsSnapshot};
use crate::registry::JobRegistry;

#[derive(Clone)]
pub struct ServiceState {
  pub registry: Arc<JobRegistry>,
  pub metrics: AgentMetrics,
}

/// Builds the router with every management method.
pub fn router(state: ServiceState) -> Router {
  Router::new()
    .route(&path(method::ADD_JOB), post(add_job_handler))
    .route(&path(method::REMOVE_JOB), post(remove_job_handler))
    .route(&path(method::LIST_JOBS), post(list_jobs_handler))
    .route(&path(method::PING), post(ping_handler))
    .route(&path(method::METRICS), post(metrics_handler))
    .with_state(state)
}

/// Serves the management API on `listener` until the server fails.
pub async fn serve(listener: TcpListener, state: ServiceState) -> std::io::Result<()> {
  if let Ok(addr) = listener.local_addr() {
    info!(%addr, "Management RPC service listening");
  }
  axum::serve(listener, router(state)).await
}

async fn add_job_handler(
  State(state): State<ServiceState>,
  Json(definition): Json<JobDefinition>,
) -> Json<Reply> {
  let id = definition.id;
  match state.registry.add(definition) {
    Ok(outcome) => {
      debug!(job_id = id, ?outcome, "AddJob handled");
      Json(Reply::success())
    }
    Err(e) => {
      warn!(job_id = id, error = %e, "AddJob failed");
      Json(Reply::error(e))
    }
  }
}

async fn remove_job_handler(
  State(state): State<ServiceState>,
  Json(args): Json<RemoveJobArgs>,
) -> Json<Reply> {
  match state.registry.remove(args.id) {
    Ok(()) => Json(Reply::success()),
    Err(e) => {
      warn!(job_id = args.id, error = %e, "RemoveJob failed");
      Json(Reply::error(e))
    }
  }
}

async fn list_jobs_handler(State(state): State<ServiceState>) -> Json<Reply<Vec<JobView>>> {
  Json(Reply::success_with(state.registry.list()))
}

async fn ping_handler() -> Json<Reply> {
  Json(Reply::success())
}

async fn metrics_handler(State(state): State<ServiceState>) -> Json<Reply<MetricsSnapshot>> {
  Json(Reply::success_with(state.metrics.snapshot()))
}
