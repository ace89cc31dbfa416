//! demos/serve_job.rs
//!
//! Schedules a job with a CRON expression, watches it run, then serves the
//! management API until Ctrl-C.
//!
//! Try it from another shell while it runs:
//!   curl -s -XPOST localhost:2234/rpc/ListJobs

use std::time::Duration as StdDuration;

use tokio::net::TcpListener;
use tracing::info;

use cronkeeper::{CronAgent, JobDefinition, JobState, NodeIdentity};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // --- Setup Tracing ---
  let filter = tracing_subscriber::EnvFilter::try_new("warn,cronkeeper=info,serve_job=info")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  // --- Build Agent ---
  let agent = CronAgent::builder()
    .node(NodeIdentity::new("demo-node", "demo", "127.0.0.1:2234"))
    .build();

  // --- Define Job ---
  // Six fields: seconds first, so this fires every 2 seconds.
  let cron_expr = "*/2 * * * * *";
  let job = JobDefinition::new(1, "echo hello from cronkeeper", cron_expr).with_group("demo");
  let outcome = agent.registry().add(job)?;
  info!(?outcome, "Job added with CRON expression '{}'", cron_expr);

  // --- Watch a Few Runs ---
  for _ in 0..3 {
    tokio::time::sleep(StdDuration::from_secs(2)).await;
    if let Some(view) = agent.registry().get(1) {
      info!(state = %view.state, prev = ?view.prev, next = ?view.next, "Job status");
      if view.state == JobState::Killed {
        info!("The command failed; is `echo` on PATH?");
      }
    }
  }
  info!(metrics = ?agent.metrics_snapshot(), "Metrics so far");

  // --- Serve the Management API ---
  let listener = TcpListener::bind(&agent.identity().uri).await?;
  info!("Serving on {}. Press Ctrl-C to stop.", agent.identity().uri);
  tokio::select! {
    result = agent.serve(listener) => result?,
    _ = tokio::signal::ctrl_c() => info!("Ctrl-C received."),
  }

  agent.shutdown().await;
  Ok(())
}
