use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::command::SupervisorEvent;
use crate::config::{NodeIdentity, ServerConfig};
use crate::heartbeat::{HeartbeatClient, HeartbeatTask};
use crate::metrics::{AgentMetrics, MetricsSnapshot};
use crate::registry::{JobRegistry, JobTable};
use crate::rpc::service::{self, ServiceState};
use crate::scheduler::CronScheduler;
use crate::supervisor::Supervisor;

/// Builder for configuring and starting a [`CronAgent`].
///
/// # Example
///
/// ```no_run
/// use cronkeeper::{CronAgent, JobDefinition, NodeIdentity};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let agent = CronAgent::builder()
///   .node(NodeIdentity::new("node-1", "teamA", "127.0.0.1:2234"))
///   .build();
/// agent.registry().add(JobDefinition::new(1, "echo hi", "* * * * *"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct AgentBuilder {
  identity: NodeIdentity,
}

impl AgentBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets this node's name, group and listen address.
  pub fn node(mut self, identity: NodeIdentity) -> Self {
    self.identity = identity;
    self
  }

  /// Sets only the group, keeping the rest of the identity.
  pub fn group(mut self, group: &str) -> Self {
    self.identity.group = group.to_string();
    self
  }

  /// Starts the cron timer and the supervisor event loop.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn build(self) -> CronAgent {
    let metrics = AgentMetrics::new();
    let jobs: JobTable = Arc::new(Mutex::new(HashMap::new()));
    let (events_tx, events_rx) = mpsc::unbounded_channel::<SupervisorEvent>();

    let scheduler = CronScheduler::start();
    let registry = Arc::new(JobRegistry::new(
      jobs.clone(),
      scheduler.clone(),
      self.identity.group.clone(),
      events_tx.clone(),
      metrics.clone(),
    ));
    let supervisor = Arc::new(Supervisor::new(jobs, events_tx, metrics.clone()));

    let supervisor_task = {
      let supervisor = supervisor.clone();
      tokio::spawn(async move { supervisor.run_events(events_rx).await })
    };

    info!(node = %self.identity.name, group = %self.identity.group, "Cron agent started.");

    CronAgent {
      identity: Arc::new(self.identity),
      registry,
      supervisor,
      scheduler,
      metrics,
      supervisor_task,
    }
  }
}

/// A running agent: registry, scheduler and supervisor wired together.
pub struct CronAgent {
  identity: Arc<NodeIdentity>,
  registry: Arc<JobRegistry>,
  supervisor: Arc<Supervisor>,
  scheduler: CronScheduler,
  metrics: AgentMetrics,
  supervisor_task: JoinHandle<()>,
}

impl CronAgent {
  pub fn builder() -> AgentBuilder {
    AgentBuilder::new()
  }

  pub fn identity(&self) -> &NodeIdentity {
    &self.identity
  }

  pub fn registry(&self) -> &Arc<JobRegistry> {
    &self.registry
  }

  pub fn supervisor(&self) -> &Arc<Supervisor> {
    &self.supervisor
  }

  pub fn scheduler(&self) -> &CronScheduler {
    &self.scheduler
  }

  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self.metrics.snapshot()
  }

  /// State for the management RPC router.
  pub fn service_state(&self) -> ServiceState {
    ServiceState {
      registry: self.registry.clone(),
      metrics: self.metrics.clone(),
    }
  }

  /// The management RPC router, for embedding or testing.
  pub fn router(&self) -> axum::Router {
    service::router(self.service_state())
  }

  /// Serves the management RPC API on `listener` until the server fails.
  pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
    service::serve(listener, self.service_state()).await
  }

  /// Starts the registration/heartbeat loop against `server`.
  pub fn spawn_heartbeat(&self, server: &ServerConfig) -> HeartbeatTask {
    self.heartbeat_client(server).spawn()
  }

  /// A heartbeat client sharing this agent's identity and metrics.
  pub fn heartbeat_client(&self, server: &ServerConfig) -> HeartbeatClient {
    HeartbeatClient::new(self.identity.clone(), server, self.metrics.clone())
  }

  /// Stops the cron timer and the supervisor loop. Running job processes are
  /// left alone.
  pub async fn shutdown(self) {
    self.scheduler.shutdown().await;
    self.supervisor_task.abort();
    info!(node = %self.identity.name, "Cron agent stopped.");
  }
}
