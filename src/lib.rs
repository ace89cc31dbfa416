//! CronKeeper: a fleet-distributed cron agent.
//!
//! Each node runs one agent. The agent accepts job definitions pushed over a
//! JSON-over-HTTP RPC interface, schedules them with CRON expressions, runs
//! their commands as child processes while tracking per-job state, and keeps
//! itself registered with a central server through a periodic heartbeat.
//!
//! # Components
//!
//! - [`JobRegistry`]: the authoritative job table. Reconciles incoming
//!   definitions by fingerprint, so re-sending an identical job is a no-op and
//!   a changed job is re-scheduled atomically (new schedule installed before
//!   the old one is cancelled).
//! - [`CronScheduler`]: the scheduling adapter. Owns a table of cron entries
//!   keyed by opaque [`ScheduleHandle`]s and a timer task that fires them.
//! - [`Supervisor`]: starts job processes on each fire, refuses to start a job
//!   whose previous process is still running, and records each exit as
//!   `FINISHED` or `KILLED`.
//! - [`rpc::service`]: the management API (`AddJob`, `RemoveJob`, `ListJobs`,
//!   `Ping`, `Metrics`).
//! - [`HeartbeatClient`]: registers the node with the central server and pings
//!   it, re-registering whenever a ping fails.
//!
//! # Usage
//!
//! ```no_run
//! use cronkeeper::{CronAgent, JobDefinition, JobState, NodeIdentity};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let agent = CronAgent::builder()
//!     .node(NodeIdentity::new("node-1", "teamA", "127.0.0.1:2234"))
//!     .build();
//!
//!   // Every minute, run `echo hi` without a shell.
//!   agent
//!     .registry()
//!     .add(JobDefinition::new(1, "echo hi", "* * * * *").with_group("teamA"))?;
//!
//!   for job in agent.registry().list() {
//!     println!("{} {} next={:?}", job.id, job.state, job.next);
//!     assert_eq!(job.state, JobState::Scheduled);
//!   }
//!
//!   // Serve the management API until the process is killed.
//!   let listener = tokio::net::TcpListener::bind("127.0.0.1:2234").await?;
//!   agent.serve(listener).await?;
//!   Ok(())
//! }
//! ```
//!
//! # Limitations
//!
//! - Scripts are split on whitespace; there is no shell, quoting or redirection.
//! - Jobs live in memory only. After a restart the central server has to push
//!   them again.
//! - A job process has no execution timeout, and removing a job does not kill
//!   a process that is already running.
//!
//! # Observability
//!
//! All components log through `tracing`. Counters are available through
//! [`CronAgent::metrics_snapshot`] and the `Metrics` RPC. See [`MetricsSnapshot`].

pub mod agent;
pub mod command;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod job;
pub mod metrics;
pub mod registry;
pub mod rpc;
pub mod schedule;
pub mod scheduler;
pub mod supervisor;

// --- Public Re-exports ---

pub use agent::{AgentBuilder, CronAgent};
pub use config::{AgentConfig, LogConfig, NodeIdentity, ServerConfig};
pub use error::{ConfigError, RegistryError, ScheduleError, SupervisorError, TransportError};
pub use heartbeat::{
  HeartbeatClient, HeartbeatStatus, HeartbeatTask, ServerHandle, MIN_HEARTBEAT_INTERVAL,
};
pub use job::{JobDefinition, JobId, JobState, JobView, Pid};
pub use metrics::{AgentMetrics, MetricsSnapshot};
pub use registry::{AddOutcome, JobRegistry};
pub use rpc::Reply;
pub use scheduler::{CronScheduler, ScheduleHandle};
pub use supervisor::{RunOutcome, Supervisor};
