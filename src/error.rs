use std::path::PathBuf;

use thiserror::Error;

use crate::job::JobId;

/// Errors that can occur while turning a cron expression into a schedule entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
  #[error("invalid cron spec '{spec}': {reason}")]
  InvalidSpec { spec: String, reason: String },
  #[error("cron spec '{0}' has no upcoming fire time")]
  NoUpcomingFire(String),
}

// --- Registry Errors ---

/// Errors returned by `JobRegistry` operations. These are the errors the
/// management RPC service turns into `{code: 1, message}` replies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
  #[error("job {id} belongs to group '{job_group}', this node serves group '{node_group}'")]
  GroupMismatch {
    id: JobId,
    job_group: String,
    node_group: String,
  },
  #[error("failed to schedule job {id}: {source}")]
  ScheduleFailure {
    id: JobId,
    #[source]
    source: ScheduleError,
  },
  #[error("job {0} is not scheduled on this node")]
  NotFound(JobId),
}

// --- Supervisor Errors ---

/// Errors raised while starting a job's process. They are logged by the
/// supervisor and never reported to the scheduler or the RPC caller.
#[derive(Error, Debug)]
pub enum SupervisorError {
  #[error("job {0} has an empty script")]
  EmptyScript(JobId),
  #[error("failed to start '{program}' for job {id}: {source}")]
  ProcessStartFailure {
    id: JobId,
    program: String,
    #[source]
    source: std::io::Error,
  },
}

// --- Outbound RPC Errors ---

/// Errors from calls this node makes to the central server.
#[derive(Error, Debug)]
pub enum TransportError {
  #[error("transport failure calling {method}: {source}")]
  Transport {
    method: &'static str,
    #[source]
    source: reqwest::Error,
  },
  #[error("{method} rejected by server: {message}")]
  Rejected {
    method: &'static str,
    message: String,
  },
}

// --- Configuration Errors ---

/// Errors while loading the agent configuration. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
  #[error("invalid configuration: {0}")]
  Invalid(String),
}
