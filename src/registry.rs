//! The job registry: the authoritative map of job id to definition, runtime
//! state and schedule handle.
//!
//! Every operation runs as one critical section on the job map, so the
//! fingerprint check, the schedule install and the handle swap of an `add`
//! appear atomic to concurrent `add`, `remove` and `list` callers. No I/O
//! happens under the lock: installing or cancelling a schedule only touches
//! the scheduler's in-memory table.

use std::collections::HashMap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::command::SupervisorEvent;
use crate::error::RegistryError;
use crate::job::{Job, JobDefinition, JobId, JobRuntime, JobState, JobView};
use crate::metrics::AgentMetrics;
use crate::scheduler::{CronScheduler, FireCallback, ScheduleHandle};

/// The job map shared between the registry and the supervisor.
pub(crate) type JobTable = Arc<Mutex<HashMap<JobId, Job>>>;

/// What a successful [`JobRegistry::add`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
  /// A new job was created and scheduled.
  Created,
  /// The definition changed: a new schedule replaced the old one.
  Rescheduled,
  /// Identical definition already present; nothing was touched.
  Unchanged,
}

/// Owns the job map and reconciles incoming definitions against it.
pub struct JobRegistry {
  jobs: JobTable,
  scheduler: CronScheduler,
  /// Group this node serves. Empty accepts every job.
  node_group: String,
  events_tx: mpsc::UnboundedSender<SupervisorEvent>,
  metrics: AgentMetrics,
}

impl JobRegistry {
  pub(crate) fn new(
    jobs: JobTable,
    scheduler: CronScheduler,
    node_group: String,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    metrics: AgentMetrics,
  ) -> Self {
    Self {
      jobs,
      scheduler,
      node_group,
      events_tx,
      metrics,
    }
  }

  /// Adds a job or reconciles an existing one with a new definition.
  ///
  /// - A new id is scheduled and stored in state `SCHEDULED`.
  /// - An existing id with the same fingerprint is left untouched.
  /// - An existing id with a different fingerprint gets a new schedule
  ///   installed *before* the old one is cancelled. Pid and state are kept,
  ///   so a process that is already running is not disturbed.
  ///
  /// # Errors
  ///
  /// - `GroupMismatch` when both the job and the node carry a group and they differ.
  /// - `ScheduleFailure` when the cron spec cannot be installed. Nothing is
  ///   changed in that case: a new job is not stored, an existing job keeps
  ///   its previous definition and schedule.
  pub fn add(&self, definition: JobDefinition) -> Result<AddOutcome, RegistryError> {
    let id = definition.id;
    if !definition.group.is_empty()
      && !self.node_group.is_empty()
      && definition.group != self.node_group
    {
      AgentMetrics::incr(&self.metrics.jobs_rejected);
      info!(job_id = id, job_group = %definition.group, node_group = %self.node_group, "Rejected job from another group.");
      return Err(RegistryError::GroupMismatch {
        id,
        job_group: definition.group,
        node_group: self.node_group.clone(),
      });
    }

    let fingerprint = definition.fingerprint();
    let mut jobs = self.jobs.lock();

    match jobs.get_mut(&id) {
      Some(job) if job.runtime.schedule.is_some() && job.runtime.fingerprint == fingerprint => {
        AgentMetrics::incr(&self.metrics.jobs_unchanged);
        debug!(job_id = id, "Job definition unchanged, nothing to do.");
        Ok(AddOutcome::Unchanged)
      }
      Some(job) => {
        let handle = self.install(&definition)?;
        if let Some(old_handle) = job.runtime.schedule.replace(handle) {
          self.scheduler.cancel(old_handle);
        }
        job.runtime.fingerprint = fingerprint;
        if job.runtime.state == JobState::Unscheduled {
          job.runtime.state = JobState::Scheduled;
        }
        info!(job_id = id, %handle, spec = %definition.cron_spec, script = %definition.script, "Job definition changed, rescheduled.");
        job.definition = definition;
        AgentMetrics::incr(&self.metrics.jobs_rescheduled);
        Ok(AddOutcome::Rescheduled)
      }
      None => {
        let handle = self.install(&definition)?;
        info!(job_id = id, %handle, spec = %definition.cron_spec, script = %definition.script, "Job added.");
        jobs.insert(
          id,
          Job {
            definition,
            runtime: JobRuntime {
              schedule: Some(handle),
              fingerprint,
              pid: 0,
              state: JobState::Scheduled,
            },
          },
        );
        AgentMetrics::incr(&self.metrics.jobs_added);
        self
          .metrics
          .jobs_current
          .store(jobs.len(), AtomicOrdering::Relaxed);
        Ok(AddOutcome::Created)
      }
    }
  }

  /// Cancels a job's schedule and forgets the job.
  ///
  /// A process of this job that is already running is not killed; its exit
  /// is discarded by the supervisor.
  ///
  /// # Errors
  ///
  /// `NotFound` if the id is unknown or has no active schedule.
  pub fn remove(&self, id: JobId) -> Result<(), RegistryError> {
    let mut jobs = self.jobs.lock();
    let handle = jobs
      .get(&id)
      .and_then(|job| job.runtime.schedule)
      .ok_or(RegistryError::NotFound(id))?;

    self.scheduler.cancel(handle);
    if let Some(job) = jobs.remove(&id) {
      info!(job_id = id, %handle, pid = job.runtime.pid, state = %job.runtime.state, "Job removed.");
    }
    AgentMetrics::incr(&self.metrics.jobs_removed);
    self
      .metrics
      .jobs_current
      .store(jobs.len(), AtomicOrdering::Relaxed);
    Ok(())
  }

  /// Snapshot of every job, in no particular order.
  pub fn list(&self) -> Vec<JobView> {
    let jobs = self.jobs.lock();
    jobs.values().map(|job| self.view(job)).collect()
  }

  /// Snapshot of a single job.
  pub fn get(&self, id: JobId) -> Option<JobView> {
    let jobs = self.jobs.lock();
    jobs.get(&id).map(|job| self.view(job))
  }

  pub fn len(&self) -> usize {
    self.jobs.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The group this node admits jobs for.
  pub fn node_group(&self) -> &str {
    &self.node_group
  }

  /// The schedule handle currently installed for `id`.
  pub fn schedule_handle(&self, id: JobId) -> Option<ScheduleHandle> {
    self.jobs.lock().get(&id).and_then(|job| job.runtime.schedule)
  }

  fn view(&self, job: &Job) -> JobView {
    let (prev, next) = match job.runtime.schedule {
      Some(handle) => self.scheduler.fire_times(handle),
      None => (None, None),
    };
    JobView::new(job, prev, next)
  }

  /// Installs a schedule entry whose callback hands the job id to the supervisor.
  fn install(&self, definition: &JobDefinition) -> Result<ScheduleHandle, RegistryError> {
    let id = definition.id;
    let events_tx = self.events_tx.clone();
    let callback: FireCallback = Arc::new(move || {
      if events_tx.send(SupervisorEvent::Fire(id)).is_err() {
        warn!(job_id = id, "Supervisor is gone, dropping schedule fire.");
      }
    });

    self
      .scheduler
      .install(&definition.cron_spec, callback)
      .map_err(|source| {
        AgentMetrics::incr(&self.metrics.jobs_rejected);
        warn!(job_id = id, spec = %definition.cron_spec, error = %source, "Failed to schedule job.");
        RegistryError::ScheduleFailure { id, source }
      })
  }
}
