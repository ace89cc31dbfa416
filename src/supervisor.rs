use std::process::Stdio;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::command::{ExitOutcome, SupervisorEvent};
use crate::error::SupervisorError;
use crate::job::{Job, JobDefinition, JobId, JobState, Pid};
use crate::metrics::AgentMetrics;
use crate::registry::JobTable;
use crate::scheduler::ScheduleHandle;

/// Result of a single [`Supervisor::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
  /// A process was spawned with this pid.
  Started(Pid),
  /// The job's previous process is still running; nothing was spawned.
  AlreadyRunning,
  /// The job is not in a state a fire can start from.
  NotRunnable(JobState),
  /// The job is no longer in the registry.
  NotFound,
  /// The process could not be spawned. Details were logged.
  StartFailed,
}

/// Identifies one incarnation of a job entry. A remove followed by an add, or a
/// reschedule, always installs a new schedule handle.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Incarnation {
  schedule: Option<ScheduleHandle>,
  fingerprint: String,
}

impl Incarnation {
  fn of(job: &Job) -> Self {
    Self {
      schedule: job.runtime.schedule,
      fingerprint: job.runtime.fingerprint.clone(),
    }
  }

  fn matches(&self, job: &Job) -> bool {
    job.runtime.schedule == self.schedule && job.runtime.fingerprint == self.fingerprint
  }
}

/// Starts job processes and records their lifecycle in the job table.
///
/// Fires arrive over the event channel from the cron timer; exits arrive over
/// the same channel from one waiter task per process. Both are applied to the
/// job table under its lock, and a job is looked up at the moment it is acted
/// upon, never from a stale snapshot.
pub struct Supervisor {
  jobs: JobTable,
  events_tx: mpsc::UnboundedSender<SupervisorEvent>,
  /// Serializes the guard-check, spawn and mark-running sequence so two
  /// concurrent runs of one job cannot both pass the RUNNING guard.
  start_gate: Mutex<()>,
  metrics: AgentMetrics,
}

impl Supervisor {
  pub(crate) fn new(
    jobs: JobTable,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    metrics: AgentMetrics,
  ) -> Self {
    Self {
      jobs,
      events_tx,
      start_gate: Mutex::new(()),
      metrics,
    }
  }

  /// Event loop. Runs until every sender of the event channel is gone.
  pub(crate) async fn run_events(&self, mut events_rx: mpsc::UnboundedReceiver<SupervisorEvent>) {
    info!("Supervisor started. Waiting for schedule fires...");

    while let Some(event) = events_rx.recv().await {
      match event {
        SupervisorEvent::Fire(job_id) => {
          AgentMetrics::incr(&self.metrics.schedule_fires);
          let span = tracing::span!(tracing::Level::INFO, "job_fire", job_id);
          span.in_scope(|| self.run(job_id));
        }
        SupervisorEvent::Exited {
          job_id,
          pid,
          outcome,
          duration,
        } => {
          self.metrics.run_duration.record(duration);
          self.handle_exit(job_id, pid, outcome);
        }
      }
    }

    info!("Supervisor event channel closed, shutting down.");
  }

  /// Starts a process for `job_id` unless the job is gone or already running.
  ///
  /// Failures are logged and absorbed: nothing here propagates to the
  /// scheduler. Must be called from within a Tokio runtime, since the exit
  /// waiter is spawned as a task.
  pub fn run(&self, job_id: JobId) -> RunOutcome {
    let _gate = self.start_gate.lock();

    let (definition, incarnation) = {
      let jobs = self.jobs.lock();
      match jobs.get(&job_id) {
        None => {
          debug!(job_id, "Job was removed before it could run, skipping.");
          return RunOutcome::NotFound;
        }
        Some(job) if job.runtime.state == JobState::Running => {
          AgentMetrics::incr(&self.metrics.runs_skipped_running);
          warn!(job_id, pid = job.runtime.pid, "Job is still running, skipping this fire.");
          return RunOutcome::AlreadyRunning;
        }
        Some(job) if !job.runtime.state.can_start() => {
          debug!(job_id, state = %job.runtime.state, "Job is not runnable, skipping.");
          return RunOutcome::NotRunnable(job.runtime.state);
        }
        Some(job) => (job.definition.clone(), Incarnation::of(job)),
      }
    };

    // Spawn outside the job lock.
    let child = match spawn_process(&definition) {
      Ok(child) => child,
      Err(e) => {
        AgentMetrics::incr(&self.metrics.run_start_failures);
        error!(job_id, script = %definition.script, error = %e, "Failed to start job process.");
        return RunOutcome::StartFailed;
      }
    };
    let started_at = Instant::now();
    let pid = child.id().unwrap_or(0);

    self.mark_running(job_id, &incarnation, pid);
    AgentMetrics::incr(&self.metrics.runs_started);
    info!(job_id, pid, script = %definition.script, "Job process started.");

    let events_tx = self.events_tx.clone();
    let waiter_span = tracing::span!(tracing::Level::DEBUG, "job_wait", job_id, pid);
    tokio::spawn(
      async move {
        let outcome = wait_for_exit(child).await;
        let event = SupervisorEvent::Exited {
          job_id,
          pid,
          outcome,
          duration: started_at.elapsed(),
        };
        if events_tx.send(event).is_err() {
          debug!("Supervisor is gone, dropping process exit.");
        }
      }
      .instrument(waiter_span),
    );

    RunOutcome::Started(pid)
  }

  /// Records `pid` as the job's running process, unless the entry was removed or
  /// replaced while the process started. Returns whether the entry was updated.
  fn mark_running(&self, job_id: JobId, incarnation: &Incarnation, pid: Pid) -> bool {
    let mut jobs = self.jobs.lock();
    match jobs.get_mut(&job_id) {
      Some(job) if incarnation.matches(job) => {
        job.runtime.state = JobState::Running;
        job.runtime.pid = pid;
        true
      }
      Some(_) => {
        debug!(job_id, pid, "Job was replaced while its process started; its exit will be discarded.");
        false
      }
      None => {
        debug!(job_id, pid, "Job was removed while its process started; its exit will be discarded.");
        false
      }
    }
  }

  /// Applies a process exit to the job table if the job still owns that process.
  fn handle_exit(&self, job_id: JobId, pid: Pid, outcome: ExitOutcome) {
    let mut jobs = self.jobs.lock();
    match jobs.get_mut(&job_id) {
      Some(job) if job.runtime.state == JobState::Running && job.runtime.pid == pid => {
        let state = outcome.final_state();
        job.runtime.state = state;
        job.runtime.pid = 0;
        match outcome {
          ExitOutcome::Success => {
            AgentMetrics::incr(&self.metrics.runs_finished);
            info!(job_id, pid, "Job process finished.");
          }
          ExitOutcome::Failure { code } => {
            AgentMetrics::incr(&self.metrics.runs_killed);
            info!(job_id, pid, ?code, "Job process failed or was killed.");
          }
        }
      }
      Some(job) => {
        AgentMetrics::incr(&self.metrics.completions_discarded);
        debug!(job_id, pid, current_pid = job.runtime.pid, state = %job.runtime.state, "Exit of a process the job no longer owns, discarding.");
      }
      None => {
        AgentMetrics::incr(&self.metrics.completions_discarded);
        debug!(job_id, pid, "Job was removed while running, discarding its exit.");
      }
    }
  }
}

/// Spawns the job's command line directly, without a shell.
fn spawn_process(definition: &JobDefinition) -> Result<Child, SupervisorError> {
  let (program, args) = definition
    .command_line()
    .ok_or(SupervisorError::EmptyScript(definition.id))?;

  let mut command = Command::new(program);
  command
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null());
  if !definition.working_dir.is_empty() {
    command.current_dir(&definition.working_dir);
  }

  command
    .spawn()
    .map_err(|source| SupervisorError::ProcessStartFailure {
      id: definition.id,
      program: program.to_string(),
      source,
    })
}

async fn wait_for_exit(mut child: Child) -> ExitOutcome {
  match child.wait().await {
    Ok(status) if status.success() => ExitOutcome::Success,
    Ok(status) => {
      trace!(?status, "Process exited unsuccessfully.");
      ExitOutcome::Failure {
        code: status.code(),
      }
    }
    Err(e) => {
      warn!(error = %e, "Failed to wait for job process.");
      ExitOutcome::Failure { code: None }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Arc;

  use crate::job::JobRuntime;
  use crate::scheduler::{CronScheduler, FireCallback};

  fn scheduled(definition: JobDefinition, schedule: ScheduleHandle) -> Job {
    Job {
      runtime: JobRuntime {
        schedule: Some(schedule),
        fingerprint: definition.fingerprint(),
        pid: 0,
        state: JobState::Scheduled,
      },
      definition,
    }
  }

  #[tokio::test]
  async fn only_the_spawning_incarnation_is_marked_running() {
    let scheduler = CronScheduler::start();
    let noop: FireCallback = Arc::new(|| {});
    let first = scheduler.install("@daily", noop.clone()).unwrap();
    let second = scheduler.install("@daily", noop).unwrap();

    let jobs: JobTable = Arc::new(Mutex::new(HashMap::new()));
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::new(jobs.clone(), events_tx, AgentMetrics::new());

    jobs
      .lock()
      .insert(1, scheduled(JobDefinition::new(1, "sleep 1", "@daily"), first));
    let incarnation = Incarnation::of(&jobs.lock()[&1]);

    // Removed and re-added with a different definition while the process started.
    jobs
      .lock()
      .insert(1, scheduled(JobDefinition::new(1, "echo new", "@daily"), second));
    assert!(!supervisor.mark_running(1, &incarnation, 4242));
    let entry = jobs.lock()[&1].clone();
    assert_eq!(entry.runtime.state, JobState::Scheduled);
    assert_eq!(entry.runtime.pid, 0);

    // Same definition under a new schedule is still a different incarnation.
    jobs
      .lock()
      .insert(1, scheduled(JobDefinition::new(1, "sleep 1", "@daily"), second));
    assert!(!supervisor.mark_running(1, &incarnation, 4242));

    jobs.lock().remove(&1);
    assert!(!supervisor.mark_running(1, &incarnation, 4242));

    jobs
      .lock()
      .insert(1, scheduled(JobDefinition::new(1, "sleep 1", "@daily"), first));
    assert!(supervisor.mark_running(1, &incarnation, 4242));
    let entry = jobs.lock()[&1].clone();
    assert_eq!(entry.runtime.state, JobState::Running);
    assert_eq!(entry.runtime.pid, 4242);

    scheduler.shutdown().await;
  }
}
