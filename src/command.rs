use std::time::Duration;

use crate::job::{JobId, JobState, Pid};

/// How a job process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
  /// Exit status 0.
  Success,
  /// Non-zero exit status, or `code: None` when killed by a signal or when
  /// waiting on the process failed.
  Failure { code: Option<i32> },
}

impl ExitOutcome {
  /// The state a job settles in after a process ends this way.
  pub fn final_state(&self) -> JobState {
    match self {
      ExitOutcome::Success => JobState::Finished,
      ExitOutcome::Failure { .. } => JobState::Killed,
    }
  }
}

/// Messages processed by the supervisor's event loop.
///
/// Timer callbacks only send `Fire`, so they never block the cron timer.
/// Waiter tasks send `Exited`, so every post-run state update goes through
/// the same synchronized path instead of a detached write.
#[derive(Debug)]
pub(crate) enum SupervisorEvent {
  /// A job's schedule fired.
  Fire(JobId),
  /// A job process previously started by the supervisor has exited.
  Exited {
    job_id: JobId,
    pid: Pid,
    outcome: ExitOutcome,
    /// Time from spawn to exit.
    duration: Duration,
  },
}
