use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::scheduler::ScheduleHandle;

// --- Public Type Aliases ---

/// Type alias for the caller-assigned identifier of a job.
/// Unique within a node's registry; a second add with the same id updates the
/// existing entry instead of creating a new one.
pub type JobId = i64;

/// Type alias for an OS process id. `0` means "no process".
pub type Pid = u32;

// --- Core Job Structures ---

/// The caller-supplied description of a job.
///
/// Sent as the argument of every `AddJob` call. Field names on the wire follow
/// the fleet protocol (`dir`, `spec`), which is why two fields are renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
  /// Unique key of the job.
  pub id: JobId,
  /// Command line. The first whitespace-separated token is the executable,
  /// the rest are passed verbatim as arguments. No shell is involved, so
  /// quoting, globbing and redirection are not supported.
  pub script: String,
  /// Working directory for the process. Empty means "inherit the agent's".
  #[serde(rename = "dir", default)]
  pub working_dir: String,
  /// CRON expression (five, six or seven fields, or an `@daily`-style descriptor).
  #[serde(rename = "spec")]
  pub cron_spec: String,
  /// Ownership tag. Empty means "any group".
  #[serde(default)]
  pub group: String,
}

impl JobDefinition {
  /// Creates a definition with no working directory and no group.
  pub fn new(id: JobId, script: &str, cron_spec: &str) -> Self {
    Self {
      id,
      script: script.to_string(),
      working_dir: String::new(),
      cron_spec: cron_spec.to_string(),
      group: String::new(),
    }
  }

  pub fn with_working_dir(mut self, dir: &str) -> Self {
    self.working_dir = dir.to_string();
    self
  }

  pub fn with_group(mut self, group: &str) -> Self {
    self.group = group.to_string();
    self
  }

  /// Content hash of every field that can change between adds of the same id.
  ///
  /// Fields are separated by a NUL byte so that `("ab", "c")` and `("a", "bc")`
  /// never collide.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    for field in [&self.script, &self.working_dir, &self.cron_spec, &self.group] {
      hasher.update(field.as_bytes());
      hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
  }

  /// Splits `script` into the executable and its arguments.
  /// Returns `None` if the script contains no tokens at all.
  pub fn command_line(&self) -> Option<(&str, Vec<&str>)> {
    let mut tokens = self.script.split_whitespace();
    let program = tokens.next()?;
    Some((program, tokens.collect()))
  }
}

/// Lifecycle state of a job as tracked by the registry and the supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
  /// Known to the registry but without an active schedule.
  #[default]
  Unscheduled,
  /// Installed in the scheduler, never run yet.
  Scheduled,
  /// A process for this job is alive.
  Running,
  /// The last process exited with status 0.
  Finished,
  /// The last process exited with a non-zero status or was killed by a signal.
  Killed,
}

impl JobState {
  /// Whether a fire may start a new process from this state.
  pub fn can_start(&self) -> bool {
    matches!(self, JobState::Scheduled | JobState::Finished | JobState::Killed)
  }
}

impl fmt::Display for JobState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      JobState::Unscheduled => "UNSCHEDULED",
      JobState::Scheduled => "SCHEDULED",
      JobState::Running => "RUNNING",
      JobState::Finished => "FINISHED",
      JobState::Killed => "KILLED",
    };
    f.write_str(s)
  }
}

/// Mutable per-job state. Only the registry and the supervisor write it, and
/// only while holding the registry lock.
#[derive(Debug, Clone, Default)]
pub struct JobRuntime {
  /// Handle of the installed schedule entry. `None` means "not scheduled".
  pub schedule: Option<ScheduleHandle>,
  /// Fingerprint of the definition the schedule was installed for.
  pub fingerprint: String,
  /// Pid of the running process, `0` when nothing is running.
  pub pid: Pid,
  pub state: JobState,
}

/// Internal registry entry: definition plus runtime.
#[derive(Debug, Clone)]
pub(crate) struct Job {
  pub definition: JobDefinition,
  pub runtime: JobRuntime,
}

// --- Public Snapshot Structs for Querying ---

/// A snapshot of one job, as returned by `ListJobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobView {
  pub id: JobId,
  pub script: String,
  pub dir: String,
  pub spec: String,
  pub group: String,
  /// Last time the schedule fired, if it has fired since it was installed.
  pub prev: Option<DateTime<Utc>>,
  /// Next time the schedule is due to fire.
  pub next: Option<DateTime<Utc>>,
  pub pid: Pid,
  pub state: JobState,
}

impl JobView {
  pub(crate) fn new(
    job: &Job,
    prev: Option<DateTime<Utc>>,
    next: Option<DateTime<Utc>>,
  ) -> Self {
    let def = &job.definition;
    Self {
      id: def.id,
      script: def.script.clone(),
      dir: def.working_dir.clone(),
      spec: def.cron_spec.clone(),
      group: def.group.clone(),
      prev,
      next,
      pid: job.runtime.pid,
      state: job.runtime.state,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fingerprint_changes_with_any_mutable_field() {
    let base = JobDefinition::new(1, "echo hi", "* * * * *");
    let fp = base.fingerprint();

    assert_eq!(fp, base.clone().fingerprint());
    assert_ne!(fp, base.clone().with_group("ops").fingerprint());
    assert_ne!(fp, base.clone().with_working_dir("/tmp").fingerprint());
    assert_ne!(fp, JobDefinition::new(1, "echo hi", "*/5 * * * *").fingerprint());
    // The id is the key, not part of the content.
    assert_eq!(fp, JobDefinition::new(2, "echo hi", "* * * * *").fingerprint());
  }

  #[test]
  fn fingerprint_separates_fields() {
    let a = JobDefinition::new(1, "ab", "c");
    let b = JobDefinition::new(1, "a", "bc");
    assert_ne!(a.fingerprint(), b.fingerprint());
  }

  #[test]
  fn command_line_splits_on_whitespace() {
    let def = JobDefinition::new(1, "  /bin/echo   hello\tworld ", "* * * * *");
    let (program, args) = def.command_line().unwrap();
    assert_eq!(program, "/bin/echo");
    assert_eq!(args, vec!["hello", "world"]);

    assert!(JobDefinition::new(1, "   ", "* * * * *").command_line().is_none());
  }

  #[test]
  fn definition_uses_wire_field_names() {
    let def: JobDefinition =
      serde_json::from_str(r#"{"id":7,"script":"true","spec":"@hourly"}"#).unwrap();
    assert_eq!(def.id, 7);
    assert_eq!(def.cron_spec, "@hourly");
    assert!(def.working_dir.is_empty());
    assert!(def.group.is_empty());
  }

  #[test]
  fn only_idle_states_can_start() {
    assert!(JobState::Scheduled.can_start());
    assert!(JobState::Finished.can_start());
    assert!(JobState::Killed.can_start());
    assert!(!JobState::Running.can_start());
    assert!(!JobState::Unscheduled.can_start());
  }
}
