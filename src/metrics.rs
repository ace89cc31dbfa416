use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Enough for a mean run duration without percentile detail.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Counters shared by the registry, the supervisor and the heartbeat loop.
///
/// Cloning only clones the `Arc`s.
#[derive(Debug, Clone, Default)]
pub struct AgentMetrics {
  // --- Registry ---
  /// Jobs created by a successful `AddJob` with a new id.
  pub jobs_added: Arc<AtomicUsize>,
  /// Existing jobs whose definition changed and were re-installed.
  pub jobs_rescheduled: Arc<AtomicUsize>,
  /// Adds acknowledged without side effect because the fingerprint matched.
  pub jobs_unchanged: Arc<AtomicUsize>,
  pub jobs_removed: Arc<AtomicUsize>,
  /// Adds refused for a group mismatch or an unschedulable spec.
  pub jobs_rejected: Arc<AtomicUsize>,

  // --- Supervisor ---
  /// Timer firings handed to the supervisor.
  pub schedule_fires: Arc<AtomicUsize>,
  pub runs_started: Arc<AtomicUsize>,
  /// Fires ignored because the previous process of the job was still alive.
  pub runs_skipped_running: Arc<AtomicUsize>,
  pub run_start_failures: Arc<AtomicUsize>,
  pub runs_finished: Arc<AtomicUsize>,
  pub runs_killed: Arc<AtomicUsize>,
  /// Process exits dropped because the job was removed or replaced meanwhile.
  pub completions_discarded: Arc<AtomicUsize>,

  // --- Heartbeat ---
  pub registrations: Arc<AtomicUsize>,
  pub heartbeat_failures: Arc<AtomicUsize>,

  // --- Gauges ---
  /// Number of jobs currently in the registry.
  pub jobs_current: Arc<AtomicUsize>,

  // --- Histograms ---
  /// Wall-clock run time of job processes, measured from spawn to exit.
  pub run_duration: Arc<SimpleHistogram>,
}

impl AgentMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time copy of every counter.
  pub fn snapshot(&self) -> MetricsSnapshot {
    let order = Ordering::Relaxed;

    MetricsSnapshot {
      jobs_added: self.jobs_added.load(order),
      jobs_rescheduled: self.jobs_rescheduled.load(order),
      jobs_unchanged: self.jobs_unchanged.load(order),
      jobs_removed: self.jobs_removed.load(order),
      jobs_rejected: self.jobs_rejected.load(order),
      schedule_fires: self.schedule_fires.load(order),
      runs_started: self.runs_started.load(order),
      runs_skipped_running: self.runs_skipped_running.load(order),
      run_start_failures: self.run_start_failures.load(order),
      runs_finished: self.runs_finished.load(order),
      runs_killed: self.runs_killed.load(order),
      completions_discarded: self.completions_discarded.load(order),
      registrations: self.registrations.load(order),
      heartbeat_failures: self.heartbeat_failures.load(order),
      jobs_current: self.jobs_current.load(order),
      run_duration_count: self.run_duration.get_count(),
      run_duration_sum_micros: self.run_duration.get_sum_micros(),
    }
  }

  pub(crate) fn incr(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A snapshot of the agent's metrics, served by the `Metrics` RPC.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
  // Counters
  pub jobs_added: usize,
  pub jobs_rescheduled: usize,
  pub jobs_unchanged: usize,
  pub jobs_removed: usize,
  pub jobs_rejected: usize,
  pub schedule_fires: usize,
  pub runs_started: usize,
  pub runs_skipped_running: usize,
  pub run_start_failures: usize,
  pub runs_finished: usize,
  pub runs_killed: usize,
  pub completions_discarded: usize,
  pub registrations: usize,
  pub heartbeat_failures: usize,
  // Gauges
  pub jobs_current: usize,
  // Histogram Data
  pub run_duration_count: usize,
  pub run_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Mean process run time, if any process has exited.
  pub fn mean_run_duration(&self) -> Option<Duration> {
    if self.run_duration_count == 0 {
      None
    } else {
      Some(Duration::from_micros(
        (self.run_duration_sum_micros / self.run_duration_count) as u64,
      ))
    }
  }
}
