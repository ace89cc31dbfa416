//! The scheduling adapter: a table of cron entries driven by one timer task.
//!
//! Entries are keyed by [`ScheduleHandle`], an opaque integer token that is
//! never reused. The timer task pops due entries from a handle-based priority
//! queue, advances them to their next fire time and invokes their callbacks
//! *after* releasing the table lock. Callbacks run on the timer task, so they
//! must return immediately.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use priority_queue::PriorityQueue;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::error::ScheduleError;
use crate::schedule::CronSpec;

/// Upper bound on how long the timer sleeps when the table is empty.
/// Table changes wake it earlier.
const IDLE_WAKEUP: Duration = Duration::from_secs(60);

/// Opaque reference to an installed schedule entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleHandle(u64);

impl ScheduleHandle {
  pub fn as_u64(&self) -> u64 {
    self.0
  }
}

impl fmt::Display for ScheduleHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Callback invoked by the timer each time an entry fires.
pub type FireCallback = Arc<dyn Fn() + Send + Sync + 'static>;

struct Entry {
  spec: CronSpec,
  callback: FireCallback,
  prev: Option<DateTime<Utc>>,
  next: Option<DateTime<Utc>>,
}

// Manual Debug: the callback is opaque.
impl fmt::Debug for Entry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Entry")
      .field("spec", &self.spec.source())
      .field("callback", &format_args!("<Fn>"))
      .field("prev", &self.prev)
      .field("next", &self.next)
      .finish()
  }
}

#[derive(Debug, Default)]
struct Table {
  entries: HashMap<ScheduleHandle, Entry>,
  queue: PriorityQueue<ScheduleHandle, Reverse<DateTime<Utc>>>,
  last_handle: u64,
}

impl Table {
  /// Pops every entry due at or before `now`, records the fire and re-queues
  /// the entry at its next fire time. Returns the callbacks to invoke.
  fn take_due(&mut self, now: DateTime<Utc>) -> Vec<(ScheduleHandle, FireCallback)> {
    let mut due = Vec::new();
    loop {
      match self.queue.peek() {
        Some((_, Reverse(at))) if *at <= now => {}
        _ => break,
      }
      let Some((handle, Reverse(at))) = self.queue.pop() else {
        break;
      };
      let Some(entry) = self.entries.get_mut(&handle) else {
        // Cancel removes both sides, so this only happens on a bookkeeping bug.
        warn!(%handle, "Queued schedule handle has no entry, dropping it.");
        continue;
      };
      entry.prev = Some(at);
      // Computed from `now`, not `at`, so a late wakeup does not replay missed fires.
      entry.next = entry.spec.next_after(now);
      match entry.next {
        Some(next) => {
          self.queue.push(handle, Reverse(next));
        }
        None => debug!(%handle, "Schedule entry has no further fire times."),
      }
      due.push((handle, entry.callback.clone()));
    }
    due
  }

  fn next_wakeup(&self) -> Option<DateTime<Utc>> {
    self.queue.peek().map(|(_, Reverse(at))| *at)
  }
}

#[derive(Debug)]
struct Shared {
  table: Mutex<Table>,
  wake: Notify,
}

/// Handle to the cron timer. Cheap to clone; the timer task stops when
/// [`CronScheduler::shutdown`] is called or the last clone is dropped.
#[derive(Debug, Clone)]
pub struct CronScheduler {
  shared: Arc<Shared>,
  shutdown_tx: Arc<watch::Sender<bool>>,
  timer_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CronScheduler {
  /// Creates the entry table and spawns the timer task.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn start() -> Self {
    let shared = Arc::new(Shared {
      table: Mutex::new(Table::default()),
      wake: Notify::new(),
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let timer_task = tokio::spawn(run_timer(shared.clone(), shutdown_rx));
    Self {
      shared,
      shutdown_tx: Arc::new(shutdown_tx),
      timer_task: Arc::new(Mutex::new(Some(timer_task))),
    }
  }

  /// Parses `spec` and installs a recurring entry that invokes `callback` at
  /// every fire time.
  ///
  /// # Errors
  ///
  /// `ScheduleError::InvalidSpec` for malformed expressions and
  /// `ScheduleError::NoUpcomingFire` for expressions that never fire again.
  pub fn install(&self, spec: &str, callback: FireCallback) -> Result<ScheduleHandle, ScheduleError> {
    let spec = CronSpec::parse(spec)?;
    let next = spec
      .next_after(Utc::now())
      .ok_or_else(|| ScheduleError::NoUpcomingFire(spec.source().to_string()))?;

    let handle = {
      let mut table = self.shared.table.lock();
      table.last_handle += 1;
      let handle = ScheduleHandle(table.last_handle);
      debug!(%handle, spec = spec.source(), %next, "Installed schedule entry.");
      table.entries.insert(
        handle,
        Entry {
          spec,
          callback,
          prev: None,
          next: Some(next),
        },
      );
      table.queue.push(handle, Reverse(next));
      handle
    };
    // Wake the timer in case this entry is now the earliest.
    self.shared.wake.notify_one();
    Ok(handle)
  }

  /// Deactivates future firings of `handle`. Returns `true` if the entry was
  /// active. Cancelling an unknown or already-cancelled handle is a no-op.
  pub fn cancel(&self, handle: ScheduleHandle) -> bool {
    let removed = {
      let mut table = self.shared.table.lock();
      table.queue.remove(&handle);
      table.entries.remove(&handle).is_some()
    };
    if removed {
      debug!(%handle, "Cancelled schedule entry.");
      self.shared.wake.notify_one();
    } else {
      trace!(%handle, "Cancel of inactive schedule handle ignored.");
    }
    removed
  }

  /// The instant the entry last fired, `None` before its first fire.
  pub fn prev_fire_time(&self, handle: ScheduleHandle) -> Option<DateTime<Utc>> {
    self.fire_times(handle).0
  }

  /// The instant the entry is next due to fire.
  pub fn next_fire_time(&self, handle: ScheduleHandle) -> Option<DateTime<Utc>> {
    self.fire_times(handle).1
  }

  /// `(prev, next)` read under a single lock. Both are `None` for inactive handles.
  pub fn fire_times(&self, handle: ScheduleHandle) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let table = self.shared.table.lock();
    table
      .entries
      .get(&handle)
      .map(|entry| (entry.prev, entry.next))
      .unwrap_or((None, None))
  }

  pub fn is_active(&self, handle: ScheduleHandle) -> bool {
    self.shared.table.lock().entries.contains_key(&handle)
  }

  /// Number of active entries.
  pub fn len(&self) -> usize {
    self.shared.table.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Stops the timer task and waits for it to exit. Installed entries stay in
  /// the table but never fire again.
  pub async fn shutdown(&self) {
    if self.shutdown_tx.send(true).is_err() {
      trace!("Cron timer already stopped.");
    }
    let task = self.timer_task.lock().take();
    if let Some(task) = task {
      if let Err(e) = task.await {
        warn!(error = %e, "Cron timer task ended abnormally.");
      }
    }
  }
}

/// Main loop of the timer task.
async fn run_timer(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
  info!("Cron timer started.");

  loop {
    let now = Utc::now();
    let (due, next_wakeup) = {
      let mut table = shared.table.lock();
      let due = table.take_due(now);
      (due, table.next_wakeup())
    };

    // Lock released: callbacks may call back into the scheduler.
    for (handle, callback) in due {
      trace!(%handle, "Schedule entry fired.");
      callback();
    }

    let sleep_duration = match next_wakeup {
      Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
      None => IDLE_WAKEUP,
    };
    if sleep_duration.is_zero() {
      continue;
    }

    tokio::select! {
      biased;

      changed = shutdown_rx.changed() => {
        if changed.is_err() || *shutdown_rx.borrow() {
          break;
        }
      }
      _ = shared.wake.notified() => {
        trace!("Timer woken by table change.");
      }
      _ = sleep(sleep_duration) => {
        trace!("Timer sleep elapsed.");
      }
    }
  }

  info!("Cron timer shutting down.");
}
