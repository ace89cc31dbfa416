//! tests/common.rs
//! Shared helper functions for integration tests.

use std::future::Future;
use std::time::Duration as StdDuration;

use tracing_subscriber::fmt::TestWriter;
use cronkeeper::{CronAgent, JobId, JobState, JobView, NodeIdentity};

// Rarely fires, so a test can drive runs by hand without the timer interfering.
pub const YEARLY: &str = "0 0 1 1 *";
pub const EVERY_SECOND: &str = "* * * * * *";

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

// Builds an agent for a node in `group`, listening nowhere.
pub fn build_agent(group: &str) -> CronAgent {
  CronAgent::builder()
    .node(NodeIdentity::new("test-node", group, "127.0.0.1:0"))
    .build()
}

// Polls `condition` every 50ms until it holds or `timeout` passes.
pub async fn wait_for<F>(timeout: StdDuration, mut condition: F) -> bool
where
  F: FnMut() -> bool,
{
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    if condition() {
      return true;
    }
    if tokio::time::Instant::now() >= deadline {
      return false;
    }
    tokio::time::sleep(StdDuration::from_millis(50)).await;
  }
}

// Polls until job `id` reaches `state`, returning the last view seen.
pub async fn wait_for_state(
  agent: &CronAgent,
  id: JobId,
  state: JobState,
  timeout: StdDuration,
) -> Option<JobView> {
  let reached = wait_for(timeout, || {
    agent.registry().get(id).map(|view| view.state) == Some(state)
  })
  .await;
  if reached {
    agent.registry().get(id)
  } else {
    tracing::warn!(job_id = id, ?state, last = ?agent.registry().get(id), "State not reached in time");
    None
  }
}

// Runs `fut` with a generous upper bound so a hang fails the test instead of stalling CI.
pub async fn bounded<T>(fut: impl Future<Output = T>) -> T {
  tokio::time::timeout(StdDuration::from_secs(10), fut)
    .await
    .expect("test step timed out")
}
