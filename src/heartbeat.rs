//! Registration and heartbeat against the central server.
//!
//! A single background loop owns the [`ServerHandle`]. On each tick it either
//! registers (no handle yet) or pings (handle present). A failed ping drops the
//! handle, so the next tick registers again. The interval is fixed; there is
//! no backoff.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{base_url, NodeIdentity, ServerConfig};
use crate::error::TransportError;
use crate::metrics::AgentMetrics;
use crate::rpc::{method, path, Reply, ServerPingArgs};

/// Shortest interval the loop accepts. Anything below, zero included, is raised to it.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Live connection to the central server, created by a successful registration.
#[derive(Debug, Clone)]
pub struct ServerHandle {
  pub name: String,
  pub address: String,
  client: reqwest::Client,
}

impl ServerHandle {
  fn new(name: &str, address: &str, timeout: Duration) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|source| TransportError::Transport {
        method: method::SERVER_REGISTER,
        source,
      })?;
    Ok(Self {
      name: name.to_string(),
      address: base_url(address),
      client,
    })
  }

  /// Calls `method` on the server and checks the reply code.
  async fn call<A, T>(&self, method: &'static str, args: &A) -> Result<Reply<T>, TransportError>
  where
    A: Serialize + ?Sized,
    T: DeserializeOwned,
  {
    let url = format!("{}{}", self.address, path(method));
    let reply: Reply<T> = self
      .client
      .post(&url)
      .json(args)
      .send()
      .await
      .and_then(|response| response.error_for_status())
      .map_err(|source| TransportError::Transport { method, source })?
      .json()
      .await
      .map_err(|source| TransportError::Transport { method, source })?;

    if reply.is_success() {
      Ok(reply)
    } else {
      Err(TransportError::Rejected {
        method,
        message: reply.message,
      })
    }
  }

  async fn register(&self, identity: &NodeIdentity) -> Result<(), TransportError> {
    self.call::<_, serde_json::Value>(method::SERVER_REGISTER, identity).await?;
    Ok(())
  }

  async fn ping(&self, node_name: &str) -> Result<(), TransportError> {
    let args = ServerPingArgs {
      name: node_name.to_string(),
    };
    self.call::<_, serde_json::Value>(method::SERVER_PING, &args).await?;
    Ok(())
  }
}

/// What one heartbeat tick achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
  /// Not registered before; registration succeeded.
  Registered,
  /// Registered and the server answered the ping.
  Alive,
  /// Registration failed; will retry next tick.
  Unreachable,
  /// The ping failed; the handle was dropped and the next tick re-registers.
  Lost,
}

/// The outbound registration/heartbeat client.
pub struct HeartbeatClient {
  identity: Arc<NodeIdentity>,
  server_name: String,
  server_uri: String,
  interval: Duration,
  handle: Option<ServerHandle>,
  metrics: AgentMetrics,
}

impl HeartbeatClient {
  pub fn new(identity: Arc<NodeIdentity>, server: &ServerConfig, metrics: AgentMetrics) -> Self {
    Self {
      identity,
      server_name: server.name.clone(),
      server_uri: server.uri.clone(),
      interval: clamp_interval(server.interval()),
      handle: None,
      metrics,
    }
  }

  /// Overrides the interval from the config, e.g. for sub-second ticks.
  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = clamp_interval(interval);
    self
  }

  pub fn interval(&self) -> Duration {
    self.interval
  }

  pub fn is_registered(&self) -> bool {
    self.handle.is_some()
  }

  pub fn server_handle(&self) -> Option<&ServerHandle> {
    self.handle.as_ref()
  }

  /// Performs one heartbeat step. Failures are logged and absorbed.
  pub async fn tick(&mut self) -> HeartbeatStatus {
    let Some(handle) = self.handle.clone() else {
      return match self.register().await {
        Ok(handle) => {
          AgentMetrics::incr(&self.metrics.registrations);
          info!(server = %handle.name, address = %handle.address, node = %self.identity.name, "Registered with server.");
          self.handle = Some(handle);
          HeartbeatStatus::Registered
        }
        Err(e) => {
          AgentMetrics::incr(&self.metrics.heartbeat_failures);
          warn!(server = %self.server_name, node = %self.identity.name, error = %e, "Registration failed, will retry.");
          HeartbeatStatus::Unreachable
        }
      };
    };

    match handle.ping(&self.identity.name).await {
      Ok(()) => {
        debug!(server = %handle.name, "Heartbeat acknowledged.");
        HeartbeatStatus::Alive
      }
      Err(e) => {
        AgentMetrics::incr(&self.metrics.heartbeat_failures);
        warn!(server = %handle.name, error = %e, "Heartbeat failed, dropping connection to re-register.");
        self.handle = None;
        HeartbeatStatus::Lost
      }
    }
  }

  async fn register(&self) -> Result<ServerHandle, TransportError> {
    // Requests never outlive the interval, so a slow server only delays the next tick.
    let handle = ServerHandle::new(&self.server_name, &self.server_uri, self.interval)?;
    handle.register(&self.identity).await?;
    Ok(handle)
  }

  /// Ticks forever at the configured interval, the first tick immediately.
  ///
  /// Exits only when `true` is sent on `shutdown_rx`. Dropping the sender
  /// detaches the loop, which then runs for the rest of the process lifetime.
  pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
    info!(server = %self.server_name, interval_ms = self.interval.as_millis() as u64, "Heartbeat loop started.");
    let mut interval = tokio::time::interval(self.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut shutdown_open = true;

    loop {
      tokio::select! {
        biased;

        changed = shutdown_rx.changed(), if shutdown_open => {
          match changed {
            Ok(()) if *shutdown_rx.borrow() => break,
            Ok(()) => {}
            Err(_) => shutdown_open = false,
          }
        }
        _ = interval.tick() => {
          self.tick().await;
        }
      }
    }

    info!("Heartbeat loop stopped.");
  }

  /// Spawns [`HeartbeatClient::run`] as a background task.
  pub fn spawn(self) -> HeartbeatTask {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let join = tokio::spawn(self.run(shutdown_rx));
    HeartbeatTask { shutdown_tx, join }
  }
}

fn clamp_interval(interval: Duration) -> Duration {
  if interval < MIN_HEARTBEAT_INTERVAL {
    warn!(requested_ms = interval.as_millis() as u64, "Heartbeat interval too short, using the minimum.");
    MIN_HEARTBEAT_INTERVAL
  } else {
    interval
  }
}

/// Handle to a spawned heartbeat loop.
pub struct HeartbeatTask {
  shutdown_tx: watch::Sender<bool>,
  join: JoinHandle<()>,
}

impl HeartbeatTask {
  /// Stops the loop and waits for it to exit.
  pub async fn stop(self) {
    let _ = self.shutdown_tx.send(true);
    if let Err(e) = self.join.await {
      warn!(error = %e, "Heartbeat task ended abnormally.");
    }
  }
}
