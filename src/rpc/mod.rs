//! Wire types shared by the management RPC service and the outbound
//! heartbeat client.
//!
//! Every call is `POST /rpc/<Method>` with a JSON argument, answered by a JSON
//! [`Reply`] envelope. The outcome lives in the envelope's `code`, not in the
//! HTTP status: code 0 is success, code 1 is an error whose `message` says why.

pub mod service;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::job::JobId;

pub const CODE_SUCCESS: i32 = 0;
pub const CODE_ERROR: i32 = 1;
pub const MSG_SUCCESS: &str = "success";

/// Method names, as they appear in the request path.
pub mod method {
  pub const ADD_JOB: &str = "AddJob";
  pub const REMOVE_JOB: &str = "RemoveJob";
  pub const LIST_JOBS: &str = "ListJobs";
  pub const PING: &str = "Ping";
  pub const METRICS: &str = "Metrics";

  // Served by the central server.
  pub const SERVER_REGISTER: &str = "ServerRegister";
  pub const SERVER_PING: &str = "ServerPing";
}

/// Request path of `method`.
pub fn path(method: &str) -> String {
  format!("/rpc/{}", method)
}

/// Response envelope of every RPC method. `data` is only present for methods
/// that return a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply<T = ()> {
  pub code: i32,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<T>,
}

impl<T> Reply<T> {
  pub fn success() -> Self {
    Self {
      code: CODE_SUCCESS,
      message: MSG_SUCCESS.to_string(),
      data: None,
    }
  }

  pub fn success_with(data: T) -> Self {
    Self {
      code: CODE_SUCCESS,
      message: MSG_SUCCESS.to_string(),
      data: Some(data),
    }
  }

  pub fn error(message: impl fmt::Display) -> Self {
    Self {
      code: CODE_ERROR,
      message: message.to_string(),
      data: None,
    }
  }

  pub fn is_success(&self) -> bool {
    self.code == CODE_SUCCESS
  }
}

/// Argument of `RemoveJob`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveJobArgs {
  pub id: JobId,
}

/// Argument of the outbound `ServerPing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPingArgs {
  pub name: String,
}
