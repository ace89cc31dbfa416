//! tests/rpc.rs
//! The management RPC surface, driven through the router without a socket.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::common::{build_agent, setup_tracing, YEARLY};
use cronkeeper::rpc::{method, path, Reply, CODE_ERROR, CODE_SUCCESS};
use cronkeeper::{JobState, JobView, MetricsSnapshot};

async fn call(router: &Router, method: &str, body: Value) -> (StatusCode, Value) {
  let request = Request::post(path(method))
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(body.to_string()))
    .unwrap();
  let response = router.clone().oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
  (status, value)
}

#[tokio::test]
async fn test_ping() {
  setup_tracing();
  let agent = build_agent("");
  let router = agent.router();

  let (status, reply) = call(&router, method::PING, json!({})).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(reply, json!({"code": 0, "message": "success"}));

  agent.shutdown().await;
}

#[tokio::test]
async fn test_add_list_remove_round_trip() {
  setup_tracing();
  let agent = build_agent("teamA");
  let router = agent.router();

  let job = json!({"id": 9, "script": "echo hi", "dir": "/tmp", "spec": YEARLY, "group": "teamA"});
  let (status, reply) = call(&router, method::ADD_JOB, job.clone()).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(reply["code"], CODE_SUCCESS);
  assert_eq!(reply["message"], "success");

  // Re-sending the same job is still a success.
  let (_, reply) = call(&router, method::ADD_JOB, job).await;
  assert_eq!(reply["code"], CODE_SUCCESS);

  let (status, reply) = call(&router, method::LIST_JOBS, json!({})).await;
  assert_eq!(status, StatusCode::OK);
  let reply: Reply<Vec<JobView>> = serde_json::from_value(reply).unwrap();
  assert!(reply.is_success());
  let jobs = reply.data.unwrap();
  assert_eq!(jobs.len(), 1);
  assert_eq!(jobs[0].id, 9);
  assert_eq!(jobs[0].dir, "/tmp");
  assert_eq!(jobs[0].spec, YEARLY);
  assert_eq!(jobs[0].state, JobState::Scheduled);
  assert!(jobs[0].next.is_some());

  let (_, reply) = call(&router, method::REMOVE_JOB, json!({"id": 9})).await;
  assert_eq!(reply["code"], CODE_SUCCESS);

  let (_, reply) = call(&router, method::LIST_JOBS, json!({})).await;
  assert_eq!(reply["data"], json!([]));

  agent.shutdown().await;
}

#[tokio::test]
async fn test_list_serializes_state_in_caps() {
  setup_tracing();
  let agent = build_agent("");
  let router = agent.router();

  call(&router, method::ADD_JOB, json!({"id": 1, "script": "true", "spec": YEARLY})).await;
  let (_, reply) = call(&router, method::LIST_JOBS, json!({})).await;
  assert_eq!(reply["data"][0]["state"], "SCHEDULED");
  assert_eq!(reply["data"][0]["pid"], 0);
  assert_eq!(reply["data"][0]["prev"], Value::Null);

  agent.shutdown().await;
}

#[tokio::test]
async fn test_errors_are_reported_in_the_envelope() {
  setup_tracing();
  let agent = build_agent("teamA");
  let router = agent.router();

  let (status, reply) = call(&router, method::REMOVE_JOB, json!({"id": 404})).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(reply["code"], CODE_ERROR);
  assert!(reply["message"].as_str().unwrap().contains("404"));

  let (status, reply) = call(
    &router,
    method::ADD_JOB,
    json!({"id": 1, "script": "true", "spec": YEARLY, "group": "teamB"}),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(reply["code"], CODE_ERROR);
  assert!(reply["message"].as_str().unwrap().contains("teamB"));

  let (_, reply) = call(
    &router,
    method::ADD_JOB,
    json!({"id": 2, "script": "true", "spec": "every tuesday"}),
  )
  .await;
  assert_eq!(reply["code"], CODE_ERROR);
  assert!(agent.registry().is_empty());

  agent.shutdown().await;
}

#[tokio::test]
async fn test_malformed_request_is_a_client_error() {
  setup_tracing();
  let agent = build_agent("");
  let router = agent.router();

  let request = Request::post(path(method::ADD_JOB))
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from("{not json"))
    .unwrap();
  let response = router.clone().oneshot(request).await.unwrap();
  assert!(response.status().is_client_error());

  // Missing the required `spec` field.
  let (status, _) = call(&router, method::ADD_JOB, json!({"id": 1, "script": "true"})).await;
  assert!(status.is_client_error());
  assert!(agent.registry().is_empty());

  agent.shutdown().await;
}

#[tokio::test]
async fn test_metrics_reports_counters() {
  setup_tracing();
  let agent = build_agent("");
  let router = agent.router();

  call(&router, method::ADD_JOB, json!({"id": 1, "script": "true", "spec": YEARLY})).await;
  call(&router, method::ADD_JOB, json!({"id": 1, "script": "true", "spec": YEARLY})).await;

  let (_, reply) = call(&router, method::METRICS, json!({})).await;
  let reply: Reply<MetricsSnapshot> = serde_json::from_value(reply).unwrap();
  let metrics = reply.data.unwrap();
  assert_eq!(metrics.jobs_added, 1);
  assert_eq!(metrics.jobs_unchanged, 1);
  assert_eq!(metrics.jobs_current, 1);

  agent.shutdown().await;
}
