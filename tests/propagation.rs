//! End-to-end trace propagation across api → rpc → consumer.

use std::collections::HashSet;

use axum::http::StatusCode;
use tracewire::propagation::{traceparent, SpanId, TraceContext, TraceId, TRACEPARENT_HEADER};
use tracewire::telemetry::{SpanKind, SpanStatus};

mod common;

use common::{client, start_stack, Capture};

#[tokio::test]
async fn one_trace_spans_all_three_services() {
    let capture = Capture::new();
    let (api, rpc, consumer) = start_stack(&capture).await;

    let caller = TraceContext::new(
        TraceId::from_u128(0x4bf92f3577b34da6a3ce929d0e0e4736),
        SpanId::from_u64(0x00f067aa0ba902b7),
        true,
    );
    let res = client()
        .get(api.url("/health"))
        .header(TRACEPARENT_HEADER, traceparent::format(&caller))
        .send()
        .await
        .expect("api unreachable");

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "OK");

    let trace_id = caller.trace_id.to_string();
    for message in ["api health check", "api health check done", "received message: health check"] {
        let lines = capture.logs.find(message);
        assert_eq!(lines.len(), 1, "expected one '{message}' line");
        assert_eq!(lines[0].attr("trace_id").unwrap(), &trace_id, "{message}");
    }
    assert!(capture.logs.find("received message: health check")[0]
        .attr("message_id")
        .is_some());

    let rpc_start = capture
        .logs
        .find("trace start")
        .into_iter()
        .find(|r| r.attr("call").and_then(|v| v.as_str()) == Some("/grpc.health.v1.Health/Check"))
        .expect("rpc boundary did not log");
    assert_eq!(rpc_start.attr("trace_id").unwrap(), &trace_id);

    // Stopping flushes each node's span processor.
    for node in [&api, &rpc, &consumer] {
        node.stop().await;
    }

    let spans = capture.spans.spans();
    assert_eq!(spans.len(), 3, "{spans:?}");
    assert!(spans.iter().all(|s| s.trace_id == caller.trace_id));
    assert!(spans.iter().all(|s| s.status == SpanStatus::Ok));

    let api_span = spans.iter().find(|s| s.name == "GET /health").unwrap();
    assert_eq!(api_span.kind, SpanKind::Server);
    assert_eq!(api_span.parent_span_id, Some(caller.span_id));

    let rpc_span = spans
        .iter()
        .find(|s| s.name == "/grpc.health.v1.Health/Check")
        .unwrap();
    assert_eq!(rpc_span.parent_span_id, Some(api_span.span_id));

    let consumer_span = spans.iter().find(|s| s.kind == SpanKind::Consumer).unwrap();
    assert_eq!(consumer_span.parent_span_id, Some(api_span.span_id));

    let ids: HashSet<_> = spans.iter().map(|s| s.span_id).collect();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn request_without_trace_starts_a_root() {
    let capture = Capture::new();
    let (api, rpc, consumer) = start_stack(&capture).await;

    let res = client().get(api.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let request_id = res
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("request id echoed");

    let line = &capture.logs.find("api health check")[0];
    assert_eq!(line.attr("request_id").unwrap(), &request_id);
    let trace_id = line.attr("trace_id").unwrap().clone();
    assert_ne!(trace_id, TraceId::INVALID.to_string());

    let received = &capture.logs.find("received message: health check")[0];
    assert_eq!(received.attr("trace_id").unwrap(), &trace_id);

    for node in [&api, &rpc, &consumer] {
        node.stop().await;
    }
    let api_span = capture
        .spans
        .spans()
        .into_iter()
        .find(|s| s.name == "GET /health")
        .unwrap();
    assert_eq!(api_span.parent_span_id, None);
}

#[tokio::test]
async fn unreachable_rpc_peer_is_a_dependency_failure() {
    let capture = Capture::new();
    let mut config = common::test_config();

    // Bind and release a port so nothing listens on it.
    let vacant = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    config.peer.rpc_endpoint = format!("http://{}", vacant.local_addr().unwrap());
    drop(vacant);
    config.peer.timeout_secs = 1;

    let api = common::start_node(tracewire::config::Role::Api, &config, &capture).await;
    let res = client().get(api.url("/health")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), "dependency_unavailable");

    let failure = &capture.logs.find("health check failed")[0];
    assert_eq!(failure.attr("kind").unwrap(), "dependency_unavailable");
    assert_eq!(
        failure.attr("trace_id"),
        capture.logs.find("api health check")[0].attr("trace_id")
    );
    let done = capture.logs.find("api health check done");
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].attr("trace_id"), failure.attr("trace_id"));

    api.stop().await;
    let span = &capture.spans.spans()[0];
    assert_eq!(span.status, SpanStatus::Error);
}
