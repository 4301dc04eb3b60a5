//! Span exporters.
//!
//! Exporters receive batches of completed, sampled spans from the
//! [`SpanProcessor`](crate::telemetry::processor::SpanProcessor). They run
//! on the processor's drain task, never on a request path.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value::Value, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::span::SpanKind as OtlpKind;
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span, Status};
use thiserror::Error;
use url::Url;

use crate::telemetry::span::{SpanData, SpanKind, SpanStatus};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("collector request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("collector rejected batch with status {0}")]
    Rejected(u16),
    #[error("invalid collector endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("collector endpoint {0} cannot take a path")]
    NotABase(String),
    #[error("exporter task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait SpanExporter: Send + Sync {
    async fn export(&self, batch: Vec<SpanData>) -> Result<(), ExportError>;

    /// Release exporter resources. Called once after the final batch.
    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExporter;

#[async_trait]
impl SpanExporter for NoopExporter {
    async fn export(&self, _batch: Vec<SpanData>) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Writes one `tracing` event per span.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExporter;

#[async_trait]
impl SpanExporter for LogExporter {
    async fn export(&self, batch: Vec<SpanData>) -> Result<(), ExportError> {
        for span in batch {
            tracing::info!(
                target: "tracewire::spans",
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                parent_span_id = ?span.parent_span_id.map(|id| id.to_string()),
                name = %span.name,
                status = span.status.as_str(),
                duration_ms = span.duration().as_millis() as u64,
                "span completed"
            );
        }
        Ok(())
    }
}

/// Keeps exported spans in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<SpanData> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SpanExporter for MemoryExporter {
    async fn export(&self, batch: Vec<SpanData>) -> Result<(), ExportError> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(batch);
        Ok(())
    }
}

/// OTLP/HTTP exporter using the JSON encoding (`POST {endpoint}/v1/traces`).
#[derive(Debug, Clone)]
pub struct OtlpHttpExporter {
    client: reqwest::Client,
    url: Url,
    service_name: String,
}

impl OtlpHttpExporter {
    pub fn new(endpoint: &str, service_name: impl Into<String>, timeout: Duration) -> Result<Self, ExportError> {
        let url = traces_url(endpoint)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            service_name: service_name.into(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// One resource carrying `service.name`, one scope, every span in the batch.
    pub fn request(&self, batch: &[SpanData]) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![string_attribute("service.name", &self.service_name)],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: env!("CARGO_PKG_NAME").to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                        ..Default::default()
                    }),
                    spans: batch.iter().map(otlp_span).collect(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }
}

#[async_trait]
impl SpanExporter for OtlpHttpExporter {
    async fn export(&self, batch: Vec<SpanData>) -> Result<(), ExportError> {
        if batch.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(self.url.clone())
            .json(&self.request(&batch))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ExportError::Rejected(status.as_u16()))
        }
    }
}

/// Append `v1/traces` to the endpoint, keeping any base path it has.
fn traces_url(endpoint: &str) -> Result<Url, ExportError> {
    let mut url = Url::parse(endpoint)?;
    url.path_segments_mut()
        .map_err(|()| ExportError::NotABase(endpoint.to_string()))?
        .pop_if_empty()
        .extend(["v1", "traces"]);
    Ok(url)
}

fn otlp_span(span: &SpanData) -> Span {
    let kind = match span.kind {
        SpanKind::Internal => OtlpKind::Internal,
        SpanKind::Server => OtlpKind::Server,
        SpanKind::Client => OtlpKind::Client,
        SpanKind::Consumer => OtlpKind::Consumer,
    };
    let status = match span.status {
        SpanStatus::Ok => Status {
            code: StatusCode::Ok as i32,
            ..Default::default()
        },
        SpanStatus::Error => Status {
            code: StatusCode::Error as i32,
            ..Default::default()
        },
        SpanStatus::Aborted => Status {
            code: StatusCode::Error as i32,
            message: "aborted".to_string(),
            ..Default::default()
        },
    };

    Span {
        trace_id: span.trace_id.to_bytes().to_vec(),
        span_id: span.span_id.to_bytes().to_vec(),
        parent_span_id: span
            .parent_span_id
            .map(|id| id.to_bytes().to_vec())
            .unwrap_or_default(),
        flags: u32::from(span.sampled),
        name: span.name.clone(),
        kind: kind as i32,
        start_time_unix_nano: unix_nanos(span.start_time),
        end_time_unix_nano: unix_nanos(span.end_time),
        attributes: span
            .attributes
            .iter()
            .map(|(k, v)| string_attribute(k, v))
            .collect(),
        status: Some(status),
        ..Default::default()
    }
}

fn string_attribute(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::StringValue(value.to_string())),
        }),
    }
}

fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
