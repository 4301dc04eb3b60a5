//! Log records and base sinks.
//!
//! A base sink owns formatting, leveling and destination. It exposes a
//! single `write(record)` operation; the enrichment layer wraps it without
//! knowing which one it is.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::Level;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write log record: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink rejected record: {0}")]
    Rejected(String),
}

/// One log line before formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub time: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    /// Structured attributes, in the order they were attached.
    pub attributes: Vec<(String, Value)>,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            level,
            message: message.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push_attr(key, value);
        self
    }

    pub fn push_attr(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.push((key.into(), value.into()));
    }

    /// Last value attached under `key`.
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// `time`, `level` and `msg` first; attributes may not overwrite them.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(
            "time".into(),
            Value::from(self.time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        object.insert("level".into(), Value::from(self.level.as_str()));
        object.insert("msg".into(), Value::from(self.message.clone()));
        for (key, value) in &self.attributes {
            if !matches!(key.as_str(), "time" | "level" | "msg") {
                object.insert(key.clone(), value.clone());
            }
        }
        Value::Object(object)
    }
}

pub trait LogSink: Send + Sync {
    fn write(&self, record: &LogRecord) -> Result<(), SinkError>;
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn write(&self, record: &LogRecord) -> Result<(), SinkError> {
        (**self).write(record)
    }
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn write(&self, record: &LogRecord) -> Result<(), SinkError> {
        (**self).write(record)
    }
}

/// One JSON object per line.
pub struct JsonSink<W> {
    writer: Mutex<W>,
    min_level: Level,
}

impl JsonSink<std::io::Stdout> {
    pub fn stdout(min_level: Level) -> Self {
        Self::new(std::io::stdout(), min_level)
    }
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(writer: W, min_level: Level) -> Self {
        Self {
            writer: Mutex::new(writer),
            min_level,
        }
    }
}

impl<W: Write + Send> LogSink for JsonSink<W> {
    fn write(&self, record: &LogRecord) -> Result<(), SinkError> {
        // More verbose levels compare greater.
        if record.level > self.min_level {
            return Ok(());
        }
        let mut line = serde_json::to_vec(&record.to_json())?;
        line.push(b'\n');
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }
}

/// Re-emits records as `tracing` events so they share the process subscriber.
///
/// `trace_id` and `span_id` become event fields; remaining attributes are
/// rendered as one JSON `attrs` field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

macro_rules! emit_event {
    ($level:expr, $($fields:tt)*) => {
        match $level {
            Level::ERROR => tracing::event!(target: "tracewire::request", Level::ERROR, $($fields)*),
            Level::WARN => tracing::event!(target: "tracewire::request", Level::WARN, $($fields)*),
            Level::INFO => tracing::event!(target: "tracewire::request", Level::INFO, $($fields)*),
            Level::DEBUG => tracing::event!(target: "tracewire::request", Level::DEBUG, $($fields)*),
            _ => tracing::event!(target: "tracewire::request", Level::TRACE, $($fields)*),
        }
    };
}

impl LogSink for TracingSink {
    fn write(&self, record: &LogRecord) -> Result<(), SinkError> {
        let id = |key: &str| record.attr(key).and_then(Value::as_str).unwrap_or_default().to_owned();
        let trace_id = id("trace_id");
        let span_id = id("span_id");
        let rest: Map<String, Value> = record
            .attributes
            .iter()
            .filter(|(k, _)| k != "trace_id" && k != "span_id")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let attrs = serde_json::to_string(&rest)?;
        let message = record.message.as_str();
        emit_event!(record.level, trace_id = %trace_id, span_id = %span_id, attrs = %attrs, "{}", message);
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records whose message equals `message`.
    pub fn find(&self, message: &str) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.message == message)
            .collect()
    }
}

impl LogSink for MemorySink {
    fn write(&self, record: &LogRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn json_sink_writes_one_line_per_record() {
        let buf = SharedBuf::default();
        let sink = JsonSink::new(buf.clone(), Level::INFO);
        sink.write(&LogRecord::new(Level::INFO, "hello").with_attr("trace_id", "abc"))
            .unwrap();
        sink.write(&LogRecord::new(Level::ERROR, "boom")).unwrap();

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["msg"], "hello");
        assert_eq!(lines[0]["level"], "INFO");
        assert_eq!(lines[0]["trace_id"], "abc");
        assert_eq!(lines[1]["level"], "ERROR");
    }

    #[test]
    fn json_sink_filters_below_min_level() {
        let buf = SharedBuf::default();
        let sink = JsonSink::new(buf.clone(), Level::WARN);
        sink.write(&LogRecord::new(Level::INFO, "quiet")).unwrap();
        assert!(buf.0.lock().unwrap().is_empty());
    }

    #[test]
    fn attributes_cannot_shadow_reserved_keys() {
        let record = LogRecord::new(Level::INFO, "real").with_attr("msg", "fake");
        assert_eq!(record.to_json()["msg"], "real");
    }
}
