//! Trace reports describing the lifecycle of staged files
//!
//! A [`TraceEvent`] accumulates fields across updates and is flushed to a
//! [`TraceSink`] at each meaningful point of a transfer. Fields not present in an
//! update keep their previous value, so site-level fields set once per batch
//! survive the per-file updates that follow.
//!
//! Delivery is fire-and-forget: a sink failure is logged and never turned into
//! a transfer failure.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;

/// One trace report; every field is optional so the same type doubles as an update
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cat_start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<f64>,
}

macro_rules! merge_fields {
    ($dst:ident, $src:ident, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field;
            }
        )+
    };
}

impl TraceRecord {
    /// Overwrite the fields that are set in `update`, keep the rest
    pub fn merge(&mut self, update: TraceRecord) {
        merge_fields!(
            self,
            update,
            event_type,
            local_site,
            remote_site,
            filename,
            guid,
            scope,
            dataset,
            url,
            filesize,
            client_state,
            state_reason,
            cat_start,
            time_end,
        );
    }
}

/// Seconds since the UNIX epoch, the timestamp format of trace reports
#[must_use]
pub fn timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}

/// Destination of flushed trace reports
pub trait TraceSink: Send + Sync + std::fmt::Debug {
    fn send(&self, record: &TraceRecord) -> anyhow::Result<()>;
}

/// Emits each report as a JSON line through `tracing` (target `trace`)
#[derive(Debug, Default)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn send(&self, record: &TraceRecord) -> anyhow::Result<()> {
        let json = serde_json::to_string(record).context("failed to serialize trace report")?;
        tracing::info!(target: "trace", "{json}");
        Ok(())
    }
}

/// Appends each report as one JSON object per line to a file
#[derive(Debug)]
pub struct JsonLinesSink {
    path: std::path::PathBuf,
    file: std::sync::Mutex<std::fs::File>,
}

impl JsonLinesSink {
    pub fn create(path: &std::path::Path) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open trace log {:?}", path))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: std::sync::Mutex::new(file),
        })
    }
}

impl TraceSink for JsonLinesSink {
    fn send(&self, record: &TraceRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record).context("failed to serialize trace report")?;
        line.push(b'\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("trace log {:?} lock poisoned", self.path))?;
        file.write_all(&line)
            .with_context(|| format!("failed writing to trace log {:?}", self.path))?;
        Ok(())
    }
}

/// Forwards each report over an unbounded channel
#[derive(Debug)]
pub struct ChannelSink {
    sender: tokio::sync::mpsc::UnboundedSender<TraceRecord>,
}

impl ChannelSink {
    #[must_use]
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<TraceRecord>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TraceSink for ChannelSink {
    fn send(&self, record: &TraceRecord) -> anyhow::Result<()> {
        self.sender
            .send(record.clone())
            .map_err(|_| anyhow!("trace receiver dropped"))
    }
}

/// Mutable trace accumulator shared by all files of one batch.
///
/// Not meant to be shared between concurrent transfers: per-file fields are
/// overwritten right before each flush.
#[derive(Debug)]
pub struct TraceEvent {
    record: TraceRecord,
    sink: Arc<dyn TraceSink>,
    sent: usize,
}

impl TraceEvent {
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self::with_record(sink, TraceRecord::default())
    }

    pub fn with_record(sink: Arc<dyn TraceSink>, record: TraceRecord) -> Self {
        Self {
            record,
            sink,
            sent: 0,
        }
    }

    pub fn update(&mut self, update: TraceRecord) {
        self.record.merge(update);
    }

    #[must_use]
    pub fn record(&self) -> &TraceRecord {
        &self.record
    }

    /// Number of reports delivered successfully
    #[must_use]
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Flush the current state to the sink
    pub fn send(&mut self) {
        match self.sink.send(&self.record) {
            Ok(()) => self.sent += 1,
            Err(error) => tracing::warn!("failed to send trace report: {error:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[derive(Debug)]
    struct BrokenSink;

    impl TraceSink for BrokenSink {
        fn send(&self, _record: &TraceRecord) -> anyhow::Result<()> {
            Err(anyhow!("collector unreachable"))
        }
    }

    #[test]
    fn merge_keeps_fields_missing_from_update() {
        let mut record = TraceRecord {
            local_site: Some("SITE_A".to_string()),
            filename: Some("a.root".to_string()),
            ..Default::default()
        };
        record.merge(TraceRecord {
            filename: Some("b.root".to_string()),
            client_state: Some("DONE".to_string()),
            ..Default::default()
        });
        assert_eq!(record.local_site.as_deref(), Some("SITE_A"));
        assert_eq!(record.filename.as_deref(), Some("b.root"));
        assert_eq!(record.client_state.as_deref(), Some("DONE"));
        assert_eq!(record.url, None);
    }

    #[test]
    fn serializes_with_collector_field_names() {
        let record = TraceRecord {
            local_site: Some("SITE_A".to_string()),
            client_state: Some("FOUND_ROOT".to_string()),
            cat_start: Some(1.5),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "localSite": "SITE_A",
                "clientState": "FOUND_ROOT",
                "catStart": 1.5,
            })
        );
    }

    #[test]
    fn send_delivers_snapshot_to_channel() {
        let (sink, mut receiver) = ChannelSink::new();
        let mut event = TraceEvent::new(Arc::new(sink));
        event.update(TraceRecord {
            filename: Some("a.root".to_string()),
            ..Default::default()
        });
        event.send();
        event.update(TraceRecord {
            filename: Some("b.root".to_string()),
            ..Default::default()
        });
        event.send();
        assert_eq!(event.sent(), 2);
        let first = receiver.try_recv().unwrap();
        let second = receiver.try_recv().unwrap();
        assert_eq!(first.filename.as_deref(), Some("a.root"));
        assert_eq!(second.filename.as_deref(), Some("b.root"));
    }

    #[test]
    #[traced_test]
    fn sink_failure_is_logged_not_raised() {
        let mut event = TraceEvent::new(Arc::new(BrokenSink));
        event.send();
        assert_eq!(event.sent(), 0);
        assert!(logs_contain("collector unreachable"));
    }

    #[test]
    fn json_lines_sink_appends_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let sink = JsonLinesSink::create(&path).unwrap();
        let mut event = TraceEvent::new(Arc::new(sink));
        event.update(TraceRecord {
            filename: Some("a.root".to_string()),
            ..Default::default()
        });
        event.send();
        event.update(TraceRecord {
            client_state: Some("DONE".to_string()),
            ..Default::default()
        });
        event.send();
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<TraceRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].filename.as_deref(), Some("a.root"));
        assert_eq!(lines[1].client_state.as_deref(), Some("DONE"));
    }
}
