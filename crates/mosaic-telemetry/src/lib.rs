//! Telemetry sinks for panel and backend activity.
//!
//! Every event becomes a [`TelemetryRecord`] naming the backend route it hit
//! and, for layout solves, how many candidates came back.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use log::{debug, info, warn, Level};
use mosaic_core::{BackendAction, TelemetryEvent, TelemetryEventType, TelemetrySink};
use reqwest::blocking::Client;
use serde::Serialize;

pub const SINK_ENV: &str = "MOSAIC_TELEMETRY_SINK";
pub const FILE_ENV: &str = "MOSAIC_TELEMETRY_FILE";
pub const ENDPOINT_ENV: &str = "MOSAIC_TELEMETRY_ENDPOINT";

/// `log` target used by [`LogSink`], so `RUST_LOG=mosaic::telemetry=info` isolates it.
pub const LOG_TARGET: &str = "mosaic::telemetry";

const COLLECTOR_TIMEOUT: Duration = Duration::from_secs(5);

pub fn sink_from_env() -> Option<Box<dyn TelemetrySink>> {
    let mode = std::env::var(SINK_ENV).ok()?;
    sink_for_mode(
        &mode,
        std::env::var(FILE_ENV).ok(),
        std::env::var(ENDPOINT_ENV).ok(),
    )
}

/// `log` (through the `log` facade), `file` (JSON lines, needs a path) or
/// `http` (needs a collector URL). Anything else disables telemetry.
pub fn sink_for_mode(mode: &str, file: Option<String>, endpoint: Option<String>) -> Option<Box<dyn TelemetrySink>> {
    match mode.trim().to_ascii_lowercase().as_str() {
        "log" => Some(Box::new(LogSink)),
        "file" => {
            let path = file.filter(|v| !v.trim().is_empty())?;
            match JsonLinesSink::open(Path::new(path.trim())) {
                Ok(sink) => Some(Box::new(sink)),
                Err(err) => {
                    warn!("telemetry disabled: {:#}", err);
                    None
                }
            }
        }
        "http" => {
            let endpoint = endpoint.filter(|v| !v.trim().is_empty())?;
            match CollectorSink::new(endpoint.trim()) {
                Ok(sink) => Some(Box::new(sink)),
                Err(err) => {
                    warn!("telemetry disabled: {:#}", err);
                    None
                }
            }
        }
        other => {
            debug!("telemetry disabled (unknown sink '{}')", other);
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Started,
    Succeeded,
    Failed,
    Solved,
}

impl From<&TelemetryEventType> for Outcome {
    fn from(event_type: &TelemetryEventType) -> Self {
        match event_type {
            TelemetryEventType::RequestStart => Outcome::Started,
            TelemetryEventType::RequestSuccess => Outcome::Succeeded,
            TelemetryEventType::RequestError => Outcome::Failed,
            TelemetryEventType::LayoutsComputed => Outcome::Solved,
        }
    }
}

/// Wire and log shape of one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub timestamp_ms: u64,
    pub action: BackendAction,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TelemetryRecord {
    pub fn from_event(event: TelemetryEvent) -> Self {
        let outcome = Outcome::from(&event.event_type);
        let (error, detail) = match outcome {
            Outcome::Failed => (event.detail, None),
            _ => (None, event.detail),
        };
        Self {
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            action: event.action,
            outcome,
            endpoint: event.action.endpoint(),
            duration_ms: event.duration_ms,
            candidate_count: event.candidate_count,
            error,
            detail,
        }
    }

    pub fn level(&self) -> Level {
        match self.outcome {
            Outcome::Failed => Level::Warn,
            Outcome::Started => Level::Debug,
            Outcome::Succeeded | Outcome::Solved => Level::Info,
        }
    }

    /// One-line human form, e.g. `POST /backdrop succeeded in 41ms`.
    pub fn summary(&self) -> String {
        let mut line = match self.endpoint {
            Some(endpoint) => format!("POST {}", endpoint),
            None => "layout solve".to_string(),
        };
        let verb = match self.outcome {
            Outcome::Started => "started",
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
            Outcome::Solved => "returned",
        };
        line.push(' ');
        line.push_str(verb);
        if let Some(count) = self.candidate_count {
            line.push_str(&format!(" {} candidates", count));
        }
        if let Some(ms) = self.duration_ms {
            line.push_str(&format!(" in {}ms", ms));
        }
        if let Some(detail) = self.error.as_deref().or(self.detail.as_deref()) {
            line.push_str(&format!(" ({})", detail));
        }
        line
    }
}

/// Forwards events to whatever logger the host installed.
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn emit(&self, event: TelemetryEvent) {
        let record = TelemetryRecord::from_event(event);
        log::log!(target: LOG_TARGET, record.level(), "{}", record.summary());
    }
}

/// Appends one JSON record per line to a file opened once.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating telemetry directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening telemetry file {}", path.display()))?;
        info!(target: LOG_TARGET, "recording telemetry to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &TelemetryRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("encoding telemetry record")?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("telemetry file lock poisoned"))?;
        writeln!(file, "{}", line).context("writing telemetry line")?;
        Ok(())
    }
}

impl TelemetrySink for JsonLinesSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Err(err) = self.append(&TelemetryRecord::from_event(event)) {
            debug!("dropping telemetry event for {}: {:#}", self.path.display(), err);
        }
    }
}

/// Posts each record to a collector. Failures never reach the panel.
pub struct CollectorSink {
    endpoint: String,
    client: Client,
}

impl CollectorSink {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(COLLECTOR_TIMEOUT)
            .build()
            .context("building telemetry client")?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

impl TelemetrySink for CollectorSink {
    fn emit(&self, event: TelemetryEvent) {
        let record = TelemetryRecord::from_event(event);
        if let Err(err) = self.client.post(&self.endpoint).json(&record).send() {
            debug!("telemetry post to {} failed: {}", self.endpoint, err);
        }
    }
}
