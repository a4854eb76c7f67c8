//! Append-only JSON-lines record sink.
//!
//! One JSON object per line, appended as records are produced. The sink is
//! advisory: with no destination configured it is a no-op, and the probing
//! core never depends on it for control flow.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Flat per-probe record, one line of sink output. Optional fields are
/// omitted from the JSON entirely rather than serialized as null.
#[derive(Debug, Clone, Serialize)]
pub struct SinkRecord {
    pub tool: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts_send: Option<f64>,
    pub dst: String,
    pub dst_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt: Option<f64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// JSONL sink bound to an optional file path.
#[derive(Debug, Clone, Default)]
pub struct JsonlSink {
    path: Option<PathBuf>,
}

impl JsonlSink {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// No-op sink with no destination.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Append one record. Fills the `ts` field (epoch seconds) when the
    /// record does not carry one.
    pub fn append(&self, record: &SinkRecord) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut value = serde_json::to_value(record)?;
        if let Some(obj) = value.as_object_mut() {
            obj.entry("ts")
                .or_insert_with(|| serde_json::json!(epoch_now()));
        }

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        writeln!(file, "{}", serde_json::to_string(&value)?)?;
        Ok(())
    }
}

fn epoch_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}
