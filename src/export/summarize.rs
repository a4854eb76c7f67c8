//! Offline summarizer over sink output.
//!
//! Recomputes the same loss/RTT statistics as the online accumulators from a
//! JSONL stream, tolerating either field-naming convention (`rtt` or
//! `rtt_ms`, `ttl` or `hop`) and skipping malformed lines.

use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::BufRead;

use crate::stats::{loss_pct, StatsAccumulator, Summary};

/// Aggregate over one ping JSONL stream.
#[derive(Debug)]
pub struct PingFileSummary {
    pub sent: u64,
    pub received: u64,
    pub loss_pct: f64,
    pub rtt: Summary,
}

/// Per-TTL aggregate over one trace JSONL stream.
#[derive(Debug)]
pub struct TraceHopLine {
    pub ttl: u64,
    pub total: u64,
    pub replies: u64,
    pub loss_pct: f64,
    pub rtt: Summary,
}

fn rtt_field(obj: &Value) -> Option<f64> {
    obj.get("rtt").or_else(|| obj.get("rtt_ms"))?.as_f64()
}

fn ttl_field(obj: &Value) -> Option<u64> {
    obj.get("ttl").or_else(|| obj.get("hop"))?.as_u64()
}

/// Summarize ping records: every parseable line counts as sent, lines with an
/// RTT and no error count as received.
pub fn summarize_ping<R: BufRead>(reader: R) -> Result<PingFileSummary> {
    let mut sent = 0u64;
    let mut received = 0u64;
    let mut stats = StatsAccumulator::new();

    for line in reader.lines() {
        let line = line?;
        let Ok(obj) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        sent += 1;
        let errored = obj.get("err").map(|e| !e.is_null()).unwrap_or(false);
        if let (Some(rtt), false) = (rtt_field(&obj), errored) {
            stats.add(rtt);
            received += 1;
        }
    }

    Ok(PingFileSummary {
        sent,
        received,
        loss_pct: loss_pct(sent, received),
        rtt: stats.summarize(),
    })
}

/// Summarize trace records grouped by TTL: any non-timeout record with an RTT
/// counts as a reply.
pub fn summarize_trace<R: BufRead>(reader: R) -> Result<Vec<TraceHopLine>> {
    let mut hops: BTreeMap<u64, (u64, StatsAccumulator)> = BTreeMap::new();

    for line in reader.lines() {
        let line = line?;
        let Ok(obj) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let Some(ttl) = ttl_field(&obj) else {
            continue;
        };
        let (total, stats) = hops.entry(ttl).or_default();
        *total += 1;

        let timed_out = obj.get("err").and_then(|e| e.as_str()) == Some("timeout");
        if let (Some(rtt), false) = (rtt_field(&obj), timed_out) {
            stats.add(rtt);
        }
    }

    Ok(hops
        .into_iter()
        .map(|(ttl, (total, stats))| {
            let rtt = stats.summarize();
            TraceHopLine {
                ttl,
                total,
                replies: rtt.count,
                loss_pct: loss_pct(total, rtt.count),
                rtt,
            }
        })
        .collect())
}
