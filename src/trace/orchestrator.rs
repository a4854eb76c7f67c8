//! TTL-sweep orchestration.
//!
//! Drives the probe engine across increasing TTLs with a flow-consistent
//! identifier, paces sends to a configured rate, resolves hop names under a
//! bounded budget, and streams every hop record to the sink as it is
//! produced.

use anyhow::Result;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use crate::config::TraceConfig;
use crate::export::{JsonlSink, SinkRecord};
use crate::lookup::RdnsResolver;
use crate::probe::{epoch_seconds, process_identifier, ProbeOutcome, ProbeSpec, Prober};
use crate::stats::{loss_pct, StatsAccumulator, Summary};

/// Sequence number shared by every probe of a run. Paris-style consistency:
/// identifier and sequence stay constant so equal-cost multi-path hashing
/// routes all probes of one run identically.
const TRACE_SEQUENCE: u16 = 1;

/// One (ttl, attempt) observation. Append-only within a run.
#[derive(Debug, Clone)]
pub struct HopRecord {
    pub ttl: u8,
    /// 1-based attempt index, unique within its TTL.
    pub probe_index: u16,
    pub flow_id: u16,
    pub outcome: ProbeOutcome,
    pub resolved_name: Option<String>,
}

impl HopRecord {
    /// Error string for console and sink output; `None` for a success.
    pub fn error_text(&self) -> Option<String> {
        match &self.outcome {
            ProbeOutcome::Success { .. } => None,
            ProbeOutcome::Timeout => Some("timeout".to_string()),
            ProbeOutcome::ProtocolError { kind, source } => Some(match kind {
                crate::probe::ProtocolKind::Unreachable => {
                    format!("destination unreachable from {}", source)
                }
                crate::probe::ProtocolKind::TimeExceeded => {
                    format!("time exceeded from {}", source)
                }
            }),
            ProbeOutcome::DecodeError { reason } => Some(reason.clone()),
        }
    }

    pub fn rtt_ms(&self) -> Option<f64> {
        match &self.outcome {
            ProbeOutcome::Success { rtt_ms, .. } => Some(*rtt_ms),
            _ => None,
        }
    }
}

/// A complete traceroute invocation and everything it observed.
#[derive(Debug, Clone)]
pub struct TraceRun {
    pub target: String,
    pub destination: IpAddr,
    pub max_ttl: u8,
    pub probes_per_hop: u16,
    pub flow_id: u16,
    pub rate_limit_qps: f64,
    pub hops: Vec<HopRecord>,
    pub terminated_early: bool,
}

/// Per-TTL aggregate for the summary block.
#[derive(Debug, Clone)]
pub struct HopSummary {
    pub ttl: u8,
    pub sent: u64,
    pub received: u64,
    pub loss_pct: f64,
    pub rtt: Summary,
}

impl TraceRun {
    /// Rebuild per-TTL statistics from the recorded hops. Only error replies
    /// carrying no RTT count as loss; time-exceeded hops that answered are
    /// still losses for RTT purposes unless they produced a success.
    pub fn hop_summaries(&self) -> Vec<HopSummary> {
        let mut buckets: BTreeMap<u8, (u64, StatsAccumulator)> = BTreeMap::new();
        for hop in &self.hops {
            let (total, acc) = buckets.entry(hop.ttl).or_default();
            *total += 1;
            if let Some(rtt) = hop.rtt_ms() {
                acc.add(rtt);
            }
        }

        buckets
            .into_iter()
            .map(|(ttl, (sent, acc))| {
                let rtt = acc.summarize();
                HopSummary {
                    ttl,
                    sent,
                    received: rtt.count,
                    loss_pct: loss_pct(sent, rtt.count),
                    rtt,
                }
            })
            .collect()
    }
}

/// Sequential TTL-sweep driver over any [`Prober`].
pub struct TraceOrchestrator<'a, P: Prober> {
    prober: &'a P,
    config: TraceConfig,
    resolver: Option<&'a RdnsResolver>,
    sink: &'a JsonlSink,
}

impl<'a, P: Prober> TraceOrchestrator<'a, P> {
    pub fn new(
        prober: &'a P,
        config: TraceConfig,
        resolver: Option<&'a RdnsResolver>,
        sink: &'a JsonlSink,
    ) -> Self {
        Self {
            prober,
            config,
            resolver,
            sink,
        }
    }

    /// Resolve `target` once and sweep. `observer` sees each hop record as it
    /// is produced, before the run completes.
    pub fn run(&self, target: &str, observer: &mut dyn FnMut(&HopRecord)) -> Result<TraceRun> {
        let destination = crate::lookup::resolve_target_v4(target)?;
        self.run_resolved(target, destination, observer)
    }

    /// Sweep against an already-resolved destination.
    pub fn run_resolved(
        &self,
        target: &str,
        destination: IpAddr,
        observer: &mut dyn FnMut(&HopRecord),
    ) -> Result<TraceRun> {
        let flow_id = effective_flow_id(self.config.flow_id);
        let mut run = TraceRun {
            target: target.to_string(),
            destination,
            max_ttl: self.config.max_ttl,
            probes_per_hop: self.config.probes_per_hop,
            flow_id,
            rate_limit_qps: self.config.qps_limit,
            hops: Vec::new(),
            terminated_early: false,
        };

        'sweep: for ttl in 1..=self.config.max_ttl {
            for probe_index in 1..=self.config.probes_per_hop {
                if let Some(delay) = qps_delay(self.config.qps_limit) {
                    std::thread::sleep(delay);
                }

                let spec = ProbeSpec {
                    destination,
                    identifier: flow_id,
                    sequence: TRACE_SEQUENCE,
                    timeout: self.config.timeout,
                    ttl: Some(ttl),
                };
                let ts_send = epoch_seconds();
                let outcome = self.prober.probe(&spec)?;

                let resolved_name = match (self.config.resolve_names, self.resolver) {
                    (true, Some(resolver)) => outcome.source().and_then(|ip| resolver.resolve(ip)),
                    _ => None,
                };

                let record = HopRecord {
                    ttl,
                    probe_index,
                    flow_id,
                    outcome,
                    resolved_name,
                };

                self.emit(&run, &record, ts_send);
                observer(&record);

                let reached_destination = matches!(
                    &record.outcome,
                    ProbeOutcome::Success { source, .. } if *source == destination
                );
                run.hops.push(record);

                if reached_destination {
                    run.terminated_early = true;
                    break 'sweep;
                }
            }
        }

        Ok(run)
    }

    /// Stream one record to the sink. The sink is advisory; a write failure
    /// is reported and the run continues.
    fn emit(&self, run: &TraceRun, record: &HopRecord, ts_send: f64) {
        let sink_record = SinkRecord {
            tool: "trace",
            ts_send: Some(ts_send),
            dst: run.target.clone(),
            dst_ip: run.destination.to_string(),
            ttl: Some(record.ttl),
            probe: Some(record.probe_index),
            flow_id: Some(record.flow_id),
            seq: None,
            src: record.outcome.source().map(|ip| ip.to_string()),
            router_name: record.resolved_name.clone(),
            rtt: record.rtt_ms(),
            icmp_type: outcome_type(&record.outcome),
            code: outcome_code(&record.outcome),
            err: record.error_text(),
        };
        if let Err(e) = self.sink.append(&sink_record) {
            eprintln!("Warning: failed to write record: {}", e);
        }
    }
}

fn outcome_type(outcome: &ProbeOutcome) -> Option<u8> {
    match outcome {
        ProbeOutcome::Success { icmp_type, .. } => Some(*icmp_type),
        _ => None,
    }
}

fn outcome_code(outcome: &ProbeOutcome) -> Option<u8> {
    match outcome {
        ProbeOutcome::Success { icmp_code, .. } => Some(*icmp_code),
        _ => None,
    }
}

/// Caller-supplied flow id when nonzero, else a process-derived value.
pub fn effective_flow_id(flow_id: u16) -> u16 {
    if flow_id != 0 {
        flow_id
    } else {
        process_identifier()
    }
}

/// Pacing gap for a QPS limit; `None` when pacing is disabled.
pub fn qps_delay(qps: f64) -> Option<Duration> {
    if qps > 0.0 {
        Some(Duration::from_secs_f64(1.0 / qps))
    } else {
        None
    }
}
