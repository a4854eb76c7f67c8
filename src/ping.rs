//! Sequential round-trip probing of one destination.

use anyhow::Result;
use std::net::IpAddr;
use std::time::Duration;

use crate::config::PingConfig;
use crate::export::{JsonlSink, SinkRecord};
use crate::probe::{epoch_seconds, process_identifier, ProbeOutcome, ProbeSpec, Prober};
use crate::stats::{loss_pct, StatsAccumulator, Summary};
use crate::trace::qps_delay;

/// One probe of a ping run; `sequence` is 1-based.
#[derive(Debug, Clone)]
pub struct PingProbe {
    pub sequence: u16,
    pub outcome: ProbeOutcome,
}

/// A complete ping invocation.
#[derive(Debug, Clone)]
pub struct PingRun {
    pub target: String,
    pub destination: IpAddr,
    pub probes: Vec<PingProbe>,
}

/// Run-level aggregate.
#[derive(Debug, Clone)]
pub struct PingSummary {
    pub sent: u64,
    pub received: u64,
    pub loss_pct: f64,
    pub rtt: Summary,
}

impl PingRun {
    pub fn summary(&self) -> PingSummary {
        let mut stats = StatsAccumulator::new();
        for probe in &self.probes {
            if let ProbeOutcome::Success { rtt_ms, .. } = &probe.outcome {
                stats.add(*rtt_ms);
            }
        }
        let rtt = stats.summarize();
        PingSummary {
            sent: self.probes.len() as u64,
            received: rtt.count,
            loss_pct: loss_pct(self.probes.len() as u64, rtt.count),
            rtt,
        }
    }
}

/// Sequential ping driver over any [`Prober`]. Uses a fixed process-derived
/// identifier and an incrementing 1-based sequence.
pub struct PingRunner<'a, P: Prober> {
    prober: &'a P,
    config: PingConfig,
    sink: &'a JsonlSink,
}

impl<'a, P: Prober> PingRunner<'a, P> {
    pub fn new(prober: &'a P, config: PingConfig, sink: &'a JsonlSink) -> Self {
        Self {
            prober,
            config,
            sink,
        }
    }

    pub fn run(&self, target: &str, observer: &mut dyn FnMut(&PingProbe)) -> Result<PingRun> {
        let destination = crate::lookup::resolve_target_v4(target)?;
        self.run_resolved(target, destination, observer)
    }

    pub fn run_resolved(
        &self,
        target: &str,
        destination: IpAddr,
        observer: &mut dyn FnMut(&PingProbe),
    ) -> Result<PingRun> {
        let identifier = process_identifier();
        let mut run = PingRun {
            target: target.to_string(),
            destination,
            probes: Vec::with_capacity(self.config.count as usize),
        };

        for i in 0..self.config.count {
            if i > 0 {
                std::thread::sleep(self.send_gap());
            }

            // Sequence wraps rather than growing past 16 bits
            let sequence = (i % u16::MAX as u64) as u16 + 1;
            let spec = ProbeSpec {
                destination,
                identifier,
                sequence,
                timeout: self.config.timeout,
                ttl: None,
            };
            let ts_send = epoch_seconds();
            let outcome = self.prober.probe(&spec)?;

            let probe = PingProbe { sequence, outcome };
            self.emit(&run, &probe, ts_send);
            observer(&probe);
            run.probes.push(probe);
        }

        Ok(run)
    }

    /// Gap between consecutive sends: the configured interval, stretched
    /// further when the QPS cap demands a longer one.
    fn send_gap(&self) -> Duration {
        match qps_delay(self.config.qps_limit) {
            Some(delay) => self.config.interval.max(delay),
            None => self.config.interval,
        }
    }

    fn emit(&self, run: &PingRun, probe: &PingProbe, ts_send: f64) {
        let (rtt, icmp_type, icmp_code) = match &probe.outcome {
            ProbeOutcome::Success {
                rtt_ms,
                icmp_type,
                icmp_code,
                ..
            } => (Some(*rtt_ms), Some(*icmp_type), Some(*icmp_code)),
            _ => (None, None, None),
        };
        let err = match &probe.outcome {
            ProbeOutcome::Success { .. } => None,
            ProbeOutcome::Timeout => Some("timeout".to_string()),
            ProbeOutcome::ProtocolError { kind, source } => {
                Some(format!("{} from {}", kind.as_str(), source))
            }
            ProbeOutcome::DecodeError { reason } => Some(reason.clone()),
        };

        let record = SinkRecord {
            tool: "ping",
            ts_send: Some(ts_send),
            dst: run.target.clone(),
            dst_ip: run.destination.to_string(),
            ttl: None,
            probe: None,
            flow_id: None,
            seq: Some(probe.sequence),
            src: probe.outcome.source().map(|ip| ip.to_string()),
            router_name: None,
            rtt,
            icmp_type,
            code: icmp_code,
            err,
        };
        if let Err(e) = self.sink.append(&record) {
            eprintln!("Warning: failed to write record: {}", e);
        }
    }
}
