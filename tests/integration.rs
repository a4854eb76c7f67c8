//! Integration tests for the sweep and ping pipelines.
//!
//! A scripted prober stands in for the raw-socket engine, so these tests
//! verify orchestration, termination, flow consistency, and record shape
//! without network access or elevated privileges.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;
use std::time::Duration;

use hoptrace::config::{PingConfig, TraceConfig};
use hoptrace::export::JsonlSink;
use hoptrace::ping::PingRunner;
use hoptrace::probe::{ProbeOutcome, ProbeSpec, Prober, ProtocolKind};
use hoptrace::trace::TraceOrchestrator;

fn router(last_octet: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet))
}

fn destination() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))
}

/// Prober that answers from a script and records every spec it sees.
struct FakeProber {
    script: Mutex<Vec<ProbeOutcome>>,
    seen: Mutex<Vec<ProbeSpec>>,
}

impl FakeProber {
    fn new(mut script: Vec<ProbeOutcome>) -> Self {
        // Popped from the back
        script.reverse();
        Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn specs(&self) -> Vec<ProbeSpec> {
        self.seen.lock().unwrap().clone()
    }
}

impl Prober for FakeProber {
    fn probe(&self, spec: &ProbeSpec) -> anyhow::Result<ProbeOutcome> {
        self.seen.lock().unwrap().push(spec.clone());
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(ProbeOutcome::Timeout))
    }
}

fn time_exceeded(last_octet: u8) -> ProbeOutcome {
    ProbeOutcome::ProtocolError {
        kind: ProtocolKind::TimeExceeded,
        source: router(last_octet),
    }
}

fn echo_reply(source: IpAddr, rtt_ms: f64) -> ProbeOutcome {
    ProbeOutcome::Success {
        rtt_ms,
        source,
        icmp_type: 0,
        icmp_code: 0,
    }
}

fn trace_config(max_ttl: u8, probes_per_hop: u16) -> TraceConfig {
    TraceConfig {
        max_ttl,
        probes_per_hop,
        timeout: Duration::from_millis(100),
        qps_limit: 0.0,
        flow_id: 7,
        resolve_names: false,
    }
}

#[test]
fn test_sweep_stops_at_destination() {
    // Destination answers at TTL 3; TTLs 4 and 5 must never be probed.
    let prober = FakeProber::new(vec![
        time_exceeded(1),
        time_exceeded(2),
        echo_reply(destination(), 12.5),
    ]);
    let sink = JsonlSink::disabled();
    let orchestrator = TraceOrchestrator::new(&prober, trace_config(5, 1), None, &sink);

    let run = orchestrator
        .run_resolved("8.8.8.8", destination(), &mut |_| {})
        .unwrap();

    assert!(run.terminated_early);
    assert_eq!(run.hops.len(), 3);
    assert_eq!(
        run.hops.iter().map(|h| h.ttl).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(run.hops[2].rtt_ms(), Some(12.5));

    let specs = prober.specs();
    assert_eq!(specs.len(), 3);
    assert_eq!(
        specs.iter().map(|s| s.ttl).collect::<Vec<_>>(),
        vec![Some(1), Some(2), Some(3)]
    );
}

#[test]
fn test_sweep_exhausts_max_ttl_without_reply() {
    let prober = FakeProber::new(vec![]);
    let sink = JsonlSink::disabled();
    let orchestrator = TraceOrchestrator::new(&prober, trace_config(4, 2), None, &sink);

    let run = orchestrator
        .run_resolved("8.8.8.8", destination(), &mut |_| {})
        .unwrap();

    assert!(!run.terminated_early);
    assert_eq!(run.hops.len(), 8);
    for hop in &run.hops {
        assert!(matches!(hop.outcome, ProbeOutcome::Timeout));
    }

    let summaries = run.hop_summaries();
    assert_eq!(summaries.len(), 4);
    for hop in &summaries {
        assert_eq!(hop.sent, 2);
        assert_eq!(hop.received, 0);
        assert_eq!(hop.loss_pct, 100.0);
    }
}

#[test]
fn test_flow_id_constant_across_run() {
    let prober = FakeProber::new(vec![
        time_exceeded(1),
        time_exceeded(1),
        time_exceeded(2),
        time_exceeded(2),
        echo_reply(destination(), 9.0),
    ]);
    let sink = JsonlSink::disabled();
    let orchestrator = TraceOrchestrator::new(&prober, trace_config(5, 2), None, &sink);

    let run = orchestrator
        .run_resolved("8.8.8.8", destination(), &mut |_| {})
        .unwrap();

    for hop in &run.hops {
        assert_eq!(hop.flow_id, 7);
    }
    // Identifier and sequence are identical for every probe of the run so
    // multipath hashing keeps all probes on one path.
    let specs = prober.specs();
    assert!(specs.iter().all(|s| s.identifier == 7));
    let first_seq = specs[0].sequence;
    assert!(specs.iter().all(|s| s.sequence == first_seq));
}

#[test]
fn test_probe_index_one_based_per_ttl() {
    let prober = FakeProber::new(vec![]);
    let sink = JsonlSink::disabled();
    let orchestrator = TraceOrchestrator::new(&prober, trace_config(2, 3), None, &sink);

    let run = orchestrator
        .run_resolved("8.8.8.8", destination(), &mut |_| {})
        .unwrap();

    assert_eq!(
        run.hops
            .iter()
            .map(|h| (h.ttl, h.probe_index))
            .collect::<Vec<_>>(),
        vec![(1, 1), (1, 2), (1, 3), (2, 1), (2, 2), (2, 3)]
    );
}

#[test]
fn test_sweep_mixed_replies_summary() {
    // TTL 1: one reply, one loss. TTL 2: destination reached on the first
    // probe, so the second TTL-2 probe is never sent.
    let prober = FakeProber::new(vec![
        time_exceeded(1),
        ProbeOutcome::Timeout,
        echo_reply(destination(), 20.0),
    ]);
    let sink = JsonlSink::disabled();
    let orchestrator = TraceOrchestrator::new(&prober, trace_config(5, 2), None, &sink);

    let run = orchestrator
        .run_resolved("8.8.8.8", destination(), &mut |_| {})
        .unwrap();

    assert!(run.terminated_early);
    let summaries = run.hop_summaries();
    assert_eq!(summaries.len(), 2);

    // Protocol errors answered but carry no RTT: they count as loss.
    assert_eq!(summaries[0].sent, 2);
    assert_eq!(summaries[0].received, 0);
    assert_eq!(summaries[0].loss_pct, 100.0);

    assert_eq!(summaries[1].sent, 1);
    assert_eq!(summaries[1].received, 1);
    assert_eq!(summaries[1].loss_pct, 0.0);
    assert_eq!(summaries[1].rtt.avg, Some(20.0));
}

#[test]
fn test_observer_sees_records_in_order() {
    let prober = FakeProber::new(vec![time_exceeded(1), echo_reply(destination(), 5.0)]);
    let sink = JsonlSink::disabled();
    let orchestrator = TraceOrchestrator::new(&prober, trace_config(3, 1), None, &sink);

    let mut observed = Vec::new();
    let run = orchestrator
        .run_resolved("8.8.8.8", destination(), &mut |record| {
            observed.push((record.ttl, record.rtt_ms()));
        })
        .unwrap();

    assert_eq!(observed, vec![(1, None), (2, Some(5.0))]);
    assert_eq!(observed.len(), run.hops.len());
}

#[test]
fn test_ping_run_sequences_and_summary() {
    let prober = FakeProber::new(vec![
        echo_reply(destination(), 10.0),
        ProbeOutcome::Timeout,
        echo_reply(destination(), 30.0),
        echo_reply(destination(), 20.0),
    ]);
    let sink = JsonlSink::disabled();
    let config = PingConfig {
        count: 4,
        interval: Duration::from_millis(1),
        timeout: Duration::from_millis(100),
        qps_limit: 0.0,
    };
    let runner = PingRunner::new(&prober, config, &sink);

    let run = runner
        .run_resolved("8.8.8.8", destination(), &mut |_| {})
        .unwrap();

    assert_eq!(
        run.probes.iter().map(|p| p.sequence).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );

    let summary = run.summary();
    assert_eq!(summary.sent, 4);
    assert_eq!(summary.received, 3);
    assert_eq!(summary.loss_pct, 25.0);
    assert!((summary.rtt.avg.unwrap() - 20.0).abs() < 1e-9);
    assert!((summary.rtt.stddev - 10.0).abs() < 1e-9);

    // Ping probes carry no TTL override and use one identifier throughout.
    let specs = prober.specs();
    assert!(specs.iter().all(|s| s.ttl.is_none()));
    assert!(specs.iter().all(|s| s.identifier == specs[0].identifier));
}

#[test]
fn test_trace_records_written_to_sink() {
    let dir = std::env::temp_dir().join(format!("hoptrace-test-{}", std::process::id()));
    let path = dir.join("trace.jsonl");

    let prober = FakeProber::new(vec![time_exceeded(1), echo_reply(destination(), 8.0)]);
    let sink = JsonlSink::new(Some(path.clone()));
    let orchestrator = TraceOrchestrator::new(&prober, trace_config(5, 1), None, &sink);

    orchestrator
        .run_resolved("8.8.8.8", destination(), &mut |_| {})
        .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["tool"], "trace");
    assert_eq!(first["ttl"], 1);
    assert_eq!(first["dst_ip"], "8.8.8.8");
    assert_eq!(first["err"], "time exceeded from 10.0.0.1");
    assert!(first["ts"].is_number());

    let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["ttl"], 2);
    assert_eq!(second["rtt"], 8.0);
    assert_eq!(second["src"], "8.8.8.8");

    std::fs::remove_dir_all(&dir).ok();
}
