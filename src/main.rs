use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

mod cli;
mod config;
mod export;
mod lookup;
mod ping;
mod probe;
mod stats;
mod trace;

use cli::{Args, Command, PingArgs, SummarizeArgs, TraceArgs};
use config::{PingConfig, TraceConfig};
use export::{summarize_ping, summarize_trace, JsonlSink};
use lookup::{HickoryReverse, RdnsResolver};
use ping::{PingProbe, PingRunner};
use probe::{IcmpProber, ProbeOutcome};
use trace::{HopRecord, TraceOrchestrator};

fn main() -> Result<()> {
    let args = Args::parse();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    match args.command {
        Command::Ping(ping) => run_ping(ping),
        Command::Trace(trace) => run_trace(trace),
        Command::Summarize(summarize) => run_summarize(summarize),
    }
}

fn run_ping(args: PingArgs) -> Result<()> {
    let config = PingConfig::from(&args);
    let sink = JsonlSink::new(args.json.clone());
    // Ping verifies reply checksums and requires the payload timestamp
    let prober = IcmpProber::new(true);
    let runner = PingRunner::new(&prober, config.clone(), &sink);

    let destination = lookup::resolve_target_v4(&args.target)?;
    println!(
        "PING {} ({}): count={}, interval={}s, timeout={}s",
        args.target,
        destination,
        config.count,
        args.interval,
        args.timeout
    );

    let run = runner.run_resolved(&args.target, destination, &mut print_ping_probe)?;

    let summary = run.summary();
    println!();
    println!(
        "--- {} ping statistics ---",
        run.target
    );
    println!(
        "sent={}, recv={}, loss={:.1}%",
        summary.sent, summary.received, summary.loss_pct
    );
    if summary.rtt.count > 0 {
        println!(
            "RTT ms: min={:.3}, avg={:.3}, max={:.3}, stddev={:.3}",
            summary.rtt.min.unwrap_or(0.0),
            summary.rtt.avg.unwrap_or(0.0),
            summary.rtt.max.unwrap_or(0.0),
            summary.rtt.stddev
        );
    } else {
        println!("No successful RTT samples.");
    }
    Ok(())
}

fn print_ping_probe(probe: &PingProbe) {
    match &probe.outcome {
        ProbeOutcome::Success {
            rtt_ms, source, ..
        } => {
            println!("seq={} {} {:.3} ms", probe.sequence, source, rtt_ms);
        }
        ProbeOutcome::Timeout => {
            println!("seq={} * (timeout)", probe.sequence);
        }
        ProbeOutcome::ProtocolError { kind, source } => {
            println!("seq={} {} ({})", probe.sequence, source, kind.as_str());
        }
        ProbeOutcome::DecodeError { reason } => {
            println!("seq={} * ({})", probe.sequence, reason);
        }
    }
}

fn run_trace(args: TraceArgs) -> Result<()> {
    let config = TraceConfig::from(&args);
    let sink = JsonlSink::new(args.json.clone());
    let prober = IcmpProber::new(false);

    // Missing resolver backend degrades to numeric output instead of
    // aborting the sweep.
    let resolver = if config.resolve_names {
        match HickoryReverse::new() {
            Ok(backend) => Some(RdnsResolver::new(
                Arc::new(backend),
                Duration::from_millis(args.rdns_budget_ms),
            )),
            Err(e) => {
                eprintln!("Warning: reverse DNS unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let orchestrator = TraceOrchestrator::new(&prober, config.clone(), resolver.as_ref(), &sink);

    let destination = lookup::resolve_target_v4(&args.target)?;
    println!(
        "Traceroute to {} ({}) with max-ttl={}, probes={}, timeout={}s, qps={}, flow-id={}",
        args.target,
        destination,
        config.max_ttl,
        config.probes_per_hop,
        args.timeout,
        config.qps_limit,
        config.flow_id
    );

    let run = orchestrator.run_resolved(&args.target, destination, &mut print_hop_record)?;

    println!();
    println!("Summary statistics:");
    for hop in run.hop_summaries() {
        if hop.rtt.count > 0 {
            println!(
                "TTL {}: min = {:.3} avg = {:.3} max = {:.3} stddev = {:.3} ms, Loss = {:.1}%",
                hop.ttl,
                hop.rtt.min.unwrap_or(0.0),
                hop.rtt.avg.unwrap_or(0.0),
                hop.rtt.max.unwrap_or(0.0),
                hop.rtt.stddev,
                hop.loss_pct
            );
        } else {
            println!("TTL {}: Loss = {:.1}%", hop.ttl, hop.loss_pct);
        }
    }
    if run.terminated_early {
        println!("Destination reached at TTL {}.", run.hops.last().map(|h| h.ttl).unwrap_or(0));
    }
    Ok(())
}

/// One line per probe: `<ttl> <name (ip)|ip|*> <rtt> ms (<error>)`.
fn print_hop_record(record: &HopRecord) {
    let mut line = format!("{:2}", record.ttl);

    match (record.outcome.source(), &record.resolved_name) {
        (Some(ip), Some(name)) => line.push_str(&format!(" {} ({})", name, ip)),
        (Some(ip), None) => line.push_str(&format!(" {}", ip)),
        (None, _) => line.push_str(" *"),
    }

    if let Some(rtt) = record.rtt_ms() {
        line.push_str(&format!(" {:.3} ms", rtt));
    }

    if let Some(err) = record.error_text() {
        line.push_str(&format!(" ({})", err));
    }

    println!("{}", line);
}

fn run_summarize(args: SummarizeArgs) -> Result<()> {
    for path in &args.ping {
        let file = File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let summary = summarize_ping(BufReader::new(file))?;

        println!(
            "Ping summary for {}: sent={}, recv={}, loss={:.1}%",
            path.display(),
            summary.sent,
            summary.received,
            summary.loss_pct
        );
        if summary.rtt.count > 0 {
            println!(
                " RTT ms: min={:.3}, avg={:.3}, max={:.3}, stddev={:.3}",
                summary.rtt.min.unwrap_or(0.0),
                summary.rtt.avg.unwrap_or(0.0),
                summary.rtt.max.unwrap_or(0.0),
                summary.rtt.stddev
            );
        } else {
            println!(" No successful RTT samples.");
        }
        println!();
    }

    for path in &args.trace {
        let file = File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let hops = summarize_trace(BufReader::new(file))?;

        println!("Traceroute summary for {}:", path.display());
        for hop in hops {
            if hop.replies > 0 {
                println!(
                    " TTL {}: replies={}/{}, loss={:.1}%, mean={:.3} ms, stddev={:.3}",
                    hop.ttl,
                    hop.replies,
                    hop.total,
                    hop.loss_pct,
                    hop.rtt.avg.unwrap_or(0.0),
                    hop.rtt.stddev
                );
            } else {
                println!(
                    " TTL {}: 0 replies / {} probes (loss=100.0%)",
                    hop.ttl, hop.total
                );
            }
        }
        println!();
    }

    Ok(())
}
