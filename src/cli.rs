use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ICMP ping and traceroute with per-hop statistics and JSONL export
#[derive(Parser, Debug)]
#[command(name = "hoptrace")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Round-trip probe a single destination
    Ping(PingArgs),
    /// Discover the path to a destination with a TTL sweep
    Trace(TraceArgs),
    /// Recompute statistics from saved JSONL records
    Summarize(SummarizeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct PingArgs {
    /// Hostname or IP to ping
    pub target: String,

    /// Number of probes to send
    #[arg(short = 'c', long = "count", default_value = "4")]
    pub count: u64,

    /// Interval between probes in seconds
    #[arg(short = 'i', long = "interval", default_value = "1.0")]
    pub interval: f64,

    /// Per-probe timeout in seconds
    #[arg(long = "timeout", default_value = "1.0")]
    pub timeout: f64,

    /// Max probe rate (queries per second); 0 disables the cap
    #[arg(long = "qps-limit", default_value = "1.0")]
    pub qps_limit: f64,

    /// Write per-probe results to a JSONL file
    #[arg(long = "json")]
    pub json: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct TraceArgs {
    /// Hostname or IP to trace
    pub target: String,

    /// Maximum TTL (hops)
    #[arg(short = 'm', long = "max-ttl", default_value = "30")]
    pub max_ttl: u8,

    /// Probes per hop
    #[arg(long = "probes", default_value = "3")]
    pub probes: u16,

    /// Per-probe timeout in seconds
    #[arg(long = "timeout", default_value = "2.0")]
    pub timeout: f64,

    /// Max probe rate (queries per second); 0 disables pacing
    #[arg(long = "qps-limit", default_value = "1.0")]
    pub qps_limit: f64,

    /// Flow ID kept constant across the run (Paris-style); 0 derives one
    /// from the process id
    #[arg(long = "flow-id", default_value = "0")]
    pub flow_id: u16,

    /// Resolve hop addresses with reverse DNS
    #[arg(long = "rdns")]
    pub rdns: bool,

    /// Reverse DNS budget per lookup in milliseconds; 0 blocks until the
    /// resolver answers
    #[arg(long = "rdns-budget-ms", default_value = "200")]
    pub rdns_budget_ms: u64,

    /// Write per-probe results to a JSONL file
    #[arg(long = "json")]
    pub json: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SummarizeArgs {
    /// Ping JSONL files to summarize
    #[arg(long = "ping", num_args = 1..)]
    pub ping: Vec<PathBuf>,

    /// Trace JSONL files to summarize
    #[arg(long = "trace", num_args = 1..)]
    pub trace: Vec<PathBuf>,
}

impl Args {
    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Command::Ping(ping) => {
                if ping.count == 0 {
                    return Err("Count must be at least 1".into());
                }
                if ping.interval <= 0.0 {
                    return Err("Interval must be positive".into());
                }
                if ping.timeout <= 0.0 {
                    return Err("Timeout must be positive".into());
                }
            }
            Command::Trace(trace) => {
                if trace.timeout <= 0.0 {
                    return Err("Timeout must be positive".into());
                }
                if trace.max_ttl == 0 {
                    return Err("Max TTL must be at least 1".into());
                }
                if trace.probes == 0 {
                    return Err("Probes per hop must be at least 1".into());
                }
            }
            Command::Summarize(summarize) => {
                if summarize.ping.is_empty() && summarize.trace.is_empty() {
                    return Err("Nothing to summarize: pass --ping and/or --trace files".into());
                }
            }
        }
        Ok(())
    }
}
