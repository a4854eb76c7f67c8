use std::time::Duration;

use crate::cli::{PingArgs, TraceArgs};

/// Ping run parameters.
#[derive(Debug, Clone)]
pub struct PingConfig {
    pub count: u64,
    pub interval: Duration,
    pub timeout: Duration,
    /// Max probe rate in queries per second; `<= 0` disables the extra cap.
    pub qps_limit: f64,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            count: 4,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            qps_limit: 1.0,
        }
    }
}

impl From<&PingArgs> for PingConfig {
    fn from(args: &PingArgs) -> Self {
        Self {
            count: args.count,
            interval: Duration::from_secs_f64(args.interval),
            timeout: Duration::from_secs_f64(args.timeout),
            qps_limit: args.qps_limit,
        }
    }
}

/// Traceroute run parameters.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub max_ttl: u8,
    pub probes_per_hop: u16,
    pub timeout: Duration,
    /// Max probe rate in queries per second; `<= 0` disables pacing.
    pub qps_limit: f64,
    /// Caller-chosen flow identifier; 0 selects a process-derived value.
    pub flow_id: u16,
    pub resolve_names: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_ttl: 30,
            probes_per_hop: 3,
            timeout: Duration::from_secs(2),
            qps_limit: 1.0,
            flow_id: 0,
            resolve_names: false,
        }
    }
}

impl From<&TraceArgs> for TraceConfig {
    fn from(args: &TraceArgs) -> Self {
        Self {
            max_ttl: args.max_ttl,
            probes_per_hop: args.probes,
            timeout: Duration::from_secs_f64(args.timeout),
            qps_limit: args.qps_limit,
            flow_id: args.flow_id,
            resolve_names: args.rdns,
        }
    }
}
