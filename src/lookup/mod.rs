pub mod rdns;

pub use rdns::{HickoryReverse, RdnsResolver, ReverseLookup};

use anyhow::{bail, Context, Result};
use std::net::{IpAddr, ToSocketAddrs};

/// Resolve a hostname or literal to an IPv4 address, once per run.
/// Resolution failure is a fatal setup error.
pub fn resolve_target_v4(target: &str) -> Result<IpAddr> {
    let addrs = (target, 0)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve target: {}", target))?;
    match addrs.map(|a| a.ip()).find(|ip| ip.is_ipv4()) {
        Some(ip) => Ok(ip),
        None => bail!("No IPv4 address found for target: {}", target),
    }
}
