//! Reverse DNS with a hard per-lookup time budget.
//!
//! A single slow PTR lookup must never stall the TTL sweep beyond a small,
//! fixed cost, so uncached lookups run in a dedicated worker and are
//! abandoned at the budget deadline. Misses are cached as `None` so
//! unresponsive hosts do not pay the budget twice.

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::Resolver;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Blocking PTR lookup backend. The resolver proper sits behind this seam so
/// tests can inject a scripted or non-responding implementation.
pub trait ReverseLookup: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Option<String>;
}

/// System-configured hickory resolver.
pub struct HickoryReverse {
    resolver: Resolver,
}

impl HickoryReverse {
    pub fn new() -> anyhow::Result<Self> {
        let resolver = Resolver::new(ResolverConfig::default(), ResolverOpts::default())?;
        Ok(Self { resolver })
    }
}

impl ReverseLookup for HickoryReverse {
    fn lookup(&self, ip: IpAddr) -> Option<String> {
        match self.resolver.reverse_lookup(ip) {
            Ok(lookup) => lookup.iter().next().map(|name| {
                let s = name.to_string();
                s.trim_end_matches('.').to_string()
            }),
            Err(_) => None,
        }
    }
}

/// Budgeted, caching reverse resolver.
///
/// The cache is append-only for the process lifetime and single-writer per
/// key: the write happens only on the path that owns the lookup result, so
/// an abandoned worker's late result is simply discarded and never races a
/// cached value.
pub struct RdnsResolver {
    backend: Arc<dyn ReverseLookup>,
    cache: RwLock<HashMap<IpAddr, Option<String>>>,
    budget: Duration,
}

impl RdnsResolver {
    /// A zero `budget` means the lookup blocks in the caller until the
    /// backend resolves or fails.
    pub fn new(backend: Arc<dyn ReverseLookup>, budget: Duration) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
            budget,
        }
    }

    /// Resolve `ip` to a name, spending at most the configured budget.
    /// Cached hits (including cached misses) return immediately.
    pub fn resolve(&self, ip: IpAddr) -> Option<String> {
        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(&ip) {
                return entry.clone();
            }
        }

        let name = if self.budget.is_zero() {
            self.backend.lookup(ip)
        } else {
            let (tx, rx) = mpsc::channel();
            let backend = Arc::clone(&self.backend);
            thread::spawn(move || {
                // Receiver may be gone by the time this resolves; the send
                // result is intentionally ignored.
                let _ = tx.send(backend.lookup(ip));
            });
            rx.recv_timeout(self.budget).unwrap_or(None)
        };

        self.cache.write().insert(ip, name.clone());
        name
    }
}
