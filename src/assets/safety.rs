//! URL safety classification
//!
//! Decides whether a URL found in a transcript may be contacted at all.
//! Hostnames are resolved once, every returned address is vetted, and the
//! vetted set is handed back so the subsequent fetch can be pinned to it.
//!
//! Rejections are deliberately not logged: an operator-visible log line per
//! rejected probe would turn the log into an oracle for internal addresses.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;
use url::{Host, Url};

use super::pinning::{default_metadata_ranges, is_unsafe_ip, IpRange};

/// Maximum accepted URL length in bytes.
pub const MAX_URL_LENGTH: usize = 2048;

/// Default budget for resolving one hostname.
pub const DEFAULT_DNS_TIMEOUT_MS: u64 = 5_000;

/// Hostname lookup failures.
#[derive(Error, Debug, Clone)]
pub enum LookupError {
    #[error("no addresses for {0}")]
    NoRecords(String),

    #[error("lookup of {0} timed out")]
    Timeout(String),

    #[error("lookup failed: {0}")]
    Resolver(String),
}

/// Resolves a hostname to every address it currently maps to.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, LookupError>;
}

/// [`HostResolver`] backed by hickory using the system configuration.
pub struct SystemHostResolver {
    inner: TokioAsyncResolver,
}

impl SystemHostResolver {
    /// Build from `/etc/resolv.conf` (or the platform equivalent), falling
    /// back to hickory's default upstreams when that cannot be read.
    pub fn new(timeout: Duration) -> Self {
        let inner = match hickory_resolver::system_conf::read_system_conf() {
            Ok((config, mut opts)) => {
                opts.timeout = timeout;
                TokioAsyncResolver::tokio(config, opts)
            }
            Err(e) => {
                tracing::debug!(error = %e, "system resolver config unavailable, using defaults");
                let mut opts = ResolverOpts::default();
                opts.timeout = timeout;
                TokioAsyncResolver::tokio(ResolverConfig::default(), opts)
            }
        };
        Self { inner }
    }
}

#[async_trait]
impl HostResolver for SystemHostResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, LookupError> {
        let lookup = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|e| LookupError::Resolver(e.to_string()))?;
        let ips: Vec<IpAddr> = lookup.iter().collect();
        if ips.is_empty() {
            return Err(LookupError::NoRecords(host.to_string()));
        }
        Ok(ips)
    }
}

/// [`HostResolver`] answering from a fixed host table.
///
/// Useful for offline runs against pre-vetted hosts; unknown hosts fail. Also
/// counts lookups, which makes call budgets observable.
#[derive(Debug, Default)]
pub struct StaticHostResolver {
    table: HashMap<String, Vec<IpAddr>>,
    lookups: AtomicUsize,
}

impl StaticHostResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, ips: &[IpAddr]) -> Self {
        self.table.insert(host.to_ascii_lowercase(), ips.to_vec());
        self
    }

    /// Number of lookups performed so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostResolver for StaticHostResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, LookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match self.table.get(&host.to_ascii_lowercase()) {
            Some(ips) if !ips.is_empty() => Ok(ips.clone()),
            _ => Err(LookupError::NoRecords(host.to_string())),
        }
    }
}

/// Outcome of a safety check.
///
/// When `safe` is true, `safe_ips` holds every vetted address for the host (a
/// single entry when the host was an IP literal). When `safe` is false the
/// other fields carry no meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeUrlResult {
    pub safe: bool,
    pub url: String,
    pub safe_ips: Vec<IpAddr>,
}

impl SafeUrlResult {
    fn rejected() -> Self {
        Self {
            safe: false,
            url: String::new(),
            safe_ips: Vec::new(),
        }
    }

    fn accepted(url: &Url, safe_ips: Vec<IpAddr>) -> Self {
        Self {
            safe: true,
            url: url.as_str().to_string(),
            safe_ips,
        }
    }
}

/// Safety checker settings.
#[derive(Debug, Clone)]
pub struct SafetyConfig {
    /// Extra blocked ranges, typically cloud metadata endpoints.
    pub metadata_ranges: Vec<IpRange>,
    /// Upper bound on one hostname resolution.
    pub dns_timeout: Duration,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            metadata_ranges: default_metadata_ranges(),
            dns_timeout: Duration::from_millis(DEFAULT_DNS_TIMEOUT_MS),
        }
    }
}

/// Classifies URLs as safe or unsafe to contact.
#[derive(Clone)]
pub struct UrlSafetyChecker {
    resolver: Arc<dyn HostResolver>,
    config: SafetyConfig,
}

impl UrlSafetyChecker {
    pub fn new(resolver: Arc<dyn HostResolver>, config: SafetyConfig) -> Self {
        Self { resolver, config }
    }

    /// Checker using the system resolver.
    pub fn system(config: SafetyConfig) -> Self {
        let resolver = Arc::new(SystemHostResolver::new(config.dns_timeout));
        Self::new(resolver, config)
    }

    /// Classify `raw`. Never fails: anything that cannot be vetted is unsafe.
    pub async fn check(&self, raw: &str) -> SafeUrlResult {
        if raw.len() > MAX_URL_LENGTH {
            return SafeUrlResult::rejected();
        }
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(_) => return SafeUrlResult::rejected(),
        };
        if !matches!(url.scheme(), "http" | "https") {
            return SafeUrlResult::rejected();
        }
        if !url.username().is_empty() || url.password().is_some() {
            return SafeUrlResult::rejected();
        }

        let ips = match url.host() {
            Some(Host::Ipv4(v4)) => vec![IpAddr::V4(v4)],
            Some(Host::Ipv6(v6)) => vec![IpAddr::V6(v6)],
            Some(Host::Domain(domain)) => match self.resolve(domain).await {
                Ok(ips) => ips,
                Err(_) => return SafeUrlResult::rejected(),
            },
            None => return SafeUrlResult::rejected(),
        };

        if ips.is_empty()
            || ips
                .iter()
                .any(|ip| is_unsafe_ip(ip, &self.config.metadata_ranges))
        {
            return SafeUrlResult::rejected();
        }

        SafeUrlResult::accepted(&url, ips)
    }

    async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, LookupError> {
        let host = domain.trim_end_matches('.');
        if host.is_empty() {
            return Err(LookupError::NoRecords(domain.to_string()));
        }
        tokio::time::timeout(self.config.dns_timeout, self.resolver.lookup(host))
            .await
            .map_err(|_| LookupError::Timeout(host.to_string()))?
    }
}
