//! Readiness polling of a freshly deployed panel.
//!
//! Probes bypass the system resolver: names are looked up directly against a
//! public DNS server over UDP, and connections are never reused, so every probe
//! does a fresh lookup and handshake. This keeps polling working behind VPNs or
//! captive networks that hijack local DNS.

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const DEFAULT_RESOLVER: &str = "8.8.8.8:53";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 180;
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum PollError {
    #[error("{url} was not ready after {attempts} attempts")]
    Exhausted { url: String, attempts: u32 },

    #[error("failed to build probe client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result of a single probe that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    Status(u16),
    Transport(String),
}

impl std::fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailure::Status(code) => write!(f, "HTTP {}", code),
            ProbeFailure::Transport(e) => write!(f, "{}", e),
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    /// Issue one GET and return the status code.
    async fn probe(&self, url: &str) -> Result<u16, ProbeFailure>;
}

/// Resolves every name through one fixed DNS server.
#[derive(Clone)]
pub struct PinnedResolver {
    resolver: Arc<TokioAsyncResolver>,
}

impl PinnedResolver {
    pub fn new(server: SocketAddr) -> Self {
        let name_servers =
            NameServerConfigGroup::from_ips_clear(&[server.ip()], server.port(), true);
        let config = ResolverConfig::from_parts(None, vec![], name_servers);
        let resolver = TokioAsyncResolver::tokio(config, resolver_opts());
        Self {
            resolver: Arc::new(resolver),
        }
    }
}

/// No answer cache: a name that failed before the panel went live must be
/// asked again on the next poll instead of served as a cached NXDOMAIN.
fn resolver_opts() -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.cache_size = 0;
    opts
}

impl Resolve for PinnedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.resolver.clone();
        Box::pin(async move {
            let lookup = resolver.lookup_ip(name.as_str()).await?;
            let addrs: Addrs = Box::new(
                lookup
                    .into_iter()
                    .map(|ip| SocketAddr::new(ip, 0))
                    .collect::<Vec<_>>()
                    .into_iter(),
            );
            Ok(addrs)
        })
    }
}

/// HTTP probe over the pinned resolver with keep-alive disabled.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(resolver: SocketAddr) -> Result<Self, PollError> {
        let client = reqwest::Client::builder()
            .dns_resolver(Arc::new(PinnedResolver::new(resolver)))
            .pool_max_idle_per_host(0)
            .timeout(PROBE_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> Result<u16, ProbeFailure> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProbeFailure::Transport(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessPoller {
    interval: Duration,
    max_attempts: Option<u32>,
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL, Some(DEFAULT_MAX_ATTEMPTS))
    }
}

impl ReadinessPoller {
    /// `max_attempts: None` polls until the endpoint answers.
    pub fn new(interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Probe `url` once per interval, the first probe one interval from now,
    /// until it returns 200. Returns the number of probes made.
    pub async fn wait_until_ready<F>(
        &self,
        probe: &dyn Probe,
        url: &str,
        mut on_pending: F,
    ) -> Result<u32, PollError>
    where
        F: FnMut(u32, &ProbeFailure),
    {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0u32;

        loop {
            ticker.tick().await;
            attempts += 1;

            let failure = match probe.probe(url).await {
                Ok(200) => return Ok(attempts),
                Ok(status) => ProbeFailure::Status(status),
                Err(failure) => failure,
            };
            tracing::debug!(%url, attempt = attempts, %failure, "panel not ready");
            on_pending(attempts, &failure);

            if self.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(PollError::Exhausted {
                    url: url.to_string(),
                    attempts,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_resolver_keeps_no_answer_cache() {
        assert_eq!(resolver_opts().cache_size, 0);
    }

    struct ScriptedProbe {
        failures_before_ready: u32,
        calls: AtomicU32,
        probed_at: Mutex<Vec<Instant>>,
    }

    impl ScriptedProbe {
        fn new(failures_before_ready: u32) -> Self {
            Self {
                failures_before_ready,
                calls: AtomicU32::new(0),
                probed_at: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, _url: &str) -> Result<u16, ProbeFailure> {
            self.probed_at.lock().unwrap().push(Instant::now());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_ready {
                if call % 2 == 0 {
                    Ok(522)
                } else {
                    Err(ProbeFailure::Transport("connection refused".to_string()))
                }
            } else {
                Ok(200)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_n_failures_takes_n_plus_one_probes() {
        let probe = ScriptedProbe::new(4);
        let poller = ReadinessPoller::new(Duration::from_secs(5), None);
        let start = Instant::now();
        let mut pending = Vec::new();

        let attempts = poller
            .wait_until_ready(&probe, "https://panel.example.com/panel", |n, f| {
                pending.push((n, f.clone()))
            })
            .await
            .unwrap();

        assert_eq!(attempts, 5);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 5);
        assert_eq!(pending.len(), 4);
        assert_eq!(pending[0].1, ProbeFailure::Status(522));

        let probed_at = probe.probed_at.lock().unwrap();
        for (i, at) in probed_at.iter().enumerate() {
            assert_eq!(*at - start, Duration::from_secs(5 * (i as u64 + 1)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_waits_one_interval() {
        let probe = ScriptedProbe::new(0);
        let poller = ReadinessPoller::new(Duration::from_secs(5), None);
        let start = Instant::now();

        let attempts = poller
            .wait_until_ready(&probe, "https://x/panel", |_, _| {
                panic!("no pending probe expected")
            })
            .await
            .unwrap();

        assert_eq!(attempts, 1);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_poller_gives_up() {
        let probe = ScriptedProbe::new(u32::MAX);
        let poller = ReadinessPoller::new(Duration::from_secs(5), Some(3));

        let err = poller
            .wait_until_ready(&probe, "https://x/panel", |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(err, PollError::Exhausted { attempts: 3, .. }));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }
}
