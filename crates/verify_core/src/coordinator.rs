//! Per-domain verification coordination.
//!
//! Exactly one coordinator exists per (lowercased) domain; every
//! verification for that domain routes through it. The coordinator is a
//! single-writer actor: a worker task owns all per-domain state — the DNS
//! slot, the catch-all verdict, the email result cache and the admission
//! counter — and mutates it only while handling inbox messages. Network
//! stages run as spawned tasks that report back through the same inbox, so
//! the worker itself never blocks and admission can always fail fast.
//!
//! This shape gives the pipeline its guarantees for free: DNS lookups are
//! single-flight per domain, the catch-all probe runs at most once per
//! coordinator lifetime, and no intra-domain locks exist anywhere.
//! Cancellation rides on future drop — when the per-verification deadline
//! expires, the pipeline future (and any socket it owns) is discarded.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::blocklist::{BlocklistClient, DisposableLookup, MemoryBlocklistStore};
use crate::dns::{DnsResult, DohResolver, MxRecord, MxResolver};
use crate::score::{self, ScoreInput, TIMEOUT_TTL_MS};
use crate::smtp::{MailboxProber, SmtpProber};
use crate::syntax::{self, ParsedEmail};
use crate::{now_ms, VerificationResult, VerificationStatus, VerifierConfig, VerifyError};

/// The production verifier wiring: DoH + live SMTP + in-memory blocklist.
pub type Verifier = VerifierService<DohResolver, SmtpProber, BlocklistClient<MemoryBlocklistStore>>;

impl Verifier {
    /// Wire the production stack from configuration.
    pub fn with_store(
        config: VerifierConfig,
        store: MemoryBlocklistStore,
    ) -> anyhow::Result<Self> {
        let resolver = DohResolver::new(
            config.doh_endpoint.clone(),
            Duration::from_millis(config.dns_timeout_ms),
        )?;
        let prober = SmtpProber::from_config(&config);
        let blocklist =
            BlocklistClient::new(store, Duration::from_millis(config.blocklist_timeout_ms));
        Ok(Self::new(config, resolver, prober, blocklist))
    }
}

/// Sharded registry mapping domains to their coordinators.
///
/// Coordinators are created on first touch and live for the rest of the
/// process. Cross-domain parallelism comes from having many workers;
/// intra-domain serialization comes from each worker's single inbox.
pub struct VerifierService<R, P, B> {
    inner: Arc<ServiceInner<R, P, B>>,
}

impl<R, P, B> Clone for VerifierService<R, P, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct ServiceInner<R, P, B> {
    config: Arc<VerifierConfig>,
    resolver: R,
    prober: P,
    blocklist: B,
    domains: RwLock<HashMap<String, DomainHandle>>,
}

#[derive(Clone)]
struct DomainHandle {
    tx: mpsc::Sender<Msg>,
}

impl<R, P, B> VerifierService<R, P, B>
where
    R: MxResolver,
    P: MailboxProber,
    B: DisposableLookup,
{
    pub fn new(config: VerifierConfig, resolver: R, prober: P, blocklist: B) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                config: Arc::new(config),
                resolver,
                prober,
                blocklist,
                domains: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Verify one address through its domain's coordinator.
    pub async fn verify(&self, raw: &str) -> crate::Result<VerificationResult> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(VerifyError::InvalidInput("missing email".to_string()));
        }

        let key = routing_key(raw);
        let handle = self.handle_for(&key);

        let (tx, rx) = oneshot::channel();
        handle
            .tx
            .try_send(Msg::Verify {
                raw: raw.to_string(),
                respond: tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => VerifyError::AdmissionRejected,
                mpsc::error::TrySendError::Closed(_) => {
                    VerifyError::Unavailable(format!("coordinator for {key} is gone"))
                }
            })?;

        rx.await
            .map_err(|_| VerifyError::Unavailable("verification dropped mid-flight".to_string()))?
    }

    /// Cheap readiness self-check: runs the pipeline's synchronous stages —
    /// the syntax gate plus one blocklist round-trip — on the configured
    /// probe address. Touches no coordinator and no network, so repeated
    /// probes mint no registry entries and send no traffic.
    pub async fn self_check(&self) -> bool {
        let Some(parsed) = syntax::validate(&self.inner.config.probe_email) else {
            warn!("Self-check failed: configured probe email is not a valid address");
            return false;
        };

        // The blocklist degrades to false on outages; the round-trip itself
        // is what this exercises.
        let _ = self.inner.blocklist.check_disposable(&parsed.domain).await;
        true
    }

    /// Number of domains with a live coordinator
    pub fn domain_count(&self) -> usize {
        self.inner
            .domains
            .read()
            .expect("domain registry lock poisoned")
            .len()
    }

    fn handle_for(&self, key: &str) -> DomainHandle {
        if let Some(handle) = self
            .inner
            .domains
            .read()
            .expect("domain registry lock poisoned")
            .get(key)
        {
            return handle.clone();
        }

        let mut domains = self
            .inner
            .domains
            .write()
            .expect("domain registry lock poisoned");
        if let Some(handle) = domains.get(key) {
            return handle.clone();
        }

        let handle = self.spawn_coordinator(key);
        domains.insert(key.to_string(), handle.clone());
        handle
    }

    fn spawn_coordinator(&self, domain: &str) -> DomainHandle {
        let config = self.inner.config.clone();
        // The worker never blocks, so the mailbox only needs headroom for
        // bursts; sustained pressure is shed by the admission counter.
        let capacity = config.max_concurrency_per_mx.max(1) * 4 + 16;
        let (tx, rx) = mpsc::channel(capacity);

        let coordinator = DomainCoordinator {
            domain: domain.to_string(),
            email_cache: Cache::builder()
                .max_capacity(config.email_cache_capacity)
                .expire_after(ResultExpiry)
                .build(),
            config,
            resolver: self.inner.resolver.clone(),
            prober: self.inner.prober.clone(),
            blocklist: self.inner.blocklist.clone(),
            inbox: rx,
            self_tx: tx.clone(),
            dns: DnsSlot::Empty,
            catch_all: CatchAllSlot::Unknown,
            active: 0,
        };

        info!("Starting coordinator for domain {}", domain);
        tokio::spawn(coordinator.run());
        DomainHandle { tx }
    }
}

/// Route by the domain part so every address of a domain shares a worker.
fn routing_key(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .unwrap_or(trimmed)
        .to_lowercase()
}

enum Msg {
    Verify {
        raw: String,
        respond: oneshot::Sender<crate::Result<VerificationResult>>,
    },
    NeedDns {
        respond: oneshot::Sender<DnsResult>,
    },
    DnsResolved {
        result: DnsResult,
    },
    NeedCatchAll {
        records: Vec<MxRecord>,
        respond: oneshot::Sender<bool>,
    },
    CatchAllResolved {
        is_catch_all: bool,
    },
    Finished {
        email: String,
        result: VerificationResult,
        respond: oneshot::Sender<crate::Result<VerificationResult>>,
    },
}

enum DnsSlot {
    Empty,
    Pending(Vec<oneshot::Sender<DnsResult>>),
    Ready {
        result: DnsResult,
        fetched_at: Instant,
    },
}

enum CatchAllSlot {
    Unknown,
    Pending(Vec<oneshot::Sender<bool>>),
    Known(bool),
}

/// Expire each cached result after its own scoring-derived TTL.
struct ResultExpiry;

impl Expiry<String, VerificationResult> for ResultExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &VerificationResult,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(Duration::from_millis(value.ttl))
    }
}

struct DomainCoordinator<R, P, B> {
    domain: String,
    config: Arc<VerifierConfig>,
    resolver: R,
    prober: P,
    blocklist: B,
    inbox: mpsc::Receiver<Msg>,
    self_tx: mpsc::Sender<Msg>,
    dns: DnsSlot,
    catch_all: CatchAllSlot,
    email_cache: Cache<String, VerificationResult>,
    active: usize,
}

impl<R, P, B> DomainCoordinator<R, P, B>
where
    R: MxResolver,
    P: MailboxProber,
    B: DisposableLookup,
{
    async fn run(mut self) {
        debug!("Coordinator for {} running", self.domain);
        while let Some(msg) = self.inbox.recv().await {
            self.handle(msg);
        }
        debug!("Coordinator for {} shut down", self.domain);
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Verify { raw, respond } => self.on_verify(raw, respond),
            Msg::NeedDns { respond } => self.on_need_dns(respond),
            Msg::DnsResolved { result } => self.on_dns_resolved(result),
            Msg::NeedCatchAll { records, respond } => self.on_need_catch_all(records, respond),
            Msg::CatchAllResolved { is_catch_all } => self.on_catch_all_resolved(is_catch_all),
            Msg::Finished {
                email,
                result,
                respond,
            } => self.on_finished(email, result, respond),
        }
    }

    fn on_verify(
        &mut self,
        raw: String,
        respond: oneshot::Sender<crate::Result<VerificationResult>>,
    ) {
        self.evict_expired();

        if self.active >= self.config.max_concurrency_per_mx {
            debug!(
                "Admission rejected for {} ({} verifications in flight)",
                self.domain, self.active
            );
            let _ = respond.send(Err(VerifyError::AdmissionRejected));
            return;
        }

        // Syntax failures are answered synchronously and never hit the caches.
        let Some(parsed) = syntax::validate(&raw) else {
            let scored = score::score(&ScoreInput::default());
            let _ = respond.send(Ok(VerificationResult {
                email: raw.trim().to_lowercase(),
                status: scored.status,
                score: scored.score,
                reason: scored.reason,
                checked_at: now_ms(),
                ttl: scored.ttl_ms,
            }));
            return;
        };

        if let Some(hit) = self.email_cache.get(&parsed.email) {
            debug!("Email cache hit for {}", parsed.email);
            let _ = respond.send(Ok(hit));
            return;
        }

        self.active += 1;
        self.spawn_pipeline(parsed, respond);
    }

    fn spawn_pipeline(
        &mut self,
        parsed: ParsedEmail,
        respond: oneshot::Sender<crate::Result<VerificationResult>>,
    ) {
        let self_tx = self.self_tx.clone();
        let blocklist = self.blocklist.clone();
        let prober = self.prober.clone();
        let deadline = Duration::from_millis(self.config.coordinator_deadline_ms);
        let email = parsed.email.clone();

        tokio::spawn(async move {
            let stages = run_stages(parsed, blocklist, prober, self_tx.clone());
            let result = match tokio::time::timeout(deadline, stages).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Verification deadline expired for {}", email);
                    VerificationResult {
                        email: email.clone(),
                        status: VerificationStatus::Timeout,
                        score: 0,
                        reason: Some("Verification timed out".to_string()),
                        checked_at: now_ms(),
                        ttl: TIMEOUT_TTL_MS,
                    }
                }
            };

            // The worker caches and answers, keeping every state mutation
            // on its side of the inbox.
            let _ = self_tx
                .send(Msg::Finished {
                    email,
                    result,
                    respond,
                })
                .await;
        });
    }

    fn on_need_dns(&mut self, respond: oneshot::Sender<DnsResult>) {
        self.evict_stale_dns();
        match &mut self.dns {
            DnsSlot::Ready { result, .. } => {
                let _ = respond.send(result.clone());
            }
            DnsSlot::Pending(waiters) => waiters.push(respond),
            slot @ DnsSlot::Empty => {
                *slot = DnsSlot::Pending(vec![respond]);
                let resolver = self.resolver.clone();
                let domain = self.domain.clone();
                let self_tx = self.self_tx.clone();
                tokio::spawn(async move {
                    let result = resolver.lookup(&domain).await;
                    let _ = self_tx.send(Msg::DnsResolved { result }).await;
                });
            }
        }
    }

    fn on_dns_resolved(&mut self, result: DnsResult) {
        debug!(
            "DNS for {}: mx={}, a={}",
            self.domain, result.has_mx, result.has_a
        );
        if let DnsSlot::Pending(waiters) = std::mem::replace(&mut self.dns, DnsSlot::Empty) {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
        self.dns = DnsSlot::Ready {
            result,
            fetched_at: Instant::now(),
        };
    }

    fn on_need_catch_all(&mut self, records: Vec<MxRecord>, respond: oneshot::Sender<bool>) {
        match &mut self.catch_all {
            CatchAllSlot::Known(value) => {
                let _ = respond.send(*value);
            }
            CatchAllSlot::Pending(waiters) => waiters.push(respond),
            slot @ CatchAllSlot::Unknown => {
                *slot = CatchAllSlot::Pending(vec![respond]);
                let prober = self.prober.clone();
                let domain = self.domain.clone();
                let self_tx = self.self_tx.clone();
                tokio::spawn(async move {
                    let is_catch_all = prober.probe_catch_all(&domain, &records).await;
                    let _ = self_tx.send(Msg::CatchAllResolved { is_catch_all }).await;
                });
            }
        }
    }

    fn on_catch_all_resolved(&mut self, is_catch_all: bool) {
        info!("Domain {} catch-all verdict: {}", self.domain, is_catch_all);
        if let CatchAllSlot::Pending(waiters) =
            std::mem::replace(&mut self.catch_all, CatchAllSlot::Known(is_catch_all))
        {
            for waiter in waiters {
                let _ = waiter.send(is_catch_all);
            }
        }
    }

    fn on_finished(
        &mut self,
        email: String,
        result: VerificationResult,
        respond: oneshot::Sender<crate::Result<VerificationResult>>,
    ) {
        self.active = self.active.saturating_sub(1);
        self.email_cache.insert(email, result.clone());
        let _ = respond.send(Ok(result));
    }

    fn evict_expired(&mut self) {
        self.evict_stale_dns();
        self.email_cache.run_pending_tasks();
    }

    fn evict_stale_dns(&mut self) {
        if let DnsSlot::Ready { fetched_at, .. } = &self.dns {
            if fetched_at.elapsed() > Duration::from_secs(self.config.domain_cache_ttl_secs) {
                debug!("DNS entry for {} expired", self.domain);
                self.dns = DnsSlot::Empty;
            }
        }
    }
}

/// The network stages of one verification, in pipeline order. The catch-all
/// verdict deliberately survives DNS-entry expiry: it is probed at most once
/// per coordinator lifetime.
async fn run_stages<P, B>(
    parsed: ParsedEmail,
    blocklist: B,
    prober: P,
    self_tx: mpsc::Sender<Msg>,
) -> VerificationResult
where
    P: MailboxProber,
    B: DisposableLookup,
{
    let is_disposable = blocklist.check_disposable(&parsed.domain).await;

    // Worker-gone can only happen at shutdown; degrade like a DNS failure.
    let dns = request_dns(&self_tx).await.unwrap_or_default();

    let (smtp, is_catch_all) = if dns.has_mx {
        let probe = prober.verify_mailbox(&parsed.email, &dns.records).await;
        let catch_all = request_catch_all(&self_tx, dns.records.clone()).await;
        (Some(probe), catch_all)
    } else {
        (None, None)
    };

    let scored = score::score(&ScoreInput {
        syntax_valid: true,
        dns: Some(&dns),
        is_disposable,
        is_catch_all,
        smtp: smtp.as_ref(),
    });

    VerificationResult {
        email: parsed.email,
        status: scored.status,
        score: scored.score,
        reason: scored.reason,
        checked_at: now_ms(),
        ttl: scored.ttl_ms,
    }
}

async fn request_dns(self_tx: &mpsc::Sender<Msg>) -> Option<DnsResult> {
    let (tx, rx) = oneshot::channel();
    self_tx.send(Msg::NeedDns { respond: tx }).await.ok()?;
    rx.await.ok()
}

async fn request_catch_all(self_tx: &mpsc::Sender<Msg>, records: Vec<MxRecord>) -> Option<bool> {
    let (tx, rx) = oneshot::channel();
    self_tx
        .send(Msg::NeedCatchAll {
            records,
            respond: tx,
        })
        .await
        .ok()?;
    rx.await.ok()
}
