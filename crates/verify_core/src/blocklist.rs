//! Disposable domain detection against an external key/value blocklist.
//!
//! The key schema `blocklist/disposable/<domain>` is canonical and must be
//! preserved for interoperability with existing datasets. Lookups check the
//! exact domain first and fall back to its registrable parent, so
//! `foo.mailinator.com` is caught by an entry for `mailinator.com`.
//!
//! A blocklist outage must never block verification: every backend error or
//! timeout degrades to "not disposable".

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::domain;

/// Canonical key prefix for disposable-domain entries
pub const DISPOSABLE_KEY_PREFIX: &str = "blocklist/disposable/";

/// Build the canonical store key for a domain
pub fn disposable_key(domain: &str) -> String {
    format!("{DISPOSABLE_KEY_PREFIX}{domain}")
}

/// Read access to the blocklist key/value backend.
///
/// Abstracting the backend keeps the client testable and lets deployments
/// swap the in-memory store for a shared KV service without touching the
/// lookup logic.
pub trait BlocklistStore: Send + Sync + Clone + 'static {
    /// Fetch the value stored under `key`, if any.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// In-memory blocklist store seeded from a domain list.
///
/// Shared read-mostly by every coordinator; the refresh job replaces the
/// dataset wholesale via [`MemoryBlocklistStore::replace`].
#[derive(Clone, Default)]
pub struct MemoryBlocklistStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryBlocklistStore {
    /// Build a store from the `list.txt` format: one domain per line,
    /// `#` comments and blank lines ignored, invalid entries skipped.
    pub fn from_list_txt(content: &str) -> Result<Self> {
        let store = Self::default();
        let loaded = store.load_list_txt(content)?;
        info!("Blocklist store seeded with {} disposable domains", loaded);
        Ok(store)
    }

    /// Merge a domain list into the store. Returns the number of entries added.
    pub fn load_list_txt(&self, content: &str) -> Result<usize> {
        let domains = parse_disposable_list(content)?;
        let count = domains.len();

        let mut entries = self.entries.write().expect("blocklist lock poisoned");
        for d in domains {
            entries.insert(disposable_key(&d), "1".to_string());
        }
        Ok(count)
    }

    /// Replace the entire dataset with a freshly fetched list.
    pub fn replace(&self, content: &str) -> Result<usize> {
        let domains = parse_disposable_list(content)?;
        let count = domains.len();

        let mut fresh = HashMap::with_capacity(count);
        for d in domains {
            fresh.insert(disposable_key(&d), "1".to_string());
        }

        *self.entries.write().expect("blocklist lock poisoned") = fresh;
        info!("Blocklist store replaced, now {} disposable domains", count);
        Ok(count)
    }

    /// Number of entries in the store
    pub fn len(&self) -> usize {
        self.entries.read().expect("blocklist lock poisoned").len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlocklistStore for MemoryBlocklistStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .expect("blocklist lock poisoned")
            .get(key)
            .cloned())
    }
}

/// Lookup seam for the coordinator; mocked in tests.
pub trait DisposableLookup: Send + Sync + Clone + 'static {
    fn check_disposable(&self, domain: &str) -> impl Future<Output = bool> + Send;
}

/// Disposable-domain lookups with the degrade-to-false failure policy
#[derive(Clone)]
pub struct BlocklistClient<S> {
    store: S,
    timeout: Duration,
}

impl<S: BlocklistStore> DisposableLookup for BlocklistClient<S> {
    async fn check_disposable(&self, domain: &str) -> bool {
        self.is_disposable(domain).await
    }
}

impl<S: BlocklistStore> BlocklistClient<S> {
    pub fn new(store: S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Whether `domain` (or its registrable parent) is on the disposable list.
    ///
    /// Backend errors and lookups exceeding the configured cap both return
    /// `false`; verification must proceed through a blocklist outage.
    pub async fn is_disposable(&self, domain: &str) -> bool {
        match tokio::time::timeout(self.timeout, self.lookup(domain)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                warn!("Blocklist lookup failed for {}: {}", domain, e);
                false
            }
            Err(_) => {
                warn!("Blocklist lookup timed out for {}", domain);
                false
            }
        }
    }

    async fn lookup(&self, domain: &str) -> Result<bool> {
        if self.store.get(&disposable_key(domain)).await?.is_some() {
            debug!("Domain {} flagged as disposable (exact match)", domain);
            return Ok(true);
        }

        if let Some(parent) = domain::registrable_domain(domain) {
            if parent != domain && self.store.get(&disposable_key(&parent)).await?.is_some() {
                debug!(
                    "Domain {} flagged as disposable (parent {} match)",
                    domain, parent
                );
                return Ok(true);
            }
        }

        Ok(false)
    }
}

/// Fetch a disposable-domain list for the store, used by the refresh job.
pub async fn fetch_list(client: &reqwest::Client, url: &str) -> Result<String> {
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(body)
}

/// Fetch a fresh list and swap it into the store wholesale.
/// Returns the new entry count.
pub async fn refresh_store_from_url(store: &MemoryBlocklistStore, url: &str) -> Result<usize> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let body = fetch_list(&client, url).await?;
    store.replace(&body)
}

/// Parse the `list.txt` format into a set of domains
fn parse_disposable_list(content: &str) -> Result<Vec<String>> {
    let mut domains = Vec::new();
    let mut invalid_count = 0usize;

    for (line_no, line) in content.lines().enumerate() {
        let entry = line.trim();

        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }

        if is_plausible_domain(entry) {
            domains.push(entry.to_lowercase());
        } else {
            invalid_count += 1;
            if invalid_count <= 10 {
                warn!(
                    "Invalid domain format at line {}: '{}'",
                    line_no + 1,
                    entry
                );
            }
        }
    }

    if invalid_count > 10 {
        warn!("... and {} more invalid domain entries", invalid_count - 10);
    }

    if domains.is_empty() {
        anyhow::bail!("no valid domains found in list");
    }

    Ok(domains)
}

fn is_plausible_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 || !domain.contains('.') {
        return false;
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
