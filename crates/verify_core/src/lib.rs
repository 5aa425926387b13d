//! # verify_core
//!
//! Email verification pipeline for estimating whether an address accepts
//! mail, without ever delivering any.
//!
//! ## Features
//!
//! - **Syntax gate** backed by a compile-time public-suffix snapshot
//! - **Disposable-domain blocklist** with a KV-compatible key schema
//! - **DNS-over-HTTPS resolution** of MX and address records
//! - **SMTP mailbox probing** (`HELO` → `STARTTLS` → `MAIL FROM` → `RCPT TO`)
//!   that stops before `DATA`
//! - **Per-domain coordination** bounding concurrent probes against any
//!   single mail exchanger, with layered result caching
//!
//! ## Example
//!
//! ```rust,no_run
//! use verify_core::{MemoryBlocklistStore, Verifier, VerifierConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryBlocklistStore::from_list_txt("mailinator.com")?;
//!     let verifier = Verifier::with_store(VerifierConfig::default(), store)?;
//!
//!     let result = verifier.verify("alice@example.com").await?;
//!     println!("{}: {:?} (score {})", result.email, result.status, result.score);
//!
//!     Ok(())
//! }
//! ```

pub mod blocklist;
pub mod coordinator;
pub mod dns;
pub mod domain;
pub mod score;
pub mod smtp;
pub mod syntax;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for the verification pipeline
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Hostname presented in `HELO`
    pub helo_domain: String,
    /// Envelope sender used in `MAIL FROM`; never receives mail
    pub probe_email: String,
    /// Admission gate width per domain
    pub max_concurrency_per_mx: usize,
    /// Deadline per MX attempt, in milliseconds
    pub smtp_timeout_ms: u64,
    /// SMTP port to connect to (25 in production; overridable for tests)
    pub smtp_port: u16,
    /// Deadline per DNS-over-HTTPS request, in milliseconds
    pub dns_timeout_ms: u64,
    /// DNS-over-HTTPS endpoint serving `application/dns-json`
    pub doh_endpoint: String,
    /// Hard cap on a blocklist lookup, in milliseconds
    pub blocklist_timeout_ms: u64,
    /// TTL of the per-domain DNS cache entry, in seconds
    pub domain_cache_ttl_secs: u64,
    /// Bound on the per-domain email result cache
    pub email_cache_capacity: u64,
    /// Deadline around one verification inside the coordinator, in milliseconds
    pub coordinator_deadline_ms: u64,
    /// Advisory retry-after surfaced on admission rejection, in seconds
    pub gray_retry_after_secs: u64,
    /// Where the external refresh job fetches new disposable entries
    pub disposable_list_url: Option<String>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            helo_domain: "verifier.local".to_string(),
            probe_email: "probe@verifier.local".to_string(),
            max_concurrency_per_mx: 5,
            smtp_timeout_ms: 5_000,
            smtp_port: 25,
            dns_timeout_ms: 5_000,
            doh_endpoint: "https://cloudflare-dns.com/dns-query".to_string(),
            blocklist_timeout_ms: 2_000,
            domain_cache_ttl_secs: 3_600,
            email_cache_capacity: 1_024,
            coordinator_deadline_ms: 10_000,
            gray_retry_after_secs: 3_600,
            disposable_list_url: None,
        }
    }
}

/// Verdict for a verified address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// The mailbox accepted `RCPT TO` and the domain is not catch-all
    Deliverable,
    /// The mailbox accepted `RCPT TO` but the domain accepts anything
    Risky,
    /// The pipeline could not reach a conclusive answer
    Unknown,
    /// Invalid syntax, no mail path, or a permanent `RCPT TO` rejection
    Undeliverable,
    /// The verification deadline expired before the pipeline finished
    Timeout,
}

/// Complete verification result for one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// The normalized address that was verified
    pub email: String,
    /// Final verdict
    pub status: VerificationStatus,
    /// Confidence score in `[0, 100]`
    pub score: u8,
    /// Human-readable explanation, present when any stage degraded the score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When verification finished, milliseconds since the Unix epoch
    pub checked_at: i64,
    /// How long this result may be served from cache, in milliseconds
    pub ttl: u64,
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Errors surfaced to callers of the pipeline
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Invalid request: {0}")]
    InvalidInput(String),
    #[error("Too many concurrent verifications")]
    AdmissionRejected,
    #[error("Verification pipeline unavailable: {0}")]
    Unavailable(String),
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VerifyError>;

// Re-export main types
pub use blocklist::{BlocklistClient, BlocklistStore, MemoryBlocklistStore};
pub use coordinator::{Verifier, VerifierService};
pub use dns::{DnsResult, DohResolver, MxRecord};
pub use smtp::{SmtpProbeResult, SmtpProber, SmtpResponse};
