//! Mail-path resolution over DNS-over-HTTPS.
//!
//! One lookup answers two questions about a domain: does it publish MX
//! records, and does it resolve at all (A/AAAA). MX and A queries run
//! concurrently; AAAA is only asked when A came back empty. Any transport
//! or decode failure degrades to an empty [`DnsResult`] — callers treat
//! that as "domain has no mail path" and scoring handles it.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// A single mail exchanger with its RFC 5321 preference (lower is preferred)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub priority: u16,
    pub exchange: String,
}

/// Mail-path facts for one domain, immutable after creation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsResult {
    /// Whether the domain publishes at least one MX record
    pub has_mx: bool,
    /// MX records sorted ascending by priority, response order preserved on ties
    pub records: Vec<MxRecord>,
    /// Whether the domain has any A or AAAA record
    pub has_a: bool,
}

impl DnsResult {
    /// A domain with neither MX nor address records has no mail path.
    pub fn has_mail_path(&self) -> bool {
        self.has_mx || self.has_a
    }
}

/// Resolution seam for the coordinator; mocked in tests.
pub trait MxResolver: Send + Sync + Clone + 'static {
    fn lookup(&self, domain: &str) -> impl Future<Output = DnsResult> + Send;
}

const RR_TYPE_A: u16 = 1;
const RR_TYPE_MX: u16 = 15;
const RR_TYPE_AAAA: u16 = 28;

/// `application/dns-json` response body
#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[allow(dead_code)]
    name: String,
    #[serde(rename = "type")]
    rr_type: u16,
    #[serde(rename = "TTL")]
    #[allow(dead_code)]
    ttl: u32,
    data: String,
}

/// DNS-over-HTTPS resolver against a JSON endpoint
#[derive(Clone)]
pub struct DohResolver {
    client: reqwest::Client,
    endpoint: String,
}

impl DohResolver {
    /// Create a resolver with a per-request deadline.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build DoH HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Resolve the mail path for `domain`.
    ///
    /// Errors never escape: a failed or unparseable query yields the empty
    /// result, which downstream scoring maps to "no valid mail server".
    pub async fn resolve(&self, domain: &str) -> DnsResult {
        debug!("Resolving mail path for domain: {}", domain);

        let (mx, a) = tokio::join!(self.query(domain, "MX"), self.query(domain, "A"));

        let records = match mx {
            Ok(response) => parse_mx_answers(&response),
            Err(e) => {
                warn!("MX lookup failed for {}: {}", domain, e);
                Vec::new()
            }
        };

        let mut has_a = match a {
            Ok(response) => has_answer_of(&response, RR_TYPE_A),
            Err(e) => {
                warn!("A lookup failed for {}: {}", domain, e);
                false
            }
        };

        if !has_a {
            has_a = match self.query(domain, "AAAA").await {
                Ok(response) => has_answer_of(&response, RR_TYPE_AAAA),
                Err(e) => {
                    warn!("AAAA lookup failed for {}: {}", domain, e);
                    false
                }
            };
        }

        let result = DnsResult {
            has_mx: !records.is_empty(),
            records,
            has_a,
        };
        debug!(
            "Domain {} - MX: {}, A/AAAA: {}",
            domain,
            result.records.len(),
            result.has_a
        );
        result
    }

    async fn query(&self, domain: &str, record_type: &str) -> Result<DohResponse> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("name", domain), ("type", record_type)])
            .header("Accept", "application/dns-json")
            .send()
            .await
            .with_context(|| format!("{record_type} query transport error"))?
            .error_for_status()
            .with_context(|| format!("{record_type} query rejected"))?;

        let body: DohResponse = response
            .json()
            .await
            .with_context(|| format!("{record_type} response decode error"))?;
        Ok(body)
    }
}

impl MxResolver for DohResolver {
    async fn lookup(&self, domain: &str) -> DnsResult {
        self.resolve(domain).await
    }
}

/// Parse MX answers from their `"<prio> <exchange>"` wire strings.
///
/// Malformed entries are skipped; the trailing root dot is stripped from
/// exchanges; the sort is stable so ties keep DNS response order.
fn parse_mx_answers(response: &DohResponse) -> Vec<MxRecord> {
    if response.status != 0 {
        return Vec::new();
    }

    let mut records: Vec<MxRecord> = response
        .answer
        .iter()
        .filter(|a| a.rr_type == RR_TYPE_MX)
        .filter_map(|a| {
            let (prio, exchange) = a.data.trim().split_once(' ')?;
            let priority = prio.parse::<u16>().ok()?;
            let exchange = exchange.trim().trim_end_matches('.');
            if exchange.is_empty() {
                return None;
            }
            Some(MxRecord {
                priority,
                exchange: exchange.to_string(),
            })
        })
        .collect();

    records.sort_by_key(|r| r.priority);
    records
}

fn has_answer_of(response: &DohResponse, rr_type: u16) -> bool {
    response.status == 0 && response.answer.iter().any(|a| a.rr_type == rr_type)
}
