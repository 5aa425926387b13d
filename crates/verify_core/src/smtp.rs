//! SMTP mailbox probing.
//!
//! Speaks just enough of the protocol to learn whether a mail exchanger
//! would accept a recipient: `HELO`, opportunistic `STARTTLS`, `MAIL FROM`,
//! and the decisive `RCPT TO`, then `QUIT`. `DATA` is never issued.
//!
//! Exchangers are tried in priority order. A permanent (`5xx`) rejection of
//! `RCPT TO` is authoritative and stops the scan; connect failures, timeouts
//! and transient codes fall through to the next exchanger.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::dns::MxRecord;
use crate::VerifierConfig;

/// A parsed SMTP reply. Code `0` means the server said something that does
/// not parse as a reply; callers treat it as a transient failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpResponse {
    pub code: u16,
    pub message: String,
}

impl SmtpResponse {
    /// `2xx` or `3xx`
    pub fn is_positive(&self) -> bool {
        (200..400).contains(&self.code)
    }

    /// `4xx`
    pub fn is_transient(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// `5xx`
    pub fn is_permanent(&self) -> bool {
        self.code >= 500
    }
}

/// Outcome of probing one address across a domain's exchangers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmtpProbeResult {
    /// True iff `RCPT TO` returned a positive reply
    pub success: bool,
    /// The `RCPT TO` reply, when one was obtained
    pub response: Option<SmtpResponse>,
    /// Why the probe was inconclusive, when no exchanger answered `RCPT TO`
    pub error: Option<String>,
}

/// Probing seam for the coordinator; mocked in tests.
pub trait MailboxProber: Send + Sync + Clone + 'static {
    fn verify_mailbox(
        &self,
        email: &str,
        mx_records: &[MxRecord],
    ) -> impl Future<Output = SmtpProbeResult> + Send;

    fn probe_catch_all(
        &self,
        domain: &str,
        mx_records: &[MxRecord],
    ) -> impl Future<Output = bool> + Send;
}

/// Live SMTP prober
#[derive(Clone)]
pub struct SmtpProber {
    helo_domain: String,
    probe_email: String,
    timeout: Duration,
    port: u16,
}

enum Attempt {
    /// Positive `RCPT TO`
    Delivered(SmtpResponse),
    /// Permanent `RCPT TO` rejection; do not try further exchangers
    Rejected(SmtpResponse),
    /// Inconclusive; try the next exchanger
    NextMx(String),
}

impl SmtpProber {
    pub fn new(
        helo_domain: impl Into<String>,
        probe_email: impl Into<String>,
        timeout: Duration,
        port: u16,
    ) -> Self {
        Self {
            helo_domain: helo_domain.into(),
            probe_email: probe_email.into(),
            timeout,
            port,
        }
    }

    pub fn from_config(config: &VerifierConfig) -> Self {
        Self::new(
            config.helo_domain.clone(),
            config.probe_email.clone(),
            Duration::from_millis(config.smtp_timeout_ms),
            config.smtp_port,
        )
    }

    /// Probe whether `email` would be accepted by any of the given
    /// exchangers, tried in priority order.
    pub async fn probe(&self, email: &str, mx_records: &[MxRecord]) -> SmtpProbeResult {
        if mx_records.is_empty() {
            return SmtpProbeResult {
                success: false,
                response: None,
                error: Some("no mail exchangers to probe".to_string()),
            };
        }

        let mut last_reason = String::new();
        for mx in mx_records {
            debug!("Probing {} via {}", email, mx.exchange);
            let attempt = match tokio::time::timeout(
                self.timeout,
                self.dialog(&mx.exchange, email),
            )
            .await
            {
                Ok(Ok(attempt)) => attempt,
                Ok(Err(e)) => Attempt::NextMx(format!("{}: {:#}", mx.exchange, e)),
                Err(_) => Attempt::NextMx(format!("{}: dialog timed out", mx.exchange)),
            };

            match attempt {
                Attempt::Delivered(response) => {
                    return SmtpProbeResult {
                        success: true,
                        response: Some(response),
                        error: None,
                    };
                }
                Attempt::Rejected(response) => {
                    debug!(
                        "Exchanger {} permanently rejected {}: {}",
                        mx.exchange, email, response.code
                    );
                    return SmtpProbeResult {
                        success: false,
                        response: Some(response),
                        error: None,
                    };
                }
                Attempt::NextMx(reason) => {
                    debug!("Moving past exchanger: {}", reason);
                    last_reason = reason;
                }
            }
        }

        warn!("All exchangers exhausted for {}: {}", email, last_reason);
        SmtpProbeResult {
            success: false,
            response: None,
            error: Some(last_reason),
        }
    }

    /// Probe whether the domain accepts an address that almost certainly
    /// does not exist. A positive reply marks the domain catch-all.
    pub async fn catch_all(&self, domain: &str, mx_records: &[MxRecord]) -> bool {
        let target = format!("{}@{}", random_probe_local(), domain);
        debug!("Running catch-all probe for {}", domain);
        self.probe(&target, mx_records).await.success
    }

    /// One full dialog against one exchanger. Transport errors bubble up as
    /// `Err` and are mapped to [`Attempt::NextMx`] by the caller.
    async fn dialog(&self, exchange: &str, email: &str) -> Result<Attempt> {
        let mut session = Session::connect(exchange, self.port).await?;

        let banner = session.read_reply().await?;
        if !banner.is_positive() {
            session.quit().await;
            return Ok(Attempt::NextMx(format!(
                "{exchange}: banner {}",
                banner.code
            )));
        }

        let helo = format!("HELO {}", self.helo_domain);
        let reply = session.command(&helo).await?;
        if !reply.is_positive() {
            session.quit().await;
            return Ok(Attempt::NextMx(format!("{exchange}: HELO {}", reply.code)));
        }

        // Opportunistic STARTTLS. A refusal keeps the plaintext session; a
        // failed upgrade after a positive reply poisons the session, so we
        // reopen to the same exchanger and carry on unencrypted.
        let tls_reply = session.command("STARTTLS").await?;
        if tls_reply.is_positive() {
            session = match session.upgrade_tls(exchange).await {
                Ok(mut upgraded) => {
                    let reply = upgraded.command(&helo).await?;
                    if !reply.is_positive() {
                        upgraded.quit().await;
                        return Ok(Attempt::NextMx(format!(
                            "{exchange}: HELO after TLS {}",
                            reply.code
                        )));
                    }
                    upgraded
                }
                Err(e) => {
                    debug!(
                        "TLS upgrade to {} failed, reopening in plaintext: {:#}",
                        exchange, e
                    );
                    let mut fresh = Session::connect(exchange, self.port).await?;
                    let banner = fresh.read_reply().await?;
                    if !banner.is_positive() {
                        return Ok(Attempt::NextMx(format!(
                            "{exchange}: banner {} on reopen",
                            banner.code
                        )));
                    }
                    let reply = fresh.command(&helo).await?;
                    if !reply.is_positive() {
                        return Ok(Attempt::NextMx(format!(
                            "{exchange}: HELO {} on reopen",
                            reply.code
                        )));
                    }
                    fresh
                }
            };
        }

        let reply = session
            .command(&format!("MAIL FROM:<{}>", self.probe_email))
            .await?;
        if !reply.is_positive() {
            session.quit().await;
            return Ok(Attempt::NextMx(format!(
                "{exchange}: MAIL FROM {}",
                reply.code
            )));
        }

        let rcpt = session.command(&format!("RCPT TO:<{email}>")).await?;
        session.quit().await;

        if rcpt.is_positive() {
            Ok(Attempt::Delivered(rcpt))
        } else if rcpt.is_permanent() {
            Ok(Attempt::Rejected(rcpt))
        } else {
            Ok(Attempt::NextMx(format!(
                "{exchange}: RCPT transient {}",
                rcpt.code
            )))
        }
    }
}

impl MailboxProber for SmtpProber {
    async fn verify_mailbox(&self, email: &str, mx_records: &[MxRecord]) -> SmtpProbeResult {
        self.probe(email, mx_records).await
    }

    async fn probe_catch_all(&self, domain: &str, mx_records: &[MxRecord]) -> bool {
        self.catch_all(domain, mx_records).await
    }
}

const PROBE_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `probe-` plus 8-10 base-36 characters; unlikely to name a real mailbox.
fn random_probe_local() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(8..=10);
    let suffix: String = (0..len)
        .map(|_| PROBE_ALPHABET[rng.gen_range(0..PROBE_ALPHABET.len())] as char)
        .collect();
    format!("probe-{suffix}")
}

static REPLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{3})([ -])(.*)$").expect("reply pattern is valid"));

/// Parse one reply line into `(code, is_final, text)`; `None` if unparseable.
fn parse_reply_line(line: &str) -> Option<(u16, bool, &str)> {
    let caps = REPLY_RE.captures(line)?;
    let code = caps.get(1)?.as_str().parse().ok()?;
    let is_final = caps.get(2)?.as_str() == " ";
    Some((code, is_final, caps.get(3).map_or("", |m| m.as_str())))
}

enum Wire {
    Plain(BufReader<TcpStream>),
    Tls(BufReader<tokio_native_tls::TlsStream<TcpStream>>),
}

struct Session {
    wire: Wire,
}

impl Session {
    async fn connect(exchange: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((exchange, port))
            .await
            .with_context(|| format!("connect to {exchange}:{port}"))?;
        Ok(Self {
            wire: Wire::Plain(BufReader::new(stream)),
        })
    }

    /// Read one complete (possibly multi-line) reply.
    async fn read_reply(&mut self) -> Result<SmtpResponse> {
        let mut code = 0u16;
        let mut parts: Vec<String> = Vec::new();

        loop {
            let mut line = String::new();
            let n = match &mut self.wire {
                Wire::Plain(s) => s.read_line(&mut line).await?,
                Wire::Tls(s) => s.read_line(&mut line).await?,
            };
            if n == 0 {
                anyhow::bail!("connection closed mid-reply");
            }

            let line = line.trim_end_matches(['\r', '\n']);
            match parse_reply_line(line) {
                Some((c, is_final, text)) => {
                    code = c;
                    if !text.is_empty() {
                        parts.push(text.to_string());
                    }
                    if is_final {
                        break;
                    }
                }
                None => {
                    return Ok(SmtpResponse {
                        code: 0,
                        message: line.to_string(),
                    });
                }
            }
        }

        Ok(SmtpResponse {
            code,
            message: parts.join(" "),
        })
    }

    async fn send(&mut self, cmd: &str) -> Result<()> {
        let framed = format!("{cmd}\r\n");
        match &mut self.wire {
            Wire::Plain(s) => {
                s.write_all(framed.as_bytes()).await?;
                s.flush().await?;
            }
            Wire::Tls(s) => {
                s.write_all(framed.as_bytes()).await?;
                s.flush().await?;
            }
        }
        Ok(())
    }

    async fn command(&mut self, cmd: &str) -> Result<SmtpResponse> {
        self.send(cmd).await?;
        self.read_reply().await
    }

    /// Best-effort `QUIT`; the reply is not awaited.
    async fn quit(&mut self) {
        let _ = self.send("QUIT").await;
    }

    /// Upgrade the connection in place. Consumes the session; on failure the
    /// caller must reconnect, the old socket is unusable.
    async fn upgrade_tls(self, exchange: &str) -> Result<Session> {
        let stream = match self.wire {
            Wire::Plain(buffered) => buffered.into_inner(),
            Wire::Tls(_) => anyhow::bail!("session already encrypted"),
        };

        let connector = tokio_native_tls::TlsConnector::from(
            native_tls::TlsConnector::new().context("TLS connector init")?,
        );
        let tls = connector
            .connect(exchange, stream)
            .await
            .context("TLS handshake")?;

        Ok(Session {
            wire: Wire::Tls(BufReader::new(tls)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_reply_line() {
        assert_eq!(
            parse_reply_line("250 OK"),
            Some((250, true, "OK"))
        );
        assert_eq!(
            parse_reply_line("250-mx.example.com greets you"),
            Some((250, false, "mx.example.com greets you"))
        );
        assert_eq!(parse_reply_line("550 "), Some((550, true, "")));
        assert_eq!(parse_reply_line("garbage"), None);
        assert_eq!(parse_reply_line("25 too short"), None);
    }

    #[test]
    fn test_response_classes() {
        let ok = SmtpResponse { code: 250, message: String::new() };
        let greylist = SmtpResponse { code: 451, message: String::new() };
        let reject = SmtpResponse { code: 550, message: String::new() };
        let garbled = SmtpResponse { code: 0, message: String::new() };

        assert!(ok.is_positive() && !ok.is_transient() && !ok.is_permanent());
        assert!(greylist.is_transient());
        assert!(reject.is_permanent());
        assert!(!garbled.is_positive() && !garbled.is_transient() && !garbled.is_permanent());
    }

    #[test]
    fn test_random_probe_local_shape() {
        for _ in 0..50 {
            let local = random_probe_local();
            let suffix = local.strip_prefix("probe-").expect("prefix");
            assert!((8..=10).contains(&suffix.len()));
            assert!(suffix.bytes().all(|b| PROBE_ALPHABET.contains(&b)));
        }
    }

    fn prober(port: u16) -> SmtpProber {
        SmtpProber::new(
            "verifier.test",
            "probe@verifier.test",
            Duration::from_secs(2),
            port,
        )
    }

    /// Scripted exchanger: accepts connections forever, greets, refuses
    /// STARTTLS, and answers RCPT via the supplied decision function.
    async fn scripted_mx(
        rcpt_decision: fn(&str) -> &'static str,
        banner: &'static str,
    ) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut stream = BufReader::new(stream);
                    let _ = stream.write_all(banner.as_bytes()).await;
                    let mut line = String::new();
                    loop {
                        line.clear();
                        match stream.read_line(&mut line).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                        let cmd = line.trim_end();
                        let reply: String = if cmd.starts_with("HELO") {
                            "250 mx.test\r\n".into()
                        } else if cmd == "STARTTLS" {
                            "454 TLS not available\r\n".into()
                        } else if cmd.starts_with("MAIL FROM") {
                            "250 sender ok\r\n".into()
                        } else if let Some(rcpt) = cmd.strip_prefix("RCPT TO:<") {
                            let addr = rcpt.trim_end_matches('>');
                            format!("{}\r\n", rcpt_decision(addr))
                        } else if cmd == "QUIT" {
                            let _ = stream.write_all(b"221 bye\r\n").await;
                            break;
                        } else {
                            "500 unrecognized\r\n".into()
                        };
                        if stream.write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        (port, connections)
    }

    #[tokio::test]
    async fn test_accepts_existing_mailbox() {
        let (port, _) = scripted_mx(
            |addr| {
                if addr == "alice@example.com" {
                    "250 recipient ok"
                } else {
                    "550 no such user"
                }
            },
            "220 mx.test ESMTP\r\n",
        )
        .await;

        let result = prober(port)
            .probe(
                "alice@example.com",
                &[MxRecord { priority: 10, exchange: "127.0.0.1".into() }],
            )
            .await;

        assert!(result.success);
        assert_eq!(result.response.expect("reply").code, 250);
    }

    #[tokio::test]
    async fn test_permanent_rejection_is_authoritative() {
        let (port, contacted) = scripted_mx(|_| "550 5.1.1 user unknown", "220 a.test\r\n").await;

        // Two records pointing at the same exchanger: a 5xx on the first
        // attempt must stop the scan, so only one connection is made.
        let result = prober(port)
            .probe(
                "ghost@example.com",
                &[
                    MxRecord { priority: 5, exchange: "127.0.0.1".into() },
                    MxRecord { priority: 10, exchange: "127.0.0.1".into() },
                ],
            )
            .await;

        assert!(!result.success);
        let response = result.response.expect("reply");
        assert_eq!(response.code, 550);
        assert!(response.message.contains("user unknown"));
        assert_eq!(contacted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_negative_banner_moves_on() {
        let (port, _) = scripted_mx(|_| "250 ok", "421 service not available\r\n").await;

        let result = prober(port)
            .probe(
                "alice@example.com",
                &[MxRecord { priority: 10, exchange: "127.0.0.1".into() }],
            )
            .await;

        assert!(!result.success);
        assert!(result.response.is_none());
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_multiline_banner_and_reply() {
        let (port, _) = scripted_mx(
            |_| "250 recipient ok",
            "220-welcome to mx.test\r\n220 ready\r\n",
        )
        .await;

        let result = prober(port)
            .probe(
                "alice@example.com",
                &[MxRecord { priority: 10, exchange: "127.0.0.1".into() }],
            )
            .await;

        assert!(result.success);
    }

    #[tokio::test]
    async fn test_transient_falls_through_to_next_mx() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        // First connection greylists the recipient, the second accepts it.
        tokio::spawn(async move {
            for rcpt_reply in ["451 greylisted, try later\r\n", "250 recipient ok\r\n"] {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let mut stream = BufReader::new(stream);
                let _ = stream.write_all(b"220 mx.test\r\n").await;
                let mut line = String::new();
                loop {
                    line.clear();
                    match stream.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                    let cmd = line.trim_end();
                    let reply = if cmd.starts_with("HELO") {
                        "250 mx.test\r\n"
                    } else if cmd == "STARTTLS" {
                        "454 TLS not available\r\n"
                    } else if cmd.starts_with("MAIL FROM") {
                        "250 sender ok\r\n"
                    } else if cmd.starts_with("RCPT TO") {
                        rcpt_reply
                    } else {
                        "221 bye\r\n"
                    };
                    if stream.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                    if cmd == "QUIT" {
                        break;
                    }
                }
            }
        });

        let result = prober(port)
            .probe(
                "alice@example.com",
                &[
                    MxRecord { priority: 5, exchange: "127.0.0.1".into() },
                    MxRecord { priority: 10, exchange: "127.0.0.1".into() },
                ],
            )
            .await;

        assert!(result.success);
        assert_eq!(result.response.expect("reply").code, 250);
    }

    #[tokio::test]
    async fn test_connect_failure_exhausts_list() {
        // Bind-then-drop to obtain a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let result = prober(port)
            .probe(
                "alice@example.com",
                &[MxRecord { priority: 10, exchange: "127.0.0.1".into() }],
            )
            .await;

        assert!(!result.success);
        assert!(result.response.is_none());
        assert!(result.error.expect("reason").contains("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_empty_mx_list() {
        let result = prober(25).probe("alice@example.com", &[]).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_catch_all_detection() {
        let (open_port, _) = scripted_mx(|_| "250 anything goes", "220 mx.test\r\n").await;
        let (strict_port, _) = scripted_mx(
            |addr| {
                if addr.starts_with("probe-") {
                    "550 no such user"
                } else {
                    "250 ok"
                }
            },
            "220 mx.test\r\n",
        )
        .await;

        let records = vec![MxRecord { priority: 10, exchange: "127.0.0.1".into() }];
        assert!(prober(open_port).catch_all("example.com", &records).await);
        assert!(!prober(strict_port).catch_all("example.com", &records).await);
    }
}
