//! Deterministic scoring of stage outcomes.
//!
//! A pure function: the same stage outcomes always produce the same score,
//! verdict, reason and cache TTL. The score is additive over four buckets
//! (mail path, disposable, catch-all, SMTP answer) and clamped to `[0, 100]`.

use crate::dns::DnsResult;
use crate::smtp::SmtpProbeResult;
use crate::VerificationStatus;

/// Stage outcomes feeding the scorer
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreInput<'a> {
    /// Whether the address passed the lexical gate
    pub syntax_valid: bool,
    /// Resolved mail path; `None` only when syntax already failed
    pub dns: Option<&'a DnsResult>,
    /// Whether the domain is on the disposable blocklist
    pub is_disposable: bool,
    /// Catch-all verdict for the domain; `None` until a probe has run
    pub is_catch_all: Option<bool>,
    /// SMTP probe outcome; `None` when the domain publishes no MX
    pub smtp: Option<&'a SmtpProbeResult>,
}

/// Scoring outcome: everything needed to build a verification result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scored {
    pub score: u8,
    pub status: VerificationStatus,
    pub reason: Option<String>,
    pub ttl_ms: u64,
}

const TTL_24H_MS: u64 = 86_400_000;
const TTL_12H_MS: u64 = 43_200_000;
const TTL_6H_MS: u64 = 21_600_000;
const TTL_1H_MS: u64 = 3_600_000;

/// TTL of a synthetic timeout result; short so retries come back quickly.
pub const TIMEOUT_TTL_MS: u64 = 900_000;

/// Map stage outcomes to a score, a verdict and a cache TTL.
pub fn score(input: &ScoreInput) -> Scored {
    if !input.syntax_valid {
        return undeliverable("Invalid email syntax");
    }

    let no_mail_path = input.dns.map_or(true, |dns| !dns.has_mail_path());
    if no_mail_path {
        return undeliverable("Domain has no valid mail server");
    }

    let mut score: u32 = 0;
    let mut reasons: Vec<&str> = Vec::new();

    if input.is_disposable {
        score += 20;
        reasons.push("Disposable email domain");
    } else {
        score += 50;
    }

    match input.is_catch_all {
        Some(true) => {
            score += 20;
            reasons.push("catch-all domain");
        }
        Some(false) => score += 30,
        None => {}
    }

    let smtp_code = input
        .smtp
        .and_then(|probe| probe.response.as_ref())
        .map(|response| response.code);

    match input.smtp {
        Some(probe) if probe.success => score += 50,
        Some(_) => match smtp_code {
            Some(code) if code >= 500 => reasons.push("mailbox does not exist"),
            Some(code) if code >= 400 => {
                score += 10;
                reasons.push("temporary mailbox failure");
            }
            _ => {}
        },
        None => {}
    }

    let mut score = score.min(100) as u8;

    let status = if input.is_catch_all == Some(true) && score >= 70 {
        VerificationStatus::Risky
    } else if score == 100 {
        VerificationStatus::Deliverable
    } else if score < 70 || smtp_code.is_none() {
        VerificationStatus::Unknown
    } else if smtp_code.is_some_and(|code| code >= 500) {
        VerificationStatus::Undeliverable
    } else {
        VerificationStatus::Unknown
    };

    // A permanent rejection is a certainty, not a degraded estimate.
    if status == VerificationStatus::Undeliverable {
        score = 0;
    }

    Scored {
        score,
        status,
        reason: if reasons.is_empty() {
            None
        } else {
            Some(reasons.join("; "))
        },
        ttl_ms: ttl_for(score),
    }
}

fn undeliverable(reason: &str) -> Scored {
    Scored {
        score: 0,
        status: VerificationStatus::Undeliverable,
        reason: Some(reason.to_string()),
        ttl_ms: ttl_for(0),
    }
}

fn ttl_for(score: u8) -> u64 {
    match score {
        90..=100 => TTL_24H_MS,
        70..=89 => TTL_12H_MS,
        50..=69 => TTL_6H_MS,
        _ => TTL_1H_MS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smtp::SmtpResponse;
    use pretty_assertions::assert_eq;

    fn dns_with_mx() -> DnsResult {
        DnsResult {
            has_mx: true,
            records: vec![crate::dns::MxRecord {
                priority: 5,
                exchange: "mx.example.com".into(),
            }],
            has_a: true,
        }
    }

    fn smtp_reply(success: bool, code: u16) -> SmtpProbeResult {
        SmtpProbeResult {
            success,
            response: Some(SmtpResponse {
                code,
                message: String::new(),
            }),
            error: None,
        }
    }

    #[test]
    fn test_invalid_syntax() {
        let scored = score(&ScoreInput::default());
        assert_eq!(scored.score, 0);
        assert_eq!(scored.status, VerificationStatus::Undeliverable);
        assert_eq!(scored.reason.as_deref(), Some("Invalid email syntax"));
        assert_eq!(scored.ttl_ms, TTL_1H_MS);
    }

    #[test]
    fn test_no_mail_path() {
        let dns = DnsResult::default();
        let scored = score(&ScoreInput {
            syntax_valid: true,
            dns: Some(&dns),
            ..Default::default()
        });
        assert_eq!(scored.score, 0);
        assert_eq!(scored.status, VerificationStatus::Undeliverable);
        assert_eq!(
            scored.reason.as_deref(),
            Some("Domain has no valid mail server")
        );
        assert_eq!(scored.ttl_ms, TTL_1H_MS);
    }

    /// Accepted recipient on a non-catch-all domain: the perfect answer.
    #[test]
    fn test_deliverable() {
        let dns = dns_with_mx();
        let smtp = smtp_reply(true, 250);
        let scored = score(&ScoreInput {
            syntax_valid: true,
            dns: Some(&dns),
            is_disposable: false,
            is_catch_all: Some(false),
            smtp: Some(&smtp),
        });
        assert_eq!(scored.score, 100);
        assert_eq!(scored.status, VerificationStatus::Deliverable);
        assert_eq!(scored.reason, None);
        assert_eq!(scored.ttl_ms, TTL_24H_MS);
    }

    /// Catch-all acceptance outranks the perfect score: the mailbox cannot
    /// be told apart from any other address on the domain.
    #[test]
    fn test_catch_all_is_risky_even_at_full_score() {
        let dns = dns_with_mx();
        let smtp = smtp_reply(true, 250);
        let scored = score(&ScoreInput {
            syntax_valid: true,
            dns: Some(&dns),
            is_disposable: false,
            is_catch_all: Some(true),
            smtp: Some(&smtp),
        });
        assert_eq!(scored.score, 100);
        assert_eq!(scored.status, VerificationStatus::Risky);
        assert!(scored.reason.expect("reason").contains("catch-all"));
    }

    #[test]
    fn test_permanent_rejection() {
        let dns = dns_with_mx();
        let smtp = smtp_reply(false, 550);
        let scored = score(&ScoreInput {
            syntax_valid: true,
            dns: Some(&dns),
            is_disposable: false,
            is_catch_all: Some(false),
            smtp: Some(&smtp),
        });
        assert_eq!(scored.status, VerificationStatus::Undeliverable);
        assert_eq!(scored.score, 0);
        assert!(scored
            .reason
            .expect("reason")
            .contains("mailbox does not exist"));
    }

    #[test]
    fn test_transient_rejection_is_unknown() {
        let dns = dns_with_mx();
        let smtp = smtp_reply(false, 451);
        let scored = score(&ScoreInput {
            syntax_valid: true,
            dns: Some(&dns),
            is_disposable: false,
            is_catch_all: Some(false),
            smtp: Some(&smtp),
        });
        // 50 + 30 + 10 = 90, but a transient answer is not conclusive.
        assert_eq!(scored.score, 90);
        assert_eq!(scored.status, VerificationStatus::Unknown);
        assert!(scored
            .reason
            .expect("reason")
            .contains("temporary mailbox failure"));
    }

    #[test]
    fn test_exhausted_exchangers_are_unknown() {
        let dns = dns_with_mx();
        let smtp = SmtpProbeResult {
            success: false,
            response: None,
            error: Some("all exchangers unreachable".into()),
        };
        let scored = score(&ScoreInput {
            syntax_valid: true,
            dns: Some(&dns),
            is_disposable: false,
            is_catch_all: None,
            smtp: Some(&smtp),
        });
        assert_eq!(scored.score, 50);
        assert_eq!(scored.status, VerificationStatus::Unknown);
        assert_eq!(scored.ttl_ms, TTL_6H_MS);
    }

    #[test]
    fn test_disposable_reason_is_recorded() {
        let dns = dns_with_mx();
        let smtp = smtp_reply(true, 250);
        let scored = score(&ScoreInput {
            syntax_valid: true,
            dns: Some(&dns),
            is_disposable: true,
            is_catch_all: Some(false),
            smtp: Some(&smtp),
        });
        // 20 + 30 + 50 still sums to a full score; the reason records the
        // disposable finding even when the mailbox itself answers.
        assert_eq!(scored.score, 100);
        assert_eq!(scored.status, VerificationStatus::Deliverable);
        assert!(scored
            .reason
            .expect("reason")
            .contains("Disposable email domain"));
    }

    #[test]
    fn test_mx_less_domain_with_address_records() {
        let dns = DnsResult {
            has_mx: false,
            records: Vec::new(),
            has_a: true,
        };
        let scored = score(&ScoreInput {
            syntax_valid: true,
            dns: Some(&dns),
            is_disposable: false,
            is_catch_all: None,
            smtp: None,
        });
        assert_eq!(scored.score, 50);
        assert_eq!(scored.status, VerificationStatus::Unknown);
    }

    /// Same inputs, same outputs: the scorer keeps no hidden state.
    #[test]
    fn test_purity() {
        let dns = dns_with_mx();
        let smtp = smtp_reply(true, 250);
        let input = ScoreInput {
            syntax_valid: true,
            dns: Some(&dns),
            is_disposable: false,
            is_catch_all: Some(true),
            smtp: Some(&smtp),
        };
        assert_eq!(score(&input), score(&input));
    }

    #[test]
    fn test_ttl_bands() {
        assert_eq!(ttl_for(100), TTL_24H_MS);
        assert_eq!(ttl_for(90), TTL_24H_MS);
        assert_eq!(ttl_for(89), TTL_12H_MS);
        assert_eq!(ttl_for(70), TTL_12H_MS);
        assert_eq!(ttl_for(69), TTL_6H_MS);
        assert_eq!(ttl_for(50), TTL_6H_MS);
        assert_eq!(ttl_for(49), TTL_1H_MS);
        assert_eq!(ttl_for(0), TTL_1H_MS);
    }
}
