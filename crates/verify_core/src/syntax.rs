//! Lexical validation and normalization of email addresses.
//!
//! This is the cheap gate in front of the pipeline: deterministic, purely
//! in-memory, and never touching the network. An address passes when it
//! matches an RFC-5322-shaped pattern (dot-atom or quoted local part; the
//! domain is either a bracketed IPv4 literal or dotted labels ending in an
//! alphabetic TLD) and its domain splits under the public-suffix algorithm.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain;

/// A validated, normalized address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEmail {
    /// Full normalized address, `local@domain`, lowercased
    pub email: String,
    /// Local part (before the `@`)
    pub local: String,
    /// Domain part (after the `@`)
    pub domain: String,
}

// Dot-atom or quoted local part; labels-with-TLD or bracketed IPv4 domain.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        ^
        (?:
            [a-z0-9!\#$%&'*+/=?^_`{|}~-]+ (?: \. [a-z0-9!\#$%&'*+/=?^_`{|}~-]+ )*
          | " (?: [^"\\] | \\ . )* "
        )
        @
        (?:
            (?: [a-z0-9] (?: [a-z0-9-]{0,61} [a-z0-9] )? \. )+ [a-z]{2,}
          | \[ (?: \d{1,3} \. ){3} \d{1,3} \]
        )
        $
        "#,
    )
    .expect("email pattern failed to compile; this is a bug")
});

/// Validate an address and return its normalized split, or `None`.
///
/// Normalization lowercases the whole address. For label domains the
/// public-suffix split must succeed, which rejects bare hostnames and lone
/// suffixes; suffixes covered only by the list's wildcard default rule are
/// accepted so that DNS gives the authoritative answer for them.
pub fn validate(raw: &str) -> Option<ParsedEmail> {
    let normalized = raw.trim().to_lowercase();

    if normalized.len() > 320 || !EMAIL_RE.is_match(&normalized) {
        return None;
    }

    // rfind: quoted local parts may themselves contain '@'
    let at = normalized.rfind('@')?;
    let (local, domain) = (&normalized[..at], &normalized[at + 1..]);

    if !domain.starts_with('[') && domain::registrable_domain(domain).is_none() {
        return None;
    }

    Some(ParsedEmail {
        email: normalized.clone(),
        local: local.to_string(),
        domain: domain.to_string(),
    })
}
