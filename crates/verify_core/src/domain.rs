//! Registrable-domain helper built on the embedded public-suffix snapshot.
//!
//! Splits a hostname into its registrable domain (eTLD+1) and the subdomain
//! labels in front of it. The blocklist client uses the registrable parent
//! for its second lookup; the syntax gate uses the split to reject bare
//! hostnames.

/// A hostname split at the registrable boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitHost {
    /// The registrable domain, e.g. `example.co.uk` for `mail.example.co.uk`
    pub registrable: String,
    /// Labels in front of the registrable domain, left to right
    pub subdomains: Vec<String>,
}

/// Extract the registrable domain (eTLD+1) of a hostname.
///
/// Returns `None` for bare hostnames, lone suffixes, and anything the
/// public-suffix algorithm cannot split (e.g. `localhost`).
pub fn registrable_domain(host: &str) -> Option<String> {
    let host = normalize(host);
    psl::domain(host.as_bytes()).map(|d| String::from_utf8_lossy(d.as_bytes()).into_owned())
}

/// Split a hostname into registrable domain and subdomain labels.
pub fn split_host(host: &str) -> Option<SplitHost> {
    let host = normalize(host);
    let registrable = registrable_domain(&host)?;

    let prefix = host.strip_suffix(&registrable)?.trim_end_matches('.');
    let subdomains = if prefix.is_empty() {
        Vec::new()
    } else {
        prefix.split('.').map(str::to_string).collect()
    };

    Some(SplitHost {
        registrable,
        subdomains,
    })
}

/// Whether the hostname's suffix appears verbatim on the public-suffix list.
///
/// Suffixes matched only by the list's implicit wildcard rule (unknown TLDs
/// such as `.invalid`) report `false` here; the syntax gate still accepts
/// them so that DNS gets to give the authoritative answer.
pub fn has_known_suffix(host: &str) -> bool {
    let host = normalize(host);
    psl::suffix(host.as_bytes()).map_or(false, |s| s.is_known())
}

fn normalize(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("gmail.com"), Some("gmail.com".into()));
        assert_eq!(
            registrable_domain("mail.google.com"),
            Some("google.com".into())
        );
        assert_eq!(
            registrable_domain("a.b.example.org"),
            Some("example.org".into())
        );
    }

    /// Compound suffixes must not be split in the middle.
    #[test]
    fn test_compound_suffixes() {
        assert_eq!(
            registrable_domain("mail.example.co.uk"),
            Some("example.co.uk".into())
        );
        assert_eq!(
            registrable_domain("example.co.uk"),
            Some("example.co.uk".into())
        );
        assert_eq!(
            registrable_domain("api.company.com.au"),
            Some("company.com.au".into())
        );
    }

    #[test]
    fn test_bare_hostnames_rejected() {
        assert_eq!(registrable_domain("localhost"), None);
        assert_eq!(registrable_domain("com"), None);
        assert_eq!(registrable_domain(""), None);
    }

    #[test]
    fn test_split_host() {
        let split = split_host("smtp.eu.mailgun.org").unwrap();
        assert_eq!(split.registrable, "mailgun.org");
        assert_eq!(split.subdomains, vec!["smtp".to_string(), "eu".to_string()]);

        let split = split_host("example.com").unwrap();
        assert_eq!(split.registrable, "example.com");
        assert!(split.subdomains.is_empty());
    }

    #[test]
    fn test_normalization() {
        assert_eq!(
            registrable_domain("MAIL.Example.COM."),
            Some("example.com".into())
        );
    }

    #[test]
    fn test_known_suffix() {
        assert!(has_known_suffix("example.com"));
        assert!(has_known_suffix("example.co.uk"));
        assert!(!has_known_suffix("example.invalid"));
    }
}
