//! Configuration management for the email verification API
//!
//! This module handles loading configuration from environment variables
//! and configuration files using the figment crate.

use serde::{Deserialize, Serialize};
use verify_core::VerifierConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub verification: VerificationSettings,
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Outer deadline around one verification request, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout_ms: 25_000,
        }
    }
}

/// Verification pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSettings {
    /// Hostname presented in `HELO`
    pub helo_domain: String,
    /// Envelope sender used in `MAIL FROM`
    pub probe_email: String,
    /// Admission gate width per domain
    pub max_concurrency_per_mx: usize,
    /// Deadline per MX attempt in milliseconds
    pub smtp_timeout_ms: u64,
    /// Deadline per DoH request in milliseconds
    pub dns_timeout_ms: u64,
    /// DNS-over-HTTPS endpoint
    pub doh_endpoint: String,
    /// Hard cap on a blocklist lookup in milliseconds
    pub blocklist_timeout_ms: u64,
    /// TTL of a domain's cached DNS answer in seconds
    pub domain_cache_ttl_secs: u64,
    /// Bound on the per-domain email result cache
    pub email_cache_capacity: u64,
    /// Deadline around one verification inside the coordinator, in milliseconds
    pub coordinator_deadline_ms: u64,
    /// Advisory retry-after surfaced on admission rejection, in seconds
    pub gray_retry_after_secs: u64,
    /// Where the refresh job fetches new disposable entries
    pub disposable_list_url: Option<String>,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        let core = VerifierConfig::default();
        Self {
            helo_domain: core.helo_domain,
            probe_email: core.probe_email,
            max_concurrency_per_mx: core.max_concurrency_per_mx,
            smtp_timeout_ms: core.smtp_timeout_ms,
            dns_timeout_ms: core.dns_timeout_ms,
            doh_endpoint: core.doh_endpoint,
            blocklist_timeout_ms: core.blocklist_timeout_ms,
            domain_cache_ttl_secs: core.domain_cache_ttl_secs,
            email_cache_capacity: core.email_cache_capacity,
            coordinator_deadline_ms: core.coordinator_deadline_ms,
            gray_retry_after_secs: core.gray_retry_after_secs,
            disposable_list_url: core.disposable_list_url,
        }
    }
}

impl VerificationSettings {
    /// Build the core pipeline configuration from these settings.
    pub fn to_core(&self) -> VerifierConfig {
        VerifierConfig {
            helo_domain: self.helo_domain.clone(),
            probe_email: self.probe_email.clone(),
            max_concurrency_per_mx: self.max_concurrency_per_mx,
            smtp_timeout_ms: self.smtp_timeout_ms,
            dns_timeout_ms: self.dns_timeout_ms,
            doh_endpoint: self.doh_endpoint.clone(),
            blocklist_timeout_ms: self.blocklist_timeout_ms,
            domain_cache_ttl_secs: self.domain_cache_ttl_secs,
            email_cache_capacity: self.email_cache_capacity,
            coordinator_deadline_ms: self.coordinator_deadline_ms,
            gray_retry_after_secs: self.gray_retry_after_secs,
            disposable_list_url: self.disposable_list_url.clone(),
            ..VerifierConfig::default()
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable JSON structured logging
    pub json_logs: bool,
    /// Log level filter
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.request_timeout_ms, 25_000);
        assert!(!config.observability.json_logs);
    }

    #[test]
    fn test_verification_defaults_follow_core() {
        let settings = VerificationSettings::default();
        assert_eq!(settings.max_concurrency_per_mx, 5);
        assert_eq!(settings.smtp_timeout_ms, 5_000);
        assert_eq!(settings.dns_timeout_ms, 5_000);
        assert_eq!(settings.blocklist_timeout_ms, 2_000);
        assert_eq!(settings.gray_retry_after_secs, 3_600);
        assert!(settings.disposable_list_url.is_none());
    }

    #[test]
    fn test_to_core_roundtrip() {
        let settings = VerificationSettings {
            helo_domain: "mail.example.net".to_string(),
            max_concurrency_per_mx: 2,
            ..VerificationSettings::default()
        };

        let core = settings.to_core();
        assert_eq!(core.helo_domain, "mail.example.net");
        assert_eq!(core.max_concurrency_per_mx, 2);
        assert_eq!(core.smtp_port, 25);
    }
}
