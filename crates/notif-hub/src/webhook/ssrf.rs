/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! SSRF guard for webhook targets.
//!
//! Webhook URLs are attacker-controlled input; before dialing, the target
//! host is resolved and every resolved address must pass the guard. By
//! default loopback, link-local, private and otherwise non-routable ranges
//! are denied. Redirects are followed up to three hops with the same check
//! per hop.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use notif_utils::config::Ssrf as SsrfConfig;
use notif_utils::logging::prelude::*;
use url::Url;

/// Maximum redirect hops for webhook requests.
pub const MAX_REDIRECTS: usize = 3;

/// The SSRF guard.
#[derive(Debug, Clone)]
pub struct SsrfGuard {
    allow_private: bool,
    allow_loopback: bool,
    allowlist: Vec<String>,
}

impl SsrfGuard {
    /// Creates a guard from configuration.
    pub fn new(config: &SsrfConfig) -> Self {
        Self {
            allow_private: config.allow_private,
            allow_loopback: config.allow_loopback,
            allowlist: config.allowlist.clone(),
        }
    }

    /// A guard that denies all non-routable ranges. Test servers need
    /// `allow_loopback`.
    pub fn default_deny() -> Self {
        Self {
            allow_private: false,
            allow_loopback: false,
            allowlist: Vec::new(),
        }
    }

    /// Parses and checks a webhook URL, resolving its host.
    ///
    /// Returns the parsed URL on success so the caller dials exactly what was
    /// checked.
    pub async fn check_url(&self, raw: &str) -> Result<Url, String> {
        let url = self.parse(raw)?;

        let host = url
            .host_str()
            .ok_or_else(|| "URL has no host".to_string())?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| "URL has no port".to_string())?;

        let addrs = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| format!("DNS resolution failed for '{}': {}", host, e))?;

        self.check_resolved(&host, addrs.map(|a| a.ip()))?;

        Ok(url)
    }

    /// Synchronous variant used from the redirect policy.
    pub fn check_url_sync(&self, url: &Url) -> Result<(), String> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(format!("Scheme '{}' not allowed", url.scheme()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| "URL has no host".to_string())?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| "URL has no port".to_string())?;

        let addrs = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| format!("DNS resolution failed for '{}': {}", host, e))?;

        self.check_resolved(&host, addrs.map(|a: SocketAddr| a.ip()))
    }

    fn parse(&self, raw: &str) -> Result<Url, String> {
        let url = Url::parse(raw).map_err(|e| format!("Invalid URL: {}", e))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(format!("Scheme '{}' not allowed", url.scheme()));
        }
        Ok(url)
    }

    fn check_resolved(
        &self,
        host: &str,
        addrs: impl Iterator<Item = IpAddr>,
    ) -> Result<(), String> {
        let mut any = false;
        for ip in addrs {
            any = true;
            if !self.ip_allowed(ip) {
                warn!("SSRF guard rejected '{}' (resolves to {})", host, ip);
                return Err(format!(
                    "Host '{}' resolves to disallowed address {}",
                    host, ip
                ));
            }
        }
        if !any {
            return Err(format!("Host '{}' resolved to no addresses", host));
        }
        Ok(())
    }

    /// Whether a single resolved address is allowed.
    pub fn ip_allowed(&self, ip: IpAddr) -> bool {
        let text = ip.to_string();
        if self.allowlist.iter().any(|prefix| text.starts_with(prefix)) {
            return true;
        }

        match ip {
            IpAddr::V4(v4) => {
                if v4.is_loopback() {
                    return self.allow_loopback;
                }
                if v4.is_private() || is_carrier_grade_nat(v4) {
                    return self.allow_private;
                }
                !(v4.is_unspecified()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_multicast()
                    || v4.is_documentation())
            }
            IpAddr::V6(v6) => {
                if v6.is_loopback() {
                    return self.allow_loopback;
                }
                // Unique-local fc00::/7 is the v6 analogue of private space
                if (v6.segments()[0] & 0xfe00) == 0xfc00 {
                    return self.allow_private;
                }
                // Link-local fe80::/10
                if (v6.segments()[0] & 0xffc0) == 0xfe80 {
                    return false;
                }
                !(v6.is_unspecified() || v6.is_multicast())
            }
        }
    }
}

/// 100.64.0.0/10, non-routable shared address space.
fn is_carrier_grade_nat(v4: std::net::Ipv4Addr) -> bool {
    let octets = v4.octets();
    octets[0] == 100 && (octets[1] & 0xc0) == 64
}

/// Builds a reqwest redirect policy applying the guard per hop.
pub fn redirect_policy(guard: SsrfGuard) -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match guard.check_url_sync(attempt.url()) {
            Ok(()) => attempt.follow(),
            Err(reason) => {
                warn!("Redirect blocked: {}", reason);
                attempt.stop()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> SsrfGuard {
        SsrfGuard::default_deny()
    }

    #[test]
    fn test_public_addresses_allowed() {
        assert!(guard().ip_allowed("93.184.216.34".parse().unwrap()));
        assert!(guard().ip_allowed("8.8.8.8".parse().unwrap()));
        assert!(guard().ip_allowed("2606:2800:220:1:248:1893:25c8:1946".parse().unwrap()));
    }

    #[test]
    fn test_loopback_denied_by_default() {
        assert!(!guard().ip_allowed("127.0.0.1".parse().unwrap()));
        assert!(!guard().ip_allowed("127.8.8.8".parse().unwrap()));
        assert!(!guard().ip_allowed("::1".parse().unwrap()));
    }

    #[test]
    fn test_private_denied_by_default() {
        assert!(!guard().ip_allowed("10.0.0.1".parse().unwrap()));
        assert!(!guard().ip_allowed("172.16.3.4".parse().unwrap()));
        assert!(!guard().ip_allowed("192.168.1.1".parse().unwrap()));
        assert!(!guard().ip_allowed("100.64.0.7".parse().unwrap()));
        assert!(!guard().ip_allowed("fc00::1".parse().unwrap()));
    }

    #[test]
    fn test_link_local_and_special_denied() {
        assert!(!guard().ip_allowed("169.254.169.254".parse().unwrap()));
        assert!(!guard().ip_allowed("0.0.0.0".parse().unwrap()));
        assert!(!guard().ip_allowed("255.255.255.255".parse().unwrap()));
        assert!(!guard().ip_allowed("224.0.0.1".parse().unwrap()));
        assert!(!guard().ip_allowed("fe80::1".parse().unwrap()));
    }

    #[test]
    fn test_config_toggles() {
        let permissive = SsrfGuard {
            allow_private: true,
            allow_loopback: true,
            allowlist: Vec::new(),
        };
        assert!(permissive.ip_allowed("127.0.0.1".parse().unwrap()));
        assert!(permissive.ip_allowed("10.1.2.3".parse().unwrap()));

        // Loopback toggle does not open link-local
        assert!(!permissive.ip_allowed("169.254.1.1".parse().unwrap()));
    }

    #[test]
    fn test_allowlist_prefix() {
        let guard = SsrfGuard {
            allow_private: false,
            allow_loopback: false,
            allowlist: vec!["10.42.".to_string()],
        };
        assert!(guard.ip_allowed("10.42.0.5".parse().unwrap()));
        assert!(!guard.ip_allowed("10.43.0.5".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_check_url_rejects_bad_schemes() {
        assert!(guard().check_url("ftp://example.com/x").await.is_err());
        assert!(guard().check_url("file:///etc/passwd").await.is_err());
        assert!(guard().check_url("not a url").await.is_err());
    }

    #[tokio::test]
    async fn test_check_url_rejects_literal_loopback() {
        assert!(guard().check_url("http://127.0.0.1:8080/hook").await.is_err());
        assert!(guard().check_url("http://[::1]/hook").await.is_err());
    }
}
