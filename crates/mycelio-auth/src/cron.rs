//! Scheduler trigger guard
//!
//! The reclaim and auto-settle endpoints are driven by an external scheduler
//! holding a shared secret. Checks run in this order:
//!
//! 1. secret not configured: `NOT_CONFIGURED`
//! 2. production and secret shorter than 32 characters: `WEAK_SECRET`
//! 3. bearer does not match the secret: `UNAUTHORIZED`
//! 4. production and source address off the allowlist: `FORBIDDEN`
//!
//! The source address is the socket peer. A forwarded client address is used
//! only when the peer is one of the configured trusted proxies.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroizing;

use crate::authenticator::parse_bearer;
use crate::config::{CronConfig, MIN_CRON_SECRET_LEN};
use crate::error::{AuthError, AuthResult};

/// Shared-secret and source-address guard for scheduler triggers
#[derive(Clone)]
pub struct CronGuard {
    secret: Option<Zeroizing<String>>,
    allowlist: Vec<IpNetwork>,
    trusted_proxies: Vec<IpNetwork>,
    production: bool,
}

impl std::fmt::Debug for CronGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronGuard")
            .field("configured", &self.secret.is_some())
            .field("allowlist", &self.allowlist)
            .field("trusted_proxies", &self.trusted_proxies)
            .field("production", &self.production)
            .finish()
    }
}

impl CronGuard {
    /// Build the guard; loopback is always allowed
    pub fn new(config: CronConfig) -> AuthResult<Self> {
        let mut allowlist = vec![
            IpNetwork::from(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            IpNetwork::from(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        ];
        allowlist.extend(parse_networks(&config.allowed_ips)?);
        let trusted_proxies = parse_networks(&config.trusted_proxies)?;

        Ok(Self {
            secret: config
                .secret
                .filter(|s| !s.is_empty())
                .map(Zeroizing::new),
            allowlist,
            trusted_proxies,
            production: config.production,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Address the allowlist is checked against
    ///
    /// `forwarded` is the client address claimed by forwarding headers; it is
    /// taken only when `peer` is a trusted proxy.
    pub fn source_address(&self, peer: Option<IpAddr>, forwarded: Option<IpAddr>) -> Option<IpAddr> {
        match peer {
            Some(ip) if self.trusted_proxies.iter().any(|network| network.contains(ip)) => {
                forwarded.or(peer)
            }
            _ => peer,
        }
    }

    fn ip_allowed(&self, ip: IpAddr) -> bool {
        self.allowlist.iter().any(|network| network.contains(ip))
    }

    /// Check an `Authorization` header value and the request's source address
    pub fn verify(&self, authorization: Option<&str>, client_ip: Option<IpAddr>) -> AuthResult<()> {
        let Some(secret) = self.secret.as_ref() else {
            warn!("Scheduler trigger rejected: secret not configured");
            return Err(AuthError::NotConfigured);
        };

        if self.production && secret.len() < MIN_CRON_SECRET_LEN {
            warn!("Scheduler trigger rejected: secret below minimum length");
            return Err(AuthError::WeakSecret);
        }

        let presented = parse_bearer(authorization).unwrap_or_default();
        let matches: bool = presented.as_bytes().ct_eq(secret.as_bytes()).into();
        if !matches {
            warn!(client_ip = ?client_ip, "Scheduler trigger rejected: bad secret");
            return Err(AuthError::Unauthorized);
        }

        if self.production && !client_ip.map(|ip| self.ip_allowed(ip)).unwrap_or(false) {
            warn!(client_ip = ?client_ip, "Scheduler trigger rejected: source not allowed");
            return Err(AuthError::IpNotAllowed);
        }

        Ok(())
    }
}

fn parse_networks(ranges: &[String]) -> AuthResult<Vec<IpNetwork>> {
    ranges
        .iter()
        .map(|range| {
            range
                .parse::<IpNetwork>()
                .map_err(|e| AuthError::Config(format!("Invalid cron address range {}: {}", range, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG: &str = "0123456789abcdef0123456789abcdef";

    fn guard(secret: Option<&str>, production: bool, allowed: &[&str]) -> CronGuard {
        CronGuard::new(CronConfig {
            secret: secret.map(String::from),
            allowed_ips: allowed.iter().map(|s| s.to_string()).collect(),
            trusted_proxies: vec!["10.9.0.0/16".to_string()],
            production,
        })
        .unwrap()
    }

    fn bearer(secret: &str) -> String {
        format!("Bearer {}", secret)
    }

    #[test]
    fn test_missing_secret() {
        let g = guard(None, false, &[]);
        assert!(!g.is_configured());
        assert!(matches!(
            g.verify(Some(&bearer(STRONG)), None),
            Err(AuthError::NotConfigured)
        ));

        let g = guard(Some(""), false, &[]);
        assert!(matches!(g.verify(None, None), Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_weak_secret_only_in_production() {
        let dev = guard(Some("short"), false, &[]);
        assert!(dev.verify(Some(&bearer("short")), None).is_ok());

        let prod = guard(Some("short"), true, &[]);
        assert!(matches!(
            prod.verify(Some(&bearer("short")), Some("127.0.0.1".parse().unwrap())),
            Err(AuthError::WeakSecret)
        ));
    }

    #[test]
    fn test_wrong_secret() {
        let g = guard(Some(STRONG), false, &[]);
        assert!(matches!(g.verify(Some("Bearer nope"), None), Err(AuthError::Unauthorized)));
        assert!(matches!(g.verify(None, None), Err(AuthError::Unauthorized)));
        assert!(matches!(g.verify(Some(STRONG), None), Err(AuthError::Unauthorized)));
    }

    #[test]
    fn test_allowlist_in_production() {
        let g = guard(Some(STRONG), true, &["10.1.0.0/16"]);
        let header = bearer(STRONG);

        assert!(g.verify(Some(&header), Some("127.0.0.1".parse().unwrap())).is_ok());
        assert!(g.verify(Some(&header), Some("::1".parse().unwrap())).is_ok());
        assert!(g.verify(Some(&header), Some("10.1.44.2".parse().unwrap())).is_ok());
        assert!(matches!(
            g.verify(Some(&header), Some("203.0.113.9".parse().unwrap())),
            Err(AuthError::IpNotAllowed)
        ));
        assert!(matches!(g.verify(Some(&header), None), Err(AuthError::IpNotAllowed)));
    }

    #[test]
    fn test_allowlist_ignored_outside_production() {
        let g = guard(Some(STRONG), false, &[]);
        assert!(g
            .verify(Some(&bearer(STRONG)), Some("203.0.113.9".parse().unwrap()))
            .is_ok());
    }

    #[test]
    fn test_invalid_allowlist_entry() {
        let result = CronGuard::new(CronConfig {
            secret: Some(STRONG.into()),
            allowed_ips: vec!["bogus".into()],
            trusted_proxies: vec![],
            production: true,
        });
        assert!(matches!(result, Err(AuthError::Config(_))));
    }

    #[test]
    fn test_forwarded_address_needs_trusted_peer() {
        let g = guard(Some(STRONG), true, &[]);
        let header = bearer(STRONG);
        let loopback: IpAddr = "127.0.0.1".parse().unwrap();
        let outsider: IpAddr = "203.0.113.77".parse().unwrap();
        let proxy: IpAddr = "10.9.3.1".parse().unwrap();

        // An untrusted peer cannot borrow loopback through a forwarding header
        let source = g.source_address(Some(outsider), Some(loopback));
        assert_eq!(source, Some(outsider));
        assert!(matches!(g.verify(Some(&header), source), Err(AuthError::IpNotAllowed)));

        // A trusted proxy relays the client address
        let source = g.source_address(Some(proxy), Some(loopback));
        assert_eq!(source, Some(loopback));
        assert!(g.verify(Some(&header), source).is_ok());

        assert_eq!(g.source_address(Some(proxy), None), Some(proxy));
        assert_eq!(g.source_address(None, Some(loopback)), None);
    }
}
