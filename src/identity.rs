//! Egress identity selection.
//!
//! An [`IdentityPool`] is built once at startup from the configured proxies and
//! user agents and then shared read-only by every page worker. Selection is
//! uniform at random; no identity is ever blacklisted, since failures on this
//! site are usually transient and affect every proxy alike.

use crate::error::ConfigError;
use crate::models::Identity;
use rand::{Rng, rng};
use tracing::{debug, info};

/// Immutable, non-empty pool of identities.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    identities: Vec<Identity>,
}

impl IdentityPool {
    /// Build a pool, rejecting an empty one.
    pub fn new(identities: Vec<Identity>) -> Result<Self, ConfigError> {
        if identities.is_empty() {
            return Err(ConfigError::EmptyIdentityPool);
        }
        info!(size = identities.len(), "Identity pool ready");
        Ok(Self { identities })
    }

    /// Pair every proxy with every user agent.
    ///
    /// With no proxies, each user agent becomes a direct identity.
    pub fn from_parts(proxies: &[String], user_agents: &[String]) -> Result<Self, ConfigError> {
        for proxy in proxies {
            validate_proxy(proxy)?;
        }

        let identities = if proxies.is_empty() {
            user_agents
                .iter()
                .map(|ua| Identity {
                    proxy: None,
                    user_agent: ua.clone(),
                })
                .collect()
        } else {
            proxies
                .iter()
                .flat_map(|proxy| {
                    user_agents.iter().map(move |ua| Identity {
                        proxy: Some(proxy.clone()),
                        user_agent: ua.clone(),
                    })
                })
                .collect()
        };

        Self::new(identities)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Pick one identity uniformly at random.
    pub fn select(&self) -> &Identity {
        let idx = rng().random_range(0..self.identities.len());
        &self.identities[idx]
    }

    /// Pick uniformly among identities not in `tried`.
    ///
    /// When every identity has already been tried, falls back to the whole pool.
    pub fn select_excluding(&self, tried: &[Identity]) -> &Identity {
        let fresh: Vec<&Identity> = self
            .identities
            .iter()
            .filter(|id| !tried.contains(id))
            .collect();

        if fresh.is_empty() {
            debug!(tried = tried.len(), "All identities tried; selecting from full pool");
            return self.select();
        }
        fresh[rng().random_range(0..fresh.len())]
    }
}

fn validate_proxy(proxy: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidProxy {
        proxy: proxy.to_string(),
        reason: reason.to_string(),
    };

    let parsed = url::Url::parse(proxy).map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(&format!("unsupported scheme {other:?}"))),
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn uas(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("UA-{i}")).collect()
    }

    #[test]
    fn test_empty_pool_is_config_error() {
        let err = IdentityPool::new(Vec::new()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyIdentityPool));
    }

    #[test]
    fn test_no_user_agents_is_config_error() {
        let proxies = vec!["http://u:p@10.0.0.1:8000".to_string()];
        let err = IdentityPool::from_parts(&proxies, &[]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyIdentityPool));
    }

    #[test]
    fn test_direct_identities_without_proxies() {
        let pool = IdentityPool::from_parts(&[], &uas(2)).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(pool.select().proxy.is_none());
    }

    #[test]
    fn test_proxies_paired_with_every_user_agent() {
        let proxies = vec![
            "http://a:b@10.0.0.1:8000".to_string(),
            "http://c:d@10.0.0.2:8000".to_string(),
        ];
        let pool = IdentityPool::from_parts(&proxies, &uas(3)).unwrap();
        assert_eq!(pool.len(), 6);
        assert!(pool.select().proxy.is_some());
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let proxies = vec!["ftp://10.0.0.1:21".to_string()];
        let err = IdentityPool::from_parts(&proxies, &uas(1)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProxy { .. }));

        let proxies = vec!["not a url".to_string()];
        assert!(IdentityPool::from_parts(&proxies, &uas(1)).is_err());
    }

    #[test]
    fn test_select_excluding_prefers_untried() {
        let pool = IdentityPool::from_parts(&[], &uas(3)).unwrap();
        for _ in 0..50 {
            let mut tried = Vec::new();
            for _ in 0..3 {
                let next = pool.select_excluding(&tried).clone();
                assert!(!tried.contains(&next));
                tried.push(next);
            }
            let distinct: HashSet<_> = tried.iter().collect();
            assert_eq!(distinct.len(), 3);
        }
    }

    #[test]
    fn test_select_excluding_falls_back_when_exhausted() {
        let pool = IdentityPool::from_parts(&[], &uas(1)).unwrap();
        let only = pool.select().clone();
        let again = pool.select_excluding(std::slice::from_ref(&only));
        assert_eq!(again, &only);
    }
}
