//! Static identity directory keyed by peer IP.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;

use crate::config::IdentityConfig;
use crate::config::validation::ConfigError;
use crate::overlay::{CallerIdentity, IdentityError, IdentityProvider};

/// Answers `who_is` from a fixed address → identity table.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    by_ip: HashMap<IpAddr, CallerIdentity>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the directory from configured entries.
    pub fn from_config(entries: &[IdentityConfig]) -> Result<Self, ConfigError> {
        let mut provider = Self::new();
        for entry in entries {
            let ip: IpAddr = entry
                .address
                .parse()
                .map_err(|_| ConfigError::InvalidIdentityAddress(entry.address.clone()))?;
            provider.insert(
                ip,
                CallerIdentity {
                    login_name: entry.login.clone(),
                    display_name: entry.display_name.clone(),
                    profile_pic_url: entry.profile_pic_url.clone(),
                },
            );
        }
        Ok(provider)
    }

    pub fn insert(&mut self, ip: IpAddr, identity: CallerIdentity) {
        self.by_ip.insert(ip, identity);
    }

    pub fn with(mut self, ip: IpAddr, identity: CallerIdentity) -> Self {
        self.insert(ip, identity);
        self
    }

    pub fn len(&self) -> usize {
        self.by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ip.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn who_is(&self, remote: SocketAddr) -> Result<CallerIdentity, IdentityError> {
        // IPv4 peers on a dual-stack socket show up as ::ffff:a.b.c.d
        let ip = match remote.ip() {
            IpAddr::V6(v6) => v6
                .to_ipv4_mapped()
                .map(IpAddr::V4)
                .unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        self.by_ip
            .get(&ip)
            .cloned()
            .ok_or(IdentityError::UnknownPeer(remote))
    }
}
