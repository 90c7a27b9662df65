//! Network address whitelist authentication.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;

use crate::gateway::error::GatewayError;

use super::traits::{AuthRequest, AuthStrategy};

/// Admits callers by their network address alone.
///
/// Entries are either full `ip:port` peer addresses or bare IP addresses.
/// A bare IP admits that host from any source port.
#[derive(Debug, Clone, Default)]
pub struct WhitelistAuth {
    peers: HashSet<String>,
    hosts: HashSet<IpAddr>,
}

impl WhitelistAuth {
    /// Create a whitelist from address entries.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut whitelist = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            match entry.parse::<IpAddr>() {
                Ok(ip) => {
                    whitelist.hosts.insert(ip);
                }
                Err(_) => {
                    whitelist.peers.insert(entry.to_string());
                }
            }
        }
        whitelist
    }

    /// Check whether `peer` is admitted.
    pub fn allows(&self, peer: &SocketAddr) -> bool {
        self.peers.contains(&peer.to_string()) || self.hosts.contains(&peer.ip())
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty() && self.hosts.is_empty()
    }
}

#[async_trait]
impl AuthStrategy for WhitelistAuth {
    async fn authenticate(&self, request: &AuthRequest<'_>) -> Result<bool, GatewayError> {
        Ok(self.allows(&request.peer))
    }

    fn name(&self) -> &'static str {
        "whitelist"
    }
}
