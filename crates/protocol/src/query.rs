//! Directory-service response types.
//!
//! `GET {uc}/v4/query?ak=...&bucket=...` returns one or more host groups,
//! each with a TTL in seconds and a domain list per service role.

use serde::{Deserialize, Serialize};

/// Service roles a host group advertises domains for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    /// Upload hosts.
    Up,
    /// Read/download hosts.
    Io,
    /// Rename/metadata hosts.
    Rs,
    /// Listing hosts.
    Rsf,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceDomains {
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostGroup {
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub io: ServiceDomains,
    #[serde(default)]
    pub up: ServiceDomains,
    #[serde(default)]
    pub rs: ServiceDomains,
    #[serde(default)]
    pub rsf: ServiceDomains,
}

impl HostGroup {
    pub fn domains(&self, role: ServiceRole) -> &[String] {
        match role {
            ServiceRole::Up => &self.up.domains,
            ServiceRole::Io => &self.io.domains,
            ServiceRole::Rs => &self.rs.domains,
            ServiceRole::Rsf => &self.rsf.domains,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub hosts: Vec<HostGroup>,
}

impl QueryResponse {
    /// Smallest TTL across all groups, or `None` when there are no groups.
    pub fn min_ttl(&self) -> Option<u64> {
        self.hosts.iter().map(|g| g.ttl).min()
    }

    /// Expands the domains for `role` into URLs.
    ///
    /// Only the first group listing `role` is used; later groups are
    /// backups. Domains that already carry a scheme are kept as-is.
    pub fn hosts_for(&self, role: ServiceRole, https: bool) -> Vec<String> {
        let scheme = if https { "https://" } else { "http://" };
        self.hosts
            .iter()
            .map(|g| g.domains(role))
            .find(|domains| !domains.is_empty())
            .unwrap_or_default()
            .iter()
            .map(|d| {
                if d.contains("://") {
                    d.clone()
                } else {
                    format!("{scheme}{d}")
                }
            })
            .collect()
    }
}
