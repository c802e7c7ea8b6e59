use partsync_discovery::Queryer;
use partsync_protocol::ServiceRole;
use tracing::{debug, warn};

/// Where a facade gets its hosts for one service role: the directory when
/// configured, the static list otherwise or when discovery comes back empty.
#[derive(Debug, Clone)]
pub(crate) struct HostSource {
    role: ServiceRole,
    fixed: Vec<String>,
    queryer: Option<Queryer>,
    https: bool,
}

impl HostSource {
    pub(crate) fn new(
        role: ServiceRole,
        fixed: Vec<String>,
        queryer: Option<Queryer>,
        https: bool,
    ) -> Self {
        Self {
            role,
            fixed,
            queryer,
            https,
        }
    }

    pub(crate) async fn resolve(&self) -> Vec<String> {
        if let Some(queryer) = &self.queryer {
            match queryer.query_hosts(self.role, self.https).await {
                Ok(hosts) if !hosts.is_empty() => return hosts,
                Ok(_) => debug!(role = ?self.role, "directory listed no hosts for role"),
                Err(e) => warn!(role = ?self.role, error = %e, "host discovery failed, using configured hosts"),
            }
        }
        self.fixed.clone()
    }
}
