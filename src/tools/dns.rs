//! DNS resolution through the system resolver.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{ParamKind, ParamSpec, Tool, ToolArgs, ToolOutput};

pub struct ResolveDns {
    timeout: Duration,
}

impl ResolveDns {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for ResolveDns {
    fn name(&self) -> &str {
        "resolve_dns"
    }

    fn description(&self) -> &str {
        "DNS lookup of a hostname. Returns the queried name, aliases and the resolved IP addresses."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "hostname",
            ParamKind::String,
            "Hostname to resolve",
        )]
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<ToolOutput> {
        let hostname = args.str("hostname")?.trim();
        if hostname.is_empty() {
            anyhow::bail!("hostname must not be empty");
        }

        let resolved = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to resolve {}: {}", hostname, e))?;

        let mut addresses: Vec<IpAddr> = Vec::new();
        for addr in resolved {
            if !addresses.contains(&addr.ip()) {
                addresses.push(addr.ip());
            }
        }
        // IPv4 first, resolver order otherwise.
        addresses.sort_by_key(|ip| ip.is_ipv6());

        tracing::debug!(hostname, count = addresses.len(), "resolved hostname");

        Ok(ToolOutput::Json(json!({
            "name": hostname,
            "aliases": Vec::<String>::new(),
            "addresses": addresses.iter().map(ToString::to_string).collect::<Vec<_>>(),
        })))
    }
}
