//! TCP connect port scan.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;

use super::{ParamKind, ParamSpec, Tool, ToolArgs, ToolOutput};

/// Ports probed at once.
const SCAN_CONCURRENCY: usize = 64;
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Simple TCP connect scan.
pub struct PortScan {
    timeout: Duration,
}

impl PortScan {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for PortScan {
    fn name(&self) -> &str {
        "port_scan"
    }

    fn description(&self) -> &str {
        "Simple TCP port scan of a host. Ports can be a comma-separated list (\"22,80,443\") or a range (\"start-end\"). Returns the host and the list of open ports. Very large ranges on filtered hosts can run into the call time limit; prefer specific ports."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("host", ParamKind::String, "Hostname or IP address to scan"),
            ParamSpec::optional(
                "ports",
                ParamKind::String,
                "Comma-separated ports or a 'start-end' range (default: 1-1024)",
                json!("1-1024"),
            ),
        ]
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<ToolOutput> {
        let host = args.str("host")?.trim().to_string();
        if host.is_empty() {
            anyhow::bail!("host must not be empty");
        }
        let ports = parse_port_spec(args.str("ports")?)?;

        tracing::info!(host = %host, port_count = ports.len(), "scanning ports");

        let mut open_ports: Vec<u16> = stream::iter(ports)
            .map(|port| {
                let host = host.clone();
                async move { probe(&host, port).await.then_some(port) }
            })
            .buffer_unordered(SCAN_CONCURRENCY)
            .filter_map(|open| async move { open })
            .collect()
            .await;
        open_ports.sort_unstable();

        Ok(ToolOutput::Json(json!({
            "host": host,
            "open_ports": open_ports,
        })))
    }
}

/// A port counts as open only if the connect completes within the timeout.
async fn probe(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Parse `"22,80,443"` or `"20-25"` into a list of ports.
pub fn parse_port_spec(spec: &str) -> anyhow::Result<Vec<u16>> {
    let spec = spec.trim();
    if spec.is_empty() {
        anyhow::bail!("ports must not be empty");
    }

    let ports: Vec<u16> = if let Some((start, end)) = spec.split_once('-') {
        let start = parse_port(start)?;
        let end = parse_port(end)?;
        if start > end {
            anyhow::bail!("invalid port range {}: start is after end", spec);
        }
        (start..=end).collect()
    } else {
        spec.split(',')
            .filter(|p| !p.trim().is_empty())
            .map(parse_port)
            .collect::<anyhow::Result<_>>()?
    };

    if ports.is_empty() {
        anyhow::bail!("no ports given in {:?}", spec);
    }
    Ok(ports)
}

fn parse_port(value: &str) -> anyhow::Result<u16> {
    let value = value.trim();
    match value.parse::<u16>() {
        Ok(0) | Err(_) => anyhow::bail!("invalid port: {:?}", value),
        Ok(port) => Ok(port),
    }
}
