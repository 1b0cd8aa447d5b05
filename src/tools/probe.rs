//! ICMP probes via the system `ping` and `traceroute` utilities.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;

use super::{ParamKind, ParamSpec, Tool, ToolArgs, ToolOutput};

const MAX_OUTPUT_CHARS: usize = 10_000;

/// Ping a host with the system ping utility.
pub struct PingHost {
    timeout: Duration,
}

impl PingHost {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for PingHost {
    fn name(&self) -> &str {
        "ping_host"
    }

    fn description(&self) -> &str {
        "ICMP ping a host via the system ping utility. Returns the raw ping output including packet loss and round-trip times."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("host", ParamKind::String, "Hostname or IP address to ping"),
            ParamSpec::optional(
                "count",
                ParamKind::Integer,
                "Number of echo requests to send (default: 4)",
                json!(4),
            ),
        ]
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<ToolOutput> {
        let host = checked_host(args.str("host")?)?;
        let count = args.int("count")?;
        if !(1..=100).contains(&count) {
            anyhow::bail!("count must be between 1 and 100, got {}", count);
        }

        let count_flag = if cfg!(target_os = "windows") { "-n" } else { "-c" };

        tracing::info!(host, count, "pinging host");
        let output = run_utility("ping", &[count_flag, &count.to_string(), host]).await?;
        Ok(ToolOutput::Text(output))
    }
}

/// Trace the route to a host with the system traceroute utility.
pub struct TracerouteHost {
    timeout: Duration,
}

impl TracerouteHost {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for TracerouteHost {
    fn name(&self) -> &str {
        "traceroute_host"
    }

    fn description(&self) -> &str {
        "Trace the network path to a host via the system traceroute utility. Returns the raw hop-by-hop output."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("host", ParamKind::String, "Hostname or IP address to trace"),
            ParamSpec::optional(
                "max_hops",
                ParamKind::Integer,
                "Maximum number of hops (default: 30)",
                json!(30),
            ),
        ]
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<ToolOutput> {
        let host = checked_host(args.str("host")?)?;
        let max_hops = args.int("max_hops")?;
        if !(1..=255).contains(&max_hops) {
            anyhow::bail!("max_hops must be between 1 and 255, got {}", max_hops);
        }

        let (program, hops_flag) = if cfg!(target_os = "windows") {
            ("tracert", "-h")
        } else {
            ("traceroute", "-m")
        };

        tracing::info!(host, max_hops, "tracing route");
        let output = run_utility(program, &[hops_flag, &max_hops.to_string(), host]).await?;
        Ok(ToolOutput::Text(output))
    }
}

/// Hosts are passed as a positional argument; refuse anything that would parse as a flag.
fn checked_host(host: &str) -> anyhow::Result<&str> {
    let host = host.trim();
    if host.is_empty() {
        anyhow::bail!("host must not be empty");
    }
    if host.starts_with('-') {
        anyhow::bail!("invalid host: {}", host);
    }
    Ok(host)
}

/// Run a utility and return its stdout, or its stderr when stdout is empty.
///
/// The child is killed if this future is dropped (timeout or discarded call).
async fn run_utility(program: &str, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to execute {}: {}", program, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    tracing::debug!(
        program,
        exit_code = output.status.code().unwrap_or(-1),
        stdout_len = stdout.len(),
        stderr_len = stderr.len(),
        "utility finished"
    );

    let mut result = if stdout.trim().is_empty() {
        stderr.into_owned()
    } else {
        stdout.into_owned()
    };

    if result.len() > MAX_OUTPUT_CHARS {
        let mut cut = MAX_OUTPUT_CHARS;
        while !result.is_char_boundary(cut) {
            cut -= 1;
        }
        result.truncate(cut);
        result.push_str("\n... [output truncated]");
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_like_hosts_are_refused() {
        assert!(checked_host("-f").is_err());
        assert!(checked_host("   ").is_err());
        assert_eq!(checked_host(" 10.0.0.1 ").unwrap(), "10.0.0.1");
    }

    #[tokio::test]
    async fn missing_utility_is_an_error() {
        let err = run_utility("definitely-not-a-real-utility-xyz", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to execute"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_returned_when_stdout_empty() {
        let out = run_utility("sh", &["-c", "echo oops >&2; exit 2"])
            .await
            .unwrap();
        assert_eq!(out.trim(), "oops");
    }

    #[tokio::test]
    async fn out_of_range_count_rejected() {
        let mut registry = crate::tools::ToolRegistry::new();
        registry
            .register(PingHost::new(Duration::from_secs(5)))
            .unwrap();
        let out = registry
            .execute("ping_host", json!({"host": "127.0.0.1", "count": 0}))
            .await;
        assert!(out.is_failure());
        assert!(out.to_string_lossy().contains("count must be between"));
    }
}
