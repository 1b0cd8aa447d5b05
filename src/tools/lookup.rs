//! HTTP lookups: MAC vendor and public IP.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{ParamKind, ParamSpec, Tool, ToolArgs, ToolOutput};

const MAC_VENDOR_URL: &str = "https://api.macvendors.com";
const PUBLIC_IP_URL: &str = "https://api.ipify.org?format=json";

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("netops-agent/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?)
}

/// Look up the vendor of a MAC address.
pub struct LookupMacVendor {
    timeout: Duration,
}

impl LookupMacVendor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for LookupMacVendor {
    fn name(&self) -> &str {
        "lookup_mac_vendor"
    }

    fn description(&self) -> &str {
        "Look up the hardware vendor for a MAC address via a public API."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "mac",
            ParamKind::String,
            "MAC address, e.g. 00:1A:2B:3C:4D:5E",
        )]
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<ToolOutput> {
        let mac = args.str("mac")?.trim();
        let url = format!("{}/{}", MAC_VENDOR_URL, urlencoding::encode(mac));

        let response = http_client(self.timeout)?.get(&url).send().await?;
        // The service answers unknown addresses with a 404 body that explains why.
        let body = response.text().await?;
        Ok(ToolOutput::Text(body))
    }
}

/// Fetch the public IP address of this machine.
pub struct GetPublicIp {
    timeout: Duration,
}

impl GetPublicIp {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for GetPublicIp {
    fn name(&self) -> &str {
        "get_public_ip"
    }

    fn description(&self) -> &str {
        "Fetch the public IP address of this machine."
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, _args: ToolArgs) -> anyhow::Result<ToolOutput> {
        let response = http_client(self.timeout)?
            .get(PUBLIC_IP_URL)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP error: {}", status);
        }
        let body: Value = response.json().await?;
        Ok(ToolOutput::Json(public_ip_field(&body)))
    }
}

fn public_ip_field(body: &Value) -> Value {
    body.get("ip")
        .and_then(Value::as_str)
        .map(|ip| Value::String(ip.to_string()))
        .unwrap_or(Value::Null)
}
