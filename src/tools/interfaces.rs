//! Local interface inventory.

use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sysinfo::{NetworkData, Networks};

use super::{ParamKind, ParamSpec, Tool, ToolArgs, ToolOutput};

/// List every interface with its IPv4 and MAC address.
pub struct ListNetworkDevices;

#[async_trait]
impl Tool for ListNetworkDevices {
    fn name(&self) -> &str {
        "list_network_devices"
    }

    fn description(&self) -> &str {
        "List all network interfaces on this machine with their IPv4 and MAC addresses."
    }

    async fn execute(&self, _args: ToolArgs) -> anyhow::Result<ToolOutput> {
        let devices = tokio::task::spawn_blocking(|| {
            let networks = Networks::new_with_refreshed_list();
            let mut devices = Map::new();
            for (name, data) in networks.list() {
                devices.insert(
                    name.clone(),
                    json!({
                        "ip": first_ipv4(data),
                        "mac": mac_address(data),
                    }),
                );
            }
            devices
        })
        .await?;

        tracing::debug!(count = devices.len(), "listed network interfaces");
        Ok(ToolOutput::Json(Value::Object(devices)))
    }
}

/// Addresses and link state for a single interface.
pub struct GetDeviceDetails;

#[async_trait]
impl Tool for GetDeviceDetails {
    fn name(&self) -> &str {
        "get_device_details"
    }

    fn description(&self) -> &str {
        "Details for a single network interface: addresses, whether it is up, link speed and MTU."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "interface",
            ParamKind::String,
            "Interface name as returned by list_network_devices, e.g. eth0",
        )]
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<ToolOutput> {
        let interface = args.str("interface")?.to_string();

        let details = tokio::task::spawn_blocking(move || {
            let networks = Networks::new_with_refreshed_list();
            networks
                .list()
                .get(&interface)
                .map(|data| {
                    let link = LinkStats::read(&interface);
                    json!({
                        "addresses": addresses(data),
                        "is_up": link.is_up,
                        "speed_mbps": link.speed_mbps,
                        "mtu": link.mtu,
                    })
                })
                .ok_or(interface)
        })
        .await?;

        match details {
            Ok(details) => Ok(ToolOutput::Json(details)),
            Err(interface) => Ok(ToolOutput::Text(format!(
                "Interface '{}' not found.",
                interface
            ))),
        }
    }
}

fn first_ipv4(data: &NetworkData) -> Option<String> {
    data.ip_networks()
        .iter()
        .find(|net| net.addr.is_ipv4())
        .map(|net| net.addr.to_string())
}

fn mac_address(data: &NetworkData) -> Option<String> {
    let mac = data.mac_address();
    (!mac.is_unspecified()).then(|| mac.to_string())
}

fn addresses(data: &NetworkData) -> Vec<Value> {
    let mut out: Vec<Value> = data
        .ip_networks()
        .iter()
        .map(|net| {
            json!({
                "family": family(&net.addr),
                "address": net.addr.to_string(),
                "prefix": net.prefix,
            })
        })
        .collect();
    if let Some(mac) = mac_address(data) {
        out.push(json!({ "family": "link", "address": mac }));
    }
    out
}

fn family(addr: &IpAddr) -> &'static str {
    match addr {
        IpAddr::V4(_) => "ipv4",
        IpAddr::V6(_) => "ipv6",
    }
}

/// Link state from `/sys/class/net`; fields stay `None` where the kernel
/// does not report them (virtual links, non-Linux hosts).
#[derive(Debug, Default, PartialEq, Eq)]
struct LinkStats {
    is_up: Option<bool>,
    speed_mbps: Option<u64>,
    mtu: Option<u32>,
}

impl LinkStats {
    fn read(interface: &str) -> Self {
        Self::read_from(&Path::new("/sys/class/net").join(interface))
    }

    fn read_from(dir: &Path) -> Self {
        let read = |file: &str| {
            std::fs::read_to_string(dir.join(file))
                .ok()
                .map(|s| s.trim().to_string())
        };

        Self {
            is_up: read("operstate").map(|state| state == "up" || state == "unknown"),
            // Virtual links report -1 or fail the read.
            speed_mbps: read("speed")
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(|s| u64::try_from(s).ok()),
            mtu: read("mtu").and_then(|s| s.parse().ok()),
        }
    }
}
