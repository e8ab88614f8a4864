use anyhow::Result;
use log::debug;

use crate::config::NetworkConfig;
use crate::sysfs::{self, DeviceReader};

pub const DEFAULT_PRIMARY_INTERFACE: &str = "eth0";

// Determine which attached device is most likely to have a connection and
// produce a configuration running dhcp on it. Used only when no operator
// configuration exists. A None result means no usable interface was found
// and the caller should proceed without automatic network bring-up.
pub fn generate_fallback_config(reader: &dyn DeviceReader) -> Result<Option<NetworkConfig>> {
    let mut connected = Vec::new();
    let mut possibly_connected = Vec::new();
    for name in reader.devices()? {
        if name == "lo" || name.starts_with("veth") {
            continue;
        }
        if sysfs::is_bridge(reader, &name) {
            continue;
        }
        if sysfs::read_int(reader, &name, "carrier")?.is_some_and(|c| c != 0) {
            connected.push(name);
            continue;
        }
        // A nic that is dormant or down may appear to have no carrier yet
        // acquire one once brought online by dhcp.
        if sysfs::read_int(reader, &name, "dormant")?.is_some_and(|d| d != 0) {
            possibly_connected.push(name);
            continue;
        }
        if let Some(operstate) = sysfs::read_opt(reader, &name, "operstate")?
            && matches!(
                operstate.as_str(),
                "dormant" | "down" | "lowerlayerdown" | "unknown"
            )
        {
            possibly_connected.push(name);
        }
    }

    // Don't bother with interfaces that might not be connected if there are
    // some that definitely are.
    let mut names = if !connected.is_empty() {
        connected
    } else {
        possibly_connected
    };

    // Take the first readable interface in sorted order, except that eth0
    // wins over anything else when present.
    names.sort();
    if let Some(pos) = names.iter().position(|n| n == DEFAULT_PRIMARY_INTERFACE) {
        let name = names.remove(pos);
        names.insert(0, name);
    }

    for name in names {
        if let Some(mac) = sysfs::read_opt(reader, &name, "address")?
            && !mac.is_empty()
        {
            return Ok(Some(NetworkConfig::dhcp_on(&name, &mac)));
        }
    }
    debug!("no usable interface for a fallback configuration");
    Ok(None)
}
