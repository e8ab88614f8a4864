use std::collections::HashMap;

use anyhow::{Result, anyhow};

use crate::sysfs::{self, DeviceReader, ReadError};

// ARPHRD_INFINIBAND from linux/if_arp.h, as reported by the type attribute.
const TYPE_INFINIBAND: &str = "32";

// Length of a 20-octet Infiniband hardware address in colon-hex form.
const IB_ADDR_LEN: usize = 59;

// Build a map of mac address to interface name. Bridges and any device with
// a stolen mac (e.g. a bond or vlan inheriting it from a member) are
// excluded. Two eligible devices sharing a mac is a kernel-state
// inconsistency this tool has no way to resolve, so it is fatal.
pub fn interfaces_by_mac(reader: &dyn DeviceReader) -> Result<HashMap<String, String>> {
    let mut by_mac = HashMap::new();
    for name in devices_or_empty(reader)? {
        if !sysfs::interface_has_own_mac(reader, &name)? {
            continue;
        }
        if sysfs::is_bridge(reader, &name) {
            continue;
        }
        // Some devices have no mac at all, e.g. tun devices.
        if let Some(mac) = sysfs::interface_mac(reader, &name)? {
            insert_unique(&mut by_mac, mac, &name)?;
        }
        // An Infiniband device additionally answers to the 6-byte
        // Ethernet-format form of its hardware address.
        if let Some(ib_mac) = ib_hwaddr(reader, &name, true)? {
            insert_unique(&mut by_mac, ib_mac, &name)?;
        }
    }
    Ok(by_mac)
}

// Build a map of Infiniband interface name to native hardware address.
pub fn ib_hwaddrs_by_interface(reader: &dyn DeviceReader) -> Result<HashMap<String, String>> {
    let mut by_name = HashMap::new();
    let mut seen: HashMap<String, String> = HashMap::new();
    for name in devices_or_empty(reader)? {
        if !sysfs::interface_has_own_mac(reader, &name)? {
            continue;
        }
        if sysfs::is_bridge(reader, &name) {
            continue;
        }
        if let Some(addr) = ib_hwaddr(reader, &name, false)? {
            if let Some(other) = seen.get(&addr) {
                return Err(anyhow!(
                    "duplicate hardware address: both '{}' and '{}' have '{}'",
                    name,
                    other,
                    addr
                ));
            }
            seen.insert(addr.clone(), name.clone());
            by_name.insert(name, addr);
        }
    }
    Ok(by_name)
}

// Return the hardware address of an Infiniband interface, or None for any
// other kind of device. With ethernet_format, the address is reduced to its
// Ethernet-compatible 6-byte form.
pub fn ib_hwaddr(
    reader: &dyn DeviceReader,
    name: &str,
    ethernet_format: bool,
) -> Result<Option<String>, ReadError> {
    if sysfs::read_opt(reader, name, "type")?.as_deref() != Some(TYPE_INFINIBAND) {
        return Ok(None);
    }
    let Some(mac) = sysfs::interface_mac(reader, name)? else {
        return Ok(None);
    };
    if !ethernet_format {
        return Ok(Some(mac));
    }
    Ok(ib_mac_to_ethernet(&mac))
}

// Derive the Ethernet-compatible form of an Infiniband hardware address by
// taking bytes 13-15 and 18-20 of the colon-hex representation. The offsets
// are fixed; anything that is not a full 20-octet address yields nothing.
fn ib_mac_to_ethernet(mac: &str) -> Option<String> {
    if mac.len() != IB_ADDR_LEN || !mac.is_ascii() {
        return None;
    }
    Some(format!("{}{}", &mac[36..IB_ADDR_LEN - 14], &mac[51..]))
}

fn devices_or_empty(reader: &dyn DeviceReader) -> Result<Vec<String>> {
    match reader.devices() {
        Ok(devs) => Ok(devs),
        // No device class tree at all means no devices.
        Err(ReadError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn insert_unique(by_mac: &mut HashMap<String, String>, mac: String, name: &str) -> Result<()> {
    if let Some(existing) = by_mac.get(&mac) {
        return Err(anyhow!(
            "duplicate mac found: both '{}' and '{}' have mac '{}'",
            name,
            existing,
            mac
        ));
    }
    by_mac.insert(mac, name.to_string());
    Ok(())
}
