use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

// The subset of the operator network-configuration document this tool cares
// about. Unknown fields and entry types pass through deserialization and are
// ignored by the renamer.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct NetworkConfig {
    pub version: u32,
    pub config: Vec<ConfigEntry>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ConfigEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnets: Option<Vec<Subnet>>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Subnet {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenameRequest {
    pub mac: String,
    pub name: String,
}

impl NetworkConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let contents = fs::read_to_string(p)
            .map_err(|e| anyhow!("unable to read {}: {}", p.display(), e))?;
        serde_yaml2::from_str(&contents)
            .map_err(|e| anyhow!("unable to parse {}: {}", p.display(), e))
    }

    // A single-entry configuration running dhcp on one interface, as
    // produced by fallback generation.
    pub fn dhcp_on(name: &str, mac: &str) -> Self {
        Self {
            version: CONFIG_VERSION,
            config: vec![ConfigEntry {
                kind: "physical".to_string(),
                name: Some(name.to_string()),
                mac_address: Some(mac.to_string()),
                subnets: Some(vec![Subnet {
                    kind: "dhcp".to_string(),
                }]),
            }],
        }
    }
}

// Renames are only attempted for entries of type physical that carry a mac
// address; the network stack is expected to create other device kinds under
// their configured names itself.
pub fn rename_requests(cfg: &NetworkConfig) -> Vec<RenameRequest> {
    cfg.config
        .iter()
        .filter(|ent| ent.kind == "physical")
        .filter_map(|ent| match (&ent.mac_address, &ent.name) {
            (Some(mac), Some(name)) if !mac.is_empty() && !name.is_empty() => {
                Some(RenameRequest {
                    mac: mac.clone(),
                    name: name.clone(),
                })
            }
            _ => None,
        })
        .collect()
}
