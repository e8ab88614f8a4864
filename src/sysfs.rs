use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::PathBuf;

use log::debug;
use rustix::fs::Dir;
use thiserror::Error;

pub const SYS_CLASS_NET: &str = "/sys/class/net";

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("no such device or attribute: {0}")]
    NotFound(String),
    #[error("attribute not valid for device: {0}")]
    InvalidAttribute(String),
    #[error("untranslatable value '{value}' in {path}")]
    Untranslatable { path: String, value: String },
    #[error("unable to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

// Read access to the kernel's per-interface attribute tree. Implemented for
// real hardware by SysClassNet and by an in-memory fake in tests.
pub trait DeviceReader {
    fn devices(&self) -> Result<Vec<String>, ReadError>;
    fn read(&self, dev: &str, attr: &str) -> Result<String, ReadError>;
    fn exists(&self, dev: &str, attr: &str) -> bool;
    fn present(&self, dev: &str) -> bool;
}

pub struct SysClassNet {
    base: PathBuf,
}

impl SysClassNet {
    pub fn new() -> Self {
        Self {
            base: PathBuf::from(SYS_CLASS_NET),
        }
    }

    pub fn with_base<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    fn dev_path(&self, dev: &str, attr: &str) -> PathBuf {
        let mut path = self.base.join(dev);
        if !attr.is_empty() {
            path = path.join(attr);
        }
        path
    }
}

impl Default for SysClassNet {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceReader for SysClassNet {
    fn devices(&self) -> Result<Vec<String>, ReadError> {
        let fd = match File::open(&self.base) {
            Ok(fd) => fd,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ReadError::NotFound(self.base.display().to_string()));
            }
            Err(e) => {
                return Err(ReadError::Io {
                    path: self.base.display().to_string(),
                    source: e,
                });
            }
        };
        let dir = Dir::read_from(&fd).map_err(|e| ReadError::Io {
            path: self.base.display().to_string(),
            source: e.into(),
        })?;
        let mut names = Vec::new();
        for entry_res in dir {
            let entry = entry_res.map_err(|e| ReadError::Io {
                path: self.base.display().to_string(),
                source: e.into(),
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "." || name == ".." {
                continue;
            }
            names.push(name);
        }
        Ok(names)
    }

    fn read(&self, dev: &str, attr: &str) -> Result<String, ReadError> {
        let path = self.dev_path(dev, attr);
        let path_str = path.display().to_string();
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(contents.trim().to_string()),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                Err(ReadError::NotFound(path_str))
            }
            // The kernel reports EINVAL for attributes that do not apply to
            // the device's current state, e.g. carrier on a downed link.
            Err(e) if e.kind() == ErrorKind::InvalidInput => {
                Err(ReadError::InvalidAttribute(path_str))
            }
            Err(e) => Err(ReadError::Io {
                path: path_str,
                source: e,
            }),
        }
    }

    fn exists(&self, dev: &str, attr: &str) -> bool {
        self.dev_path(dev, attr).exists()
    }

    fn present(&self, dev: &str) -> bool {
        self.dev_path(dev, "").exists()
    }
}

// Read an attribute, treating an absent device or inapplicable attribute as
// no value. Unexpected I/O failures still propagate.
pub fn read_opt(
    reader: &dyn DeviceReader,
    dev: &str,
    attr: &str,
) -> Result<Option<String>, ReadError> {
    match reader.read(dev, attr) {
        Ok(v) => Ok(Some(v)),
        Err(ReadError::NotFound(_)) | Err(ReadError::InvalidAttribute(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn read_translated<T: Clone>(
    reader: &dyn DeviceReader,
    dev: &str,
    attr: &str,
    table: &[(&str, T)],
) -> Result<Option<T>, ReadError> {
    let Some(raw) = read_opt(reader, dev, attr)? else {
        return Ok(None);
    };
    match table.iter().find(|(k, _)| *k == raw) {
        Some((_, v)) => Ok(Some(v.clone())),
        None => Err(ReadError::Untranslatable {
            path: format!("{}/{}", dev, attr),
            value: raw,
        }),
    }
}

pub fn read_translated_default<T: Clone>(
    reader: &dyn DeviceReader,
    dev: &str,
    attr: &str,
    table: &[(&str, T)],
    default: T,
) -> T {
    match read_translated(reader, dev, attr, table) {
        Ok(Some(v)) => v,
        Ok(None) => default,
        Err(e) => {
            debug!("{}", e);
            default
        }
    }
}

pub fn read_int(reader: &dyn DeviceReader, dev: &str, attr: &str) -> Result<Option<i64>, ReadError> {
    let Some(raw) = read_opt(reader, dev, attr)? else {
        return Ok(None);
    };
    Ok(raw.parse().ok())
}

// The kernel says to consider devices in 'unknown' operstate as up for the
// purposes of network configuration. See Documentation/networking/operstates.txt
// in the kernel source.
pub fn is_up(reader: &dyn DeviceReader, dev: &str) -> bool {
    let table = [("up", true), ("unknown", true), ("down", false)];
    read_translated_default(reader, dev, "operstate", &table, false)
}

pub fn is_wireless(reader: &dyn DeviceReader, dev: &str) -> bool {
    reader.exists(dev, "wireless")
}

pub fn is_bridge(reader: &dyn DeviceReader, dev: &str) -> bool {
    reader.exists(dev, "bridge")
}

pub fn is_physical(reader: &dyn DeviceReader, dev: &str) -> bool {
    reader.exists(dev, "device")
}

pub fn is_present(reader: &dyn DeviceReader, dev: &str) -> bool {
    reader.present(dev)
}

pub fn is_connected(reader: &dyn DeviceReader, dev: &str) -> Result<bool, ReadError> {
    // An iflink of 2 means physically connected and 3 means not connected,
    // but a wireless interface always shows 3. Base connectivity on carrier
    // for those.
    if let Some(iflink) = read_opt(reader, dev, "iflink")?
        && iflink == "2"
    {
        return Ok(true);
    }
    if !is_wireless(reader, dev) {
        return Ok(false);
    }
    debug!("{} is wireless, basing connected on carrier", dev);
    let table = [("0", false), ("1", true)];
    Ok(read_translated_default(reader, dev, "carrier", &table, false))
}

// addr_assign_type values: 0 permanent, 1 randomly generated, 2 stolen from
// another device, 3 set with dev_set_mac_address. A stolen address belongs
// to some other device, e.g. the first slave of a bond.
pub fn interface_has_own_mac(reader: &dyn DeviceReader, dev: &str) -> Result<bool, ReadError> {
    Ok(matches!(
        read_int(reader, dev, "addr_assign_type")?,
        Some(0 | 1 | 3)
    ))
}

pub fn interface_mac(reader: &dyn DeviceReader, dev: &str) -> Result<Option<String>, ReadError> {
    // A bond slave reports the address of the bond; its own permanent
    // hardware address lives under bonding_slave.
    let attr = if reader.exists(dev, "bonding_slave") {
        "bonding_slave/perm_hwaddr"
    } else {
        "address"
    };
    read_opt(reader, dev, attr)
}
