pub mod config;
pub mod fallback;
pub mod inventory;
pub mod logger;
pub mod netlink;
pub mod rename;
pub mod sysfs;
