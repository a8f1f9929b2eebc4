//! Names of the fact keys published by the default collector. Collection
//! itself lives in `fleet-agent`; this crate only names the contract so the
//! controller and agent agree on key spelling.

pub const HOSTNAME: &str = "hostname";
pub const FQDN: &str = "fqdn";
pub const PRIMARY_ADDRESS: &str = "primary_address";
pub const INTERFACES: &str = "interfaces";
pub const PLATFORM: &str = "platform";
pub const UNAME: &str = "uname";
pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";
pub const SYS_VENDOR: &str = "sys_vendor";
pub const QEMU: &str = "qemu";
