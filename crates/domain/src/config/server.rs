use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Controller config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "d_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "d_port")]
    pub port: u16,
    /// uids or usernames permitted on the admin socket. Defaults to
    /// the controller process's own uid at load time (see `Default`).
    #[serde(default)]
    pub admin_users: Vec<String>,
    #[serde(default)]
    pub control_socket_path: Option<PathBuf>,
    #[serde(default)]
    pub repository_root: Option<PathBuf>,
    #[serde(default)]
    pub tls: TlsConfig,
    /// User to drop privileges to after binding the listening sockets.
    #[serde(default)]
    pub user: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            base_dir: d_base_dir(),
            port: d_port(),
            admin_users: Vec::new(),
            control_socket_path: None,
            repository_root: None,
            tls: TlsConfig::default(),
            user: None,
        }
    }
}

impl ControllerConfig {
    pub fn control_socket_path(&self) -> PathBuf {
        self.control_socket_path
            .clone()
            .unwrap_or_else(|| self.base_dir.join("control"))
    }

    pub fn repository_root(&self) -> PathBuf {
        self.repository_root.clone().unwrap_or_else(|| self.base_dir.clone())
    }

    pub fn validate(&self) -> Vec<Issue> {
        let mut issues = Vec::new();
        if self.port == 0 {
            issues.push(Issue {
                severity: ConfigSeverity::Error,
                message: "server.port must be nonzero".into(),
            });
        }
        if !self.tls.cert.exists() {
            issues.push(Issue {
                severity: ConfigSeverity::Error,
                message: format!("tls.cert not found: {}", self.tls.cert.display()),
            });
        }
        if !self.tls.key.exists() {
            issues.push(Issue {
                severity: ConfigSeverity::Error,
                message: format!("tls.key not found: {}", self.tls.key.display()),
            });
        }
        if !self.tls.ca.exists() {
            issues.push(Issue {
                severity: ConfigSeverity::Error,
                message: format!("tls.ca not found: {}", self.tls.ca.display()),
            });
        }
        issues
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "d_server_cert")]
    pub cert: PathBuf,
    #[serde(default = "d_server_key")]
    pub key: PathBuf,
    /// CA used to verify client (agent) certificates.
    #[serde(default = "d_ca")]
    pub ca: PathBuf,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert: d_server_cert(),
            key: d_server_key(),
            ca: d_ca(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: ConfigSeverity,
    pub message: String,
}

fn d_base_dir() -> PathBuf {
    PathBuf::from("/etc/fleetd")
}
fn d_port() -> u16 {
    443
}
fn d_server_cert() -> PathBuf {
    PathBuf::from("/etc/fleetd/server.crt")
}
fn d_server_key() -> PathBuf {
    PathBuf::from("/etc/fleetd/server.key")
}
fn d_ca() -> PathBuf {
    PathBuf::from("/etc/fleetd/pki/ca/certificate")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_443() {
        assert_eq!(ControllerConfig::default().port, 443);
    }

    #[test]
    fn control_socket_defaults_under_base_dir() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.control_socket_path(), cfg.base_dir.join("control"));
    }
}
