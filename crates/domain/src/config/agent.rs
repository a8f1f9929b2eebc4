use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{ConfigSeverity, Issue};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "d_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "d_server")]
    pub server: String,
    #[serde(default = "d_cafile")]
    pub cafile: PathBuf,
    #[serde(default = "d_certfile")]
    pub certfile: PathBuf,
    #[serde(default = "d_keyfile")]
    pub keyfile: PathBuf,
    #[serde(default = "d_max_connect_interval")]
    pub max_connect_interval: u64,
    #[serde(default = "d_max_pretenses_interval")]
    pub max_pretenses_interval: u64,
    #[serde(default = "d_dry_run")]
    pub dry_run: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_dir: d_base_dir(),
            server: d_server(),
            cafile: d_cafile(),
            certfile: d_certfile(),
            keyfile: d_keyfile(),
            max_connect_interval: d_max_connect_interval(),
            max_pretenses_interval: d_max_pretenses_interval(),
            dry_run: d_dry_run(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Vec<Issue> {
        let mut issues = Vec::new();
        for (label, path) in [
            ("cafile", &self.cafile),
            ("certfile", &self.certfile),
            ("keyfile", &self.keyfile),
        ] {
            if !path.exists() {
                issues.push(Issue {
                    severity: ConfigSeverity::Error,
                    message: format!("{label} not found: {}", path.display()),
                });
            }
        }
        if self.max_connect_interval == 0 {
            issues.push(Issue {
                severity: ConfigSeverity::Warning,
                message: "max_connect_interval is 0; reconnects will busy-loop".into(),
            });
        }
        issues
    }
}

fn d_base_dir() -> PathBuf {
    PathBuf::from("/etc/fleet-agent")
}
fn d_server() -> String {
    "https://localhost".into()
}
fn d_cafile() -> PathBuf {
    PathBuf::from("/etc/fleet-agent/server.crt")
}
fn d_certfile() -> PathBuf {
    PathBuf::from("/etc/fleet-agent/client.crt")
}
fn d_keyfile() -> PathBuf {
    PathBuf::from("/etc/fleet-agent/client.key")
}
fn d_max_connect_interval() -> u64 {
    60
}
fn d_max_pretenses_interval() -> u64 {
    60
}
fn d_dry_run() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_default_to_sixty() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.max_connect_interval, 60);
        assert_eq!(cfg.max_pretenses_interval, 60);
    }

    #[test]
    fn dry_run_defaults_true() {
        assert!(AgentConfig::default().dry_run);
    }
}
