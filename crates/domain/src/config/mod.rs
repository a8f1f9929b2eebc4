mod agent;
mod server;

pub use agent::AgentConfig;
pub use server::{ConfigSeverity, ControllerConfig, Issue, TlsConfig};

use std::path::Path;

use crate::Result;

pub fn load_controller_config(path: &Path) -> Result<ControllerConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}

pub fn load_agent_config(path: &Path) -> Result<AgentConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}
