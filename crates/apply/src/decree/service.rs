use std::process::{Command, Stdio};

use fleet_domain::{Error, Result, Value};

use super::Decree;

pub struct ServiceDecree {
    pub unit: String,
    pub reload: bool,
    pub restart: bool,
    pub enable: Option<bool>,
    pub active: Option<bool>,
    pub mask: Option<bool>,

    change_enable: Option<bool>,
    change_active: Option<bool>,
    change_mask: Option<bool>,
    was_active: bool,
}

impl ServiceDecree {
    pub fn new(unit: String, reload: bool, restart: bool, enable: Option<bool>, active: Option<bool>, mask: Option<bool>) -> Result<Self> {
        if mask == Some(true) && (enable == Some(true) || active == Some(true)) {
            return Err(Error::Decree(format!("{unit}: masked units can't be enabled or activated")));
        }
        if active == Some(false) && (reload || restart) {
            return Err(Error::Decree(format!("{unit}: deactivated units can't be reloaded or restarted")));
        }
        Ok(Self {
            unit,
            reload,
            restart,
            enable,
            active,
            mask,
            change_enable: None,
            change_active: None,
            change_mask: None,
            was_active: false,
        })
    }

    fn is_enabled(&self) -> Result<String> {
        let output = Command::new("systemctl")
            .args(["is-enabled", &self.unit])
            .stdin(Stdio::null())
            .output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() && !output.status.success() {
            if output.status.code() == Some(1) {
                return Ok(String::new());
            }
            return Err(Error::Decree(format!(
                "systemctl is-enabled {} failed: {}",
                self.unit,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(stdout)
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        let status = Command::new("systemctl").args(args).stdin(Stdio::null()).status()?;
        if !status.success() {
            return Err(Error::Decree(format!("systemctl {} failed", args.join(" "))));
        }
        Ok(())
    }
}

impl Decree for ServiceDecree {
    fn needs_update(&mut self) -> Result<bool> {
        if self.enable.is_some() || self.mask.is_some() {
            let enabled = self.is_enabled()?;
            let bool_mask = self.mask.unwrap_or(false);
            if self.mask.is_some() && (enabled == "masked") != bool_mask {
                self.change_mask = Some(bool_mask);
            }
            let bool_enable = self.enable.unwrap_or(false);
            if self.enable.is_some() && (enabled == "masked" || (enabled == "enabled") != bool_enable) {
                self.change_enable = Some(bool_enable);
            }
        }

        if let Some(active) = self.active {
            let status = Command::new("systemctl")
                .args(["is-active", "--quiet", &self.unit])
                .stdin(Stdio::null())
                .status()?;
            match status.code() {
                Some(0) => {
                    self.was_active = true;
                    if !active {
                        self.change_active = Some(false);
                    }
                }
                Some(3) => {
                    if active {
                        self.change_active = Some(true);
                    }
                }
                other => {
                    return Err(Error::Decree(format!(
                        "systemctl is-active {} returned unexpected status {other:?}",
                        self.unit
                    )))
                }
            }
        }

        Ok(self.change_enable.is_some() || self.change_active.is_some() || self.change_mask.is_some())
    }

    fn update(&mut self, _dry_run: bool) -> Result<()> {
        if let Some(change_mask) = self.change_mask {
            self.run(&[if change_mask { "mask" } else { "unmask" }, &self.unit])?;

            // It turned out to be enabled already, after unmasking.
            if !change_mask && self.change_enable == Some(true) && self.is_enabled()? == "enabled" {
                self.change_enable = None;
            }
        }

        if self.change_enable.is_some() || self.change_active.is_some() {
            let mut args: Vec<String> = Vec::new();
            if let Some(change_enable) = self.change_enable {
                if change_enable {
                    args.push("enable".to_string());
                    if self.change_active == Some(true) {
                        args.push("--now".to_string());
                    }
                } else {
                    args.push("disable".to_string());
                    if self.change_active == Some(false) {
                        args.push("--now".to_string());
                    }
                }
            } else if let Some(change_active) = self.change_active {
                args.push(if change_active { "start" } else { "stop" }.to_string());
            }
            args.push(self.unit.clone());
            let refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
            self.run(&refs)?;
        }

        Ok(())
    }

    fn activate(&mut self, _dry_run: bool) -> Result<()> {
        if !self.reload && !self.restart {
            return Ok(());
        }
        if self.change_active.is_some() {
            return Ok(());
        }
        if !self.was_active {
            return Ok(());
        }
        let verb = if self.reload {
            if self.restart {
                "try-reload-or-restart"
            } else {
                "reload"
            }
        } else {
            "try-restart"
        };
        self.run(&[verb, &self.unit])
    }

    fn update_detail(&self) -> Value {
        Value::Bool(true)
    }
}
