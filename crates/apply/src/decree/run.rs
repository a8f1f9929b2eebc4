use std::process::Command;

use fleet_domain::{Error, Result};

use super::Decree;
use crate::policy::RunCommand;

/// `Run` never reports `updated`: its only phase is activation, gated by
/// the common `activate_if` predicate like every other decree.
pub struct RunDecree {
    pub name: String,
    pub command: RunCommand,
}

impl RunDecree {
    pub fn new(name: String, command: RunCommand) -> Self {
        Self { name, command }
    }
}

impl Decree for RunDecree {
    fn needs_update(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn update(&mut self, _dry_run: bool) -> Result<()> {
        Ok(())
    }

    fn activate(&mut self, _dry_run: bool) -> Result<()> {
        let status = match &self.command {
            RunCommand::Shell(script) => Command::new("/bin/sh").args(["-ec", script, &self.name]).status()?,
            RunCommand::Argv(argv) => {
                let Some((program, rest)) = argv.split_first() else {
                    return Err(Error::Decree(format!("{}: empty command", self.name)));
                };
                Command::new(program).args(rest).status()?
            }
        };
        if !status.success() {
            return Err(Error::Decree(format!("{}: command exited with {:?}", self.name, status.code())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_shell_command_activates() {
        let mut decree = RunDecree::new("ok".into(), RunCommand::Shell("true".into()));
        assert!(!decree.needs_update().unwrap());
        assert!(decree.activate(false).is_ok());
    }

    #[test]
    fn failing_command_errors() {
        let mut decree = RunDecree::new("bad".into(), RunCommand::Shell("false".into()));
        assert!(decree.activate(false).is_err());
    }
}
