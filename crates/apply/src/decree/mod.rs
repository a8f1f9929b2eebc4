//! The decree library: concrete kinds implementing the shared `Decree`
//! trait that `tree.rs` drives through detect/update/activate.

pub mod delete;
pub mod directory;
pub mod file;
pub mod packages;
pub mod permissions;
pub mod run;
pub mod service;
pub mod symlink;

use fleet_domain::{Result, Value};
use fleet_repository::Repo;

/// One kind-specific unit of desired state. `needs_update` also runs
/// detection and stashes whatever `update`/`activate` need (a planned
/// action), since the phases share a live filesystem snapshot.
pub trait Decree: Send {
    fn provision(&mut self, repo: &mut dyn Repo) -> Result<()> {
        let _ = repo;
        Ok(())
    }

    fn needs_update(&mut self) -> Result<bool>;

    fn update(&mut self, dry_run: bool) -> Result<()>;

    fn activate(&mut self, dry_run: bool) -> Result<()> {
        let _ = dry_run;
        Ok(())
    }

    fn update_detail(&self) -> Value {
        Value::Bool(true)
    }

    fn activate_detail(&self) -> Value {
        Value::Bool(true)
    }
}
