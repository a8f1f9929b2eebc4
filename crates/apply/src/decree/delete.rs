use std::path::PathBuf;

use fleet_domain::Result;

use super::Decree;

pub struct DeleteDecree {
    pub target: PathBuf,
    pub force: bool,
}

impl DeleteDecree {
    pub fn new(target: PathBuf, force: bool) -> Self {
        Self { target, force }
    }
}

impl Decree for DeleteDecree {
    fn needs_update(&mut self) -> Result<bool> {
        Ok(self.target.symlink_metadata().is_ok())
    }

    fn update(&mut self, _dry_run: bool) -> Result<()> {
        match std::fs::remove_file(&self.target) {
            Ok(()) => Ok(()),
            Err(_) => match std::fs::remove_dir(&self.target) {
                Ok(()) => Ok(()),
                Err(e) if e.raw_os_error() == Some(libc::ENOTEMPTY) && self.force => {
                    std::fs::remove_dir_all(&self.target)?;
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn removes_existing_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("gone");
        std::fs::write(&target, b"x").unwrap();
        let mut decree = DeleteDecree::new(target.clone(), false);
        assert!(decree.needs_update().unwrap());
        decree.update(false).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn missing_target_needs_no_update() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("never-existed");
        let mut decree = DeleteDecree::new(target, false);
        assert!(!decree.needs_update().unwrap());
    }

    #[test]
    fn force_removes_nonempty_directory() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("sub");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("child"), b"x").unwrap();
        let mut decree = DeleteDecree::new(target.clone(), true);
        assert!(decree.needs_update().unwrap());
        decree.update(false).unwrap();
        assert!(!target.exists());
    }
}
