use std::path::PathBuf;

use fleet_domain::{Error, Result};

use super::Decree;
use crate::ownermode::{parse_owner, Owner};

pub struct SymlinkDecree {
    pub target: PathBuf,
    pub contents: String,
    pub owner_spec: Option<String>,
    pub force: bool,

    owner: Owner,
    needs_remove: bool,
    needs_create: bool,
    needs_chown: bool,
}

impl SymlinkDecree {
    pub fn new(target: PathBuf, contents: String, owner_spec: Option<String>, force: bool) -> Self {
        Self {
            target,
            contents,
            owner_spec,
            force,
            owner: (None, None),
            needs_remove: false,
            needs_create: false,
            needs_chown: false,
        }
    }
}

impl Decree for SymlinkDecree {
    fn needs_update(&mut self) -> Result<bool> {
        self.owner = parse_owner(self.owner_spec.as_deref())?;
        let (uid, gid) = self.owner;

        match std::fs::symlink_metadata(&self.target) {
            Ok(meta) => {
                if meta.file_type().is_symlink() && std::fs::read_link(&self.target)?.to_string_lossy() == self.contents {
                    use std::os::unix::fs::MetadataExt;
                    self.needs_chown =
                        uid.map(|u| meta.uid() != u).unwrap_or(false) || gid.map(|g| meta.gid() != g).unwrap_or(false);
                } else {
                    self.needs_remove = true;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.needs_create = true;
            }
            Err(e) => return Err(e.into()),
        }

        if self.needs_remove {
            self.needs_create = true;
        }
        if self.needs_create {
            self.needs_chown = uid.is_some() || gid.is_some();
        }

        Ok(self.needs_remove || self.needs_create || self.needs_chown)
    }

    fn update(&mut self, _dry_run: bool) -> Result<()> {
        if self.needs_remove {
            match std::fs::remove_file(&self.target) {
                Ok(()) => {}
                Err(_) => match std::fs::remove_dir(&self.target) {
                    Ok(()) => {}
                    Err(e) if e.raw_os_error() == Some(libc::ENOTEMPTY) && self.force => {
                        std::fs::remove_dir_all(&self.target)?;
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }

        if self.needs_create {
            std::os::unix::fs::symlink(&self.contents, &self.target)?;
        }

        if self.needs_chown {
            let (uid, gid) = self.owner;
            lchown(&self.target, uid.map(|u| u as i64).unwrap_or(-1), gid.map(|g| g as i64).unwrap_or(-1))?;
        }

        Ok(())
    }
}

fn lchown(path: &std::path::Path, uid: i64, gid: i64) -> Result<()> {
    let cpath = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|e| Error::Decree(e.to_string()))?;
    let rc = unsafe { libc::lchown(cpath.as_ptr(), uid as libc::uid_t, gid as libc::gid_t) };
    if rc != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_symlink() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("link");
        let mut decree = SymlinkDecree::new(target.clone(), "/etc/hosts".into(), None, false);
        assert!(decree.needs_update().unwrap());
        decree.update(false).unwrap();
        assert_eq!(std::fs::read_link(&target).unwrap().to_string_lossy(), "/etc/hosts");
        assert!(!decree.needs_update().unwrap());
    }

    #[test]
    fn replaces_wrong_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("link");
        std::os::unix::fs::symlink("/old", &target).unwrap();
        let mut decree = SymlinkDecree::new(target.clone(), "/new".into(), None, false);
        assert!(decree.needs_update().unwrap());
        decree.update(false).unwrap();
        assert_eq!(std::fs::read_link(&target).unwrap().to_string_lossy(), "/new");
    }
}
