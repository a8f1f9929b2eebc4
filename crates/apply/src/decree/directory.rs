use std::path::PathBuf;

use fleet_domain::{Error, Result};

use super::Decree;
use crate::ownermode::{parse_mode, parse_owner, Owner};
use crate::policy::ModeValue;

pub struct DirectoryDecree {
    pub target: PathBuf,
    pub owner_spec: Option<String>,
    pub mode_spec: ModeValue,

    owner: Owner,
    mode: Option<u32>,
    needs_remove: bool,
    needs_create: bool,
    needs_chown: bool,
    needs_chmod: bool,
}

impl DirectoryDecree {
    pub fn new(target: PathBuf, owner_spec: Option<String>, mode_spec: ModeValue) -> Self {
        Self {
            target,
            owner_spec,
            mode_spec,
            owner: (None, None),
            mode: None,
            needs_remove: false,
            needs_create: false,
            needs_chown: false,
            needs_chmod: false,
        }
    }
}

impl Decree for DirectoryDecree {
    fn needs_update(&mut self) -> Result<bool> {
        self.owner = parse_owner(self.owner_spec.as_deref())?;
        self.mode = parse_mode(Some(&self.mode_spec))?;
        let (uid, gid) = self.owner;

        match std::fs::symlink_metadata(&self.target) {
            Ok(meta) => {
                if meta.file_type().is_dir() {
                    use std::os::unix::fs::{MetadataExt, PermissionsExt};
                    self.needs_chown =
                        uid.map(|u| meta.uid() != u).unwrap_or(false) || gid.map(|g| meta.gid() != g).unwrap_or(false);
                    self.needs_chmod = self.mode.map(|m| meta.permissions().mode() & 0o7777 != m).unwrap_or(false);
                } else {
                    self.needs_remove = true;
                    self.needs_create = true;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.needs_create = true;
            }
            Err(e) => return Err(e.into()),
        }

        if self.needs_create {
            self.needs_chown = uid.is_some() || gid.is_some();
            self.needs_chmod = self.mode.is_some();
        }

        Ok(self.needs_create || self.needs_chown || self.needs_chmod)
    }

    fn update(&mut self, _dry_run: bool) -> Result<()> {
        if self.needs_remove {
            std::fs::remove_file(&self.target)?;
        }

        if self.needs_create {
            if self.needs_chmod {
                std::fs::create_dir(&self.target)?;
                std::fs::set_permissions(&self.target, std::fs::Permissions::from_mode(0o700))?;
            } else {
                std::fs::create_dir(&self.target)?;
            }
        }

        if self.needs_chown {
            let (uid, gid) = self.owner;
            lchown(&self.target, uid.map(|u| u as i64).unwrap_or(-1), gid.map(|g| g as i64).unwrap_or(-1))?;
        }

        if self.needs_chmod {
            let mode = self.mode.expect("checked above");
            lchmod(&self.target, mode)?;
        }

        Ok(())
    }
}

use std::os::unix::fs::PermissionsExt;

fn lchown(path: &std::path::Path, uid: i64, gid: i64) -> Result<()> {
    let cpath = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|e| Error::Decree(e.to_string()))?;
    let rc = unsafe { libc::lchown(cpath.as_ptr(), uid as libc::uid_t, gid as libc::gid_t) };
    if rc != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

fn lchmod(path: &std::path::Path, mode: u32) -> Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::default_dir_mode;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_directory() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("sub");
        let mut decree = DirectoryDecree::new(target.clone(), None, default_dir_mode());
        assert!(decree.needs_update().unwrap());
        decree.update(false).unwrap();
        assert!(target.is_dir());
        assert!(!decree.needs_update().unwrap());
    }
}
