use std::path::PathBuf;

use fleet_domain::{Error, Result};

use super::Decree;
use crate::ownermode::{parse_mode, parse_owner, Owner};
use crate::policy::ModeValue;

pub struct PermissionsDecree {
    pub target: PathBuf,
    pub owner_spec: Option<String>,
    pub mode_spec: Option<ModeValue>,
    pub missing_ok: bool,

    owner: Owner,
    mode: Option<u32>,
    needs_chown: bool,
    needs_chmod: bool,
}

impl PermissionsDecree {
    pub fn new(target: PathBuf, owner_spec: Option<String>, mode_spec: Option<ModeValue>, missing_ok: bool) -> Self {
        Self {
            target,
            owner_spec,
            mode_spec,
            missing_ok,
            owner: (None, None),
            mode: None,
            needs_chown: false,
            needs_chmod: false,
        }
    }
}

impl Decree for PermissionsDecree {
    fn needs_update(&mut self) -> Result<bool> {
        self.owner = parse_owner(self.owner_spec.as_deref())?;
        self.mode = parse_mode(self.mode_spec.as_ref())?;
        let (uid, gid) = self.owner;

        match std::fs::symlink_metadata(&self.target) {
            Ok(meta) => {
                use std::os::unix::fs::{MetadataExt, PermissionsExt};
                self.needs_chown =
                    uid.map(|u| meta.uid() != u).unwrap_or(false) || gid.map(|g| meta.gid() != g).unwrap_or(false);
                self.needs_chmod = self.mode.map(|m| meta.permissions().mode() & 0o7777 != m).unwrap_or(false);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !self.missing_ok {
                    return Err(e.into());
                }
            }
            Err(e) => return Err(e.into()),
        }

        Ok(self.needs_chown || self.needs_chmod)
    }

    fn update(&mut self, _dry_run: bool) -> Result<()> {
        if self.needs_chown {
            let (uid, gid) = self.owner;
            let cpath = std::ffi::CString::new(self.target.as_os_str().as_encoded_bytes())
                .map_err(|e| Error::Decree(e.to_string()))?;
            let rc = unsafe {
                libc::lchown(
                    cpath.as_ptr(),
                    uid.map(|u| u as libc::uid_t).unwrap_or(libc::uid_t::MAX),
                    gid.map(|g| g as libc::gid_t).unwrap_or(libc::gid_t::MAX),
                )
            };
            if rc != 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
        }
        if self.needs_chmod {
            let mode = self.mode.expect("checked in needs_update");
            std::fs::set_permissions(&self.target, std::os::unix::fs::PermissionsExt::from_mode(mode))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_target_fails_unless_missing_ok() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nope");
        let mut decree = PermissionsDecree::new(target.clone(), None, None, false);
        assert!(decree.needs_update().is_err());

        let mut decree = PermissionsDecree::new(target, None, None, true);
        assert!(!decree.needs_update().unwrap());
    }
}
