//! `File` and `RecursiveFiles`: the two source-backed file decrees. They
//! share detection/update machinery via `FileAction`.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use fleet_domain::{Error, Result, Value};
use fleet_repository::Repo;

use super::Decree;
use crate::ownermode::{parse_mode, parse_owner, Owner};
use crate::policy::ModeValue;

/// The minimal set of syscalls needed to bring one file to its desired
/// state, computed once during detection and replayed during update.
#[derive(Debug, Default, Clone)]
pub struct FileAction {
    pub target: PathBuf,
    pub create: bool,
    pub chown: Option<(i64, i64)>,
    pub chmod: Option<u32>,
    pub contents: Option<Vec<u8>>,
}

impl FileAction {
    pub fn is_noop(&self) -> bool {
        !self.create && self.chown.is_none() && self.chmod.is_none() && self.contents.is_none()
    }

    fn run(&self, makedirs: bool) -> Result<()> {
        if makedirs {
            if let Some(parent) = self.target.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let open_mode = if self.chmod.is_some() { 0o600 } else { 0o666 };
        let mut opts = OpenOptions::new();
        opts.create(true).write(true).mode(open_mode);
        if self.contents.is_some() {
            opts.truncate(true);
        }
        let file = opts.open(&self.target)?;

        if let Some(contents) = &self.contents {
            (&file).write_all(contents)?;
            file.set_len(contents.len() as u64)?;
        }

        if let Some((uid, gid)) = self.chown {
            let rc = unsafe { libc::fchown(file.as_raw_fd(), uid as libc::uid_t, gid as libc::gid_t) };
            if rc != 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
        }
        if let Some(mode) = self.chmod {
            let rc = unsafe { libc::fchmod(file.as_raw_fd(), mode as libc::mode_t) };
            if rc != 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
        }
        Ok(())
    }
}

fn check_file(target: &Path, owner: Owner, mode: Option<u32>, new_contents: &[u8]) -> Result<FileAction> {
    let (uid, gid) = owner;
    let mut action = FileAction {
        target: target.to_path_buf(),
        ..Default::default()
    };

    match std::fs::read(target) {
        Ok(old_contents) => {
            let st = std::fs::metadata(target)?;
            let needs_chown = uid.map(|u| st_uid(&st) != u).unwrap_or(false)
                || gid.map(|g| st_gid(&st) != g).unwrap_or(false);
            let needs_chmod = mode.map(|m| perm_bits(&st) != m).unwrap_or(false);
            let needs_contents = old_contents != new_contents;
            action.create = false;
            if needs_chown {
                action.chown = Some((uid.map(|u| u as i64).unwrap_or(-1), gid.map(|g| g as i64).unwrap_or(-1)));
            }
            if needs_chmod {
                action.chmod = mode;
            }
            if needs_contents {
                action.contents = Some(new_contents.to_vec());
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            action.create = true;
            if uid.is_some() || gid.is_some() {
                action.chown = Some((uid.map(|u| u as i64).unwrap_or(-1), gid.map(|g| g as i64).unwrap_or(-1)));
            }
            if mode.is_some() {
                action.chmod = mode;
            }
            action.contents = Some(new_contents.to_vec());
        }
        Err(e) => return Err(e.into()),
    }

    Ok(action)
}

fn st_uid(st: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    st.uid()
}

fn st_gid(st: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    st.gid()
}

fn perm_bits(st: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    st.permissions().mode() & 0o7777
}

/// A summary of what would change, without a full unified diff (no diff
/// crate is carried in this stack): byte counts for text, a label for
/// binary-looking content.
fn describe_contents(old: Option<&[u8]>, new: &[u8]) -> String {
    let is_binary = |b: &[u8]| b.iter().any(|&c| c == 0);
    match old {
        None => format!("create ({} bytes{})", new.len(), if is_binary(new) { ", binary" } else { "" }),
        Some(old) => format!(
            "{} bytes -> {} bytes{}",
            old.len(),
            new.len(),
            if is_binary(old) || is_binary(new) { ", binary" } else { "" }
        ),
    }
}

pub struct FileDecree {
    pub target: PathBuf,
    pub contents: Option<Vec<u8>>,
    pub source: Option<String>,
    pub owner_spec: Option<String>,
    pub mode_spec: ModeValue,
    pub makedirs: bool,

    provisioned_contents: Option<Vec<u8>>,
    action: Option<FileAction>,
    detail: String,
}

impl FileDecree {
    pub fn new(
        target: PathBuf,
        contents: Option<Vec<u8>>,
        source: Option<String>,
        owner_spec: Option<String>,
        mode_spec: ModeValue,
        makedirs: bool,
    ) -> Self {
        Self {
            target,
            contents,
            source,
            owner_spec,
            mode_spec,
            makedirs,
            provisioned_contents: None,
            action: None,
            detail: String::new(),
        }
    }

    fn computed_contents(&self) -> Vec<u8> {
        self.contents
            .clone()
            .or_else(|| self.provisioned_contents.clone())
            .unwrap_or_default()
    }
}

impl Decree for FileDecree {
    fn provision(&mut self, repo: &mut dyn Repo) -> Result<()> {
        if let Some(source) = &self.source {
            self.provisioned_contents = Some(repo.get_file(source)?);
        }
        Ok(())
    }

    fn needs_update(&mut self) -> Result<bool> {
        let owner = parse_owner(self.owner_spec.as_deref())?;
        let mode = parse_mode(Some(&self.mode_spec))?;
        let new_contents = self.computed_contents();
        let old = std::fs::read(&self.target).ok();
        let action = check_file(&self.target, owner, mode, &new_contents)?;
        self.detail = describe_contents(old.as_deref(), &new_contents);
        let needed = !action.is_noop();
        self.action = Some(action);
        Ok(needed)
    }

    fn update(&mut self, _dry_run: bool) -> Result<()> {
        if let Some(action) = &self.action {
            action.run(self.makedirs)?;
        }
        Ok(())
    }

    fn update_detail(&self) -> Value {
        Value::Str(self.detail.clone())
    }
}

pub struct RecursiveFilesDecree {
    pub target: PathBuf,
    pub source: String,
    pub owner_spec: Option<String>,
    pub mode_spec: ModeValue,

    files: HashMap<String, Vec<u8>>,
    actions: Vec<FileAction>,
}

impl RecursiveFilesDecree {
    pub fn new(target: PathBuf, source: String, owner_spec: Option<String>, mode_spec: ModeValue) -> Self {
        Self {
            target,
            source,
            owner_spec,
            mode_spec,
            files: HashMap::new(),
            actions: Vec::new(),
        }
    }
}

impl Decree for RecursiveFilesDecree {
    fn provision(&mut self, repo: &mut dyn Repo) -> Result<()> {
        self.files = repo.get_files(&self.source)?;
        Ok(())
    }

    fn needs_update(&mut self) -> Result<bool> {
        let owner = parse_owner(self.owner_spec.as_deref())?;
        let mode = parse_mode(Some(&self.mode_spec))?;
        self.actions.clear();
        for (path, contents) in &self.files {
            let relative = path.strip_prefix(&self.source).unwrap_or(path).trim_start_matches('/');
            let full_path = self.target.join(relative);
            let action = check_file(&full_path, owner, mode, contents)?;
            if !action.is_noop() {
                self.actions.push(action);
            }
        }
        Ok(!self.actions.is_empty())
    }

    fn update(&mut self, _dry_run: bool) -> Result<()> {
        for action in &self.actions {
            action.run(true)?;
        }
        Ok(())
    }

    fn update_detail(&self) -> Value {
        Value::List(
            self.actions
                .iter()
                .map(|a| Value::Str(a.target.display().to_string()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::default_file_mode;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_file_with_contents() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("app.cfg");
        let mut decree = FileDecree::new(
            target.clone(),
            Some(b"hello".to_vec()),
            None,
            None,
            default_file_mode(),
            false,
        );
        assert!(decree.needs_update().unwrap());
        decree.update(false).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        assert!(!decree.needs_update().unwrap());
    }

    #[test]
    fn makedirs_creates_missing_parents() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested/deep/app.cfg");
        let mut decree = FileDecree::new(
            target.clone(),
            Some(b"x".to_vec()),
            None,
            None,
            default_file_mode(),
            true,
        );
        assert!(decree.needs_update().unwrap());
        decree.update(false).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"x");
    }

    #[test]
    fn dry_run_leaves_filesystem_untouched() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("app.cfg");
        let mut decree = FileDecree::new(
            target.clone(),
            Some(b"hello".to_vec()),
            None,
            None,
            default_file_mode(),
            false,
        );
        assert!(decree.needs_update().unwrap());
        // dry run: do not call update()
        assert!(!target.exists());
    }
}
