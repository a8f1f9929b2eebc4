//! Logical repository access: path normalization, a content store keyed by
//! normalized path, and a stable per-file fingerprint used only by the
//! controller to decide whether a peer needs a resend.

mod path;

pub use path::normalize_path;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Opaque identity for one revision of a file. Two reads of an unchanged
/// file produce equal fingerprints; a changed file produces a different one
/// with overwhelming probability. Computed as a truncated SHA-256 of the
/// file contents (per the spec's own recommendation over `(mtime, size)`,
/// which is vulnerable to coarse filesystem timestamps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        Fingerprint(out)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Backing store for a repository: real filesystem access rooted at some
/// directory. Out of scope per the spec is *how* this is populated; this
/// trait is the seam so the apply engine can be tested against an
/// in-memory fixture.
pub trait RepositoryBackend: Send + Sync {
    fn read(&self, normalized: &str) -> io::Result<Vec<u8>>;
    /// All regular files whose normalized path is under `normalized`
    /// (inclusive), in unspecified order.
    fn list_under(&self, normalized: &str) -> io::Result<Vec<String>>;
}

/// A filesystem-backed repository rooted at a directory.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl RepositoryBackend for FsBackend {
    fn read(&self, normalized: &str) -> io::Result<Vec<u8>> {
        let full = self.root.join(normalized);
        let meta = std::fs::metadata(&full)?;
        if !meta.is_file() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "not a regular file"));
        }
        std::fs::read(full)
    }

    fn list_under(&self, normalized: &str) -> io::Result<Vec<String>> {
        let full = self.root.join(normalized);
        let mut out = Vec::new();
        walk(&self.root, &full, &mut out)?;
        Ok(out)
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    let meta = match std::fs::metadata(dir) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.is_file() {
        if let Ok(rel) = dir.strip_prefix(root) {
            out.push(normalize_path(&rel.to_string_lossy()));
        }
        return Ok(());
    }
    if !meta.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out)?;
        } else if path.is_file() {
            if let Ok(rel) = path.strip_prefix(root) {
                out.push(normalize_path(&rel.to_string_lossy()));
            }
        }
    }
    Ok(())
}

/// Object-safe facade over a repository view, so consumers (the apply
/// engine) don't need to be generic over the backend type.
pub trait Repo {
    fn get_file(&mut self, path: &str) -> io::Result<Vec<u8>>;
    fn get_files(&mut self, path: &str) -> io::Result<HashMap<String, Vec<u8>>>;
}

impl<B: RepositoryBackend> Repo for RepositoryView<B> {
    fn get_file(&mut self, path: &str) -> io::Result<Vec<u8>> {
        RepositoryView::get_file(self, path).map(|b| b.to_vec())
    }

    fn get_files(&mut self, path: &str) -> io::Result<HashMap<String, Vec<u8>>> {
        RepositoryView::get_files(self, path)
    }
}

/// One view onto the repository, scoped to a single apply. Memoizes reads
/// so a second `get_file` on the same normalized path returns the same
/// bytes and fingerprint within this view, per the fingerprint contract.
pub struct RepositoryView<B: RepositoryBackend> {
    backend: B,
    cache: HashMap<String, (Vec<u8>, Fingerprint)>,
}

impl<B: RepositoryBackend> RepositoryView<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            cache: HashMap::new(),
        }
    }

    pub fn get_file(&mut self, path: &str) -> io::Result<&[u8]> {
        let normalized = normalize_path(path);
        if !self.cache.contains_key(&normalized) {
            let bytes = self.backend.read(&normalized)?;
            let fp = Fingerprint::of(&bytes);
            self.cache.insert(normalized.clone(), (bytes, fp));
        }
        Ok(&self.cache[&normalized].0)
    }

    pub fn get_files(&mut self, path: &str) -> io::Result<HashMap<String, Vec<u8>>> {
        let normalized = normalize_path(path);
        let paths = self.backend.list_under(&normalized)?;
        let mut out = HashMap::new();
        for p in paths {
            let bytes = self.get_file(&p)?.to_vec();
            out.insert(p, bytes);
        }
        Ok(out)
    }

    pub fn fingerprint_of(&self, path: &str) -> Option<Fingerprint> {
        let normalized = normalize_path(path);
        self.cache.get(&normalized).map(|(_, fp)| *fp)
    }

    /// All files read through this view so far, with their fingerprints —
    /// used by the controller's per-agent cache diff.
    pub fn files(&self) -> impl Iterator<Item = (&str, Fingerprint)> {
        self.cache.iter().map(|(p, (_, fp))| (p.as_str(), *fp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    struct MemBackend(Map<String, Vec<u8>>);

    impl RepositoryBackend for MemBackend {
        fn read(&self, normalized: &str) -> io::Result<Vec<u8>> {
            self.0
                .get(normalized)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, normalized.to_string()))
        }
        fn list_under(&self, normalized: &str) -> io::Result<Vec<String>> {
            Ok(self
                .0
                .keys()
                .filter(|k| k.as_str() == normalized || k.starts_with(&format!("{normalized}/")))
                .cloned()
                .collect())
        }
    }

    #[test]
    fn repeated_get_file_returns_same_bytes_and_fingerprint() {
        let mut backend = Map::new();
        backend.insert("conf/app.cfg".into(), b"hello".to_vec());
        let mut view = RepositoryView::new(MemBackend(backend));

        let first = view.get_file("conf/app.cfg").unwrap().to_vec();
        let fp1 = view.fingerprint_of("conf/app.cfg").unwrap();
        let second = view.get_file("conf/app.cfg").unwrap().to_vec();
        let fp2 = view.fingerprint_of("conf/app.cfg").unwrap();

        assert_eq!(first, second);
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn different_content_yields_different_fingerprint() {
        assert_ne!(Fingerprint::of(b"a"), Fingerprint::of(b"b"));
    }

    #[test]
    fn get_files_collects_everything_under_prefix() {
        let mut backend = Map::new();
        backend.insert("conf/a".into(), b"1".to_vec());
        backend.insert("conf/b".into(), b"2".to_vec());
        backend.insert("other/c".into(), b"3".to_vec());
        let mut view = RepositoryView::new(MemBackend(backend));

        let files = view.get_files("conf").unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.contains_key("conf/a"));
        assert!(files.contains_key("conf/b"));
    }
}
