//! The agent's local file cache: the only source of file bytes an apply
//! ever reads from. Populated exclusively by `accept_files` + the binary
//! frames that follow, in the order `accept_files` named them — the agent
//! never reads the controller's repository directly.

use std::collections::{HashMap, VecDeque};
use std::io;

use fleet_repository::{normalize_path, RepositoryBackend};

#[derive(Default, Clone)]
pub struct FileCache {
    files: HashMap<String, Vec<u8>>,
    pending: VecDeque<String>,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `accept_files(paths...)`: appends to the pending queue. Binary
    /// frames that follow bind to the head of this queue, one per frame.
    pub fn accept(&mut self, paths: Vec<String>) {
        for path in paths {
            self.pending.push_back(normalize_path(&path));
        }
    }

    /// `discard_files(paths...)`: drops cached entries.
    pub fn discard(&mut self, paths: &[String]) {
        for path in paths {
            self.files.remove(&normalize_path(path));
        }
    }

    /// Binds the next binary frame to the head of the pending queue.
    /// Returns the path it was bound to, or `None` if no `accept_files`
    /// is outstanding (a protocol violation by the peer).
    pub fn bind_next(&mut self, data: Vec<u8>) -> Option<String> {
        let path = self.pending.pop_front()?;
        self.files.insert(path.clone(), data);
        Some(path)
    }
}

impl RepositoryBackend for FileCache {
    fn read(&self, normalized: &str) -> io::Result<Vec<u8>> {
        self.files
            .get(normalized)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, normalized.to_string()))
    }

    fn list_under(&self, normalized: &str) -> io::Result<Vec<String>> {
        Ok(self
            .files
            .keys()
            .filter(|k| k.as_str() == normalized || k.starts_with(&format!("{normalized}/")))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frames_bind_to_accepted_paths_in_order() {
        let mut cache = FileCache::new();
        cache.accept(vec!["b.txt".to_string(), "a.txt".to_string()]);
        assert_eq!(cache.bind_next(b"second".to_vec()), Some("b.txt".to_string()));
        assert_eq!(cache.bind_next(b"first".to_vec()), Some("a.txt".to_string()));
        assert_eq!(cache.read("b.txt").unwrap(), b"second");
    }

    #[test]
    fn unsolicited_binary_frame_is_ignored() {
        let mut cache = FileCache::new();
        assert_eq!(cache.bind_next(b"x".to_vec()), None);
    }

    #[test]
    fn discard_removes_cached_entry() {
        let mut cache = FileCache::new();
        cache.accept(vec!["a.txt".to_string()]);
        cache.bind_next(b"data".to_vec());
        cache.discard(&["a.txt".to_string()]);
        assert!(cache.read("a.txt").is_err());
    }
}
