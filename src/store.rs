//! Durable JSON persistence for the proxy pool.
//!
//! Three record kinds, each a whole file rewritten on every update:
//! the raw candidate list, one validated-set map per provider type, and the
//! validation checkpoints. Rewrites go through a temp file + rename so a
//! crash mid-write never leaves a torn file. The store is single-writer:
//! exactly one process (the one running the validator) may own the data
//! directory; concurrent writer processes would race on the rename.

use crate::provider::ProviderType;
use crate::proxy::Proxy;

use chrono::{DateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Resumable validation progress for one `(provider_type, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub last_checked: DateTime<Utc>,
    pub valid_proxies_found: usize,
    /// Cursor into the candidate list where the next pass starts. Always in
    /// `0..=candidates.len()`; wraps to 0 when a pass reaches the end.
    pub last_checked_index: usize,
}

/// Nested checkpoint map as persisted: type -> provider id -> record.
pub type CheckpointMap = HashMap<ProviderType, HashMap<String, CheckpointRecord>>;

/// File-backed store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct ProxyStore {
    dir: PathBuf,
}

impl ProxyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn candidates_path(&self) -> PathBuf {
        self.dir.join("candidates.json")
    }

    fn validated_path(&self, provider_type: ProviderType) -> PathBuf {
        self.dir.join(format!("validated_{provider_type}.json"))
    }

    fn checkpoints_path(&self) -> PathBuf {
        self.dir.join("checkpoints.json")
    }

    pub fn load_candidates(&self) -> Vec<Proxy> {
        read_or_default(&self.candidates_path())
    }

    pub fn save_candidates(&self, candidates: &[Proxy]) {
        self.write_logged(&self.candidates_path(), candidates);
    }

    pub fn load_validated(&self, provider_type: ProviderType) -> HashMap<String, Vec<Proxy>> {
        read_or_default(&self.validated_path(provider_type))
    }

    pub fn save_validated(
        &self,
        provider_type: ProviderType,
        sets: &HashMap<String, Vec<Proxy>>,
    ) {
        self.write_logged(&self.validated_path(provider_type), sets);
    }

    pub fn load_checkpoints(&self) -> CheckpointMap {
        read_or_default(&self.checkpoints_path())
    }

    pub fn save_checkpoints(&self, checkpoints: &CheckpointMap) {
        self.write_logged(&self.checkpoints_path(), checkpoints);
    }

    /// Write failures are logged and swallowed: the in-memory pool stays
    /// authoritative until the next successful flush.
    fn write_logged<T: Serialize + ?Sized>(&self, path: &Path, value: &T) {
        if let Err(e) = write_atomic(path, value) {
            warn!("failed to persist {}: {}", path.display(), e);
        }
    }
}

/// Read errors (missing file, unreadable, bad JSON) degrade to the empty
/// value: an empty pool is always a safe starting state.
fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to read {}: {}", path.display(), e);
            }
            return T::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            warn!("ignoring malformed {}: {}", path.display(), e);
            T::default()
        }
    }
}

fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyScheme;

    fn proxy(ip: &str, port: u16) -> Proxy {
        Proxy::new(ip, port, ProxyScheme::Http)
    }

    #[test]
    fn candidates_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(tmp.path());

        let candidates = vec![proxy("1.1.1.1", 80), proxy("2.2.2.2", 8080)];
        store.save_candidates(&candidates);
        assert_eq!(store.load_candidates(), candidates);
    }

    #[test]
    fn validated_round_trip_per_type() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(tmp.path());

        let mut sets = HashMap::new();
        sets.insert("site-x".to_string(), vec![proxy("3.3.3.3", 3128)]);
        store.save_validated(ProviderType::Manga, &sets);

        assert_eq!(store.load_validated(ProviderType::Manga), sets);
        assert!(store.load_validated(ProviderType::Anime).is_empty());
    }

    #[test]
    fn checkpoints_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(tmp.path());

        let record = CheckpointRecord {
            last_checked: Utc::now(),
            valid_proxies_found: 4,
            last_checked_index: 17,
        };
        let mut checkpoints = CheckpointMap::new();
        checkpoints
            .entry(ProviderType::Novel)
            .or_default()
            .insert("site-y".to_string(), record.clone());

        store.save_checkpoints(&checkpoints);
        let loaded = store.load_checkpoints();
        assert_eq!(loaded[&ProviderType::Novel]["site-y"], record);
    }

    #[test]
    fn missing_and_malformed_files_degrade_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(tmp.path());

        assert!(store.load_candidates().is_empty());

        fs::write(tmp.path().join("candidates.json"), b"{not json").unwrap();
        assert!(store.load_candidates().is_empty());
    }

    #[test]
    fn rewrite_replaces_whole_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProxyStore::new(tmp.path());

        store.save_candidates(&[proxy("1.1.1.1", 80), proxy("2.2.2.2", 81)]);
        store.save_candidates(&[proxy("3.3.3.3", 82)]);
        assert_eq!(store.load_candidates(), vec![proxy("3.3.3.3", 82)]);
    }
}
