//! JSON file per session
//!
//! Each session is stored as `<storage_path>/<encoded session>.json`, a JSON
//! array of turn entries. Writes go through a temp file and a rename.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt::Write as _;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use recall_core::domain::TurnEntry;
use recall_core::error::{Tier, TierError, TierResult};
use recall_core::repositories::HistoryBackend;

const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

fn io_error(action: &str, path: &Path, e: std::io::Error) -> TierError {
    TierError::Persistence(format!("{} {:?}: {}", action, path, e))
}

/// Percent-encodes every byte outside `[A-Za-z0-9_-]`, so distinct session
/// ids never share a file. The empty id becomes `%`.
fn file_stem(session_id: &str) -> String {
    if session_id.is_empty() {
        return "%".to_string();
    }

    let mut stem = String::with_capacity(session_id.len());
    for byte in session_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            let _ = write!(stem, "%{:02X}", byte);
        }
    }
    stem
}

pub struct FallbackFileStore {
    base_path: PathBuf,
    op_timeout: Duration,
    /// One writer per file.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FallbackFileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            op_timeout: DEFAULT_OP_TIMEOUT,
            locks: DashMap::new(),
        }
    }

    /// Bound for each read, write, rename and remove.
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get file path for a session ID
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", file_stem(session_id)))
    }

    async fn timed<T, F>(&self, action: &str, path: &Path, fut: F) -> TierResult<std::io::Result<T>>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut).await.map_err(|_| {
            warn!("Fallback {} of {:?} timed out after {:?}", action, path, self.op_timeout);
            TierError::Timeout {
                tier: Tier::Fallback,
                after: self.op_timeout,
            }
        })
    }

    async fn ensure_dir(&self) -> TierResult<()> {
        self.timed("create", &self.base_path, fs::create_dir_all(&self.base_path))
            .await?
            .map_err(|e| io_error("create", &self.base_path, e))
    }

    fn lock_for(&self, stem: &str) -> Arc<Mutex<()>> {
        self.locks.entry(stem.to_string()).or_default().clone()
    }

    async fn read_entries(&self, path: &Path) -> TierResult<Vec<TurnEntry>> {
        let bytes = match self.timed("read", path, fs::read(path)).await? {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("read", path, e)),
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| TierError::Serialization(format!("{:?}: {}", path, e)))
    }

    async fn write_entries(&self, path: &Path, entries: &[TurnEntry]) -> TierResult<()> {
        let content = serde_json::to_vec_pretty(entries)?;
        let tmp = path.with_extension("json.tmp");

        self.timed("write", &tmp, fs::write(&tmp, content))
            .await?
            .map_err(|e| io_error("write", &tmp, e))?;
        self.timed("rename", path, fs::rename(&tmp, path))
            .await?
            .map_err(|e| io_error("rename", path, e))
    }

    async fn remove_file(&self, path: &Path) -> TierResult<()> {
        match self.timed("remove", path, fs::remove_file(path)).await? {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", path, e)),
        }
    }

    /// Move an unreadable file aside as `<stem>.json.corrupt-<unix ms>`.
    async fn quarantine(&self, path: &Path) -> TierResult<PathBuf> {
        let target = path.with_extension(format!(
            "json.corrupt-{}",
            Utc::now().timestamp_millis()
        ));
        self.timed("rename", path, fs::rename(path, &target))
            .await?
            .map_err(|e| io_error("rename", path, e))?;
        Ok(target)
    }

    async fn purge_file(&self, path: &Path, stem: &str, cutoff: DateTime<Utc>) -> TierResult<usize> {
        let lock = self.lock_for(stem);
        let _guard = lock.lock().await;

        let mut entries = self.read_entries(path).await?;
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        let removed = before - entries.len();

        if removed > 0 {
            if entries.is_empty() {
                self.remove_file(path).await?;
            } else {
                self.write_entries(path, &entries).await?;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl HistoryBackend for FallbackFileStore {
    fn tier(&self) -> Tier {
        Tier::Fallback
    }

    async fn append(&self, session_id: &str, entry: &TurnEntry) -> TierResult<()> {
        self.ensure_dir().await?;

        let stem = file_stem(session_id);
        let lock = self.lock_for(&stem);
        let _guard = lock.lock().await;

        let path = self.session_path(session_id);
        let mut entries = match self.read_entries(&path).await {
            Ok(entries) => entries,
            Err(TierError::Serialization(reason)) => {
                let moved = self.quarantine(&path).await?;
                warn!(
                    "Corrupt history for {} moved to {:?}, starting over: {}",
                    session_id, moved, reason
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        entries.push(entry.clone());
        self.write_entries(&path, &entries).await?;

        debug!("Appended entry {} to {:?}", entries.len(), path);
        Ok(())
    }

    async fn load(&self, session_id: &str, limit: usize) -> TierResult<Vec<TurnEntry>> {
        let path = self.session_path(session_id);
        let mut entries = self.read_entries(&path).await?;

        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        Ok(entries)
    }

    async fn remove_session(&self, session_id: &str) -> TierResult<()> {
        let stem = file_stem(session_id);
        let lock = self.lock_for(&stem);
        let _guard = lock.lock().await;

        self.remove_file(&self.session_path(session_id)).await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> TierResult<usize> {
        let mut dir = match self
            .timed("list", &self.base_path, fs::read_dir(&self.base_path))
            .await?
        {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error("list", &self.base_path, e)),
        };

        let mut removed = 0;
        loop {
            let entry = match self.timed("list", &self.base_path, dir.next_entry()).await? {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(io_error("list", &self.base_path, e)),
            };

            let path = entry.path();
            // Only process .json files
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            match self.purge_file(&path, &stem, cutoff).await {
                Ok(n) => removed += n,
                Err(e) => warn!("Skipping {:?} during retention sweep: {}", path, e),
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use recall_core::domain::Message;
    use tempfile::TempDir;

    fn entry(text: &str) -> TurnEntry {
        TurnEntry::new(Message::user(text))
    }

    #[test]
    fn test_file_stem_is_path_safe() {
        assert_eq!(file_stem("session_alice"), "session_alice");
        assert_eq!(file_stem("../etc/passwd"), "%2E%2E%2Fetc%2Fpasswd");
        assert_eq!(file_stem("a b/c"), "a%20b%2Fc");
        assert_eq!(file_stem("é"), "%C3%A9");
        assert_eq!(file_stem(""), "%");
    }

    #[test]
    fn test_file_stem_is_injective() {
        let ids = ["alice smith", "alice_smith", "alice/smith", "alice%20smith", "alice.smith", ""];
        let stems: std::collections::HashSet<String> = ids.iter().map(|id| file_stem(id)).collect();
        assert_eq!(stems.len(), ids.len());
    }

    #[tokio::test]
    async fn test_similar_session_ids_do_not_share_history() {
        let temp = TempDir::new().unwrap();
        let store = FallbackFileStore::new(temp.path());

        store.append("alice smith", &entry("secret of alice smith")).await.unwrap();
        store.append("alice/smith", &entry("other")).await.unwrap();

        assert!(store.load("alice_smith", 10).await.unwrap().is_empty());
        let own = store.load("alice smith", 10).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].message.content, "secret of alice smith");
        assert_eq!(store.load("alice/smith", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_creates_directory_and_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested").join("memory");
        let store = FallbackFileStore::new(&root);

        store.append("s1", &entry("hello")).await.unwrap();
        store.append("s1", &entry("world")).await.unwrap();

        let path = root.join("s1.json");
        assert!(path.exists());
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 2);
        assert_eq!(raw[0]["message"]["content"], "hello");
        assert!(!root.join("s1.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_keeps_newest_in_order() {
        let temp = TempDir::new().unwrap();
        let store = FallbackFileStore::new(temp.path());
        for i in 0..4 {
            store.append("s", &entry(&format!("m{}", i))).await.unwrap();
        }

        let loaded = store.load("s", 2).await.unwrap();
        let contents: Vec<&str> = loaded.iter().map(|e| e.message.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3"]);
        assert!(store.load("missing", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FallbackFileStore::new(temp.path()));

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append("busy", &entry(&format!("m{}", i))).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.load("busy", 100).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_remove_session() {
        let temp = TempDir::new().unwrap();
        let store = FallbackFileStore::new(temp.path());
        store.append("gone", &entry("x")).await.unwrap();

        store.remove_session("gone").await.unwrap();
        assert!(!store.session_path("gone").exists());
        store.remove_session("gone").await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_rewrites_or_deletes_files() {
        let temp = TempDir::new().unwrap();
        let store = FallbackFileStore::new(temp.path());
        let old = Utc::now() - ChronoDuration::days(60);

        let stale = TurnEntry::new(Message::user("stale").with_timestamp(old));
        store.append("mixed", &stale).await.unwrap();
        store.append("mixed", &entry("fresh")).await.unwrap();
        store.append("expired", &stale).await.unwrap();

        let removed = store
            .purge_older_than(Utc::now() - ChronoDuration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let mixed = store.load("mixed", 10).await.unwrap();
        assert_eq!(mixed.len(), 1);
        assert_eq!(mixed[0].message.content, "fresh");
        assert!(!store.session_path("expired").exists());
    }

    #[tokio::test]
    async fn test_purge_without_directory_is_noop() {
        let temp = TempDir::new().unwrap();
        let store = FallbackFileStore::new(temp.path().join("never-created"));
        assert_eq!(store.purge_older_than(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_serialization_error() {
        let temp = TempDir::new().unwrap();
        let store = FallbackFileStore::new(temp.path());
        std::fs::write(store.session_path("bad"), "{not json").unwrap();

        let err = store.load("bad", 10).await.unwrap_err();
        assert!(matches!(err, TierError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_append_moves_corrupt_file_aside() {
        let temp = TempDir::new().unwrap();
        let store = FallbackFileStore::new(temp.path());
        std::fs::write(store.session_path("s1"), "{truncated").unwrap();

        store.append("s1", &entry("after corruption")).await.unwrap();
        store.append("s1", &entry("and again")).await.unwrap();

        let loaded = store.load("s1", 10).await.unwrap();
        let contents: Vec<&str> = loaded.iter().map(|e| e.message.content.as_str()).collect();
        assert_eq!(contents, vec!["after corruption", "and again"]);

        let kept: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("s1.json.corrupt-"))
            .collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(
            std::fs::read_to_string(temp.path().join(&kept[0])).unwrap(),
            "{truncated"
        );
    }

    #[tokio::test]
    async fn test_stalled_io_times_out() {
        let temp = TempDir::new().unwrap();
        let store =
            FallbackFileStore::new(temp.path()).with_op_timeout(Duration::from_millis(10));

        let err = store
            .timed("read", temp.path(), std::future::pending::<std::io::Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::Timeout { tier: Tier::Fallback, .. }));
        assert!(err.is_transient());
    }
}
