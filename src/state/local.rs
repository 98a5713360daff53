//! Local file-based ledger storage.
//!
//! The ledger lives in `<dir>/ledger.json` and is replaced atomically by
//! writing a temporary file and renaming it. `<dir>/ledger.lock` is created
//! exclusively, so two runs racing for it cannot both win.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

use super::lock::{LedgerLock, LockOwner};
use super::store::LedgerStore;
use super::types::RunLedger;

/// Default ledger directory name.
pub const LEDGER_DIR: &str = ".landing-zone";

const LEDGER_FILE: &str = "ledger.json";
const LOCK_FILE: &str = "ledger.lock";

/// Local file-based ledger store.
#[derive(Debug, Clone)]
pub struct LocalLedgerStore {
    dir: PathBuf,
}

impl LocalLedgerStore {
    /// Creates a store in `dir`.
    #[must_use]
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Resolves the ledger directory: the configured one, relative to the
    /// configuration directory, or [`LEDGER_DIR`] next to it.
    #[must_use]
    pub fn for_config(config_dir: &Path, configured: Option<&str>) -> Self {
        Self::with_base_dir(config_dir.join(configured.unwrap_or(LEDGER_DIR)))
    }

    /// Path to the ledger file.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            StateError::write(format!(
                "Failed to create ledger directory {}: {e}",
                self.dir.display()
            ))
            .into()
        })
    }

    /// Creates the lock file, failing if one appeared in the meantime.
    async fn create_lock_file(&self, lock: &LedgerLock) -> Result<()> {
        let body = to_json(lock)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path())
            .await
            .map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    StateError::LockedByOther {
                        holder: String::from("a concurrent run"),
                        since: Utc::now().to_rfc3339(),
                    }
                } else {
                    lock_failed(format!("Failed to create lock file: {e}"))
                }
            })?;
        file.write_all(body.as_bytes())
            .await
            .map_err(|e| lock_failed(format!("Failed to write lock file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| lock_failed(format!("Failed to sync lock file: {e}")))?;
        Ok(())
    }

    async fn remove_lock_file(&self) -> Result<()> {
        match fs::remove_file(self.lock_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(lock_failed(format!("Failed to delete lock file: {e}")).into()),
        }
    }
}

/// Reads and parses a JSON file; a missing file is `None`.
async fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<Option<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No {what} at {}", path.display());
            return Ok(None);
        }
        Err(e) => {
            return Err(StateError::Corrupted {
                message: format!("Failed to read {what}: {e}"),
            }
            .into());
        }
    };
    serde_json::from_str(&content).map(Some).map_err(|e| {
        StateError::Corrupted {
            message: format!("Failed to parse {what} {}: {e}", path.display()),
        }
        .into()
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| StateError::serialization(e.to_string()).into())
}

fn lock_failed(message: String) -> StateError {
    StateError::LockFailed { message }
}

#[async_trait]
impl LedgerStore for LocalLedgerStore {
    async fn load(&self) -> Result<Option<RunLedger>> {
        let ledger = read_json::<RunLedger>(&self.ledger_path(), "ledger").await?;
        if let Some(ledger) = &ledger {
            debug!(
                "Loaded ledger of run {} ({} records)",
                ledger.run_id,
                ledger.records.len()
            );
        }
        Ok(ledger)
    }

    async fn save(&self, ledger: &RunLedger) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.ledger_path();
        let temp = path.with_extension("tmp");

        let body = to_json(ledger)?;
        let mut file = fs::File::create(&temp)
            .await
            .map_err(|e| StateError::write(format!("Failed to create {}: {e}", temp.display())))?;
        file.write_all(body.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write ledger: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync ledger: {e}")))?;
        fs::rename(&temp, &path)
            .await
            .map_err(|e| StateError::write(format!("Failed to replace ledger: {e}")))?;

        info!("Saved ledger of run {} to {}", ledger.run_id, path.display());
        Ok(())
    }

    async fn acquire_lock(&self, owner: LockOwner) -> Result<LedgerLock> {
        self.ensure_dir().await?;
        let now = Utc::now();

        if let Some(held) = self.current_lock().await? {
            if !held.is_stale(now) {
                return Err(StateError::LockedByOther {
                    holder: held.describe(),
                    since: held.acquired_at.to_rfc3339(),
                }
                .into());
            }
            warn!("Taking over stale ledger lock: {}", held.describe());
            self.remove_lock_file().await?;
        }

        let lock = LedgerLock::start(owner, now);
        self.create_lock_file(&lock).await?;
        info!("Locked ledger for {}", lock.describe());
        Ok(lock)
    }

    async fn release_lock(&self, run_id: &str) -> Result<()> {
        match self.current_lock().await? {
            Some(held) if held.run_id == run_id => {
                self.remove_lock_file().await?;
                info!("Released ledger lock of run {run_id}");
            }
            Some(held) => debug!("Lock now belongs to {}; leaving it", held.describe()),
            None => debug!("Ledger was already unlocked"),
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<Option<LedgerLock>> {
        let held = self.current_lock().await.unwrap_or_else(|e| {
            warn!("Removing unreadable lock file: {e}");
            None
        });
        self.remove_lock_file().await?;
        if let Some(lock) = &held {
            warn!("Force-released ledger lock of {}", lock.describe());
        }
        Ok(held)
    }

    async fn current_lock(&self) -> Result<Option<LedgerLock>> {
        read_json(&self.lock_path(), "lock file").await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LandingZoneError;
    use crate::graph::{AccountContext, NodeId, ResourceKind};
    use crate::state::LedgerRecord;
    use crate::state::LOCK_TTL_SECS;
    use tempfile::TempDir;

    fn store() -> (LocalLedgerStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = LocalLedgerStore::with_base_dir(temp.path().join("ledger"));
        (store, temp)
    }

    fn owner(holder: &str) -> LockOwner {
        LockOwner {
            holder: holder.to_string(),
            config_hash: String::from("cafebabe00"),
            planned_nodes: 4,
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = store();

        let mut ledger = RunLedger::new("hash-1", None);
        ledger.push(LedgerRecord::pending(
            &NodeId::new(ResourceKind::Subscription, "sub-a"),
            AccountContext::Spoke,
            "fp",
        ));
        store.save(&ledger).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.run_id, ledger.run_id);
        assert_eq!(loaded.records, ledger.records);
        assert!(!store.ledger_path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_load_without_ledger() {
        let (store, _temp) = store();
        assert!(store.load().await.unwrap().is_none());
        assert!(store.current_lock().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_corrupted() {
        let (store, temp) = store();
        std::fs::create_dir_all(temp.path().join("ledger")).unwrap();
        std::fs::write(store.ledger_path(), "{ not json").unwrap();
        assert!(matches!(
            store.load().await,
            Err(LandingZoneError::State(StateError::Corrupted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_lock_records_the_run() {
        let (store, _temp) = store();

        let lock = store.acquire_lock(owner("ci:1")).await.unwrap();
        let held = store.current_lock().await.unwrap().unwrap();
        assert_eq!(held, lock);
        assert_eq!(held.config_hash, "cafebabe00");
        assert_eq!(held.planned_nodes, 4);

        store.release_lock("some-other-run").await.unwrap();
        assert!(store.current_lock().await.unwrap().is_some());

        store.release_lock(&lock.run_id).await.unwrap();
        assert!(store.current_lock().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_live_lock_names_its_run() {
        let (store, _temp) = store();
        let first = store.acquire_lock(owner("ci:1")).await.unwrap();

        match store.acquire_lock(owner("ci:2")).await {
            Err(LandingZoneError::State(StateError::LockedByOther { holder, .. })) => {
                assert!(holder.contains(&first.run_id));
                assert!(holder.contains("ci:1"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let removed = store.force_unlock().await.unwrap().unwrap();
        assert_eq!(removed.run_id, first.run_id);
        assert!(store.acquire_lock(owner("ci:2")).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let (store, temp) = store();
        std::fs::create_dir_all(temp.path().join("ledger")).unwrap();
        let stale = LedgerLock::start(
            owner("crashed:9"),
            Utc::now() - chrono::Duration::seconds(LOCK_TTL_SECS + 1),
        );
        std::fs::write(
            temp.path().join("ledger").join(LOCK_FILE),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let lock = store.acquire_lock(owner("ci:3")).await.unwrap();
        assert_ne!(lock.run_id, stale.run_id);
        assert_eq!(store.current_lock().await.unwrap().unwrap().holder, "ci:3");
    }

    #[tokio::test]
    async fn test_force_unlock_clears_unreadable_lock() {
        let (store, temp) = store();
        let dir = temp.path().join("ledger");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(LOCK_FILE), "garbage").unwrap();

        assert!(store.acquire_lock(owner("ci:4")).await.is_err());
        assert!(store.force_unlock().await.unwrap().is_none());
        assert!(store.acquire_lock(owner("ci:4")).await.is_ok());
    }

    #[test]
    fn test_for_config_paths() {
        let store = LocalLedgerStore::for_config(Path::new("/etc/lz"), None);
        assert_eq!(store.ledger_path(), Path::new("/etc/lz/.landing-zone/ledger.json"));

        let store = LocalLedgerStore::for_config(Path::new("/etc/lz"), Some("/var/lz"));
        assert_eq!(store.ledger_path(), Path::new("/var/lz/ledger.json"));
    }
}
