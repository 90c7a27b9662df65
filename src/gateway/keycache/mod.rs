//! Cache of authorized public keys, indexed by file and fingerprint.
//!
//! The cache holds one [`AuthorizedKeySet`] per authorized-keys file. Entries
//! are created lazily by the first lookup that misses, which also registers a
//! filesystem watch for the file. From then on the background watcher keeps
//! the entry current:
//!
//! - a write reloads the file once it has been quiet for the debounce period;
//! - a removal evicts the entry so the next lookup fails or reloads.
//!
//! When a fixed authorized-keys file is configured it serves every user and
//! is loaded and watched by [`KeyCache::start`].

mod fingerprint;
mod keyset;
mod watch;

pub use fingerprint::{Fingerprint, FingerprintKind};
pub use keyset::AuthorizedKeySet;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use ssh_key::PublicKey;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::gateway::identity::ResolvedIdentity;
use watch::WatchHandle;

#[derive(Debug, Error)]
pub enum KeyCacheError {
    #[error("failed to read authorized keys {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse authorized keys {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ssh_key::Error,
    },

    #[error("failed to watch {path:?}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("no authorized key in {path:?} matches the fingerprint")]
    NoMatchingKey { path: PathBuf },

    #[error("key cache is closed")]
    Closed,
}

/// Key cache settings.
#[derive(Debug, Clone)]
pub struct KeyCacheConfig {
    /// Authorized-keys file used for every user instead of their own.
    pub fixed_path: Option<PathBuf>,
    /// Encoding the cached sets are indexed with.
    pub fingerprint_kind: FingerprintKind,
    /// Quiet period before a changed file is reloaded.
    pub debounce: Duration,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            fixed_path: None,
            fingerprint_kind: FingerprintKind::default(),
            debounce: Duration::from_secs(1),
        }
    }
}

/// Parsed key sets shared between the lookup path and the watcher.
pub(crate) struct KeyStore {
    kind: FingerprintKind,
    sets: DashMap<PathBuf, Arc<AuthorizedKeySet>>,
}

impl KeyStore {
    fn new(kind: FingerprintKind) -> Self {
        Self {
            kind,
            sets: DashMap::new(),
        }
    }

    fn get(&self, path: &Path) -> Option<Arc<AuthorizedKeySet>> {
        self.sets.get(path).map(|entry| Arc::clone(entry.value()))
    }

    /// Read and parse `path`, replacing its cached set on success.
    ///
    /// On failure the previous set, if any, stays in place.
    pub(crate) async fn reload(&self, path: &Path) -> Result<Arc<AuthorizedKeySet>, KeyCacheError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| KeyCacheError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let set = AuthorizedKeySet::parse(&content, self.kind).map_err(|source| {
            KeyCacheError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;

        debug!("Loaded {} authorized keys from {}", set.len(), path.display());
        let set = Arc::new(set);
        self.sets.insert(path.to_path_buf(), Arc::clone(&set));
        Ok(set)
    }

    pub(crate) fn evict(&self, path: &Path) {
        self.sets.remove(path);
    }
}

/// Fingerprint-indexed authorized keys with change tracking.
pub struct KeyCache {
    fixed_path: Option<PathBuf>,
    store: Arc<KeyStore>,
    watcher: WatchHandle,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl KeyCache {
    /// Create the cache and start its watcher.
    ///
    /// A configured fixed file is loaded and watched before returning; any
    /// failure to do so is returned as an error.
    ///
    /// # Arguments
    ///
    /// * `config` - Key source, fingerprint encoding and debounce period
    pub async fn start(config: KeyCacheConfig) -> Result<Arc<Self>, KeyCacheError> {
        let store = Arc::new(KeyStore::new(config.fingerprint_kind));
        let cancel = CancellationToken::new();
        let (watcher, task) = watch::spawn(Arc::clone(&store), config.debounce, cancel.clone())
            .map_err(|source| KeyCacheError::Watch {
                path: config.fixed_path.clone().unwrap_or_default(),
                source,
            })?;

        let cache = Arc::new(Self {
            fixed_path: config.fixed_path,
            store,
            watcher,
            cancel,
            task: Mutex::new(Some(task)),
        });

        if let Some(path) = &cache.fixed_path {
            if let Err(e) = cache.load(path).await {
                cache.close().await;
                return Err(e);
            }
            info!("Serving authorized keys for all users from {}", path.display());
        }

        Ok(cache)
    }

    /// The authorized-keys file consulted for `identity`.
    pub fn source_for(&self, identity: &ResolvedIdentity) -> PathBuf {
        match &self.fixed_path {
            Some(path) => path.clone(),
            None => identity.home.join(".ssh").join("authorized_keys"),
        }
    }

    /// Find the key in `path` with the given fingerprint.
    ///
    /// On a miss the file is watched and loaded before answering.
    pub async fn lookup(
        &self,
        path: &Path,
        fingerprint: &Fingerprint,
    ) -> Result<PublicKey, KeyCacheError> {
        let set = match self.store.get(path) {
            Some(set) => set,
            None => self.load(path).await?,
        };
        set.get(fingerprint)
            .cloned()
            .ok_or_else(|| KeyCacheError::NoMatchingKey {
                path: path.to_path_buf(),
            })
    }

    /// Reload `path` now, bypassing the debounce timer.
    pub async fn reload(&self, path: &Path) -> Result<Arc<AuthorizedKeySet>, KeyCacheError> {
        self.store.reload(path).await
    }

    /// Drop the cached set of `path`.
    pub fn invalidate(&self, path: &Path) {
        self.store.evict(path);
    }

    /// Snapshot of the set currently cached for `path`.
    pub fn cached(&self, path: &Path) -> Option<Arc<AuthorizedKeySet>> {
        self.store.get(path)
    }

    /// Stop the watcher and cancel pending reloads.
    ///
    /// Cached sets stay readable; lookups that miss fail with
    /// [`KeyCacheError::Closed`].
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            let _ = task.await;
            debug!("Key cache closed");
        }
    }

    async fn load(&self, path: &Path) -> Result<Arc<AuthorizedKeySet>, KeyCacheError> {
        if self.cancel.is_cancelled() {
            return Err(KeyCacheError::Closed);
        }
        // Watch first so a write landing during the read is not missed.
        self.watcher.watch(path).await?;
        self.store.reload(path).await
    }
}

impl Drop for KeyCache {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::TestKey;
    use super::*;
    use std::fs;

    fn config(fixed_path: Option<PathBuf>) -> KeyCacheConfig {
        KeyCacheConfig {
            fixed_path,
            fingerprint_kind: FingerprintKind::Sha256,
            debounce: Duration::from_millis(50),
        }
    }

    fn identity(home: &Path) -> ResolvedIdentity {
        ResolvedIdentity {
            username: "alice".into(),
            uid: 1001,
            gid: 1001,
            home: home.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_source_for_user_home() {
        let cache = KeyCache::start(config(None)).await.unwrap();
        assert_eq!(
            cache.source_for(&identity(Path::new("/home/alice"))),
            PathBuf::from("/home/alice/.ssh/authorized_keys")
        );
        cache.close().await;
    }

    #[tokio::test]
    async fn test_lazy_load_on_first_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        let key = TestKey::from_seed(20);
        fs::write(&path, key.authorized_line()).unwrap();

        let cache = KeyCache::start(config(None)).await.unwrap();
        assert!(cache.cached(&path).is_none());

        let found = cache
            .lookup(&path, &key.fingerprint(FingerprintKind::Sha256))
            .await
            .unwrap();
        assert_eq!(&found, key.public());
        assert!(cache.cached(&path).is_some());
        cache.close().await;
    }

    #[tokio::test]
    async fn test_unknown_fingerprint_is_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        fs::write(&path, TestKey::from_seed(21).authorized_line()).unwrap();

        let cache = KeyCache::start(config(None)).await.unwrap();
        let other = TestKey::from_seed(22);
        let err = cache
            .lookup(&path, &other.fingerprint(FingerprintKind::Sha256))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyCacheError::NoMatchingKey { .. }));
        cache.close().await;
    }

    #[tokio::test]
    async fn test_missing_file_fails_lookup_without_caching() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");

        let cache = KeyCache::start(config(None)).await.unwrap();
        let key = TestKey::from_seed(23);
        assert!(
            cache
                .lookup(&path, &key.fingerprint(FingerprintKind::Sha256))
                .await
                .is_err()
        );
        assert!(cache.cached(&path).is_none());
        cache.close().await;
    }

    #[tokio::test]
    async fn test_malformed_file_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        fs::write(&path, "ssh-ed25519 @@@@\n").unwrap();

        let cache = KeyCache::start(config(None)).await.unwrap();
        let err = cache
            .lookup(&path, &TestKey::from_seed(24).fingerprint(FingerprintKind::Sha256))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyCacheError::Parse { .. }));
        assert!(cache.cached(&path).is_none());
        cache.close().await;
    }

    #[tokio::test]
    async fn test_reload_of_unchanged_file_is_equal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        fs::write(&path, TestKey::from_seed(25).authorized_line()).unwrap();

        let cache = KeyCache::start(config(None)).await.unwrap();
        let first = cache.reload(&path).await.unwrap();
        let second = cache.reload(&path).await.unwrap();
        assert_eq!(*first, *second);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        let key = TestKey::from_seed(26);
        fs::write(&path, key.authorized_line()).unwrap();

        let cache = KeyCache::start(config(None)).await.unwrap();
        cache.reload(&path).await.unwrap();

        fs::write(&path, "garbage line\n").unwrap();
        assert!(cache.reload(&path).await.is_err());
        let found = cache
            .lookup(&path, &key.fingerprint(FingerprintKind::Sha256))
            .await
            .unwrap();
        assert_eq!(&found, key.public());
        cache.close().await;
    }

    #[tokio::test]
    async fn test_invalidate_forces_lazy_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        let old = TestKey::from_seed(27);
        let new = TestKey::from_seed(28);
        fs::write(&path, old.authorized_line()).unwrap();

        let cache = KeyCache::start(config(None)).await.unwrap();
        cache
            .lookup(&path, &old.fingerprint(FingerprintKind::Sha256))
            .await
            .unwrap();

        fs::write(&path, new.authorized_line()).unwrap();
        cache.invalidate(&path);
        let found = cache
            .lookup(&path, &new.fingerprint(FingerprintKind::Sha256))
            .await
            .unwrap();
        assert_eq!(&found, new.public());
        cache.close().await;
    }

    #[tokio::test]
    async fn test_fixed_path_is_preloaded_for_everyone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared_keys");
        let key = TestKey::from_seed(29);
        fs::write(&path, key.authorized_line()).unwrap();

        let cache = KeyCache::start(config(Some(path.clone()))).await.unwrap();
        assert!(cache.cached(&path).is_some());
        assert_eq!(cache.source_for(&identity(Path::new("/home/bob"))), path);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_missing_fixed_path_is_a_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = KeyCache::start(config(Some(dir.path().join("absent")))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_written_file_is_reloaded_by_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        let old = TestKey::from_seed(30);
        let new = TestKey::from_seed(31);
        fs::write(&path, old.authorized_line()).unwrap();

        let cache = KeyCache::start(config(None)).await.unwrap();
        cache
            .lookup(&path, &old.fingerprint(FingerprintKind::Sha256))
            .await
            .unwrap();

        fs::write(&path, new.authorized_line()).unwrap();

        let fingerprint = new.fingerprint(FingerprintKind::Sha256);
        let mut reloaded = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let hit = cache
                .cached(&path)
                .map(|set| set.get(&fingerprint).is_some())
                .unwrap_or(false);
            if hit {
                reloaded = true;
                break;
            }
        }
        assert!(reloaded, "watcher did not pick up the new key");
        cache.close().await;
    }

    async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_removed_file_is_evicted_and_rewatched_when_recreated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        let first = TestKey::from_seed(33);
        let second = TestKey::from_seed(34);
        let third = TestKey::from_seed(35);
        fs::write(&path, first.authorized_line()).unwrap();

        let cache = KeyCache::start(config(None)).await.unwrap();
        cache
            .lookup(&path, &first.fingerprint(FingerprintKind::Sha256))
            .await
            .unwrap();

        fs::remove_file(&path).unwrap();
        assert!(
            eventually(|| cache.cached(&path).is_none()).await,
            "removal did not evict the cached keys"
        );
        assert!(
            cache
                .lookup(&path, &first.fingerprint(FingerprintKind::Sha256))
                .await
                .is_err()
        );

        fs::write(&path, second.authorized_line()).unwrap();
        let found = cache
            .lookup(&path, &second.fingerprint(FingerprintKind::Sha256))
            .await
            .unwrap();
        assert_eq!(&found, second.public());

        // The recreated file is watched again, so later writes are picked up.
        fs::write(&path, third.authorized_line()).unwrap();
        let fingerprint = third.fingerprint(FingerprintKind::Sha256);
        assert!(
            eventually(|| {
                cache
                    .cached(&path)
                    .is_some_and(|set| set.get(&fingerprint).is_some())
            })
            .await,
            "write to the recreated file was not reloaded"
        );
        cache.close().await;
    }

    #[tokio::test]
    async fn test_lookup_after_close_misses_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        fs::write(&path, TestKey::from_seed(32).authorized_line()).unwrap();

        let cache = KeyCache::start(config(None)).await.unwrap();
        cache.close().await;
        let err = cache
            .lookup(&path, &TestKey::from_seed(32).fingerprint(FingerprintKind::Sha256))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyCacheError::Closed));
    }
}
