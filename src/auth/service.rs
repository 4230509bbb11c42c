//! In-memory credential service
//!
//! Authenticates against an in-memory mirror of the credential file and
//! applies mutations there first. Mutations reach the file on `sync`, either
//! called explicitly or run by the periodic task. Password hashing and sync
//! writes run on the work pool; the blocking methods wait for the pool job,
//! the `_async` variants await it.
//!
//! The blocking methods park the calling thread on a channel and must not be
//! called from inside an async runtime; use the `_async` variants there.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::auth::cache::CredentialCache;
use crate::auth::scheduler::SyncTask;
use crate::config::AuthfileConfig;
use crate::error::AuthError;
use crate::pool::WorkPool;
use crate::storage::{FileBackend, cost_is_valid};

/// State shared with pool jobs and the periodic sync task.
struct Shared {
    store: FileBackend,
    cache: RwLock<CredentialCache>,
    // Serializes syncs and reloads against each other.
    sync_guard: Mutex<()>,
    sync_queued: AtomicBool,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, CredentialCache> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CredentialCache> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes a snapshot of the cache to the store if anything changed.
    /// On failure the cache keeps its pending changes for the next attempt.
    fn sync(&self) -> Result<(), AuthError> {
        let _serial = self.sync_guard.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot = {
            let cache = self.read();
            if cache.pending() == 0 {
                debug!("Nothing to sync");
                return Ok(());
            }
            cache.snapshot()
        };

        self.store.replace_all(snapshot.cost, &snapshot.records)?;
        self.write().mark_synced(snapshot.generation);
        debug!(
            "Synced {} record(s) to {}",
            snapshot.records.len(),
            self.store.path().display()
        );
        Ok(())
    }
}

/// Credential cache backed by a `FileBackend`.
pub struct InMemoryService {
    shared: Arc<Shared>,
    pool: Arc<WorkPool>,
    owns_pool: bool,
    scheduler: Mutex<Option<SyncTask>>,
}

impl InMemoryService {
    /// Loads `store` into memory and syncs it back every `sync_interval`
    /// (`Duration::ZERO` disables the periodic sync). Hashing runs on a
    /// private pool sized to the available parallelism.
    pub fn new(store: FileBackend, sync_interval: Duration) -> Result<Self, AuthError> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let pool = Arc::new(WorkPool::new(workers)?);
        Self::build(store, sync_interval, pool, true)
    }

    /// Like `new`, but runs jobs on a pool shared with the caller. The pool is
    /// left running when the service closes.
    pub fn with_pool(
        store: FileBackend,
        sync_interval: Duration,
        pool: Arc<WorkPool>,
    ) -> Result<Self, AuthError> {
        Self::build(store, sync_interval, pool, false)
    }

    /// Opens the configured store, starts a pool of `config.workers` and
    /// applies `config.cost`.
    pub fn from_config(config: &AuthfileConfig) -> Result<Self, AuthError> {
        let store = FileBackend::from_config(config)?;
        let pool = Arc::new(WorkPool::new(config.workers)?);
        let service = Self::build(store, config.sync_interval(), pool, true)?;
        service.set_cost(config.cost)?;
        Ok(service)
    }

    fn build(
        store: FileBackend,
        sync_interval: Duration,
        pool: Arc<WorkPool>,
        owns_pool: bool,
    ) -> Result<Self, AuthError> {
        let contents = store.load()?;
        info!(
            "Loaded {} credential(s) at cost {} from {}",
            contents.records.len(),
            contents.cost,
            store.path().display()
        );

        let shared = Arc::new(Shared {
            store,
            cache: RwLock::new(CredentialCache::from_contents(contents)),
            sync_guard: Mutex::new(()),
            sync_queued: AtomicBool::new(false),
        });

        let scheduler = if sync_interval.is_zero() {
            None
        } else {
            Some(SyncTask::start(
                sync_interval,
                periodic_sync(Arc::clone(&shared), Arc::clone(&pool)),
            )?)
        };

        Ok(Self {
            shared,
            pool,
            owns_pool,
            scheduler: Mutex::new(scheduler),
        })
    }

    /// Sets the bcrypt cost for passwords hashed from now on. Existing hashes
    /// are kept; the new cost is written to the store on the next sync.
    pub fn set_cost(&self, cost: u32) -> Result<(), AuthError> {
        if !cost_is_valid(cost) {
            return Err(AuthError::InvalidCost(cost));
        }
        self.shared.write().set_cost(cost);
        debug!("Cost set to {cost}");
        Ok(())
    }

    pub fn cost(&self) -> u32 {
        self.shared.read().cost()
    }

    /// Adds a user. The entry is authenticatable as soon as this returns.
    pub fn add(&self, username: &str, password: &str) -> Result<(), AuthError> {
        self.check_absent(username)?;
        let hash = self
            .hash_job(password)?
            .blocking_recv()
            .map_err(|_| AuthError::JobFailed)??;
        self.shared.write().insert_new(username, hash)?;
        info!("Added user {username}");
        Ok(())
    }

    /// Async variant of `add`.
    pub async fn add_async(&self, username: &str, password: &str) -> Result<(), AuthError> {
        self.check_absent(username)?;
        let hash = self
            .hash_job(password)?
            .await
            .map_err(|_| AuthError::JobFailed)??;
        self.shared.write().insert_new(username, hash)?;
        info!("Added user {username}");
        Ok(())
    }

    /// Replaces the password of an existing user.
    pub fn modify(&self, username: &str, password: &str) -> Result<(), AuthError> {
        self.check_present(username)?;
        let hash = self
            .hash_job(password)?
            .blocking_recv()
            .map_err(|_| AuthError::JobFailed)??;
        self.shared.write().replace(username, hash)?;
        info!("Changed password of user {username}");
        Ok(())
    }

    /// Async variant of `modify`.
    pub async fn modify_async(&self, username: &str, password: &str) -> Result<(), AuthError> {
        self.check_present(username)?;
        let hash = self
            .hash_job(password)?
            .await
            .map_err(|_| AuthError::JobFailed)??;
        self.shared.write().replace(username, hash)?;
        info!("Changed password of user {username}");
        Ok(())
    }

    /// Removes a user.
    pub fn delete(&self, username: &str) -> Result<(), AuthError> {
        self.shared.write().remove(username)?;
        info!("Deleted user {username}");
        Ok(())
    }

    /// Checks `password` against the cached hash. Never touches the file.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let hash = self
            .shared
            .read()
            .get(username)
            .map(str::to_owned)
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;

        if bcrypt::verify(password, &hash)? {
            debug!("Authenticated user {username}");
            Ok(())
        } else {
            debug!("Authentication failed for user {username}");
            Err(AuthError::AuthenticationFailed(username.to_string()))
        }
    }

    /// Writes pending changes to the store, on the work pool.
    pub fn sync(&self) -> Result<(), AuthError> {
        self.sync_job()?
            .blocking_recv()
            .map_err(|_| AuthError::JobFailed)?
    }

    /// Async variant of `sync`.
    pub async fn sync_async(&self) -> Result<(), AuthError> {
        self.sync_job()?.await.map_err(|_| AuthError::JobFailed)?
    }

    /// Re-reads the store, picking up edits made by other processes.
    /// Refused while changes made through this service are still unsynced.
    pub fn reload(&self) -> Result<(), AuthError> {
        let _serial = self
            .shared
            .sync_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let pending = self.shared.read().pending();
        if pending > 0 {
            return Err(AuthError::UnsyncedChanges(pending));
        }
        let contents = self.shared.store.load()?;

        let mut cache = self.shared.write();
        let pending = cache.pending();
        if pending > 0 {
            return Err(AuthError::UnsyncedChanges(pending));
        }
        info!(
            "Reloaded {} credential(s) from {}",
            contents.records.len(),
            self.shared.store.path().display()
        );
        cache.reset(contents);
        Ok(())
    }

    pub fn contains(&self, username: &str) -> bool {
        self.shared.read().contains(username)
    }

    /// Cached usernames in sorted order.
    pub fn usernames(&self) -> Vec<String> {
        self.shared.read().usernames()
    }

    pub fn len(&self) -> usize {
        self.shared.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while some mutation has not reached the store.
    pub fn is_dirty(&self) -> bool {
        self.shared.read().pending() > 0
    }

    pub fn store(&self) -> &FileBackend {
        &self.shared.store
    }

    /// Stops the periodic sync. Pending changes stay in memory.
    pub fn stop_periodic_sync(&self) {
        let task = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut task) = task {
            task.stop();
        }
    }

    /// Stops the periodic sync, optionally writes pending changes, and shuts
    /// down the pool if the service owns it.
    pub fn close(self, final_sync: bool) -> Result<(), AuthError> {
        self.stop_periodic_sync();
        let result = if final_sync { self.shared.sync() } else { Ok(()) };
        if self.owns_pool {
            self.pool.shutdown();
        }
        result
    }

    fn check_absent(&self, username: &str) -> Result<(), AuthError> {
        if !self.shared.store.username_is_valid(username) {
            return Err(AuthError::InvalidUsername(username.to_string()));
        }
        if self.shared.read().contains(username) {
            return Err(AuthError::DuplicateUsername(username.to_string()));
        }
        Ok(())
    }

    fn check_present(&self, username: &str) -> Result<(), AuthError> {
        if !self.shared.store.username_is_valid(username) {
            return Err(AuthError::InvalidUsername(username.to_string()));
        }
        if !self.shared.read().contains(username) {
            return Err(AuthError::UserNotFound(username.to_string()));
        }
        Ok(())
    }

    /// Hashes `password` at the current cost on the pool.
    fn hash_job(
        &self,
        password: &str,
    ) -> Result<oneshot::Receiver<Result<String, bcrypt::BcryptError>>, AuthError> {
        let password = password.to_owned();
        let cost = self.cost();
        self.submit(move || bcrypt::hash(password, cost))
    }

    fn sync_job(&self) -> Result<oneshot::Receiver<Result<(), AuthError>>, AuthError> {
        let shared = Arc::clone(&self.shared);
        self.submit(move || shared.sync())
    }

    fn submit<T, F>(&self, job: F) -> Result<oneshot::Receiver<T>, AuthError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let accepted = self.pool.dispatch(move || {
            let _ = tx.send(job());
        });
        if accepted {
            Ok(rx)
        } else {
            Err(AuthError::PoolUnavailable)
        }
    }
}

impl Drop for InMemoryService {
    fn drop(&mut self) {
        self.stop_periodic_sync();
        if self.owns_pool {
            self.pool.shutdown();
        }
        let pending = self.shared.read().pending();
        if pending > 0 {
            warn!(
                "Discarding {pending} unsynced change(s) to {}",
                self.shared.store.path().display()
            );
        }
    }
}

/// Tick closure for the periodic task: queues one sync job at a time.
fn periodic_sync(shared: Arc<Shared>, pool: Arc<WorkPool>) -> impl Fn() + Send + 'static {
    move || {
        if shared.read().pending() == 0 {
            return;
        }
        if shared.sync_queued.swap(true, Ordering::AcqRel) {
            return;
        }
        let job_shared = Arc::clone(&shared);
        let accepted = pool.dispatch(move || {
            let result = job_shared.sync();
            job_shared.sync_queued.store(false, Ordering::Release);
            if let Err(e) = result {
                warn!("Periodic sync failed, retrying next interval: {e}");
            }
        });
        if !accepted {
            shared.sync_queued.store(false, Ordering::Release);
            warn!("Work pool unavailable, skipping periodic sync");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn service_in(dir: &tempfile::TempDir, interval: Duration) -> InMemoryService {
        init_logger();
        let store = FileBackend::open(dir.path().join("passwd"), 0o600, TIMEOUT).unwrap();
        let service = InMemoryService::new(store, interval).unwrap();
        service.set_cost(4).unwrap();
        service
    }

    #[test]
    fn test_add_then_authenticate() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir, Duration::ZERO);

        service.add("test", "testPass").unwrap();
        service.authenticate("test", "testPass").unwrap();
        assert!(matches!(
            service.authenticate("test", "testPassx"),
            Err(AuthError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            service.authenticate("nobody", "testPass"),
            Err(AuthError::UserNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_add_leaves_cache_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir, Duration::ZERO);

        service.add("alice", "first").unwrap();
        assert!(matches!(
            service.add("alice", "second"),
            Err(AuthError::DuplicateUsername(_))
        ));
        service.authenticate("alice", "first").unwrap();
        assert_eq!(service.usernames(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_invalid_username_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir, Duration::ZERO);
        assert!(matches!(
            service.add("bad name", "pw"),
            Err(AuthError::InvalidUsername(_))
        ));
        assert!(matches!(
            service.add("a:b", "pw"),
            Err(AuthError::InvalidUsername(_))
        ));
        assert!(service.is_empty());
    }

    #[test]
    fn test_set_cost_rejects_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir, Duration::ZERO);

        assert!(matches!(service.set_cost(3), Err(AuthError::InvalidCost(3))));
        assert!(matches!(service.set_cost(32), Err(AuthError::InvalidCost(32))));
        assert_eq!(service.cost(), 4);

        service.set_cost(5).unwrap();
        service.add("alice", "pw").unwrap();
        service.sync().unwrap();
        let contents = service.store().load().unwrap();
        assert_eq!(contents.cost, 5);
        assert!(contents.records["alice"].starts_with("$2b$05$"));
    }

    #[test]
    fn test_modify_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir, Duration::ZERO);

        service.add("alice", "old").unwrap();
        service.modify("alice", "new").unwrap();
        service.authenticate("alice", "new").unwrap();
        assert!(service.authenticate("alice", "old").is_err());

        service.delete("alice").unwrap();
        assert!(matches!(
            service.authenticate("alice", "new"),
            Err(AuthError::UserNotFound(_))
        ));
        assert!(matches!(service.delete("alice"), Err(AuthError::UserNotFound(_))));
        assert!(matches!(
            service.modify("alice", "x"),
            Err(AuthError::UserNotFound(_))
        ));
    }

    #[test]
    fn test_sync_failure_keeps_changes_pending() {
        init_logger();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwd");
        let store = FileBackend::open(&path, 0o600, Duration::from_millis(50)).unwrap();
        let service = InMemoryService::new(store, Duration::ZERO).unwrap();
        service.set_cost(4).unwrap();
        service.add("alice", "pw").unwrap();

        let held = crate::storage::FileLock::acquire(&path, TIMEOUT).unwrap();
        assert!(matches!(
            service.sync(),
            Err(AuthError::Store(crate::error::StoreError::LockTimeout { .. }))
        ));
        assert!(service.is_dirty());
        service.authenticate("alice", "pw").unwrap();
        drop(held);

        service.sync().unwrap();
        assert!(!service.is_dirty());
        assert!(fs::read_to_string(&path).unwrap().contains("alice:"));
    }

    #[test]
    fn test_periodic_sync_writes_changes() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir, Duration::from_millis(20));
        service.add("alice", "pw").unwrap();

        let mut synced = false;
        for _ in 0..100 {
            if !service.is_dirty() {
                synced = true;
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(synced, "periodic sync never ran");
        assert!(service.store().load().unwrap().records.contains_key("alice"));
        service.close(false).unwrap();
    }

    #[test]
    fn test_periodic_sync_retries_after_failure() {
        init_logger();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwd");
        let store = FileBackend::open(&path, 0o600, Duration::from_millis(50)).unwrap();
        let service = InMemoryService::new(store, Duration::from_millis(20)).unwrap();
        service.set_cost(4).unwrap();

        let held = crate::storage::FileLock::acquire(&path, TIMEOUT).unwrap();
        service.add("alice", "pw").unwrap();
        // Several ticks fire and time out on the lock.
        thread::sleep(Duration::from_millis(300));
        assert!(service.is_dirty());
        assert!(!fs::read_to_string(&path).unwrap().contains("alice:"));
        drop(held);

        let mut synced = false;
        for _ in 0..100 {
            if !service.is_dirty() {
                synced = true;
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(synced, "periodic sync did not recover");
        assert!(fs::read_to_string(&path).unwrap().contains("alice:"));
        service.close(false).unwrap();
    }

    #[test]
    fn test_reload_refused_with_pending_changes() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir, Duration::ZERO);
        service.add("alice", "pw").unwrap();
        assert!(matches!(service.reload(), Err(AuthError::UnsyncedChanges(_))));
        service.sync().unwrap();
        service.reload().unwrap();
        assert!(service.contains("alice"));
    }

    #[test]
    fn test_operations_fail_after_shared_pool_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackend::open(dir.path().join("passwd"), 0o600, TIMEOUT).unwrap();
        let pool = Arc::new(WorkPool::new(2).unwrap());
        let service = InMemoryService::with_pool(store, Duration::ZERO, Arc::clone(&pool)).unwrap();
        service.set_cost(4).unwrap();

        pool.shutdown();
        assert!(matches!(
            service.add("alice", "pw"),
            Err(AuthError::PoolUnavailable)
        ));
        assert!(matches!(service.sync(), Err(AuthError::PoolUnavailable)));
    }

    #[test]
    fn test_close_with_final_sync() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir, Duration::from_secs(3600));
        service.add("alice", "pw").unwrap();
        let store = service.store().clone();
        service.close(true).unwrap();
        assert!(store.load().unwrap().records.contains_key("alice"));
    }

    #[tokio::test]
    async fn test_async_add_and_sync() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(&dir, Duration::ZERO);

        service.add_async("alice", "pw").await.unwrap();
        service.modify_async("alice", "pw2").await.unwrap();
        service.authenticate("alice", "pw2").unwrap();
        service.sync_async().await.unwrap();
        assert!(service.store().load().unwrap().records.contains_key("alice"));
    }
}
