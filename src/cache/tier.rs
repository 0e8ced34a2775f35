use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use super::disk::DiskStore;
use crate::error::DiskCacheError;

/// Where and how large a disk tier is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSettings {
    pub directory: PathBuf,
    pub app_version: u32,
    pub max_bytes: u64,

    /// Delete existing content once the store is open
    pub clear_on_open: bool,
}

enum TierState {
    Initializing,
    Ready(Arc<DiskStore>),
    Disabled,
}

/// Disk half of a two-tier cache.
///
/// The store is opened on a background thread. Operations arriving before
/// that finishes block their (worker) thread on a condition variable until
/// the store is ready or the open failed. A failed open, or any later I/O
/// error, disables the tier for the rest of the process; every operation
/// then becomes a no-op and the cache runs from memory alone.
pub struct DiskTier {
    name: &'static str,
    state: Mutex<TierState>,
    ready: Condvar,
}

impl DiskTier {
    /// Start opening a store described by `settings`.
    pub fn open(name: &'static str, settings: DiskSettings) -> Arc<Self> {
        let tier = Arc::new(Self::with_state(name, TierState::Initializing));

        let init = Arc::clone(&tier);
        let spawned = thread::Builder::new()
            .name(format!("{}-disk-init", name))
            .spawn(move || {
                let result = Self::open_store(&settings);
                init.finish_initialization(result);
            });

        if let Err(e) = spawned {
            tier.finish_initialization(Err(DiskCacheError::Io(e)));
        }
        tier
    }

    /// A tier that never stores anything.
    pub fn disabled(name: &'static str) -> Arc<Self> {
        Arc::new(Self::with_state(name, TierState::Disabled))
    }

    fn with_state(name: &'static str, state: TierState) -> Self {
        Self {
            name,
            state: Mutex::new(state),
            ready: Condvar::new(),
        }
    }

    fn open_store(settings: &DiskSettings) -> Result<DiskStore, DiskCacheError> {
        let store = DiskStore::open(
            settings.directory.clone(),
            settings.app_version,
            settings.max_bytes,
        )?;
        if settings.clear_on_open {
            store.clear()?;
        }
        Ok(store)
    }

    fn finish_initialization(&self, result: Result<DiskStore, DiskCacheError>) {
        let mut state = self.state.lock();
        *state = match result {
            Ok(store) => {
                info!(tier = self.name, dir = %store.directory().display(), "Disk tier ready");
                TierState::Ready(Arc::new(store))
            }
            Err(e) => {
                warn!(tier = self.name, error = %e, "Disk tier failed to open, running memory-only");
                TierState::Disabled
            }
        };
        self.ready.notify_all();
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Block until initialization is over, then return the store if enabled.
    pub fn wait(&self) -> Option<Arc<DiskStore>> {
        let mut state = self.state.lock();
        while matches!(*state, TierState::Initializing) {
            self.ready.wait(&mut state);
        }
        match &*state {
            TierState::Ready(store) => Some(Arc::clone(store)),
            _ => None,
        }
    }

    /// The store if it is ready right now; never blocks on initialization.
    pub fn try_store(&self) -> Option<Arc<DiskStore>> {
        match &*self.state.lock() {
            TierState::Ready(store) => Some(Arc::clone(store)),
            _ => None,
        }
    }

    pub fn is_initializing(&self) -> bool {
        matches!(*self.state.lock(), TierState::Initializing)
    }

    pub fn is_disabled(&self) -> bool {
        matches!(*self.state.lock(), TierState::Disabled)
    }

    /// Permanently switch this tier off.
    pub fn disable(&self, reason: &DiskCacheError) {
        let mut state = self.state.lock();
        if !matches!(*state, TierState::Disabled) {
            warn!(tier = self.name, error = %reason, "Disabling disk tier");
            *state = TierState::Disabled;
            self.ready.notify_all();
        }
    }

    /// Run `op` against the store on the current thread.
    ///
    /// Waits for initialization. Returns `None` when the tier is disabled or
    /// `op` failed, in which case the tier is disabled.
    pub fn run_blocking<R>(
        &self,
        op: impl FnOnce(&DiskStore) -> Result<R, DiskCacheError>,
    ) -> Option<R> {
        let store = self.wait()?;
        match op(&store) {
            Ok(value) => Some(value),
            Err(e) => {
                self.disable(&e);
                None
            }
        }
    }

    /// Run `op` against the store on the blocking thread pool.
    pub async fn run<R, F>(self: &Arc<Self>, op: F) -> Option<R>
    where
        F: FnOnce(&DiskStore) -> Result<R, DiskCacheError> + Send + 'static,
        R: Send + 'static,
    {
        let tier = Arc::clone(self);
        tokio::task::spawn_blocking(move || tier.run_blocking(op))
            .await
            .ok()
            .flatten()
    }

    /// Flush the journal if the store is open.
    pub fn flush(&self) {
        if let Some(store) = self.try_store() {
            if let Err(e) = store.flush() {
                self.disable(&e);
            }
        }
    }
}
