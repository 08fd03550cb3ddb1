//! Open pulse files shared between sessions.
//!
//! Sessions opened on the same `(name, shot, run)` share one backing store
//! and one lock. The registry counts them and releases the store, syncing
//! it first, when the last one closes.

use super::local::{LocalSession, SessionState};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::path::NodePath;
use crate::types::{PulseTarget, SessionId};
use parking_lot::Mutex;
use pulse_codec::{to_cbor, Value};
use pulse_storage::{BackingStore, FileStore, InMemoryStore, StorageError};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Opens and creates backing stores for pulse targets.
pub trait StoreProvider: Send + Sync {
    /// Opens the store of an existing pulse file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the pulse file does not exist.
    fn open(&self, target: &PulseTarget) -> CoreResult<Box<dyn BackingStore>>;

    /// Creates an empty pulse file, replacing an existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be created.
    fn create(&self, target: &PulseTarget) -> CoreResult<Box<dyn BackingStore>>;
}

/// Keeps pulse files in memory for the life of the provider.
#[derive(Debug, Default)]
pub struct MemoryStoreProvider {
    stores: Mutex<HashMap<PulseTarget, InMemoryStore>>,
}

impl MemoryStoreProvider {
    /// Creates a provider with no pulse files.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreProvider for MemoryStoreProvider {
    fn open(&self, target: &PulseTarget) -> CoreResult<Box<dyn BackingStore>> {
        self.stores
            .lock()
            .get(target)
            .map(|store| Box::new(store.clone()) as Box<dyn BackingStore>)
            .ok_or_else(|| CoreError::not_found(format!("pulse file {target}")))
    }

    fn create(&self, target: &PulseTarget) -> CoreResult<Box<dyn BackingStore>> {
        let store = InMemoryStore::new();
        self.stores.lock().insert(target.clone(), store.clone());
        Ok(Box::new(store))
    }
}

/// Keeps pulse files as `{name}_{shot * 10000 + run}.pulse` below a root
/// directory.
#[derive(Debug, Clone)]
pub struct FileStoreProvider {
    root: PathBuf,
}

impl FileStoreProvider {
    /// Creates a provider rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The file holding `target`.
    #[must_use]
    pub fn file_path(&self, target: &PulseTarget) -> PathBuf {
        self.root
            .join(format!("{}_{}.pulse", target.name(), target.file_number()))
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StoreProvider for FileStoreProvider {
    fn open(&self, target: &PulseTarget) -> CoreResult<Box<dyn BackingStore>> {
        let path = self.file_path(target);
        match FileStore::open_existing(&path) {
            Ok(store) => Ok(Box::new(store)),
            Err(StorageError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Err(
                CoreError::not_found(format!("pulse file {}", path.display())),
            ),
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self, target: &PulseTarget) -> CoreResult<Box<dyn BackingStore>> {
        Ok(Box::new(FileStore::create(&self.file_path(target))?))
    }
}

/// Store and per-session state of one open pulse file, guarded by one lock.
pub(crate) struct TargetState {
    pub(crate) store: Option<Box<dyn BackingStore>>,
    pub(crate) sessions: HashMap<SessionId, SessionState>,
}

/// An open pulse file.
pub(crate) struct SharedTarget {
    pub(crate) target: PulseTarget,
    pub(crate) state: Mutex<TargetState>,
}

impl SharedTarget {
    fn new(target: PulseTarget, store: Box<dyn BackingStore>) -> Self {
        Self {
            target,
            state: Mutex::new(TargetState {
                store: Some(store),
                sessions: HashMap::new(),
            }),
        }
    }

    /// Syncs and drops the store.
    fn shut_down(&self) -> CoreResult<()> {
        let store = self.state.lock().store.take();
        if let Some(mut store) = store {
            store.sync()?;
        }
        info!(target = %self.target, "pulse file released");
        Ok(())
    }
}

struct OpenTarget {
    shared: Arc<SharedTarget>,
    sessions: usize,
}

struct RegistryInner {
    config: Config,
    provider: Box<dyn StoreProvider>,
    targets: Mutex<HashMap<PulseTarget, OpenTarget>>,
    next_session: AtomicU64,
}

/// Registry of open pulse files.
///
/// Cloning the registry is cheap; clones share the open files.
///
/// # Lock Order
///
/// The registry lock is always taken before a target's lock.
#[derive(Clone)]
pub struct TargetRegistry {
    inner: Arc<RegistryInner>,
}

impl TargetRegistry {
    /// Creates a registry using `provider` for stores.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the configuration is invalid.
    pub fn new(config: Config, provider: impl StoreProvider + 'static) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RegistryInner {
                config,
                provider: Box::new(provider),
                targets: Mutex::new(HashMap::new()),
                next_session: AtomicU64::new(1),
            }),
        })
    }

    /// A registry of in-memory pulse files with the default configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config: Config::default(),
                provider: Box::new(MemoryStoreProvider::new()),
                targets: Mutex::new(HashMap::new()),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// The configuration sessions are opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Number of pulse files currently open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.inner.targets.lock().len()
    }

    /// Opens a session on an existing pulse file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid shot or run and `NotFound`
    /// if the pulse file does not exist.
    pub fn open(&self, name: &str, shot: i32, run: i32) -> CoreResult<LocalSession> {
        let target = PulseTarget::new(name, shot, run)?;
        let mut targets = self.inner.targets.lock();
        let shared = match targets.get_mut(&target) {
            Some(open) => {
                open.sessions += 1;
                Arc::clone(&open.shared)
            }
            None => {
                let store = self.inner.provider.open(&target)?;
                let shared = Arc::new(SharedTarget::new(target.clone(), store));
                targets.insert(
                    target,
                    OpenTarget {
                        shared: Arc::clone(&shared),
                        sessions: 1,
                    },
                );
                shared
            }
        };
        Ok(self.attach(shared))
    }

    /// Creates a pulse file, recording its reference shot and run, and
    /// opens a session on it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid shot or run and
    /// `InvalidState` if the pulse file is open.
    pub fn create(
        &self,
        name: &str,
        shot: i32,
        run: i32,
        ref_shot: i32,
        ref_run: i32,
    ) -> CoreResult<LocalSession> {
        let target = PulseTarget::new(name, shot, run)?;
        let reference = PulseTarget::new(name, ref_shot, ref_run)?;
        let mut targets = self.inner.targets.lock();
        if targets.contains_key(&target) {
            return Err(CoreError::invalid_state(format!(
                "pulse file {target} is open"
            )));
        }
        let mut store = self.inner.provider.create(&target)?;
        let node = store.find_or_create_node(reference_node().as_str())?;
        let record = Value::record([
            ("shot", Value::Int(reference.shot())),
            ("run", Value::Int(reference.run())),
        ]);
        store.write_record(node, Some(&to_cbor(&record)?))?;

        let shared = Arc::new(SharedTarget::new(target.clone(), store));
        targets.insert(
            target,
            OpenTarget {
                shared: Arc::clone(&shared),
                sessions: 1,
            },
        );
        info!(target = %shared.target, ref_shot, ref_run, "pulse file created");
        Ok(self.attach(shared))
    }

    fn attach(&self, shared: Arc<SharedTarget>) -> LocalSession {
        let id = SessionId(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
        shared
            .state
            .lock()
            .sessions
            .insert(id, SessionState::new(self.inner.config.cache_level));
        info!(target = %shared.target, session = %id, "session opened");
        LocalSession::new(id, shared, self.clone())
    }

    /// Drops one session reference to `target`, releasing the store when
    /// it was the last.
    pub(crate) fn release(&self, target: &PulseTarget) -> CoreResult<()> {
        let mut targets = self.inner.targets.lock();
        let Some(open) = targets.get_mut(target) else {
            return Ok(());
        };
        open.sessions = open.sessions.saturating_sub(1);
        if open.sessions > 0 {
            return Ok(());
        }
        if let Some(open) = targets.remove(target) {
            open.shared.shut_down()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("config", &self.inner.config)
            .field("open", &self.open_count())
            .finish()
    }
}

/// Node holding the reference shot and run of a pulse file.
#[must_use]
pub fn reference_node() -> NodePath {
    NodePath::field("pulse_info", "reference")
}
