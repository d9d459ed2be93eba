use chrono::Utc;
use slatedb::Db;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::path::Path;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::watch::{EventLog, EventType, Watcher};
use pkg_constants::paths::MEMORY_DATA_DIR;
use pkg_constants::state::{EVENT_LOG_CAPACITY, WATCH_CHANNEL_CAPACITY};
use pkg_types::Object;

/// Persistent state store backed by SlateDB on a local filesystem, or by an
/// in-memory map for tests and ephemeral runs.
///
/// Typed writes are serialized and version-checked: every object carries a
/// `resource_version` that must match the stored one for `update` to succeed.
#[derive(Clone)]
pub struct StateStore {
    backend: Backend,
    pub event_log: EventLog,
    write_lock: Arc<Mutex<()>>,
}

#[derive(Clone)]
enum Backend {
    Slate(Db),
    Memory(Arc<RwLock<BTreeMap<String, Vec<u8>>>>),
}

impl StateStore {
    /// Open (or create) a state store rooted at `path` on the local filesystem.
    pub async fn new(path: &str) -> anyhow::Result<Self> {
        info!("Opening SlateDB state store at {}", path);

        // Ensure the data directory exists before opening the object store
        std::fs::create_dir_all(path)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", path, e))?;

        let object_store = Arc::new(
            LocalFileSystem::new_with_prefix(path)
                .map_err(|e| anyhow::anyhow!("Failed to create local object store: {}", e))?,
        );
        let db = Db::open(Path::from("/"), object_store)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open SlateDB: {}", e))?;
        Ok(Self::with_backend(Backend::Slate(db)))
    }

    /// Ephemeral store that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self::with_backend(Backend::Memory(Arc::new(RwLock::new(BTreeMap::new()))))
    }

    /// Open the store selected by a data-dir setting (`memory://` selects the in-memory store).
    pub async fn open(data_dir: &str) -> anyhow::Result<Self> {
        if data_dir == MEMORY_DATA_DIR {
            info!("Using in-memory state store");
            return Ok(Self::in_memory());
        }
        Self::new(data_dir).await
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            event_log: EventLog::new(EVENT_LOG_CAPACITY, WATCH_CHANNEL_CAPACITY),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    // ── Raw key/value access ──────────────────────────────────────────────

    /// Store a value under the given key.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        match &self.backend {
            Backend::Slate(db) => db
                .put(key.as_bytes(), value)
                .await
                .map(|_| ())
                .map_err(|e| StoreError::Backend(format!("SlateDB put failed: {}", e))),
            Backend::Memory(map) => {
                map.write().await.insert(key.to_string(), value.to_vec());
                Ok(())
            }
        }
    }

    /// Retrieve the value for a key, or `None` if it does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Slate(db) => match db.get(key.as_bytes()).await {
                Ok(Some(bytes)) => Ok(Some(bytes.to_vec())),
                Ok(None) => Ok(None),
                Err(e) => Err(StoreError::Backend(format!("SlateDB get failed: {}", e))),
            },
            Backend::Memory(map) => Ok(map.read().await.get(key).cloned()),
        }
    }

    /// Delete a key from the store.
    pub async fn delete(&self, key: &str) -> Result<()> {
        match &self.backend {
            Backend::Slate(db) => db
                .delete(key.as_bytes())
                .await
                .map(|_| ())
                .map_err(|e| StoreError::Backend(format!("SlateDB delete failed: {}", e))),
            Backend::Memory(map) => {
                map.write().await.remove(key);
                Ok(())
            }
        }
    }

    /// List all key-value pairs whose keys start with `prefix`.
    /// Returns them as `(key_string, raw_bytes)`.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        match &self.backend {
            Backend::Slate(db) => {
                let mut results = Vec::new();
                let mut iter = db
                    .scan_prefix(prefix.as_bytes())
                    .await
                    .map_err(|e| StoreError::Backend(format!("SlateDB scan_prefix failed: {}", e)))?;

                while let Ok(Some(kv)) = iter.next().await {
                    let key = String::from_utf8_lossy(&kv.key).to_string();
                    results.push((key, kv.value.to_vec()));
                }
                Ok(results)
            }
            Backend::Memory(map) => Ok(map
                .read()
                .await
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
        }
    }

    // ── Typed, versioned access ───────────────────────────────────────────

    /// Fetch one object.
    pub async fn get_object<T: Object>(&self, namespace: Option<&str>, name: &str) -> Result<Option<T>> {
        match self.get(&T::key_for(namespace, name)).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// List objects of a type, optionally restricted to one namespace.
    /// Entries that fail to decode are skipped.
    pub async fn list_objects<T: Object>(&self, namespace: Option<&str>) -> Result<Vec<T>> {
        let entries = self.list_prefix(&T::list_prefix(namespace)).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect())
    }

    /// Create an object. Assigns uid, creation timestamp (unless preset) and version 1.
    pub async fn create<T: Object>(&self, mut obj: T) -> Result<T> {
        check_scope(&obj)?;
        let key = obj.key();
        let _guard = self.write_lock.lock().await;

        if self.get(&key).await?.is_some() {
            return Err(StoreError::AlreadyExists { key });
        }

        let meta = obj.meta_mut();
        if meta.uid.is_empty() {
            meta.uid = Uuid::new_v4().to_string();
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = Some(Utc::now());
        }
        meta.resource_version = 1;

        let data = serde_json::to_vec(&obj)?;
        self.put(&key, &data).await?;
        debug!("created {}", key);
        self.event_log.emit(EventType::Added, key, Some(data)).await;
        Ok(obj)
    }

    /// Replace an object if its `resource_version` still matches the stored one.
    pub async fn update<T: Object>(&self, mut obj: T) -> Result<T> {
        check_scope(&obj)?;
        let key = obj.key();
        let _guard = self.write_lock.lock().await;

        let current: T = match self.get(&key).await? {
            Some(data) => serde_json::from_slice(&data)?,
            None => return Err(StoreError::NotFound { key }),
        };
        let found = current.meta().resource_version;
        let expected = obj.meta().resource_version;
        if found != expected {
            return Err(StoreError::Conflict {
                key,
                expected,
                found,
            });
        }

        let meta = obj.meta_mut();
        meta.uid = current.meta().uid.clone();
        meta.creation_timestamp = current.meta().creation_timestamp;
        meta.resource_version = found + 1;

        let data = serde_json::to_vec(&obj)?;
        self.put(&key, &data).await?;
        debug!("updated {} (rv={})", key, found + 1);
        self.event_log
            .emit(EventType::Modified, key, Some(data))
            .await;
        Ok(obj)
    }

    /// Delete an object, returning its last stored state.
    pub async fn delete_object<T: Object>(&self, namespace: Option<&str>, name: &str) -> Result<Option<T>> {
        let key = T::key_for(namespace, name);
        let _guard = self.write_lock.lock().await;

        let Some(data) = self.get(&key).await? else {
            return Ok(None);
        };
        let last: T = serde_json::from_slice(&data)?;
        self.delete(&key).await?;
        debug!("deleted {}", key);
        self.event_log
            .emit(EventType::Deleted, key, Some(data))
            .await;
        Ok(Some(last))
    }

    /// Watch every change under `prefix`.
    pub fn watch(&self, prefix: &str) -> Result<Watcher> {
        self.event_log.watch(prefix)
    }

    /// Watch every change to objects of type `T`.
    pub fn watch_objects<T: Object>(&self) -> Result<Watcher> {
        self.watch(&T::list_prefix(None))
    }

    /// Gracefully close the state store.
    pub async fn close(self) -> anyhow::Result<()> {
        info!("Closing state store");
        self.event_log.close();
        match self.backend {
            Backend::Slate(db) => db
                .close()
                .await
                .map_err(|e| anyhow::anyhow!("SlateDB close failed: {}", e)),
            Backend::Memory(_) => Ok(()),
        }
    }
}

fn check_scope<T: Object>(obj: &T) -> Result<()> {
    if T::NAMESPACED && obj.meta().namespace.is_none() {
        return Err(StoreError::Invalid(format!(
            "{} '{}' requires a namespace",
            T::RESOURCE,
            obj.meta().name
        )));
    }
    Ok(())
}
