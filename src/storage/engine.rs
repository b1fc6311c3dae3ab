//! Logbook Document Store
//!
//! The store orchestrates all components:
//! - Write path: Document → unique checks → Collection log → Documents + Indexes
//! - Read path: id or index scan → Documents
//!
//! Each collection has two locks. Writers serialise on the collection's
//! writer mutex, which owns the log: unique checks, id allocation and the
//! log append (and its fsync) happen under it. The documents and indexes sit
//! behind a Tokio `RwLock` whose write side is taken only to publish a
//! durable write, so readers never see a document without its index entries
//! and never wait on disk I/O. Lock order is writer, then state.

use crate::index::{Catalog, IndexManager, IndexSpec, IndexStats};
use crate::schema::{InitReport, Schema};
use crate::storage::document::{Document, DocumentId};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::log::{CollectionLog, LogEntry, LogRecord, SyncMode};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedRwLockReadGuard, RwLock};
use tokio::time::{interval, Duration};

/// Configuration for the document store
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for all databases
    pub data_dir: PathBuf,
    /// Database name (a directory under `data_dir`)
    pub database: String,
    /// Log sync strategy
    pub sync_mode: SyncMode,
    /// Interval of the background sync task in milliseconds (default: 1000)
    pub sync_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("logbook_data"),
            database: "sailing_db".to_string(),
            sync_mode: SyncMode::Batched,
            sync_interval_ms: 1000,
        }
    }
}

impl StorageConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Builder: select the database
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = name.into();
        self
    }

    /// Builder: set the sync mode
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Get path to the database directory
    pub fn database_dir(&self) -> PathBuf {
        self.data_dir.join(&self.database)
    }

    /// Get path to the catalog file
    pub fn catalog_path(&self) -> PathBuf {
        self.database_dir().join("catalog.db")
    }

    /// Get path to a collection's log file
    pub fn collection_log_path(&self, collection: &str) -> PathBuf {
        self.database_dir()
            .join("collections")
            .join(format!("{}.log", collection))
    }
}

/// In-memory state of one collection
pub struct CollectionState {
    name: String,
    /// Latest version of every document
    documents: BTreeMap<DocumentId, Document>,
    /// Secondary indexes
    indexes: IndexManager,
}

/// Write side of one collection
struct CollectionWriter {
    /// Durable log
    log: CollectionLog,
    next_id: DocumentId,
}

impl CollectionWriter {
    fn allocate_id(&mut self) -> DocumentId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }
}

struct Collection {
    writer: AsyncMutex<CollectionWriter>,
    state: Arc<RwLock<CollectionState>>,
}

impl Collection {
    fn open(name: &str, config: &StorageConfig) -> StorageResult<Self> {
        let (log, records) = CollectionLog::open(config.collection_log_path(name), config.sync_mode)?;

        let mut documents = BTreeMap::new();
        let mut next_id = DocumentId::MIN;
        for record in records {
            for LogEntry { id, body } in record.into_entries() {
                let doc = Document::from_bytes(id, &body)?;
                next_id = next_id.max(id.next());
                documents.insert(id, doc);
            }
        }

        if !documents.is_empty() {
            tracing::debug!("Recovered {} documents in {}", documents.len(), name);
        }

        Ok(Self {
            writer: AsyncMutex::new(CollectionWriter { log, next_id }),
            state: Arc::new(RwLock::new(CollectionState {
                name: name.to_string(),
                documents,
                indexes: IndexManager::new(name),
            })),
        })
    }
}

impl CollectionState {
    fn entry(doc: &Document) -> StorageResult<LogEntry> {
        Ok(LogEntry {
            id: doc.id,
            body: doc.to_bytes()?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    pub fn get(&self, id: DocumentId) -> Option<&Document> {
        self.documents.get(&id)
    }

    /// All documents in id (insertion) order
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Consistent read view of one collection.
///
/// Holds the collection's read lock. Writers keep appending to the log
/// meanwhile and publish their documents once it is dropped.
pub type CollectionReader = OwnedRwLockReadGuard<CollectionState>;

/// The main Logbook document store
pub struct DocumentStore {
    /// Configuration
    config: StorageConfig,
    /// Collections by name
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    /// Collection/index registry (std::sync::Mutex because SQLite connections are !Sync)
    catalog: Mutex<Catalog>,
    /// Shutdown signal
    shutdown: RwLock<bool>,
}

impl DocumentStore {
    /// Open the store, recovering every collection the catalog knows about
    pub async fn open(config: StorageConfig) -> StorageResult<Self> {
        std::fs::create_dir_all(config.database_dir().join("collections"))?;

        let catalog = Catalog::open(&config.catalog_path())?;

        let mut collections = HashMap::new();
        for name in catalog.collections()? {
            let collection = Collection::open(&name, &config)?;
            {
                let mut state = collection.state.write().await;
                let CollectionState {
                    indexes, documents, ..
                } = &mut *state;
                for spec in catalog.indexes(&name)? {
                    indexes.ensure_index(&spec, documents.values())?;
                }
            }
            collections.insert(name, Arc::new(collection));
        }

        tracing::debug!(
            "Opened database {:?} with {} collections",
            config.database_dir(),
            collections.len()
        );

        Ok(Self {
            config,
            collections: RwLock::new(collections),
            catalog: Mutex::new(catalog),
            shutdown: RwLock::new(false),
        })
    }

    fn catalog(&self) -> StorageResult<std::sync::MutexGuard<'_, Catalog>> {
        self.catalog
            .lock()
            .map_err(|e| StorageError::Lock(format!("Failed to acquire catalog lock: {}", e)))
    }

    async fn collection(&self, name: &str) -> StorageResult<Arc<Collection>> {
        self.collections
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::UnknownCollection(name.to_string()))
    }

    // ==================== Schema ====================

    /// Create a collection if it does not exist. Returns `true` if created.
    pub async fn ensure_collection(&self, name: &str) -> StorageResult<bool> {
        if name.is_empty() {
            return Err(StorageError::Config("collection name is empty".to_string()));
        }

        let mut collections = self.collections.write().await;
        let recorded = self.catalog()?.ensure_collection(name)?;

        if !collections.contains_key(name) {
            let collection = Collection::open(name, &self.config)?;
            collections.insert(name.to_string(), Arc::new(collection));
        }

        if recorded {
            tracing::debug!("Created collection {}", name);
        }
        Ok(recorded)
    }

    /// Create an index if it does not exist, back-filling existing documents.
    /// Returns `true` if created.
    pub async fn ensure_index(&self, spec: &IndexSpec) -> StorageResult<bool> {
        let collection = self.collection(&spec.collection).await?;
        // No writer may sit between its unique check and its publish
        let _writer = collection.writer.lock().await;
        let mut state = collection.state.write().await;

        let CollectionState {
            indexes, documents, ..
        } = &mut *state;
        let built = indexes.ensure_index(spec, documents.values())?;
        let recorded = self.catalog()?.ensure_index(spec)?;

        if recorded {
            tracing::debug!("Created index {}", spec);
        }
        Ok(built || recorded)
    }

    /// Apply a schema idempotently: every collection and index it declares
    /// exists afterwards. Re-applying the same schema creates nothing.
    pub async fn ensure_schema(&self, schema: &Schema) -> StorageResult<InitReport> {
        let mut report = InitReport::default();

        for collection in &schema.collections {
            if self.ensure_collection(&collection.name).await? {
                report.created_collections.push(collection.name.clone());
            }
            for spec in collection.index_specs() {
                if self.ensure_index(&spec).await? {
                    report.created_indexes.push(spec);
                }
            }
        }

        report.collections = self.catalog()?.collections()?;
        for name in &report.collections {
            report.indexes.extend(self.catalog()?.indexes(name)?);
        }

        Ok(report)
    }

    /// Names of all collections
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Index declarations of a collection
    pub async fn index_specs(&self, collection: &str) -> StorageResult<Vec<IndexSpec>> {
        let collection = self.collection(collection).await?;
        let state = collection.state.read().await;
        Ok(state.indexes.specs())
    }

    // ==================== Writes ====================

    /// Insert a new document, returning its assigned id.
    ///
    /// Fails with `DuplicateKey` when a unique index already holds one of its
    /// values; nothing is written in that case.
    pub async fn put(&self, collection: &str, fields: Map<String, Value>) -> StorageResult<DocumentId> {
        let collection = self.collection(collection).await?;
        let mut writer = collection.writer.lock().await;

        let doc = Document::new(writer.next_id, fields);
        collection.state.read().await.indexes.check_unique(&doc, None)?;

        writer.log.append(&LogRecord::Put(CollectionState::entry(&doc)?))?;
        let id = writer.allocate_id();

        let mut state = collection.state.write().await;
        state.indexes.insert(&doc);
        state.documents.insert(id, doc);

        tracing::trace!("put {}/{}", state.name, id);
        Ok(id)
    }

    /// Insert several documents atomically: all are written or none is.
    pub async fn put_batch(
        &self,
        collection: &str,
        batch: Vec<Map<String, Value>>,
    ) -> StorageResult<Vec<DocumentId>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let collection = self.collection(collection).await?;
        let mut writer = collection.writer.lock().await;

        let first = writer.next_id.0;
        let docs: Vec<Document> = batch
            .into_iter()
            .enumerate()
            .map(|(i, fields)| Document::new(DocumentId(first + i as u64), fields))
            .collect();

        collection.state.read().await.indexes.check_unique_batch(&docs)?;

        let entries = docs
            .iter()
            .map(CollectionState::entry)
            .collect::<StorageResult<Vec<_>>>()?;
        writer.log.append(&LogRecord::Batch(entries))?;

        let mut state = collection.state.write().await;
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = writer.allocate_id();
            state.indexes.insert(&doc);
            state.documents.insert(id, doc);
            ids.push(id);
        }

        tracing::debug!("put_batch {}: {} documents", state.name, ids.len());
        Ok(ids)
    }

    /// Replace an existing document
    pub async fn update(
        &self,
        collection: &str,
        id: DocumentId,
        fields: Map<String, Value>,
    ) -> StorageResult<()> {
        let collection = self.collection(collection).await?;
        let mut writer = collection.writer.lock().await;

        let doc = Document::new(id, fields);
        let old = {
            let state = collection.state.read().await;
            let Some(old) = state.documents.get(&id).cloned() else {
                return Err(StorageError::DocumentNotFound {
                    collection: state.name.clone(),
                    id: id.0,
                });
            };
            state.indexes.check_unique(&doc, Some(id))?;
            old
        };

        writer.log.append(&LogRecord::Put(CollectionState::entry(&doc)?))?;

        let mut state = collection.state.write().await;
        state.indexes.replace(&old, &doc);
        state.documents.insert(id, doc);

        tracing::trace!("update {}/{}", state.name, id);
        Ok(())
    }

    // ==================== Reads ====================

    /// Get a document by id
    pub async fn get(&self, collection: &str, id: DocumentId) -> StorageResult<Option<Document>> {
        let collection = self.collection(collection).await?;
        let state = collection.state.read().await;
        Ok(state.documents.get(&id).cloned())
    }

    /// Full scan in id order, keeping documents that match `predicate`
    pub async fn scan<F>(&self, collection: &str, predicate: F) -> StorageResult<Vec<Document>>
    where
        F: Fn(&Document) -> bool,
    {
        let collection = self.collection(collection).await?;
        let state = collection.state.read().await;
        Ok(state.iter().filter(|d| predicate(d)).cloned().collect())
    }

    /// Take a consistent read view of a collection
    pub async fn reader(&self, collection: &str) -> StorageResult<CollectionReader> {
        let collection = self.collection(collection).await?;
        Ok(Arc::clone(&collection.state).read_owned().await)
    }

    // ==================== Maintenance ====================

    /// Rewrite a collection's log keeping only the latest version of each
    /// document. Returns the number of records dropped.
    pub async fn compact(&self, collection: &str) -> StorageResult<u64> {
        let collection = self.collection(collection).await?;
        let mut writer = collection.writer.lock().await;
        let state = collection.state.read().await;

        let before = writer.log.record_count();
        let entries = state
            .documents
            .values()
            .map(CollectionState::entry)
            .collect::<StorageResult<Vec<_>>>()?;
        writer.log.rewrite(&entries)?;

        let dropped = before.saturating_sub(writer.log.record_count());
        tracing::info!("Compacted {}: dropped {} superseded records", state.name, dropped);
        Ok(dropped)
    }

    /// Fsync every collection log
    pub async fn sync(&self) -> StorageResult<()> {
        let collections: Vec<_> = self.collections.read().await.values().cloned().collect();
        for collection in collections {
            let mut writer = collection.writer.lock().await;
            if writer.log.has_unsynced() {
                writer.log.sync()?;
            }
        }
        Ok(())
    }

    /// Get storage statistics
    pub async fn stats(&self) -> StorageResult<StorageStats> {
        let collections: Vec<_> = self.collections.read().await.values().cloned().collect();

        let mut stats = StorageStats::default();
        for collection in collections {
            let writer = collection.writer.lock().await;
            let state = collection.state.read().await;
            let log_size_bytes = writer.log.file_size()?;
            stats.collections.push(CollectionStats {
                name: state.name.clone(),
                documents: state.documents.len(),
                log_records: writer.log.record_count(),
                log_size_bytes,
                indexes: state.indexes.stats(),
            });
        }
        stats.collections.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(stats)
    }

    /// Start background sync task (useful with `SyncMode::Batched`)
    pub fn start_background_sync(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        let sync_interval = Duration::from_millis(store.config.sync_interval_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = interval(sync_interval);

            loop {
                ticker.tick().await;

                if *store.shutdown.read().await {
                    break;
                }

                if let Err(e) = store.sync().await {
                    tracing::error!("Background sync failed: {}", e);
                }
            }
        })
    }

    /// Shutdown the store gracefully
    pub async fn shutdown(&self) -> StorageResult<()> {
        *self.shutdown.write().await = true;

        self.sync().await?;
        self.catalog()?.checkpoint()?;

        tracing::debug!("Document store shut down");
        Ok(())
    }

    /// Get the database directory path
    pub fn database_dir(&self) -> PathBuf {
        self.config.database_dir()
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }
}

/// Statistics of one collection
#[derive(Debug, Clone, serde::Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub documents: usize,
    pub log_records: u64,
    pub log_size_bytes: u64,
    pub indexes: Vec<IndexStats>,
}

/// Storage statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StorageStats {
    pub collections: Vec<CollectionStats>,
}

impl StorageStats {
    pub fn total_documents(&self) -> usize {
        self.collections.iter().map(|c| c.documents).sum()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.collections.iter().map(|c| c.log_size_bytes).sum()
    }
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Collections: {}, Documents: {}, Size: {:.2} MB",
            self.collections.len(),
            self.total_documents(),
            self.total_size_bytes() as f64 / (1024.0 * 1024.0)
        )
    }
}
