//! Database schema and bootstrap
//!
//! The sailing database consists of three collections and a fixed set of
//! secondary indexes:
//!
//! | Collection    | Unique      | Secondary                                  |
//! |---------------|-------------|--------------------------------------------|
//! | `voyages`     | `voyage_id` | `ship_id`, `departure_time`, `arrival_time` |
//! | `checkpoints` |             | `voyage_id`, `timestamp`                   |
//! | `gps_tracks`  |             | `voyage_id`, `timestamp`                   |
//!
//! [`initialize`] applies the schema idempotently: running it again creates
//! nothing and reports no error.

use crate::index::IndexSpec;
use crate::storage::{DocumentStore, StorageResult, CHECKPOINTS, GPS_TRACKS, VOYAGES};

/// One collection and the indexes declared on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    /// Indexed fields with their uniqueness
    pub indexes: Vec<(String, bool)>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    /// Builder: declare a non-unique index
    pub fn index(mut self, field: impl Into<String>) -> Self {
        self.indexes.push((field.into(), false));
        self
    }

    /// Builder: declare a unique index
    pub fn unique(mut self, field: impl Into<String>) -> Self {
        self.indexes.push((field.into(), true));
        self
    }

    pub fn index_specs(&self) -> Vec<IndexSpec> {
        self.indexes
            .iter()
            .map(|(field, unique)| IndexSpec {
                collection: self.name.clone(),
                field: field.clone(),
                unique: *unique,
            })
            .collect()
    }
}

/// A set of collections with their indexes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    pub collections: Vec<CollectionSpec>,
}

impl Schema {
    /// The voyage telemetry schema
    pub fn sailing() -> Self {
        Self {
            collections: vec![
                CollectionSpec::new(VOYAGES)
                    .unique("voyage_id")
                    .index("ship_id")
                    .index("departure_time")
                    .index("arrival_time"),
                CollectionSpec::new(CHECKPOINTS)
                    .index("voyage_id")
                    .index("timestamp"),
                CollectionSpec::new(GPS_TRACKS)
                    .index("voyage_id")
                    .index("timestamp"),
            ],
        }
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.name == name)
    }
}

/// Outcome of applying a schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Collections created by this run
    pub created_collections: Vec<String>,
    /// Indexes created by this run
    pub created_indexes: Vec<IndexSpec>,
    /// Every collection known after the run
    pub collections: Vec<String>,
    /// Every index known after the run
    pub indexes: Vec<IndexSpec>,
}

impl InitReport {
    /// Whether the run found everything already in place
    pub fn is_noop(&self) -> bool {
        self.created_collections.is_empty() && self.created_indexes.is_empty()
    }
}

/// Ensure the sailing collections and indexes exist
pub async fn initialize(store: &DocumentStore) -> StorageResult<InitReport> {
    let report = store.ensure_schema(&Schema::sailing()).await?;

    for name in &report.created_collections {
        tracing::debug!("Collection '{}' created", name);
    }
    for spec in &report.created_indexes {
        tracing::debug!("Index {} created", spec);
    }
    if report.is_noop() {
        tracing::debug!("Schema already in place");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StorageConfig, StorageError};
    use tempfile::tempdir;

    #[test]
    fn test_sailing_schema() {
        let schema = Schema::sailing();
        assert_eq!(schema.collections.len(), 3);

        let voyages = schema.collection(VOYAGES).unwrap();
        let unique: Vec<_> = voyages
            .index_specs()
            .into_iter()
            .filter(|s| s.unique)
            .map(|s| s.field)
            .collect();
        assert_eq!(unique, vec!["voyage_id"]);

        for name in [CHECKPOINTS, GPS_TRACKS] {
            let fields: Vec<_> = schema
                .collection(name)
                .unwrap()
                .index_specs()
                .into_iter()
                .map(|s| s.field)
                .collect();
            assert_eq!(fields, vec!["voyage_id", "timestamp"]);
        }
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());

        let first = {
            let store = DocumentStore::open(config.clone()).await.unwrap();
            let report = initialize(&store).await.unwrap();
            assert_eq!(report.created_collections.len(), 3);
            assert_eq!(report.created_indexes.len(), 8);

            let again = initialize(&store).await.unwrap();
            assert!(again.is_noop());
            assert_eq!(again.indexes, report.indexes);

            store.shutdown().await.unwrap();
            report
        };

        // Reopened store: still nothing to do, same layout
        let store = DocumentStore::open(config).await.unwrap();
        let report = initialize(&store).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(report.collections, first.collections);
        assert_eq!(report.indexes, first.indexes);
    }

    #[tokio::test]
    async fn test_conflicting_redeclaration() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(StorageConfig::new(dir.path())).await.unwrap();
        initialize(&store).await.unwrap();

        let conflicting = Schema {
            collections: vec![CollectionSpec::new(VOYAGES).unique("ship_id")],
        };
        let err = store.ensure_schema(&conflicting).await.unwrap_err();
        assert!(matches!(err, StorageError::Catalog(_)));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_bootstrap_logs_nothing_at_info() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempdir().unwrap();
        let store = DocumentStore::open(StorageConfig::new(dir.path())).await.unwrap();
        initialize(&store).await.unwrap();
        store.shutdown().await.unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Created collection"), "{}", output);
        let info: Vec<_> = output.lines().filter(|l| l.contains(" INFO ")).collect();
        assert!(info.is_empty(), "unexpected INFO lines: {:?}", info);
    }
}
