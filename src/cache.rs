pub mod persistent;

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::logging;
use crate::metrics::Metrics;
use persistent::PersistentStore;

/// Record groups the offline cache keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Projects,
    Trackers,
    IssueStatuses,
    IssuePriorities,
    Queries,
    CustomFields,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Projects => "projects",
            Self::Trackers => "trackers",
            Self::IssueStatuses => "issue_statuses",
            Self::IssuePriorities => "issue_priorities",
            Self::Queries => "queries",
            Self::CustomFields => "custom_fields",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("offline cache storage failed: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("offline cache payload could not be encoded or decoded: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct OfflineCache {
    store: PersistentStore,
    metrics: Arc<Metrics>,
}

impl OfflineCache {
    pub fn open(db_path: &Path, metrics: Arc<Metrics>) -> Result<Self, CacheError> {
        Ok(Self {
            store: PersistentStore::new(db_path)?,
            metrics,
        })
    }

    pub fn in_memory(metrics: Arc<Metrics>) -> Result<Self, CacheError> {
        Self::open(Path::new(":memory:"), metrics)
    }

    pub fn store<T: Serialize>(&self, kind: RecordKind, records: &[T]) -> Result<(), CacheError> {
        let payloads = records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        let now = chrono::Utc::now().to_rfc3339();
        self.store.replace_all(kind.as_str(), &payloads, &now)?;
        logging::debug(format!(
            "offline cache stored {} {}",
            payloads.len(),
            kind.as_str()
        ));
        Ok(())
    }

    /// Cached records of `kind`, empty when that kind was never stored.
    pub fn load<T: DeserializeOwned>(&self, kind: RecordKind) -> Result<Vec<T>, CacheError> {
        let payloads = self.store.load_all(kind.as_str())?;
        if payloads.is_empty() {
            self.metrics.inc_cache_miss();
        } else {
            self.metrics.inc_cache_hit();
        }
        payloads
            .iter()
            .map(|payload| serde_json::from_str(payload).map_err(CacheError::from))
            .collect()
    }

    pub fn refreshed_at(
        &self,
        kind: RecordKind,
    ) -> Result<Option<chrono::DateTime<chrono::FixedOffset>>, CacheError> {
        Ok(self
            .store
            .refreshed_at(kind.as_str())?
            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(&raw).ok()))
    }

    /// Fetches fresh records and stores them. When the fetch fails and a
    /// previous refresh exists, the cached records are returned instead.
    pub fn refresh_stale_safe<T, F, E>(&self, kind: RecordKind, fetch: F) -> Result<Vec<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<Vec<T>, E>,
        E: From<CacheError> + std::fmt::Display,
    {
        match fetch() {
            Ok(fresh) => {
                self.store(kind, &fresh)?;
                Ok(fresh)
            }
            Err(err) => {
                if self.store.refreshed_at(kind.as_str()).map_err(CacheError::from)?.is_none() {
                    return Err(err);
                }
                logging::warn(format!(
                    "refresh of {} failed, serving cached copy: {}",
                    kind.as_str(),
                    err
                ));
                self.metrics.inc_stale_served();
                Ok(self.load(kind)?)
            }
        }
    }

    /// Drops every cached record, e.g. when the user signs out.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.store.clear()?;
        Ok(())
    }
}
