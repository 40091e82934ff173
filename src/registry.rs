use std::path::PathBuf;
use std::sync::Arc;

use fieldx_plus::fx_plus;
use moka::future::Cache;
use tracing::debug;

use crate::notify::ChangeNotifier;
use crate::store::CacheStore;
use crate::traits::CacheValue;
use crate::types::StoreError;

/// Key of a registry entry: the logical cache name plus an optional
/// partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreKey {
    name: String,
    partition: Option<String>,
}

impl StoreKey {
    fn new(name: &str, partition: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            partition: partition.map(str::to_string),
        }
    }
}

/// Lazily-populated mapping from `(cache name, partition)` to a store
/// instance.
///
/// Higher-level controllers keep one registry per payload type: each
/// partition (a user profile, say) gets its own independently serialized
/// store with its own backing file under a partition-scoped directory, while
/// shared stores live directly under the base directory. The same key always
/// resolves to the same instance for the registry's lifetime, so the
/// one-queue-per-file invariant holds.
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`StoreRegistry`].", "", "See [`StoreRegistry::builder()`] method."),
        method_doc("Implement builder pattern for [`StoreRegistry`]."),
    )
)]
pub struct StoreRegistry<T>
where
    T: CacheValue,
{
    /// Base directory for backing files. Shared stores live at
    /// `<base>/<name>.cache`, partition stores at
    /// `<base>/<partition>/<name>.cache`.
    #[fieldx(builder(required, into), get)]
    base_dir: PathBuf,

    /// Seed value handed to every store this registry creates.
    #[fieldx(builder(required), get)]
    seed: T,

    #[fieldx(builder(required, into), get(clone))]
    notifier: Arc<ChangeNotifier>,

    #[fieldx(get(copy), default(64))]
    max_stores: u64,

    #[fieldx(lazy, private, get(clone), builder(off))]
    stores: Cache<StoreKey, Arc<CacheStore<T>>>,
}

impl<T> StoreRegistry<T>
where
    T: CacheValue,
{
    fn build_stores(&self) -> Cache<StoreKey, Arc<CacheStore<T>>> {
        Cache::builder().max_capacity(self.max_stores()).build()
    }

    /// Resolves the shared (partition-less) store for `name`, creating it on
    /// first access.
    pub async fn store(&self, name: &str) -> Result<Arc<CacheStore<T>>, StoreError> {
        self.resolve(name, None).await
    }

    /// Resolves the store for `name` scoped to `partition`, creating it on
    /// first access. Stores of different partitions are fully independent:
    /// separate files, separate queues, separate notification identities.
    pub async fn partition_store(&self, name: &str, partition: &str) -> Result<Arc<CacheStore<T>>, StoreError> {
        self.resolve(name, Some(partition)).await
    }

    /// Drops the cached instance for the given key. Instance-level only: the
    /// backing file is left untouched, and the next resolve builds a fresh
    /// store over it.
    pub async fn forget(&self, name: &str, partition: Option<&str>) {
        self.stores().invalidate(&StoreKey::new(name, partition)).await;
    }

    async fn resolve(&self, name: &str, partition: Option<&str>) -> Result<Arc<CacheStore<T>>, StoreError> {
        let key = StoreKey::new(name, partition);
        let path = self.backing_path(name, partition);
        let seed = self.seed().clone();
        let notifier = self.notifier();

        let entry = self
            .stores()
            .entry(key)
            .or_try_insert_with(async move {
                debug!("creating cache store over {path:?}");
                CacheStore::builder()
                    .path(path)
                    .seed(seed)
                    .notifier(notifier)
                    .build()
                    .map_err(|error| StoreError::Initialization {
                        detail: error.to_string(),
                    })
            })
            .await
            .map_err(|error: Arc<StoreError>| error.as_ref().clone())?;

        Ok(entry.into_value())
    }

    fn backing_path(&self, name: &str, partition: Option<&str>) -> PathBuf {
        let file = format!("{name}.cache");
        match partition {
            Some(partition) => self.base_dir().join(partition).join(file),
            None => self.base_dir().join(file),
        }
    }
}
