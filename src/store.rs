use std::fmt::Debug;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use fieldx_plus::fx_plus;
use tracing::debug;
use tracing::trace;

use crate::notify::ChangeNotifier;
use crate::queue::UpdateQueue;
use crate::traits::CacheValue;
use crate::traits::ChangeObserver;
use crate::types::AsyncResult;
use crate::types::CachePayload;
use crate::types::CacheState;
use crate::types::StoreError;
use crate::types::StoreIdentity;

/// One durable value bound to one backing file, accessed only through a
/// [`UpdateQueue`].
///
/// Every public operation returns immediately with a future (or, for
/// [`retrieve_current`](Self::retrieve_current), with an [`AsyncResult`])
/// and performs its actual work on the queue's execution context. Operations
/// against different stores run fully in parallel; operations against the
/// same store never overlap.
///
/// The backing file is read and rewritten whole on every persisted update; a
/// corrupt or partially written file surfaces as a load failure, which is
/// recorded as *sticky*: reads keep reporting it until a successful in-memory
/// write or an explicit [`clear`](Self::clear). Only load failures are sticky
/// — the load happens implicitly and must not be retried unboundedly by
/// concurrent fast-response reads. A write failure is reported to that write's
/// caller alone and leaves the prior durable copy intact.
///
/// ```ignore
/// let store = CacheStore::builder()
///     .path(dir.join("profile.cache"))
///     .seed(Profile::default())
///     .notifier(notifier)
///     .build()?;
///
/// store.write(true, |profile| profile.with_avatar(avatar)).await?;
/// ```
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`CacheStore`].", "", "See [`CacheStore::builder()`] method."),
        method_doc("Implement builder pattern for [`CacheStore`]."),
    )
)]
pub struct CacheStore<T>
where
    T: CacheValue,
{
    /// The backing file. Exclusively owned by this store's queue; no second
    /// store instance or external process may write the same path.
    #[fieldx(builder(required, into), get)]
    path: PathBuf,

    /// Seeds the in-memory value before the first load and again after
    /// [`clear`](Self::clear).
    #[fieldx(builder(required), get)]
    seed: T,

    #[fieldx(builder(required, into), get(clone))]
    notifier: Arc<ChangeNotifier>,

    #[fieldx(lazy, private, get(clone), builder(off))]
    queue: Arc<UpdateQueue<CachePayload<T>>>,

    #[fieldx(lazy, get(clone), builder(off))]
    identity: StoreIdentity,

    /// Short log tag: the backing file's stem.
    #[fieldx(lazy, get, builder(off))]
    name: String,

    // Sticky last-load failure. Kept under its own lock, beside the queue
    // payload, so fast-response reads can see it without queueing.
    #[fieldx(lock, optional, private, get(clone), set, clearer, builder(off))]
    last_load_failure: StoreError,
}

impl<T> CacheStore<T>
where
    T: CacheValue,
{
    fn build_queue(&self) -> Arc<UpdateQueue<CachePayload<T>>> {
        UpdateQueue::builder()
            .payload(CachePayload::unloaded(self.seed().clone()))
            .build()
            .expect("payload is the queue builder's only required field and it is set")
    }

    fn build_identity(&self) -> StoreIdentity {
        StoreIdentity::from_path(self.path())
    }

    fn build_name(&self) -> String {
        self.path()
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.identity().as_str().to_string())
    }

    /// Fast-response read. Never blocks on disk I/O: while the store is still
    /// [`CacheState::Unloaded`] it kicks off an asynchronous load and returns
    /// [`AsyncResult::Pending`] right away. A recorded sticky load failure
    /// short-circuits to `Failure`.
    ///
    /// The returned value is whatever is currently in memory, which may
    /// predate an in-flight write — writes deliberately race ahead of pending
    /// reads. Callers that need strict read-after-load ordering use
    /// [`prime_in_memory_cache`](Self::prime_in_memory_cache).
    pub fn retrieve_current(&self) -> AsyncResult<T> {
        if let Some(failure) = self.last_load_failure() {
            return AsyncResult::Failure(failure);
        }

        let payload = self.queue().payload();
        match payload.state {
            CacheState::Unloaded => {
                let myself = self.myself().unwrap();
                tokio::spawn(async move {
                    if let Err(error) = myself.prime_in_memory_cache(false).await {
                        debug!("[{}] implicit load failed: {error}", myself.name());
                    }
                });
                AsyncResult::Pending
            }
            CacheState::InMemoryOnly | CacheState::InMemoryAndOnDisk => AsyncResult::Success(payload.value),
        }
    }

    /// Enqueues a load of the backing file. A no-op when the store is already
    /// loaded, unless `force_reload` is set. By the time the returned future
    /// completes the in-memory value reflects the on-disk content, or the
    /// prior in-memory content when no file exists or the load failed (the
    /// failure is returned and recorded sticky).
    pub async fn prime_in_memory_cache(&self, force_reload: bool) -> Result<(), StoreError> {
        let myself = self.myself().unwrap();
        self.queue()
            .enqueue::<Result<(), StoreError>>(Box::new(move |queue| {
                Box::pin(async move { myself.load_exclusive(&queue, force_reload).await })
            }))
            .await?
    }

    /// Guarantees the in-memory and on-disk copies are synchronized once the
    /// returned future completes.
    ///
    /// When no durable file exists yet, `initializer` is applied to the
    /// current in-memory value (the seed on first use) and the result is
    /// persisted; when a load failure occurred, the initializer re-derives a
    /// valid state the same way. With both copies already synced this is a
    /// no-op. Use for first-time setup that must be deterministic across
    /// process restarts.
    pub async fn prime_in_memory_and_disk_cache<F>(&self, initializer: F) -> Result<(), StoreError>
    where
        F: FnOnce(T) -> T + Send + 'static,
    {
        let myself = self.myself().unwrap();
        self.queue()
            .enqueue::<Result<(), StoreError>>(Box::new(move |queue| {
                Box::pin(async move {
                    if queue.payload().state == CacheState::InMemoryAndOnDisk {
                        return Ok(());
                    }

                    if queue.payload().state == CacheState::Unloaded {
                        match myself.load_exclusive(&queue, false).await {
                            Ok(()) if queue.payload().state == CacheState::InMemoryAndOnDisk => return Ok(()),
                            // The durable copy is absent or unreadable; fall
                            // through and rebuild it from the initializer.
                            Ok(()) | Err(_) => (),
                        }
                    }

                    let next = initializer(queue.payload().value);
                    myself.persist(&next).await?;
                    queue.replace_payload(CachePayload {
                        state: CacheState::InMemoryAndOnDisk,
                        value: next,
                    });
                    myself.clear_last_load_failure();
                    myself.notifier().notify(&myself.identity());
                    Ok(())
                })
            }))
            .await?
    }

    /// One-shot ordered read. Unlike [`retrieve_current`](Self::retrieve_current)
    /// it never reports a pending placeholder: it waits its turn in the
    /// queue, loading first if needed, and resolves to the value — or to the
    /// sticky load failure if one is recorded.
    pub async fn read_once(&self) -> Result<T, StoreError> {
        let myself = self.myself().unwrap();
        self.queue()
            .enqueue::<Result<T, StoreError>>(Box::new(move |queue| {
                Box::pin(async move {
                    if queue.payload().state == CacheState::Unloaded {
                        myself.load_exclusive(&queue, false).await?;
                    }
                    else if let Some(failure) = myself.last_load_failure() {
                        return Err(failure);
                    }
                    Ok(queue.payload().value)
                })
            }))
            .await?
    }

    /// Enqueues `f`, persists its result to the backing file and, when
    /// `update_in_memory` is set, installs it as the in-memory value, clears
    /// any sticky failure and notifies subscribers. With `update_in_memory`
    /// off only the disk copy changes — an out-of-band snapshot write that
    /// leaves readers and subscribers untouched.
    pub async fn write<F>(&self, update_in_memory: bool, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(T) -> T + Send + 'static,
    {
        self.write_with_result(update_in_memory, move |value| (f(value), ())).await
    }

    /// Same as [`write`](Self::write), but the transform also yields an
    /// auxiliary result returned to the caller — a typed acknowledgment for
    /// controllers layered on top.
    pub async fn write_with_result<F, R>(&self, update_in_memory: bool, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(T) -> (T, R) + Send + 'static,
        R: Send + 'static,
    {
        let myself = self.myself().unwrap();
        self.queue()
            .enqueue::<Result<R, StoreError>>(Box::new(move |queue| {
                Box::pin(async move {
                    let (next, result) = f(queue.payload().value);
                    myself.persist(&next).await?;
                    if update_in_memory {
                        queue.replace_payload(CachePayload {
                            state: CacheState::InMemoryAndOnDisk,
                            value: next,
                        });
                        myself.clear_last_load_failure();
                        myself.notifier().notify(&myself.identity());
                    }
                    Ok(result)
                })
            }))
            .await?
    }

    /// Deletes the backing file (idempotent when absent), clears sticky
    /// failure memory and resets the in-memory value to the seed with state
    /// [`CacheState::Unloaded`]. Subscribers are always notified.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let myself = self.myself().unwrap();
        self.queue()
            .enqueue::<Result<(), StoreError>>(Box::new(move |queue| {
                Box::pin(async move {
                    match tokio::fs::remove_file(myself.path()).await {
                        Ok(()) => trace!("[{}] backing file deleted", myself.name()),
                        Err(error) if error.kind() == io::ErrorKind::NotFound => (),
                        Err(error) => {
                            return Err(StoreError::Delete {
                                path: myself.path().clone(),
                                cause: Arc::new(error),
                            });
                        }
                    }
                    queue.replace_payload(CachePayload::unloaded(myself.seed().clone()));
                    myself.clear_last_load_failure();
                    myself.notifier().notify(&myself.identity());
                    Ok(())
                })
            }))
            .await?
    }

    /// Snapshot of the durability state. Like the fast-response read this
    /// does not wait for in-flight operations.
    pub fn state(&self) -> CacheState {
        self.queue().payload().state
    }

    /// Registers `observer` for this store's change notifications.
    pub fn subscribe(&self, observer: Arc<dyn ChangeObserver>) {
        self.notifier().register(self.identity(), observer);
    }

    // Runs on the queue's execution context only.
    async fn load_exclusive(&self, queue: &Arc<UpdateQueue<CachePayload<T>>>, force_reload: bool) -> Result<(), StoreError> {
        let payload = queue.payload();
        if payload.state != CacheState::Unloaded && !force_reload {
            return Ok(());
        }

        match self.read_disk().await {
            Ok(Some(value)) => {
                debug!("[{}] loaded from disk", self.name());
                queue.replace_payload(CachePayload {
                    state: CacheState::InMemoryAndOnDisk,
                    value,
                });
                self.clear_last_load_failure();
                Ok(())
            }
            Ok(None) => {
                debug!("[{}] no backing file; keeping in-memory value", self.name());
                queue.replace_payload(CachePayload {
                    state: CacheState::InMemoryOnly,
                    value: payload.value,
                });
                self.clear_last_load_failure();
                Ok(())
            }
            Err(error) => {
                debug!("[{}] load failed: {error}", self.name());
                queue.replace_payload(CachePayload {
                    state: CacheState::InMemoryOnly,
                    value: payload.value,
                });
                self.set_last_load_failure(error.clone());
                Err(error)
            }
        }
    }

    async fn read_disk(&self) -> Result<Option<T>, StoreError> {
        match tokio::fs::read(self.path()).await {
            Ok(bytes) => Ok(Some(postcard::from_bytes(&bytes).map_err(|error| StoreError::Decode {
                path: self.path().clone(),
                detail: error.to_string(),
            })?)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(StoreError::Read {
                path: self.path().clone(),
                cause: Arc::new(error),
            }),
        }
    }

    async fn persist(&self, value: &T) -> Result<(), StoreError> {
        let bytes = postcard::to_stdvec(value).map_err(|error| StoreError::Encode {
            path: self.path().clone(),
            detail: error.to_string(),
        })?;
        if let Some(dir) = self.path().parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|error| StoreError::Write {
                path: self.path().clone(),
                cause: Arc::new(error),
            })?;
        }
        tokio::fs::write(self.path(), bytes).await.map_err(|error| StoreError::Write {
            path: self.path().clone(),
            cause: Arc::new(error),
        })?;
        trace!("[{}] persisted to disk", self.name());
        Ok(())
    }
}

impl<T> Debug for CacheStore<T>
where
    T: CacheValue,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("path", self.path())
            .field("state", &self.state())
            .finish()
    }
}
