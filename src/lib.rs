//! # sv-cache
//!
//! Persistent, ordering-safe caching for one logical value per store.
//!
//! Think of it as the durable settings/progress store of an application:
//! every stateful controller gets a small file-backed value it can read and
//! transform, with the guarantee that no two transforms ever interleave.
//!
//! # The Basics
//!
//! The `sv-cache` crate is designed for the following use case:
//!
//! - A handful of long-lived logical values (user progress, profile state,
//!   settings), each backed by its own file.
//! - Many concurrent tasks reading and transforming the same value.
//! - Callers that cannot afford to block on disk I/O for a read.
//!
//! The crate operates on the following principles:
//!
//! - One [`CacheStore`] manages exactly one serialized value and one backing
//!   file; there are no multi-key transactions and no cross-store guarantees.
//! - Every store owns one [`UpdateQueue`]: a single background worker that
//!   runs submitted transforms to completion, one at a time, in submission
//!   order. Operations against different stores run fully in parallel.
//! - Values are immutable data. A transform takes the current value by move
//!   and returns the next one; the queue installs it wholesale.
//! - The backing file holds a whole-file [`postcard`] encoding of the value
//!   and is rewritten completely on every persisted update.
//! - Fully async; a store never blocks the caller's thread on disk.
//!
//! # Reads, fast and ordered
//!
//! [`CacheStore::retrieve_current`] is the fast-response path: it answers
//! from memory immediately, returning [`types::AsyncResult::Pending`] while
//! the first implicit load is still outstanding. A write submitted while that
//! load is pending deliberately wins the race — callers that need strict
//! read-after-load ordering use [`CacheStore::prime_in_memory_cache`] or
//! [`CacheStore::read_once`], both of which take their turn in the queue.
//!
//! A failed load is recorded as a *sticky failure*: reads keep surfacing it
//! until a successful in-memory write or [`CacheStore::clear`], instead of
//! hammering the disk with retries from every fast-response read.
//!
//! # Change notification
//!
//! Stores publish to a [`notify::ChangeNotifier`]: a process-wide registry
//! from store identity to [`traits::ChangeObserver`]s. Observers are woken
//! after the mutation is reflected in the store's payload and re-derive their
//! own view; no payload crosses the bus.
//!
//! # Partitioned stores
//!
//! [`registry::StoreRegistry`] lazily builds and caches one store per
//! `(cache name, partition)` pair — the pattern behind per-profile
//! controllers, where every profile gets its own file and its own serialized
//! queue.

pub mod notify;
pub mod queue;
pub mod registry;
pub mod store;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use queue::UpdateQueue;
#[doc(inline)]
pub use store::CacheStore;

pub mod prelude {
    pub use crate::notify::ChangeNotifier;
    pub use crate::queue::UpdateQueue;
    pub use crate::registry::StoreRegistry;
    pub use crate::store::CacheStore;
    pub use crate::traits::CacheValue;
    pub use crate::traits::ChangeObserver;
    pub use crate::types::*;
}
