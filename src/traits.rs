use std::fmt::Debug;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::StoreIdentity;

/// Everything a logical cache value must support: cloning for payload
/// snapshots, serde for the whole-file binary encoding, and thread safety for
/// the queue's execution context.
///
/// Blanket-implemented; never implement it by hand.
pub trait CacheValue: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A party interested in changes to one or more stores.
///
/// Observers receive only the identity of the store that changed, never the
/// new value — they are expected to re-derive their own view. Notification
/// happens after the mutation is reflected in the store's payload.
#[async_trait]
pub trait ChangeObserver: Send + Sync + 'static {
    async fn on_change(&self, identity: StoreIdentity);
}
