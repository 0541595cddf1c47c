use std::collections::HashMap;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;

use lending_client::error::ApiError;

/// Hierarchical cache key. Invalidating a key also invalidates every key it
/// is a prefix of, so dropping `["bookings"]` clears `["bookings", "pending"]`
/// and `["bookings", "me"]` in one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QueryKey(segments.into_iter().map(Into::into).collect())
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

/// Well-known keys used by the views. Kept in one place so the invalidation
/// sets in mutations line up with what the reads cache under.
pub mod keys {
    use lending_client::api::EquipmentQuery;

    use super::QueryKey;

    pub fn equipments() -> QueryKey {
        QueryKey::new(["equipments"])
    }

    pub fn equipments_search(query: &EquipmentQuery) -> QueryKey {
        let mut segments = vec!["equipments".to_string(), "search".to_string()];
        for (name, value) in query.to_query_pairs() {
            segments.push(format!("{name}={value}"));
        }
        QueryKey(segments)
    }

    pub fn bookings() -> QueryKey {
        QueryKey::new(["bookings"])
    }

    pub fn my_bookings() -> QueryKey {
        QueryKey::new(["bookings", "me"])
    }

    pub fn pending_bookings() -> QueryKey {
        QueryKey::new(["bookings", "pending"])
    }

    pub fn loans() -> QueryKey {
        QueryKey::new(["loans"])
    }

    pub fn my_loans() -> QueryKey {
        QueryKey::new(["loans", "me"])
    }
}

#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("query superseded with no cached value present")]
    Superseded,

    #[error("failed to decode cached value: {0}")]
    Decode(#[from] serde_json::Error),
}

enum Ticket {
    Leader(watch::Sender<()>),
    Joiner(watch::Receiver<()>),
}

/// Process-wide fetch cache with last-write-wins semantics and at most one
/// in-flight fetch per key. Values are stored as JSON so independent views
/// can share entries without agreeing on a concrete type parameter.
#[derive(Default)]
pub struct QueryCache {
    entries: parking_lot::RwLock<HashMap<QueryKey, serde_json::Value>>,
    inflight: parking_lot::Mutex<HashMap<QueryKey, watch::Receiver<()>>>,
}

impl QueryCache {
    /// Peeks at the cached value without fetching.
    pub fn get<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Drops every entry whose key starts with `prefix`. The next read of an
    /// invalidated key goes back to the backend.
    pub fn invalidate(&self, prefix: &QueryKey) {
        self.entries.write().retain(|key, _| !key.starts_with(prefix));
    }

    /// Returns the cached value when present, otherwise fetches and caches.
    pub async fn fetch<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<T, QueryError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        if let Some(value) = self.entries.read().get(key).cloned() {
            return Ok(serde_json::from_value(value)?);
        }
        self.refetch(key, fetcher).await
    }

    /// Always fetches and overwrites the cache entry. Concurrent calls for
    /// the same key are de-duplicated: one caller becomes the leader and
    /// issues the request, the rest wait and read its result from the cache.
    pub async fn refetch<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<T, QueryError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let ticket = {
            let mut inflight = self.inflight.lock();
            if let Some(rx) = inflight.get(key) {
                Ticket::Joiner(rx.clone())
            } else {
                let (tx, rx) = watch::channel(());
                inflight.insert(key.clone(), rx);
                Ticket::Leader(tx)
            }
        };

        match ticket {
            Ticket::Joiner(mut rx) => {
                // Woken when the leader drops its sender, success or not.
                let _ = rx.changed().await;
                match self.entries.read().get(key).cloned() {
                    Some(value) => Ok(serde_json::from_value(value)?),
                    None => Err(QueryError::Superseded),
                }
            }
            Ticket::Leader(tx) => {
                // The guard also releases the slot if this future is dropped
                // mid-fetch; joiners then fall back to whatever is cached.
                let _slot = InflightSlot { cache: self, key };
                let result = fetcher().await;
                match result {
                    Ok(value) => {
                        let raw = serde_json::to_value(&value)?;
                        self.entries.write().insert(key.clone(), raw);
                        drop(tx);
                        Ok(value)
                    }
                    Err(err) => {
                        drop(tx);
                        Err(err.into())
                    }
                }
            }
        }
    }
}

struct InflightSlot<'a> {
    cache: &'a QueryCache,
    key: &'a QueryKey,
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        self.cache.inflight.lock().remove(self.key);
    }
}
