use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::EtlResult;

/// A shareable resource identified by a key.
///
/// Two instances with the same key are interchangeable: a [`ResourceMap`] hands out whichever
/// instance it cached first.
pub trait MappedResource: Send + Sync {
    /// Returns the key identifying this resource.
    fn key(&self) -> String;

    /// Releases whatever the resource holds. Called once, when its last user releases it.
    fn close(&self) -> impl Future<Output = EtlResult<()>> + Send;
}

struct ResourceEntry<R> {
    resource: Arc<R>,
    use_count: usize,
}

/// Reference counted cache of [`MappedResource`]s.
///
/// [`ResourceMap::get`] builds a candidate outside the lock, then either adopts it or returns
/// the instance already cached under the same key. [`ResourceMap::release`] closes a resource
/// while still holding the lock once its use count drops to zero, so no caller can acquire a
/// resource that is being closed.
pub struct ResourceMap<R> {
    resources: Mutex<HashMap<String, ResourceEntry<R>>>,
}

impl<R: MappedResource> ResourceMap<R> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the resource for the key of the candidate built by `load_or_new`.
    ///
    /// If a resource with that key is cached, its use count is incremented and the candidate is
    /// dropped without being closed. Otherwise the candidate is cached with a use count of one.
    pub async fn get<F, Fut>(&self, load_or_new: F) -> EtlResult<Arc<R>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EtlResult<R>>,
    {
        let candidate = load_or_new().await?;
        let key = candidate.key();

        let mut resources = self.resources.lock().await;
        match resources.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().use_count += 1;
                debug!(
                    key = %entry.key(),
                    use_count = entry.get().use_count,
                    "reusing cached resource"
                );

                Ok(entry.get().resource.clone())
            }
            Entry::Vacant(entry) => {
                let resource = Arc::new(candidate);
                debug!(key = %entry.key(), "caching new resource");
                entry.insert(ResourceEntry {
                    resource: resource.clone(),
                    use_count: 1,
                });

                Ok(resource)
            }
        }
    }

    /// Releases one use of `resource`.
    ///
    /// When the use count reaches zero the entry is removed and the resource closed. A close
    /// failure is returned, but the entry stays removed. Releasing a key that is not cached does
    /// nothing.
    pub async fn release(&self, resource: &R) -> EtlResult<()> {
        let key = resource.key();

        let mut resources = self.resources.lock().await;
        let Some(entry) = resources.get_mut(&key) else {
            warn!(%key, "released a resource that is not cached");
            return Ok(());
        };

        entry.use_count -= 1;
        if entry.use_count > 0 {
            return Ok(());
        }

        let Some(entry) = resources.remove(&key) else {
            return Ok(());
        };

        debug!(%key, "closing resource with no remaining users");
        let result = entry.resource.close().await;
        drop(resources);

        if let Err(err) = &result {
            warn!(%key, error = %err, "failed to close released resource");
        }

        result
    }

    /// Returns the use count of the resource's key, `0` when not cached.
    pub async fn use_count(&self, resource: &R) -> usize {
        let resources = self.resources.lock().await;

        resources
            .get(&resource.key())
            .map_or(0, |entry| entry.use_count)
    }

    /// Returns the number of cached resources.
    pub async fn len(&self) -> usize {
        self.resources.lock().await.len()
    }

    /// Returns `true` when no resource is cached.
    pub async fn is_empty(&self) -> bool {
        self.resources.lock().await.is_empty()
    }
}

impl<R: MappedResource> Default for ResourceMap<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for ResourceMap<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceMap").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::ErrorKind;
    use crate::{bail, etl_error};

    #[derive(Debug)]
    struct Connection {
        key: String,
        instance: usize,
        closed: Arc<StdMutex<Vec<usize>>>,
        fail_close: bool,
    }

    impl MappedResource for Connection {
        fn key(&self) -> String {
            self.key.clone()
        }

        async fn close(&self) -> EtlResult<()> {
            self.closed.lock().unwrap().push(self.instance);
            if self.fail_close {
                bail!(ErrorKind::ResourceCloseFailed, "Close failed");
            }

            Ok(())
        }
    }

    struct Factory {
        built: AtomicUsize,
        closed: Arc<StdMutex<Vec<usize>>>,
    }

    impl Factory {
        fn new() -> Self {
            Self {
                built: AtomicUsize::new(0),
                closed: Arc::default(),
            }
        }

        fn build(&self, key: &str, fail_close: bool) -> Connection {
            Connection {
                key: key.to_string(),
                instance: self.built.fetch_add(1, Ordering::SeqCst),
                closed: self.closed.clone(),
                fail_close,
            }
        }

        fn closed(&self) -> usize {
            self.closed.lock().unwrap().len()
        }

        /// Returns the instances closed so far, in close order.
        fn closed_instances(&self) -> Vec<usize> {
            self.closed.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn same_key_shares_first_instance() {
        let map = ResourceMap::new();
        let factory = Factory::new();

        let first = map.get(|| async { Ok(factory.build("db", false)) }).await.unwrap();
        let second = map.get(|| async { Ok(factory.build("db", false)) }).await.unwrap();

        assert_eq!(first.instance, 0);
        assert_eq!(second.instance, 0);
        assert_eq!(map.use_count(&first).await, 2);
        // The discarded candidate is never closed.
        assert_eq!(factory.closed(), 0);
    }

    #[tokio::test]
    async fn closes_once_when_last_user_releases() {
        let map = ResourceMap::new();
        let factory = Factory::new();

        let first = map.get(|| async { Ok(factory.build("db", false)) }).await.unwrap();
        let second = map.get(|| async { Ok(factory.build("db", false)) }).await.unwrap();

        map.release(&first).await.unwrap();
        assert_eq!(factory.closed(), 0);
        assert_eq!(map.use_count(&second).await, 1);

        map.release(&second).await.unwrap();
        assert_eq!(factory.closed(), 1);
        assert_eq!(map.use_count(&second).await, 0);
        assert!(map.is_empty().await);

        // Releasing again is a no-op.
        map.release(&second).await.unwrap();
        assert_eq!(factory.closed(), 1);
    }

    #[tokio::test]
    async fn close_failure_still_frees_the_slot() {
        let map = ResourceMap::new();
        let factory = Factory::new();

        let resource = map.get(|| async { Ok(factory.build("db", true)) }).await.unwrap();

        let err = map.release(&resource).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceCloseFailed);
        assert_eq!(map.len().await, 0);

        let fresh = map.get(|| async { Ok(factory.build("db", false)) }).await.unwrap();
        assert_eq!(fresh.instance, 1);
    }

    #[tokio::test]
    async fn failed_construction_leaves_map_untouched() {
        let map: ResourceMap<Connection> = ResourceMap::new();

        let err = map
            .get(|| async { Err(etl_error!(ErrorKind::DestinationError, "Connect failed")) })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationError);
        assert!(map.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_and_release_balance_out() {
        let map = Arc::new(ResourceMap::new());
        let factory = Arc::new(Factory::new());
        let cached = Arc::new(StdMutex::new(BTreeSet::new()));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let map = map.clone();
            let factory = factory.clone();
            let cached = cached.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let resource = map
                        .get(|| async { Ok(factory.build("shared", false)) })
                        .await
                        .unwrap();
                    cached.lock().unwrap().insert(resource.instance);
                    tokio::task::yield_now().await;
                    map.release(&resource).await.unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(map.is_empty().await);

        // Every instance handed out was the cached one, and each got closed exactly once.
        // Discarded candidates are never closed.
        let cached: Vec<usize> = cached.lock().unwrap().iter().copied().collect();
        let mut closed = factory.closed_instances();
        closed.sort_unstable();
        assert!(!cached.is_empty());
        assert_eq!(closed, cached);
    }
}
