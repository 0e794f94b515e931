//! Concurrent API registry.
//!
//! Entries live in an `scc::HashMap` (per-bucket locking, no global lock) and each entry
//! holds its descriptor behind an `ArcSwap`, so a status change publishes a complete new
//! `Api` in one pointer swap. Readers always get a whole snapshot, never a half-written one.
//!
//! Unknown names are never an error: lookups report absence and status changes become
//! no-ops.
use std::{collections::HashSet, sync::Arc};

use arc_swap::ArcSwap;
use scc::HashMap;

use crate::{
    core::api::{Api, ApiStatus},
    metrics,
};

type ApiEntry = Arc<ArcSwap<Api>>;

/// Name → API store shared by the dispatch path and whatever drives liveness changes.
/// Construct one per gateway and pass it around as `Arc<ApiRegistry>`.
#[derive(Default)]
pub struct ApiRegistry {
    apis: HashMap<String, ApiEntry>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `api`, replacing the descriptor of any entry with the same name.
    ///
    /// An existing entry is updated in place, so a concurrent status change always lands on
    /// the entry readers see.
    pub async fn register(&self, api: Api) {
        tracing::debug!(api = %api.name, status = %api.status, "registering api");
        let api = Arc::new(api);
        self.put(&api, |_| Arc::clone(&api)).await;
    }

    /// Install a reloaded descriptor for `api.name`, keeping the current status of an
    /// existing entry. New names are inserted with `api.status`.
    pub async fn refresh(&self, api: Api) {
        let api = Arc::new(api);
        self.put(&api, |current| {
            Arc::new(Api {
                status: current.status,
                ..Api::clone(&api)
            })
        })
        .await;
    }

    async fn put(&self, api: &Arc<Api>, update: impl Fn(&Api) -> Arc<Api>) {
        loop {
            if let Some(entry) = self.entry(&api.name).await {
                entry.rcu(|current| update(current.as_ref()));
                return;
            }
            let entry = Arc::new(ArcSwap::new(Arc::clone(api)));
            match self.apis.insert_async(api.name.clone(), entry).await {
                Ok(()) => return,
                // Lost an insert race; update the winner instead
                Err(_) => continue,
            }
        }
    }

    async fn entry(&self, name: &str) -> Option<ApiEntry> {
        self.apis.read_async(name, |_, entry| entry.clone()).await
    }

    /// Remove an entry. Returns whether it existed.
    pub async fn deregister(&self, name: &str) -> bool {
        let removed = self.apis.remove_async(name).await.is_some();
        if removed {
            tracing::debug!(api = %name, "deregistered api");
        }
        removed
    }

    /// Snapshot of the entry for `name`, if registered.
    pub async fn find(&self, name: &str) -> Option<Arc<Api>> {
        self.apis
            .read_async(name, |_, entry| entry.load_full())
            .await
    }

    /// True iff `name` is registered and its status is `Up`.
    pub async fn is_up(&self, name: &str) -> bool {
        self.apis
            .read_async(name, |_, entry| entry.load().is_up())
            .await
            .unwrap_or(false)
    }

    /// Mark `name` as `Up`. No-op for unknown names.
    pub async fn online(&self, name: &str) -> bool {
        self.set_status(name, ApiStatus::Up).await
    }

    /// Mark `name` as `Down`. No-op for unknown names.
    pub async fn offline(&self, name: &str) -> bool {
        self.set_status(name, ApiStatus::Down).await
    }

    /// Swap in a copy of the entry carrying `status`. Returns false when `name` is unknown.
    pub async fn set_status(&self, name: &str, status: ApiStatus) -> bool {
        // Clone the entry handle out so the bucket lock is not held during the swap
        let Some(entry) = self.entry(name).await else {
            tracing::debug!(api = %name, %status, "status change ignored for unknown api");
            return false;
        };

        let previous = entry.rcu(|current| Api {
            status,
            ..Api::clone(current)
        });
        if previous.status != status {
            tracing::info!(api = %name, from = %previous.status, to = %status, "api status changed");
            metrics::increment_api_status_change(status);
        }
        true
    }

    /// Compare an API's bound method against a method name. Pure.
    pub fn match_method(api: &Api, method: &str) -> bool {
        api.match_method(method)
    }

    pub fn len(&self) -> usize {
        self.apis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }

    /// Names of all registered APIs, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.apis.len());
        self.apis
            .retain_async(|name, _| {
                names.push(name.clone());
                true
            })
            .await;
        names.sort();
        names
    }

    /// Current descriptors of all registered APIs, sorted by name.
    pub async fn snapshot(&self) -> Vec<Arc<Api>> {
        let mut apis = Vec::with_capacity(self.apis.len());
        self.apis
            .retain_async(|_, entry| {
                apis.push(entry.load_full());
                true
            })
            .await;
        apis.sort_by(|a, b| a.name.cmp(&b.name));
        apis
    }

    /// Deregister every name in `names` that is not in `keep`.
    pub(crate) async fn deregister_missing(&self, names: &[String], keep: &HashSet<&str>) {
        for name in names {
            if !keep.contains(name.as_str()) {
                self.deregister(name).await;
            }
        }
    }
}
