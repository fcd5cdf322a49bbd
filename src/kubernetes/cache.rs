// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Informer cache for cluster objects
//!
//! Each watched kind gets a reflector store fed by a `kube::runtime` watcher.
//! The cache only orchestrates those informers:
//! - `start()` runs them until the cancellation token fires
//! - `wait_for_cache_sync()` blocks until every started informer has listed
//! - reads of a kind not yet watched start an informer lazily and wait for it
//!
//! Lifecycle is published as a [`CacheHealth`] value:
//! ```text
//! NotStarted -> Syncing -> Synced -> Stopped
//!                  |          |
//!                  +----------+-----> Failed
//! ```
//! `Failed` is terminal: the loop is not restarted and reads are served from
//! whatever the stores last held.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::direct::api_for;
use crate::scheme::{RegisteredType, Scheme, display_gvk, gvk_of};

/// Base delay for watch error backoff (doubles each consecutive failure)
const WATCH_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Upper bound for watch error backoff
const WATCH_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Errors from the cache facet
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache has already been started")]
    AlreadyStarted,

    #[error("cache has not been started")]
    NotStarted,

    #[error("cache is stopped")]
    Stopped,

    #[error("no kind {0} is registered in the type registry")]
    NotRegistered(String),

    /// The informer for this kind terminated before it synced
    #[error("informer for {0} is unavailable")]
    Unavailable(String),

    #[error("informer for {kind} failed: {source}")]
    Informer {
        kind: String,
        #[source]
        source: watcher::Error,
    },

    #[error("informer task for {kind} panicked: {message}")]
    Panicked { kind: String, message: String },

    #[error("failed to decode cached {kind}: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Observable state of the synchronization loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheHealth {
    NotStarted,
    Syncing,
    Synced,
    Stopped,
    Failed(String),
}

impl CacheHealth {
    /// Reads reflect the initial list of every started informer
    pub fn is_ready(&self) -> bool {
        matches!(self, CacheHealth::Synced)
    }

    /// The loop has exited and will not run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, CacheHealth::Stopped | CacheHealth::Failed(_))
    }
}

impl fmt::Display for CacheHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheHealth::NotStarted => f.write_str("not started"),
            CacheHealth::Syncing => f.write_str("syncing"),
            CacheHealth::Synced => f.write_str("synced"),
            CacheHealth::Stopped => f.write_str("stopped"),
            CacheHealth::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Cache construction options
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Kinds watched from the first start; their initial list gates readiness
    pub warm: Vec<GroupVersionKind>,
}

/// An informer waiting to be picked up by the running loop
struct PendingInformer {
    gvk: GroupVersionKind,
    api: Api<DynamicObject>,
    writer: Writer<DynamicObject>,
    /// Failure of a warm informer fails the whole cache
    critical: bool,
}

/// Informer-backed, eventually consistent view of cluster objects
pub struct Cache {
    client: Client,
    scheme: Arc<Scheme>,
    stores: RwLock<HashMap<GroupVersionKind, Store<DynamicObject>>>,
    pending_tx: mpsc::UnboundedSender<PendingInformer>,
    pending_rx: Mutex<Option<mpsc::UnboundedReceiver<PendingInformer>>>,
    health: watch::Sender<CacheHealth>,
    lifetime: OnceLock<CancellationToken>,
}

impl Cache {
    /// Build a cache bound to a registry snapshot. No I/O happens until `start`.
    pub(crate) fn new(
        client: Client,
        scheme: Arc<Scheme>,
        options: &CacheOptions,
    ) -> Result<Self, CacheError> {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let mut stores = HashMap::new();

        for gvk in &options.warm {
            let ty = scheme
                .get(gvk)
                .ok_or_else(|| CacheError::NotRegistered(display_gvk(gvk)))?;
            if stores.contains_key(gvk) {
                continue;
            }
            let (store, pending) = new_informer(&client, ty, true);
            // Receiver is held above, send cannot fail
            let _ = pending_tx.send(pending);
            stores.insert(gvk.clone(), store);
        }

        let (health, _) = watch::channel(CacheHealth::NotStarted);

        Ok(Self {
            client,
            scheme,
            stores: RwLock::new(stores),
            pending_tx,
            pending_rx: Mutex::new(Some(pending_rx)),
            health,
            lifetime: OnceLock::new(),
        })
    }

    /// Current health
    pub fn health(&self) -> CacheHealth {
        self.health.borrow().clone()
    }

    /// Subscribe to health transitions
    pub fn subscribe(&self) -> watch::Receiver<CacheHealth> {
        self.health.subscribe()
    }

    /// Kinds with an informer (running, pending or synced)
    pub async fn watched_kinds(&self) -> Vec<GroupVersionKind> {
        let mut kinds: Vec<_> = self.stores.read().await.keys().cloned().collect();
        kinds.sort_by(|a, b| (&a.group, &a.kind).cmp(&(&b.group, &b.kind)));
        kinds
    }

    /// Run every informer until `cancel` fires.
    ///
    /// Returns `Ok` on cancellation. Returns an error if a warm informer fails
    /// irrecoverably; the loop is not restarted. All informer tasks have exited
    /// by the time this returns.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), CacheError> {
        let mut pending = self
            .pending_rx
            .lock()
            .await
            .take()
            .ok_or(CacheError::AlreadyStarted)?;
        let _ = self.lifetime.set(cancel.clone());
        self.health.send_replace(CacheHealth::Syncing);

        let mut informers = JoinSet::new();
        let mut kinds: HashMap<tokio::task::Id, String> = HashMap::new();

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                Some(informer) = pending.recv() => {
                    let kind = display_gvk(&informer.gvk);
                    debug!(kind = %kind, critical = informer.critical, "Starting informer");
                    let handle = informers.spawn(run_informer(informer, cancel.child_token()));
                    kinds.insert(handle.id(), kind);
                }
                Some(joined) = informers.join_next_with_id() => match joined {
                    Ok((id, (_, _, Ok(())))) => {
                        kinds.remove(&id);
                    }
                    Ok((id, (_, true, Err(e)))) => {
                        kinds.remove(&id);
                        break Err(e);
                    }
                    Ok((id, (gvk, false, Err(e)))) => {
                        kinds.remove(&id);
                        // Lazily added kinds fail alone; a later read starts a fresh informer
                        warn!(error = %e, "Informer failed, dropping it from the cache");
                        self.stores.write().await.remove(&gvk);
                    }
                    Err(join_err) => {
                        let kind = kinds.remove(&join_err.id()).unwrap_or_default();
                        break Err(CacheError::Panicked {
                            kind,
                            message: join_err.to_string(),
                        });
                    }
                }
            }
        };

        // Dropping the receiver discards informers that were never started
        drop(pending);
        informers.shutdown().await;

        match &result {
            Ok(()) => {
                info!("Cache stopped");
                self.health.send_replace(CacheHealth::Stopped);
            }
            Err(e) => {
                self.health.send_replace(CacheHealth::Failed(e.to_string()));
            }
        }
        result
    }

    /// Block until the cache is started and every informer has synced.
    ///
    /// Returns `false` if `cancel` fires first or an informer terminated
    /// before its initial list completed.
    pub async fn wait_for_cache_sync(&self, cancel: &CancellationToken) -> bool {
        let mut health = self.health.subscribe();
        let started = tokio::select! {
            state = health.wait_for(|h| *h != CacheHealth::NotStarted) => state.is_ok(),
            _ = cancel.cancelled() => false,
        };
        if !started {
            return false;
        }

        let stores: Vec<Store<DynamicObject>> =
            self.stores.read().await.values().cloned().collect();
        let all_ready = async {
            futures::future::join_all(stores.iter().map(|s| s.wait_until_ready()))
                .await
                .into_iter()
                .all(|ready| ready.is_ok())
        };

        let synced = tokio::select! {
            synced = all_ready => synced,
            _ = cancel.cancelled() => false,
        };

        if synced {
            self.health.send_if_modified(|h| {
                if *h == CacheHealth::Syncing {
                    *h = CacheHealth::Synced;
                    true
                } else {
                    false
                }
            });
        }
        synced
    }

    /// Store for a kind, starting an informer if none exists, once it has synced
    async fn synced_store(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<(Store<DynamicObject>, &RegisteredType), CacheError> {
        let ty = self
            .scheme
            .get(gvk)
            .ok_or_else(|| CacheError::NotRegistered(display_gvk(gvk)))?;
        let lifetime = self.lifetime.get().ok_or(CacheError::NotStarted)?;
        if lifetime.is_cancelled() {
            return Err(CacheError::Stopped);
        }

        let existing = self.stores.read().await.get(gvk).cloned();
        let store = match existing {
            Some(store) => store,
            None => self.add_informer(ty).await?,
        };

        tokio::select! {
            ready = store.wait_until_ready() => {
                ready.map_err(|_| CacheError::Unavailable(display_gvk(gvk)))?;
            }
            _ = lifetime.cancelled() => return Err(CacheError::Stopped),
        }
        Ok((store, ty))
    }

    async fn add_informer(&self, ty: &RegisteredType) -> Result<Store<DynamicObject>, CacheError> {
        let mut stores = self.stores.write().await;
        if let Some(store) = stores.get(&ty.gvk) {
            return Ok(store.clone());
        }
        let (store, pending) = new_informer(&self.client, ty, false);
        self.pending_tx
            .send(pending)
            .map_err(|_| CacheError::Stopped)?;
        debug!(kind = %display_gvk(&ty.gvk), "Lazily added informer");
        stores.insert(ty.gvk.clone(), store.clone());
        Ok(store)
    }

    /// Fetch one cached object by kind.
    ///
    /// Namespaced kinds without a namespace use the client's default namespace.
    pub async fn get_dynamic(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Arc<DynamicObject>>, CacheError> {
        let (store, ty) = self.synced_store(gvk).await?;
        let mut key = ObjectRef::new_with(name, ty.resource.clone());
        if ty.is_namespaced() {
            key = key.within(namespace.unwrap_or(self.client.default_namespace()));
        }
        Ok(store.get(&key))
    }

    /// List cached objects by kind, sorted by namespace and name
    pub async fn list_dynamic(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<DynamicObject>>, CacheError> {
        let (store, ty) = self.synced_store(gvk).await?;
        let mut objects: Vec<_> = store
            .state()
            .into_iter()
            .filter(|obj| match namespace {
                Some(ns) if ty.is_namespaced() => obj.metadata.namespace.as_deref() == Some(ns),
                _ => true,
            })
            .collect();
        objects.sort_by(|a, b| {
            let (a, b) = (&a.metadata, &b.metadata);
            (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name))
        });
        Ok(objects)
    }

    /// Fetch one cached typed object
    pub async fn get<K>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>, CacheError>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let gvk = gvk_of::<K>();
        let Some(obj) = self.get_dynamic(&gvk, namespace, name).await? else {
            return Ok(None);
        };
        let ty = self.registered(&gvk)?;
        decode(ty, &obj).map(Some)
    }

    /// List cached typed objects
    pub async fn list<K>(&self, namespace: Option<&str>) -> Result<Vec<K>, CacheError>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let gvk = gvk_of::<K>();
        let objects = self.list_dynamic(&gvk, namespace).await?;
        let ty = self.registered(&gvk)?;
        objects.iter().map(|obj| decode(ty, obj)).collect()
    }

    fn registered(&self, gvk: &GroupVersionKind) -> Result<&RegisteredType, CacheError> {
        self.scheme
            .get(gvk)
            .ok_or_else(|| CacheError::NotRegistered(display_gvk(gvk)))
    }
}

fn decode<K: DeserializeOwned>(ty: &RegisteredType, obj: &DynamicObject) -> Result<K, CacheError> {
    ty.decode(obj).map_err(|source| CacheError::Decode {
        kind: ty.gvk.kind.clone(),
        source,
    })
}

fn new_informer(
    client: &Client,
    ty: &RegisteredType,
    critical: bool,
) -> (Store<DynamicObject>, PendingInformer) {
    let writer = Writer::new(ty.resource.clone());
    let store = writer.as_reader();
    let pending = PendingInformer {
        gvk: ty.gvk.clone(),
        api: api_for(client, ty, None),
        writer,
        critical,
    };
    (store, pending)
}

/// Errors that retrying cannot fix: the kind is not served or not readable
fn is_fatal_watch_error(err: &watcher::Error) -> bool {
    match err {
        watcher::Error::InitialListFailed(kube::Error::Api(resp))
        | watcher::Error::WatchStartFailed(kube::Error::Api(resp)) => {
            matches!(resp.code, 401 | 403 | 404)
        }
        _ => false,
    }
}

fn watch_backoff(failures: u32) -> Duration {
    WATCH_BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(failures.min(6)))
        .min(WATCH_BACKOFF_MAX)
}

/// Drive one reflector until cancelled or a fatal watch error
async fn run_informer(
    informer: PendingInformer,
    cancel: CancellationToken,
) -> (GroupVersionKind, bool, Result<(), CacheError>) {
    let PendingInformer {
        gvk,
        api,
        writer,
        critical,
    } = informer;
    let kind = display_gvk(&gvk);
    let stream = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default()));
    let mut stream = std::pin::pin!(stream);
    let mut failures = 0u32;

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            event = stream.next() => match event {
                Some(Ok(_)) => failures = 0,
                Some(Err(e)) if is_fatal_watch_error(&e) => {
                    error!(kind = %kind, error = %e, "Informer failed");
                    break Err(CacheError::Informer { kind: kind.clone(), source: e });
                }
                Some(Err(e)) => {
                    let delay = watch_backoff(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        kind = %kind,
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Watch error, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => break Ok(()),
            }
        }
    };

    debug!(kind = %kind, ok = result.is_ok(), "Informer exited");
    (gvk, critical, result)
}
