// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Per-cluster client bundling the four access facets
//!
//! Construction builds, in order: direct, cache, metrics, rawClientSet. The
//! first failure is returned tagged with its facet and nothing after it is
//! built. Once all facets exist, the cache loop is spawned on a child of the
//! caller's token and the constructor waits for the initial sync.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::Client;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache::{Cache, CacheHealth, CacheOptions};
use super::direct::DirectClient;
use super::metrics::MetricsClient;
use crate::error::{Error, Facet, Result};
use crate::progress::ProgressHandle;
use crate::scheme::{self, Scheme};

/// Floor for the cache facet's read timeout.
///
/// The API server ends a watch after up to 290s, usually without sending
/// anything in between, so a shorter client read timeout tears down every
/// quiet watch.
pub const WATCH_READ_TIMEOUT: Duration = Duration::from_secs(295);

/// Source of the underlying `kube::Client` for each facet
pub trait Connector: Send + Sync {
    fn connect(&self, facet: Facet) -> Result<Client, kube::Error>;
}

/// Every facet gets its own client (and connection pool) from the same config
impl Connector for kube::Config {
    fn connect(&self, facet: Facet) -> Result<Client, kube::Error> {
        Client::try_from(facet_config(self, facet))
    }
}

/// Configuration for one facet's client
fn facet_config(config: &kube::Config, facet: Facet) -> kube::Config {
    let mut config = config.clone();
    if facet == Facet::Cache {
        config.read_timeout = config.read_timeout.map(|t| t.max(WATCH_READ_TIMEOUT));
    }
    config
}

/// Options for [`ClusterClient::connect`]
#[derive(Clone, Default)]
pub struct ClientOptions {
    /// Cluster name used in logs and progress events
    pub name: String,
    pub cache: CacheOptions,
    pub progress: Option<ProgressHandle>,
}

impl ClientOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_cache(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_progress(mut self, progress: ProgressHandle) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Client for one cluster: direct, cached, metrics and raw access
pub struct ClusterClient {
    name: String,
    direct: DirectClient,
    cache: Arc<Cache>,
    metrics: MetricsClient,
    client_set: Client,
    health: watch::Receiver<CacheHealth>,
    lifetime: CancellationToken,
}

impl ClusterClient {
    /// Connect using the process-wide type registry.
    ///
    /// Returns once the cache has synced, `cancel` fired, or the cache loop
    /// failed. There is no timeout; wrap in `tokio::time::timeout` if needed.
    /// Dropping the returned future before it resolves stops the cache loop.
    pub async fn new(config: &kube::Config, cancel: CancellationToken) -> Result<Self> {
        let name = config.cluster_url.host().unwrap_or("cluster").to_string();
        Self::connect(
            config,
            scheme::global().snapshot(),
            ClientOptions::named(name),
            cancel,
        )
        .await
    }

    /// Connect with an explicit connector and registry snapshot
    pub async fn connect<C>(
        connector: &C,
        scheme: Arc<Scheme>,
        options: ClientOptions,
        cancel: CancellationToken,
    ) -> Result<Self>
    where
        C: Connector + ?Sized,
    {
        let start = Instant::now();
        let ClientOptions {
            name,
            cache: cache_options,
            progress,
        } = options;

        if let Some(progress) = &progress {
            progress.connecting(&name);
        }

        let built = Self::build(
            connector,
            scheme,
            &name,
            &cache_options,
            progress.as_ref(),
            cancel,
        )
        .await;
        let client = match built {
            Ok(client) => client,
            Err(e) => {
                warn!(cluster = %name, error = %e, "Cluster client construction failed");
                if let Some(progress) = &progress {
                    progress.failed(&name, &e.to_string());
                }
                return Err(e);
            }
        };

        // Until the client is handed out, nothing else can stop its cache loop
        let abandoned = client.lifetime.clone().drop_guard();
        let synced = client.wait_for_initial_sync().await;
        abandoned.disarm();

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match client.health() {
            CacheHealth::Synced => info!(cluster = %name, elapsed_ms, "Cluster client ready"),
            CacheHealth::Failed(_) => {
                warn!(cluster = %name, "Cluster client ready without a synced cache")
            }
            health => {
                debug!(cluster = %name, %health, "Construction cancelled before cache sync")
            }
        }
        if let Some(progress) = &progress {
            progress.connected(&name, synced, elapsed_ms);
        }

        Ok(client)
    }

    async fn build<C>(
        connector: &C,
        scheme: Arc<Scheme>,
        name: &str,
        cache_options: &CacheOptions,
        progress: Option<&ProgressHandle>,
        cancel: CancellationToken,
    ) -> Result<Self>
    where
        C: Connector + ?Sized,
    {
        let built = |facet: Facet| {
            debug!(cluster = %name, facet = %facet, "Facet built");
            if let Some(progress) = progress {
                progress.facet_built(name, facet);
            }
        };
        let connect = |facet: Facet| connector.connect(facet).map_err(|e| Error::build(facet, e));

        let direct = DirectClient::new(connect(Facet::Direct)?, Arc::clone(&scheme))
            .await
            .map_err(|e| Error::build(Facet::Direct, e))?;
        built(Facet::Direct);

        let cache = Cache::new(connect(Facet::Cache)?, scheme, cache_options)
            .map_err(|e| Error::build(Facet::Cache, e))?;
        built(Facet::Cache);

        let metrics = MetricsClient::new(connect(Facet::Metrics)?);
        built(Facet::Metrics);

        let client_set = connect(Facet::ClientSet)?;
        built(Facet::ClientSet);

        let cache = Arc::new(cache);
        let health = cache.subscribe();
        let lifetime = cancel.child_token();

        {
            let cache = Arc::clone(&cache);
            let token = lifetime.clone();
            let cluster = name.to_string();
            tokio::spawn(async move {
                if let Err(e) = cache.start(token).await {
                    error!(cluster = %cluster, error = %e, "start cache failed");
                }
            });
        }
        if let Some(progress) = progress {
            progress.cache_syncing(name);
        }

        Ok(Self {
            name: name.to_string(),
            direct,
            cache,
            metrics,
            client_set,
            health,
            lifetime,
        })
    }

    /// Wait for whichever comes first: sync, cancellation, or a dead cache loop
    async fn wait_for_initial_sync(&self) -> bool {
        let mut health = self.health.clone();
        tokio::select! {
            synced = self.cache.wait_for_cache_sync(&self.lifetime) => synced,
            _ = health.wait_for(CacheHealth::is_terminal) => false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Informer-backed reads
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Live reads and writes
    pub fn direct(&self) -> &DirectClient {
        &self.direct
    }

    pub fn metrics(&self) -> &MetricsClient {
        &self.metrics
    }

    /// Raw client, not bound to the type registry
    pub fn client_set(&self) -> &Client {
        &self.client_set
    }

    pub fn server_version(&self) -> &Info {
        self.direct.server_version()
    }

    pub fn health(&self) -> CacheHealth {
        self.health.borrow().clone()
    }

    /// The cache has completed its initial sync and is still running
    pub fn is_ready(&self) -> bool {
        self.health.borrow().is_ready()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<CacheHealth> {
        self.health.clone()
    }

    /// Resolves once the cache loop has exited (stopped or failed)
    pub async fn stopped(&self) {
        let mut health = self.health.clone();
        let _ = health.wait_for(CacheHealth::is_terminal).await;
    }

    /// Cancel the cache loop without waiting for it
    pub fn cancel(&self) {
        self.lifetime.cancel();
    }

    /// Cancel the cache loop and wait until every informer has exited
    pub async fn stop(&self) {
        self.lifetime.cancel();
        self.stopped().await;
        debug!(cluster = %self.name, "Cluster client stopped");
    }
}

impl fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClient")
            .field("name", &self.name)
            .field("version", &self.direct.server_version().git_version)
            .field("health", &*self.health.borrow())
            .finish_non_exhaustive()
    }
}
