// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Live multi-cluster manager
//!
//! Owns the cluster clients it is given: removing a cluster cancels its cache
//! loop and waits for the informers to exit.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::kubernetes::ClusterClient;

/// Registry of connected clusters, addressed by name
#[async_trait]
pub trait MultiClustersManager: Send + Sync {
    /// Register a connected cluster and return the shared handle
    async fn add(&self, name: &str, client: ClusterClient) -> Result<Arc<ClusterClient>>;

    async fn get(&self, name: &str) -> Result<Arc<ClusterClient>>;

    /// Unregister a cluster
    async fn remove(&self, name: &str) -> Result<()>;

    /// Registered names, sorted
    async fn names(&self) -> Vec<String>;

    /// Names of clusters whose cache is synced
    async fn healthy(&self) -> Vec<String>;

    /// Unregister every cluster
    async fn shutdown(&self);

    fn is_fake(&self) -> bool {
        false
    }
}

/// Name-to-client map shared by the live and fake managers
#[derive(Default)]
pub(crate) struct ClusterSet {
    clusters: RwLock<BTreeMap<String, Arc<ClusterClient>>>,
}

impl ClusterSet {
    pub(crate) async fn get(&self, name: &str) -> Result<Arc<ClusterClient>> {
        self.clusters
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ClusterNotFound(name.to_string()))
    }

    /// Insert unless present; returns the rejected client on conflict
    pub(crate) async fn try_insert(
        &self,
        name: &str,
        client: ClusterClient,
    ) -> std::result::Result<Arc<ClusterClient>, ClusterClient> {
        let mut clusters = self.clusters.write().await;
        if clusters.contains_key(name) {
            return Err(client);
        }
        let client = Arc::new(client);
        clusters.insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Insert, replacing any previous client of the same name
    pub(crate) async fn insert(&self, name: &str, client: ClusterClient) -> Arc<ClusterClient> {
        let client = Arc::new(client);
        self.clusters
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&client));
        client
    }

    pub(crate) async fn take(&self, name: &str) -> Option<Arc<ClusterClient>> {
        self.clusters.write().await.remove(name)
    }

    pub(crate) async fn drain(&self) -> Vec<(String, Arc<ClusterClient>)> {
        std::mem::take(&mut *self.clusters.write().await)
            .into_iter()
            .collect()
    }

    pub(crate) async fn names(&self) -> Vec<String> {
        self.clusters.read().await.keys().cloned().collect()
    }

    pub(crate) async fn healthy(&self) -> Vec<String> {
        self.clusters
            .read()
            .await
            .iter()
            .filter(|(_, client)| client.is_ready())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Manager that owns the lifecycle of its clusters
#[derive(Default)]
pub struct MultiClusterManager {
    clusters: ClusterSet,
}

impl MultiClusterManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MultiClustersManager for MultiClusterManager {
    async fn add(&self, name: &str, client: ClusterClient) -> Result<Arc<ClusterClient>> {
        match self.clusters.try_insert(name, client).await {
            Ok(client) => {
                info!(cluster = %name, health = %client.health(), "Cluster added");
                Ok(client)
            }
            Err(rejected) => {
                warn!(cluster = %name, "Cluster already registered, stopping the new client");
                rejected.stop().await;
                Err(Error::AlreadyRegistered(name.to_string()))
            }
        }
    }

    async fn get(&self, name: &str) -> Result<Arc<ClusterClient>> {
        self.clusters.get(name).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let client = self
            .clusters
            .take(name)
            .await
            .ok_or_else(|| Error::ClusterNotFound(name.to_string()))?;
        client.stop().await;
        info!(cluster = %name, "Cluster removed");
        Ok(())
    }

    async fn names(&self) -> Vec<String> {
        self.clusters.names().await
    }

    async fn healthy(&self) -> Vec<String> {
        self.clusters.healthy().await
    }

    async fn shutdown(&self) {
        let clusters = self.clusters.drain().await;
        debug!(count = clusters.len(), "Stopping all clusters");
        futures::future::join_all(clusters.iter().map(|(_, client)| client.stop())).await;
    }
}

static LIVE: LazyLock<MultiClusterManager> = LazyLock::new(MultiClusterManager::new);

/// Process-wide live manager
pub fn live_manager() -> &'static MultiClusterManager {
    &LIVE
}
