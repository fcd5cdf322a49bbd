// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! In-memory manager for tests
//!
//! Same lookup contract as the live manager, but `add` overwrites and the
//! manager never stops the clients it holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use tracing::debug;

use super::manager::{ClusterSet, MultiClustersManager};
use crate::error::{Error, Result};
use crate::kubernetes::ClusterClient;

static IS_FAKE: AtomicBool = AtomicBool::new(false);

static FAKE: LazyLock<FakeMultiClusterManager> = LazyLock::new(FakeMultiClusterManager::new);

/// Switch [`super::interface`] between the live and fake managers.
///
/// Intended for test setup only. Flip it before the code under test runs;
/// callers that already hold a manager keep the one they were given.
pub fn set_fake(enabled: bool) {
    IS_FAKE.store(enabled, Ordering::SeqCst);
    debug!(enabled, "Fake multi-cluster mode");
}

pub fn is_fake() -> bool {
    IS_FAKE.load(Ordering::SeqCst)
}

/// Process-wide fake manager
pub fn fake_manager() -> &'static FakeMultiClusterManager {
    &FAKE
}

#[derive(Default)]
pub struct FakeMultiClusterManager {
    clusters: ClusterSet,
}

impl FakeMultiClusterManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MultiClustersManager for FakeMultiClusterManager {
    async fn add(&self, name: &str, client: ClusterClient) -> Result<Arc<ClusterClient>> {
        Ok(self.clusters.insert(name, client).await)
    }

    async fn get(&self, name: &str) -> Result<Arc<ClusterClient>> {
        self.clusters.get(name).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.clusters
            .take(name)
            .await
            .map(|_| ())
            .ok_or_else(|| Error::ClusterNotFound(name.to_string()))
    }

    async fn names(&self) -> Vec<String> {
        self.clusters.names().await
    }

    async fn healthy(&self) -> Vec<String> {
        self.clusters.healthy().await
    }

    async fn shutdown(&self) {
        self.clusters.drain().await;
    }

    fn is_fake(&self) -> bool {
        true
    }
}
