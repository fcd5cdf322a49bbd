// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Progress reporting for cluster connections
//!
//! Cluster clients report facet construction and cache synchronization here,
//! which the CLI can display to the user.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

use crate::error::Facet;

/// Create a spinner with consistent styling
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg} {elapsed:.dim}")
    {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Progress update message
#[derive(Clone, Debug)]
pub enum ProgressUpdate {
    /// Building clients for a cluster
    Connecting { cluster: String },
    /// One facet of a cluster client was built
    FacetBuilt { cluster: String, facet: Facet },
    /// All facets built, waiting for the initial cache sync
    CacheSyncing { cluster: String },
    /// Cluster client is usable
    Connected {
        cluster: String,
        synced: bool,
        elapsed_ms: u64,
    },
    /// Cluster client construction failed
    Failed { cluster: String, error: String },
}

impl ProgressUpdate {
    pub fn cluster(&self) -> &str {
        match self {
            ProgressUpdate::Connecting { cluster }
            | ProgressUpdate::FacetBuilt { cluster, .. }
            | ProgressUpdate::CacheSyncing { cluster }
            | ProgressUpdate::Connected { cluster, .. }
            | ProgressUpdate::Failed { cluster, .. } => cluster,
        }
    }
}

/// Global progress reporter
pub struct ProgressReporter {
    sender: broadcast::Sender<ProgressUpdate>,
    /// Clusters finished (connected or failed) in the current batch
    clusters_done: AtomicUsize,
    /// Clusters in the current batch
    clusters_total: AtomicUsize,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            sender,
            clusters_done: AtomicUsize::new(0),
            clusters_total: AtomicUsize::new(0),
        }
    }

    /// Subscribe to progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }

    /// Start a batch of cluster connections
    pub fn start_batch(&self, cluster_count: usize) {
        self.clusters_done.store(0, Ordering::SeqCst);
        self.clusters_total.store(cluster_count, Ordering::SeqCst);
    }

    pub fn connecting(&self, cluster: &str) {
        let _ = self.sender.send(ProgressUpdate::Connecting {
            cluster: cluster.to_string(),
        });
    }

    pub fn facet_built(&self, cluster: &str, facet: Facet) {
        let _ = self.sender.send(ProgressUpdate::FacetBuilt {
            cluster: cluster.to_string(),
            facet,
        });
    }

    pub fn cache_syncing(&self, cluster: &str) {
        let _ = self.sender.send(ProgressUpdate::CacheSyncing {
            cluster: cluster.to_string(),
        });
    }

    /// Report a usable cluster client
    pub fn connected(&self, cluster: &str, synced: bool, elapsed_ms: u64) {
        self.clusters_done.fetch_add(1, Ordering::SeqCst);
        let _ = self.sender.send(ProgressUpdate::Connected {
            cluster: cluster.to_string(),
            synced,
            elapsed_ms,
        });
    }

    /// Report a failed cluster client
    pub fn failed(&self, cluster: &str, error: &str) {
        self.clusters_done.fetch_add(1, Ordering::SeqCst);
        let _ = self.sender.send(ProgressUpdate::Failed {
            cluster: cluster.to_string(),
            error: error.to_string(),
        });
    }

    /// Get current progress (done/total)
    pub fn progress(&self) -> (usize, usize) {
        (
            self.clusters_done.load(Ordering::SeqCst),
            self.clusters_total.load(Ordering::SeqCst),
        )
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to progress reporter
pub type ProgressHandle = Arc<ProgressReporter>;

/// Create a new progress reporter handle
pub fn create_progress_handle() -> ProgressHandle {
    Arc::new(ProgressReporter::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_reporter_new() {
        let reporter = ProgressReporter::new();
        assert_eq!(reporter.progress(), (0, 0));
    }

    #[test]
    fn test_batch_counts_connected_and_failed() {
        let reporter = ProgressReporter::new();
        reporter.start_batch(3);
        assert_eq!(reporter.progress(), (0, 3));

        reporter.connected("prod", true, 120);
        reporter.failed("staging", "new direct client failed: refused");
        assert_eq!(reporter.progress(), (2, 3));

        // Starting a new batch resets
        reporter.start_batch(1);
        assert_eq!(reporter.progress(), (0, 1));
    }

    #[test]
    fn test_lifecycle_events_in_order() {
        let reporter = ProgressReporter::new();
        let mut receiver = reporter.subscribe();

        reporter.connecting("prod");
        for facet in Facet::ALL {
            reporter.facet_built("prod", facet);
        }
        reporter.cache_syncing("prod");
        reporter.connected("prod", true, 50);

        let updates: Vec<_> = std::iter::from_fn(|| receiver.try_recv().ok()).collect();
        assert_eq!(updates.len(), 7);
        assert!(matches!(updates[0], ProgressUpdate::Connecting { .. }));
        assert!(matches!(
            updates[1],
            ProgressUpdate::FacetBuilt {
                facet: Facet::Direct,
                ..
            }
        ));
        assert!(matches!(
            updates[4],
            ProgressUpdate::FacetBuilt {
                facet: Facet::ClientSet,
                ..
            }
        ));
        assert!(matches!(updates[5], ProgressUpdate::CacheSyncing { .. }));
        assert!(matches!(
            updates[6],
            ProgressUpdate::Connected { synced: true, .. }
        ));
        assert!(updates.iter().all(|u| u.cluster() == "prod"));
    }

    #[test]
    fn test_send_without_subscribers() {
        let reporter = create_progress_handle();
        reporter.connecting("prod");
        reporter.failed("prod", "boom");
        assert_eq!(reporter.progress(), (1, 0));
    }
}
