// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Cache-aware access to many Kubernetes clusters
//!
//! - [`scheme`]: the process-wide type registry every client is bound to
//! - [`kubernetes::ClusterClient`]: direct, cached, metrics and raw access to one cluster
//! - [`multicluster`]: managers holding connected clusters, live or fake

pub mod config;
pub mod crd;
pub mod error;
pub mod kubernetes;
pub mod multicluster;
pub mod progress;
pub mod scheme;

pub use error::{Error, Facet, Result};
pub use kubernetes::{ClientOptions, ClusterClient};
pub use multicluster::{MultiClustersManager, interface};
pub use scheme::with_schemes;
