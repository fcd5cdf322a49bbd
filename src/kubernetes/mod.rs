// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

pub mod cache;
pub mod client;
pub mod context_matcher;
pub mod direct;
pub mod metrics;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{Cache, CacheError, CacheHealth, CacheOptions};
pub use client::{ClientOptions, ClusterClient, Connector};
pub use context_matcher::ContextMatcher;
pub use direct::DirectClient;
pub use metrics::{MetricsClient, NodeMetrics, PodMetrics};
