// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Error types for cluster access

use std::fmt;

use thiserror::Error;

use crate::kubernetes::cache::CacheError;

/// Boxed error carried by facet construction failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One of the four access facets of a cluster client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    /// Strongly consistent reads and writes against the API server
    Direct,
    /// Informer-backed, eventually consistent reads
    Cache,
    /// metrics.k8s.io resource usage queries
    Metrics,
    /// Unmediated low-level client
    ClientSet,
}

impl Facet {
    /// Construction order of the facets
    pub const ALL: [Facet; 4] = [Facet::Direct, Facet::Cache, Facet::Metrics, Facet::ClientSet];

    /// Diagnostic tag used in logs and error messages
    pub fn tag(self) -> &'static str {
        match self {
            Facet::Direct => "direct",
            Facet::Cache => "cache",
            Facet::Metrics => "metrics",
            Facet::ClientSet => "rawClientSet",
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Main error type for cluster access
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Building one of the facets failed; later facets were not built
    #[error("new {facet} client failed: {source}")]
    Build {
        facet: Facet,
        #[source]
        source: BoxError,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Cache facet error
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// The requested type is unknown to the type registry
    #[error("no kind {0} is registered in the type registry")]
    NotRegistered(String),

    /// Encoding or decoding an object failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A cluster with this name is already managed
    #[error("cluster '{0}' is already registered")]
    AlreadyRegistered(String),

    /// No cluster with this name is managed
    #[error("cluster '{0}' not found")]
    ClusterNotFound(String),
}

impl Error {
    /// Create a build error for the given facet
    pub fn build(facet: Facet, source: impl Into<BoxError>) -> Self {
        Self::Build {
            facet,
            source: source.into(),
        }
    }

    /// The facet whose construction failed, if this is a build error
    pub fn facet(&self) -> Option<Facet> {
        match self {
            Self::Build { facet, .. } => Some(*facet),
            _ => None,
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facet_tags() {
        let tags: Vec<_> = Facet::ALL.iter().map(|f| f.tag()).collect();
        assert_eq!(tags, vec!["direct", "cache", "metrics", "rawClientSet"]);
    }

    #[test]
    fn test_build_error_names_facet() {
        let err = Error::build(Facet::Metrics, "endpoint refused");
        assert_eq!(err.facet(), Some(Facet::Metrics));
        assert_eq!(err.to_string(), "new metrics client failed: endpoint refused");
    }

    #[test]
    fn test_non_build_error_has_no_facet() {
        let err = Error::NotRegistered("apps/v1, Kind=Widget".to_string());
        assert_eq!(err.facet(), None);
        assert!(err.to_string().contains("Kind=Widget"));
    }

    #[test]
    fn test_build_error_keeps_source() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::build(Facet::Direct, io);
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("new direct client failed"));
    }
}
