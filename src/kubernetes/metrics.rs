// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Resource usage from the metrics.k8s.io API

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DynamicObject, ListParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

pub const METRICS_GROUP: &str = "metrics.k8s.io";
pub const METRICS_VERSION: &str = "v1beta1";

/// Usage of a single node
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeMetrics {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub usage: BTreeMap<String, Quantity>,
}

/// Usage of a pod, per container
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PodMetrics {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub containers: Vec<ContainerMetrics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerMetrics {
    pub name: String,
    #[serde(default)]
    pub usage: BTreeMap<String, Quantity>,
}

impl NodeMetrics {
    pub fn cpu_millis(&self) -> Option<u64> {
        self.usage.get("cpu").and_then(parse_cpu_millis)
    }

    pub fn memory_bytes(&self) -> Option<u64> {
        self.usage.get("memory").and_then(parse_memory_bytes)
    }
}

impl PodMetrics {
    /// Sum of container CPU usage
    pub fn cpu_millis(&self) -> u64 {
        self.containers
            .iter()
            .filter_map(|c| c.usage.get("cpu").and_then(parse_cpu_millis))
            .sum()
    }

    /// Sum of container memory usage
    pub fn memory_bytes(&self) -> u64 {
        self.containers
            .iter()
            .filter_map(|c| c.usage.get("memory").and_then(parse_memory_bytes))
            .sum()
    }
}

/// Parse a CPU quantity ("250m", "2", "1500000n") into millicores
pub fn parse_cpu_millis(q: &Quantity) -> Option<u64> {
    let s = q.0.trim();
    let (num, scale) = if let Some(n) = s.strip_suffix('n') {
        (n, 1e-6)
    } else if let Some(u) = s.strip_suffix('u') {
        (u, 1e-3)
    } else if let Some(m) = s.strip_suffix('m') {
        (m, 1.0)
    } else {
        (s, 1000.0)
    };
    let value: f64 = num.parse().ok()?;
    (value >= 0.0).then(|| (value * scale).round() as u64)
}

/// Parse a memory quantity ("128Mi", "1G", "4096Ki", "1000") into bytes.
///
/// Values past `u64::MAX` saturate.
pub fn parse_memory_bytes(q: &Quantity) -> Option<u64> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];
    let s = q.0.trim();
    let (num, scale) = SUFFIXES
        .iter()
        .find_map(|(suffix, scale)| s.strip_suffix(suffix).map(|n| (n, *scale)))
        .unwrap_or((s, 1.0));
    let value: f64 = num.parse().ok()?;
    (value >= 0.0).then(|| (value * scale).round() as u64)
}

fn metrics_resource(kind: &str, plural: &str) -> ApiResource {
    let gvk = GroupVersionKind::gvk(METRICS_GROUP, METRICS_VERSION, kind);
    ApiResource::from_gvk_with_plural(&gvk, plural)
}

fn convert<T: DeserializeOwned>(obj: DynamicObject) -> Result<T> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Client for node and pod usage
#[derive(Clone)]
pub struct MetricsClient {
    client: Client,
    nodes: ApiResource,
    pods: ApiResource,
}

impl MetricsClient {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            client,
            nodes: metrics_resource("NodeMetrics", "nodes"),
            pods: metrics_resource("PodMetrics", "pods"),
        }
    }

    /// Usage of every node
    pub async fn node_metrics(&self) -> Result<Vec<NodeMetrics>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.nodes);
        let list = api.list(&ListParams::default()).await?;
        debug!(count = list.items.len(), "Fetched node metrics");
        list.items.into_iter().map(convert).collect()
    }

    /// Usage of one node, `None` if the node has no metrics
    pub async fn node_metrics_for(&self, name: &str) -> Result<Option<NodeMetrics>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.nodes);
        api.get_opt(name).await?.map(convert).transpose()
    }

    /// Usage of pods in a namespace, or across all namespaces
    pub async fn pod_metrics(&self, namespace: Option<&str>) -> Result<Vec<PodMetrics>> {
        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &self.pods),
            None => Api::all_with(self.client.clone(), &self.pods),
        };
        let list = api.list(&ListParams::default()).await?;
        debug!(count = list.items.len(), namespace = ?namespace, "Fetched pod metrics");
        list.items.into_iter().map(convert).collect()
    }

    /// Usage of one pod, `None` if the pod has no metrics
    pub async fn pod_metrics_for(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodMetrics>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.pods);
        api.get_opt(name).await?.map(convert).transpose()
    }
}
