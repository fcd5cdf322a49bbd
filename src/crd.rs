// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Platform custom resources known to every cluster client

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::scheme::{Scheme, SchemeError};

/// A tenant groups projects and the namespaces they own
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "tenant.kubecube.io",
    version = "v1",
    kind = "Tenant",
    plural = "tenants",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A project belongs to a tenant and owns a hierarchy of namespaces
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "tenant.kubecube.io",
    version = "v1",
    kind = "Project",
    plural = "projects",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Hierarchical namespace configuration (one per namespace, named "hierarchy")
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "hnc.x-k8s.io",
    version = "v1alpha2",
    kind = "HierarchyConfiguration",
    plural = "hierarchyconfigurations",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyConfigurationSpec {
    /// Parent namespace, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub allow_cascading_deletion: bool,
}

/// Add the platform tenancy types
pub fn add_to_scheme(scheme: &mut Scheme) -> Result<(), SchemeError> {
    scheme.add_type::<Tenant>()?;
    scheme.add_type::<Project>()?;
    Ok(())
}

/// Add the hierarchical namespace types
pub fn add_hnc_to_scheme(scheme: &mut Scheme) -> Result<(), SchemeError> {
    scheme.add_type::<HierarchyConfiguration>()
}
