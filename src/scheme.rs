// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Type registry shared by every cluster client
//!
//! The registry maps a `GroupVersionKind` to the metadata needed to encode,
//! decode and address objects of that kind (plural name, api version, scope).
//! A single process-wide registry is seeded with the built-in types on first
//! use and may be extended with [`with_schemes`] during bootstrap. Clients take
//! an immutable [`Arc<Scheme>`] snapshot when they are built, so types added
//! later are only visible to clients built afterwards.
//!
//! Registration follows "must" semantics: a failing extender is an
//! unrecoverable startup fault and panics. The panic poisons the registry, so
//! no client can be built from a partially populated table afterwards.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ConfigMap, Endpoints, Event, LimitRange, Namespace, Node, PersistentVolume,
    PersistentVolumeClaim, Pod, ResourceQuota, Secret, Service, ServiceAccount,
};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::Resource;
use kube::api::{DynamicObject, TypeMeta};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

/// Whether objects of a kind live inside a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// Maps a static resource scope marker to its runtime value
pub trait ScopeOf {
    const SCOPE: Scope;
}

impl ScopeOf for NamespaceResourceScope {
    const SCOPE: Scope = Scope::Namespaced;
}

impl ScopeOf for ClusterResourceScope {
    const SCOPE: Scope = Scope::Cluster;
}

/// Errors raised while extending a scheme
#[derive(Debug, Error)]
pub enum SchemeError {
    /// The same kind was registered twice with different metadata
    #[error("conflicting registration for {gvk}: {existing} vs {incoming}")]
    Conflict {
        gvk: String,
        existing: String,
        incoming: String,
    },

    /// An extender rejected its input
    #[error("invalid type registration: {0}")]
    Invalid(String),
}

/// Metadata for one registered kind
#[derive(Debug, Clone)]
pub struct RegisteredType {
    pub gvk: GroupVersionKind,
    pub resource: ApiResource,
    pub scope: Scope,
}

impl RegisteredType {
    /// Describe a kind that has no static Rust type (e.g. a CRD known only by name)
    pub fn dynamic(gvk: GroupVersionKind, plural: &str, scope: Scope) -> Self {
        let resource = ApiResource::from_gvk_with_plural(&gvk, plural);
        Self {
            gvk,
            resource,
            scope,
        }
    }

    /// Describe a statically typed kind
    pub fn of<K>() -> Self
    where
        K: Resource<DynamicType = ()>,
        K::Scope: ScopeOf,
    {
        Self {
            gvk: gvk_of::<K>(),
            resource: ApiResource::erase::<K>(&()),
            scope: <K::Scope as ScopeOf>::SCOPE,
        }
    }

    pub fn is_namespaced(&self) -> bool {
        self.scope == Scope::Namespaced
    }

    /// Decode a dynamic object into its typed form.
    ///
    /// List responses omit apiVersion/kind per item, so both are stamped from
    /// the registration before decoding.
    pub fn decode<K: DeserializeOwned>(&self, obj: &DynamicObject) -> Result<K, serde_json::Error> {
        let mut value = serde_json::to_value(obj)?;
        if let serde_json::Value::Object(ref mut map) = value {
            map.insert(
                "apiVersion".to_string(),
                serde_json::Value::String(self.resource.api_version.clone()),
            );
            map.insert(
                "kind".to_string(),
                serde_json::Value::String(self.resource.kind.clone()),
            );
        }
        serde_json::from_value(value)
    }

    /// Encode a typed object as a dynamic object of this kind
    pub fn encode<K: Serialize>(&self, obj: &K) -> Result<DynamicObject, serde_json::Error> {
        let mut dynamic: DynamicObject = serde_json::from_value(serde_json::to_value(obj)?)?;
        dynamic.types = Some(TypeMeta {
            api_version: self.resource.api_version.clone(),
            kind: self.resource.kind.clone(),
        });
        Ok(dynamic)
    }

    /// Short description used in conflict messages
    fn signature(&self) -> String {
        format!(
            "{} {} ({:?})",
            self.resource.api_version, self.resource.plural, self.scope
        )
    }

    fn same_as(&self, other: &RegisteredType) -> bool {
        self.resource.api_version == other.resource.api_version
            && self.resource.plural == other.resource.plural
            && self.scope == other.scope
    }
}

/// The `GroupVersionKind` of a statically typed resource
pub fn gvk_of<K: Resource<DynamicType = ()>>() -> GroupVersionKind {
    GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
}

/// Render a GVK the way the API server does ("apps/v1, Kind=Deployment")
pub fn display_gvk(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}, Kind={}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}, Kind={}", gvk.group, gvk.version, gvk.kind)
    }
}

/// Parse "group/version/Kind" or "version/Kind" (core group)
pub fn parse_gvk(s: &str) -> Option<GroupVersionKind> {
    let parts: Vec<&str> = s.trim().split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => {
            Some(GroupVersionKind::gvk("", version, kind))
        }
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => {
            Some(GroupVersionKind::gvk(group, version, kind))
        }
        _ => None,
    }
}

/// Signature of a function that adds types to a scheme
pub type Extender = fn(&mut Scheme) -> Result<(), SchemeError>;

/// Table of known API types
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    types: HashMap<GroupVersionKind, RegisteredType>,
}

impl Scheme {
    /// Create an empty scheme
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind. Re-registering identical metadata is a no-op.
    pub fn add(&mut self, ty: RegisteredType) -> Result<(), SchemeError> {
        if let Some(existing) = self.types.get(&ty.gvk) {
            if existing.same_as(&ty) {
                return Ok(());
            }
            return Err(SchemeError::Conflict {
                gvk: display_gvk(&ty.gvk),
                existing: existing.signature(),
                incoming: ty.signature(),
            });
        }
        self.types.insert(ty.gvk.clone(), ty);
        Ok(())
    }

    /// Register a statically typed kind
    pub fn add_type<K>(&mut self) -> Result<(), SchemeError>
    where
        K: Resource<DynamicType = ()>,
        K::Scope: ScopeOf,
    {
        self.add(RegisteredType::of::<K>())
    }

    pub fn get(&self, gvk: &GroupVersionKind) -> Option<&RegisteredType> {
        self.types.get(gvk)
    }

    pub fn contains(&self, gvk: &GroupVersionKind) -> bool {
        self.types.contains_key(gvk)
    }

    /// Find a kind by kind name or plural, case-insensitively.
    /// Core and lexically-first groups win when several groups serve the same name.
    pub fn find_kind(&self, name: &str) -> Option<&RegisteredType> {
        let name = name.to_lowercase();
        self.types
            .values()
            .filter(|t| t.gvk.kind.to_lowercase() == name || t.resource.plural == name)
            .min_by(|a, b| {
                (a.gvk.group.as_str(), a.gvk.version.as_str())
                    .cmp(&(b.gvk.group.as_str(), b.gvk.version.as_str()))
            })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredType> {
        self.types.values()
    }
}

/// Add the built-in Kubernetes API types
pub fn add_kubernetes_types(scheme: &mut Scheme) -> Result<(), SchemeError> {
    // core/v1
    scheme.add_type::<ConfigMap>()?;
    scheme.add_type::<Endpoints>()?;
    scheme.add_type::<Event>()?;
    scheme.add_type::<LimitRange>()?;
    scheme.add_type::<Namespace>()?;
    scheme.add_type::<Node>()?;
    scheme.add_type::<PersistentVolume>()?;
    scheme.add_type::<PersistentVolumeClaim>()?;
    scheme.add_type::<Pod>()?;
    scheme.add_type::<ResourceQuota>()?;
    scheme.add_type::<Secret>()?;
    scheme.add_type::<Service>()?;
    scheme.add_type::<ServiceAccount>()?;
    // apps/v1
    scheme.add_type::<DaemonSet>()?;
    scheme.add_type::<Deployment>()?;
    scheme.add_type::<ReplicaSet>()?;
    scheme.add_type::<StatefulSet>()?;
    // batch/v1
    scheme.add_type::<CronJob>()?;
    scheme.add_type::<Job>()?;
    // networking.k8s.io/v1
    scheme.add_type::<Ingress>()?;
    scheme.add_type::<NetworkPolicy>()?;
    // rbac.authorization.k8s.io/v1
    scheme.add_type::<ClusterRole>()?;
    scheme.add_type::<ClusterRoleBinding>()?;
    scheme.add_type::<Role>()?;
    scheme.add_type::<RoleBinding>()?;
    Ok(())
}

/// Add the apiextensions types
pub fn add_apiextensions_types(scheme: &mut Scheme) -> Result<(), SchemeError> {
    scheme.add_type::<CustomResourceDefinition>()
}

/// Guarded holder of a scheme with copy-on-write snapshots
#[derive(Debug)]
pub struct SchemeRegistry {
    scheme: RwLock<Arc<Scheme>>,
}

impl SchemeRegistry {
    pub fn new(scheme: Scheme) -> Self {
        Self {
            scheme: RwLock::new(Arc::new(scheme)),
        }
    }

    /// Apply an extender.
    ///
    /// # Panics
    ///
    /// Panics if the extender fails or the registry was poisoned by an earlier
    /// failed registration.
    pub fn register<F>(&self, extender: F)
    where
        F: FnOnce(&mut Scheme) -> Result<(), SchemeError>,
    {
        let mut guard = match self.scheme.write() {
            Ok(guard) => guard,
            Err(_) => panic!("type registry is poisoned by a failed registration"),
        };
        let scheme = Arc::make_mut(&mut guard);
        let before = scheme.len();
        if let Err(e) = extender(scheme) {
            // Panicking with the write guard held poisons the registry.
            panic!("type registration failed: {e}");
        }
        debug!(added = scheme.len() - before, total = scheme.len(), "Extended type registry");
    }

    /// Immutable view of the registry as of now.
    ///
    /// # Panics
    ///
    /// Panics if the registry was poisoned by a failed registration.
    pub fn snapshot(&self) -> Arc<Scheme> {
        match self.scheme.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(_) => panic!("type registry is poisoned by a failed registration"),
        }
    }
}

static GLOBAL: LazyLock<SchemeRegistry> = LazyLock::new(|| {
    let registry = SchemeRegistry::new(Scheme::new());
    registry.register(add_kubernetes_types);
    registry.register(crate::crd::add_to_scheme);
    registry.register(crate::crd::add_hnc_to_scheme);
    registry.register(add_apiextensions_types);
    registry
});

/// The process-wide registry, seeded with the built-in types on first access
pub fn global() -> &'static SchemeRegistry {
    &GLOBAL
}

/// Extend the process-wide registry.
///
/// Call during bootstrap, before the first cluster client is built; clients
/// built earlier keep their snapshot and will not see the new types.
///
/// # Panics
///
/// Panics if any extender fails. The process must not continue with a
/// partially populated registry.
pub fn with_schemes(extenders: &[Extender]) {
    for extender in extenders {
        GLOBAL.register(*extender);
    }
}
