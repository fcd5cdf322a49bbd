// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Direct (uncached) access to the API server
//!
//! Every call is a live round-trip, so reads are strongly consistent. Objects
//! are addressed and encoded through the type registry snapshot the client was
//! built with; kinds missing from that snapshot are rejected up front.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::api::{DeleteParams, DynamicObject, ListParams, PostParams};
use kube::core::GroupVersionKind;
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::scheme::{RegisteredType, Scheme, display_gvk, gvk_of};

/// Maximum retry attempts for transient failures
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Check if an error is retryable (transient failures)
pub(crate) fn is_retryable_error(err: &kube::Error) -> bool {
    match err {
        // Network/connection errors are retryable
        kube::Error::HyperError(_) => true,
        // API errors: retry on 429 (rate limit), 503 (unavailable), 504 (timeout)
        kube::Error::Api(api_err) => matches!(api_err.code, 429 | 503 | 504),
        _ => false,
    }
}

/// Scheme-bound client for live reads and writes
#[derive(Clone)]
pub struct DirectClient {
    client: Client,
    scheme: Arc<Scheme>,
    version: Info,
}

impl DirectClient {
    /// Bind a client to a registry snapshot.
    ///
    /// Probes the API server version, so this is the first facet to fail on an
    /// unreachable or misconfigured endpoint.
    pub(crate) async fn new(client: Client, scheme: Arc<Scheme>) -> Result<Self, kube::Error> {
        let version = client.apiserver_version().await?;
        debug!(
            version = %version.git_version,
            platform = %version.platform,
            "API server reachable"
        );
        Ok(Self {
            client,
            scheme,
            version,
        })
    }

    /// Version reported by the API server at construction
    pub fn server_version(&self) -> &Info {
        &self.version
    }

    pub fn scheme(&self) -> &Arc<Scheme> {
        &self.scheme
    }

    fn resolve(&self, gvk: &GroupVersionKind) -> Result<&RegisteredType> {
        self.scheme
            .get(gvk)
            .ok_or_else(|| Error::NotRegistered(display_gvk(gvk)))
    }

    /// Build a dynamic API handle for a registered kind.
    ///
    /// Namespaced kinds without a namespace address all namespaces.
    pub fn dynamic_api(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>> {
        let ty = self.resolve(gvk)?;
        Ok(api_for(&self.client, ty, namespace))
    }

    /// API handle for single-object calls: namespaced kinds fall back to the
    /// client's default namespace
    fn object_api(&self, ty: &RegisteredType, namespace: Option<&str>) -> Api<DynamicObject> {
        match (ty.is_namespaced(), namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ty.resource),
            (true, None) => Api::default_namespaced_with(self.client.clone(), &ty.resource),
            (false, _) => Api::all_with(self.client.clone(), &ty.resource),
        }
    }

    /// Fetch one object by kind, returning `None` if it does not exist
    pub async fn get_dynamic(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let ty = self.resolve(gvk)?;
        let api = self.object_api(ty, namespace);
        let obj = self
            .with_retry(&ty.resource.plural, || api.get_opt(name))
            .await?;
        Ok(obj)
    }

    /// List objects by kind
    pub async fn list_dynamic(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<DynamicObject>> {
        let ty = self.resolve(gvk)?;
        let api = api_for(&self.client, ty, namespace);

        trace!(
            kind = %ty.gvk.kind,
            namespace = ?namespace,
            label_selector = ?params.label_selector,
            field_selector = ?params.field_selector,
            "Listing"
        );

        let list = self
            .with_retry(&ty.resource.plural, || api.list(params))
            .await?;
        Ok(list.items)
    }

    /// Fetch one typed object, returning `None` if it does not exist
    pub async fn get<K>(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let gvk = gvk_of::<K>();
        let ty = self.resolve(&gvk)?;
        match self.get_dynamic(&gvk, namespace, name).await? {
            Some(obj) => Ok(Some(ty.decode(&obj)?)),
            None => Ok(None),
        }
    }

    /// List typed objects
    pub async fn list<K>(&self, namespace: Option<&str>, params: &ListParams) -> Result<Vec<K>>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let gvk = gvk_of::<K>();
        let ty = self.resolve(&gvk)?;
        self.list_dynamic(&gvk, namespace, params)
            .await?
            .iter()
            .map(|obj| ty.decode(obj).map_err(Error::from))
            .collect()
    }

    /// Create a typed object
    pub async fn create<K>(&self, namespace: Option<&str>, obj: &K) -> Result<K>
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        let ty = self.resolve(&gvk_of::<K>())?;
        let api = self.object_api(ty, namespace);
        let created = api.create(&PostParams::default(), &ty.encode(obj)?).await?;
        Ok(ty.decode(&created)?)
    }

    /// Replace a typed object (optimistic concurrency via its resourceVersion)
    pub async fn replace<K>(&self, namespace: Option<&str>, name: &str, obj: &K) -> Result<K>
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        let ty = self.resolve(&gvk_of::<K>())?;
        let api = self.object_api(ty, namespace);
        let replaced = api
            .replace(name, &PostParams::default(), &ty.encode(obj)?)
            .await?;
        Ok(ty.decode(&replaced)?)
    }

    /// Delete a typed object
    pub async fn delete<K>(&self, namespace: Option<&str>, name: &str) -> Result<()>
    where
        K: Resource<DynamicType = ()>,
    {
        let ty = self.resolve(&gvk_of::<K>())?;
        let api = self.object_api(ty, namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    /// Run a read with retry and exponential backoff for transient failures
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, kube::Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, kube::Error>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < MAX_RETRIES && is_retryable_error(&e) => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(
                        resource = %what,
                        attempt = attempt + 1,
                        max_attempts = MAX_RETRIES,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retryable error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// API handle for collection calls
pub(crate) fn api_for(
    client: &Client,
    ty: &RegisteredType,
    namespace: Option<&str>,
) -> Api<DynamicObject> {
    match (ty.is_namespaced(), namespace) {
        (true, Some(ns)) => Api::namespaced_with(client.clone(), ns, &ty.resource),
        _ => Api::all_with(client.clone(), &ty.resource),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::testing::{Reply, healthy_cluster, mock_client, status, version_info};
    use crate::scheme;
    use http::{Method, StatusCode};
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Pod;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pods_only() -> Arc<Scheme> {
        let mut scheme = Scheme::new();
        scheme.add_type::<Pod>().unwrap();
        Arc::new(scheme)
    }

    #[tokio::test]
    async fn test_new_probes_version() {
        let client = mock_client(healthy_cluster);
        let direct = DirectClient::new(client, pods_only()).await.unwrap();
        assert_eq!(direct.server_version().git_version, "v1.31.2");
    }

    #[tokio::test]
    async fn test_new_fails_when_unreachable() {
        let client = mock_client(|_, _, _| Reply::Refused);
        assert!(DirectClient::new(client, pods_only()).await.is_err());
    }

    #[tokio::test]
    async fn test_typed_get_and_list() {
        let direct = DirectClient::new(mock_client(healthy_cluster), pods_only())
            .await
            .unwrap();

        let pod: Pod = direct.get(Some("default"), "web-0").await.unwrap().unwrap();
        assert_eq!(pod.metadata.name.as_deref(), Some("web-0"));

        let missing: Option<Pod> = direct.get(Some("default"), "nope").await.unwrap();
        assert!(missing.is_none());

        let pods: Vec<Pod> = direct
            .list(Some("default"), &ListParams::default())
            .await
            .unwrap();
        let names: Vec<_> = pods.iter().filter_map(|p| p.metadata.name.clone()).collect();
        assert_eq!(names, vec!["web-0", "web-1"]);
    }

    #[tokio::test]
    async fn test_unregistered_kind_rejected() {
        let direct = DirectClient::new(mock_client(healthy_cluster), pods_only())
            .await
            .unwrap();

        let err = direct
            .list::<Deployment>(None, &ListParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotRegistered(_)));
        assert!(err.to_string().contains("apps/v1, Kind=Deployment"));
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let client = mock_client(move |method, path, query| {
            if path == "/api/v1/namespaces/default/pods" {
                // First attempt is throttled, second succeeds
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Reply::Json(
                        StatusCode::TOO_MANY_REQUESTS,
                        status(429, "TooManyRequests"),
                    );
                }
            }
            healthy_cluster(method, path, query)
        });
        let direct = DirectClient::new(client, pods_only()).await.unwrap();

        let pods: Vec<Pod> = direct
            .list(Some("default"), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(pods.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_surfaces() {
        let client = mock_client(|method, path, query| match (method, path) {
            (&Method::GET, "/version") => Reply::Json(StatusCode::OK, version_info()),
            _ if query.contains("watch") => Reply::Hang,
            _ => Reply::Json(StatusCode::FORBIDDEN, status(403, "Forbidden")),
        });
        let direct = DirectClient::new(client, pods_only()).await.unwrap();

        let err = direct
            .list::<Pod>(Some("default"), &ListParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Kube(kube::Error::Api(ref e)) if e.code == 403));
    }

    #[tokio::test]
    async fn test_create_encodes_through_scheme() {
        let client = mock_client(|method, path, query| match (method, path) {
            (&Method::POST, "/api/v1/namespaces/default/pods") => Reply::Json(
                StatusCode::CREATED,
                crate::kubernetes::testing::pod("default", "created"),
            ),
            _ => healthy_cluster(method, path, query),
        });
        let direct = DirectClient::new(client, scheme::global().snapshot())
            .await
            .unwrap();

        let mut pod = Pod::default();
        pod.metadata.name = Some("created".to_string());
        let created = direct.create(Some("default"), &pod).await.unwrap();
        assert_eq!(created.metadata.name.as_deref(), Some("created"));
    }

    #[test]
    fn test_is_retryable_error() {
        let api_err = |code| {
            kube::Error::Api(
                serde_json::from_value(status(code, "mock")).unwrap(),
            )
        };
        assert!(is_retryable_error(&api_err(429)));
        assert!(is_retryable_error(&api_err(503)));
        assert!(is_retryable_error(&api_err(504)));
        assert!(!is_retryable_error(&api_err(404)));
        assert!(!is_retryable_error(&api_err(403)));
    }
}
