// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration for clusterlink
//!
//! All clusterlink data is stored under ~/.clusterlink/:
//! - ~/.clusterlink/config.json - user settings
//! - ~/.clusterlink/log/ - rolling log files

use anyhow::{Context, Result, anyhow};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::kubernetes::context_matcher::ContextMatcher;
use crate::scheme::{Scheme, parse_gvk};

/// Default timeout for connecting to the API server
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default timeout for reading API server responses
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Get the base clusterlink directory (~/.clusterlink/)
pub fn base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".clusterlink"))
        .context("Could not determine home directory")
}

/// Write through a temp file in the target directory, then rename over it
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use tempfile::NamedTempFile;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_file = NamedTempFile::new_in(dir).context("Failed to create temp file")?;
    fs::write(temp_file.path(), content)
        .with_context(|| format!("Failed to write temp file {:?}", temp_file.path()))?;
    temp_file
        .persist(path)
        .with_context(|| format!("Failed to persist file to {:?}", path))?;
    Ok(())
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_read_timeout() -> u64 {
    DEFAULT_READ_TIMEOUT_SECS
}

/// Persisted user settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Contexts connected when no `--context` is given
    #[serde(default)]
    pub selected_contexts: Vec<String>,

    /// Kinds the cache watches from startup ("Pod", "apps/v1/Deployment", ...)
    #[serde(default)]
    pub warm_kinds: Vec<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selected_contexts: Vec::new(),
            warm_kinds: Vec::new(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Load settings from ~/.clusterlink/config.json, or defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        atomic_write(path, content.as_bytes())
    }

    /// Get the config file path (~/.clusterlink/config.json)
    pub fn config_path() -> Result<PathBuf> {
        Ok(base_dir()?.join("config.json"))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Resolve `warm_kinds` against a registry snapshot
    pub fn warm_gvks(&self, scheme: &Scheme) -> Result<Vec<GroupVersionKind>> {
        self.warm_kinds
            .iter()
            .map(|kind| {
                parse_gvk(kind)
                    .filter(|gvk| scheme.contains(gvk))
                    .or_else(|| scheme.find_kind(kind).map(|ty| ty.gvk.clone()))
                    .ok_or_else(|| anyhow!("Unknown kind '{}' in warm_kinds", kind))
            })
            .collect()
    }
}

/// Kubeconfig contexts resolved into `kube::Config`s with our timeouts
pub struct ClusterConfig {
    kubeconfig: Kubeconfig,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl ClusterConfig {
    /// Read the kubeconfig from $KUBECONFIG or ~/.kube/config
    pub fn load(settings: &Settings) -> Result<Self> {
        let kubeconfig = Kubeconfig::read().context("Failed to read kubeconfig")?;
        Ok(Self::from_kubeconfig(kubeconfig, settings))
    }

    pub fn from_kubeconfig(kubeconfig: Kubeconfig, settings: &Settings) -> Self {
        Self {
            kubeconfig,
            connect_timeout: settings.connect_timeout(),
            read_timeout: settings.read_timeout(),
        }
    }

    pub fn contexts(&self) -> Vec<String> {
        self.kubeconfig.contexts.iter().map(|c| c.name.clone()).collect()
    }

    pub fn current_context(&self) -> Option<&str> {
        self.kubeconfig.current_context.as_deref()
    }

    /// Contexts to connect: an explicit selection wins, then saved contexts
    /// that still exist, then the kubeconfig's current context
    pub fn select(&self, selection: Option<&str>, saved: &[String]) -> Result<Vec<String>> {
        let available = self.contexts();
        if let Some(selection) = selection {
            return Ok(ContextMatcher::new(&available).resolve(selection)?);
        }

        let saved: Vec<String> = saved
            .iter()
            .filter(|ctx| available.contains(ctx))
            .cloned()
            .collect();
        if !saved.is_empty() {
            return Ok(saved);
        }

        self.current_context()
            .map(|ctx| vec![ctx.to_string()])
            .ok_or_else(|| anyhow!("No context specified and no current context in kubeconfig"))
    }

    /// Build the client configuration for one context
    pub async fn kube_config(&self, context: &str) -> Result<kube::Config> {
        if !self.kubeconfig.contexts.iter().any(|c| c.name == context) {
            return Err(anyhow!("Context '{}' not found in kubeconfig", context));
        }

        let mut config = kube::Config::from_custom_kubeconfig(
            self.kubeconfig.clone(),
            &KubeConfigOptions {
                context: Some(context.to_string()),
                ..Default::default()
            },
        )
        .await
        .with_context(|| format!("Failed to load kubeconfig for context '{}'", context))?;

        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);
        debug!(context = %context, url = %config.cluster_url, "Resolved cluster config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{add_kubernetes_types, gvk_of};
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Pod;
    use tempfile::TempDir;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
- name: prod
  cluster:
    server: https://prod.example.com:6443
- name: dev
  cluster:
    server: https://dev.example.com:6443
contexts:
- name: prod-eu
  context:
    cluster: prod
    user: admin
- name: prod-us
  context:
    cluster: prod
    user: admin
    namespace: payments
- name: dev
  context:
    cluster: dev
    user: admin
users:
- name: admin
  user:
    token: not-a-real-token
"#;

    fn cluster_config() -> ClusterConfig {
        let kubeconfig = Kubeconfig::from_yaml(KUBECONFIG).unwrap();
        ClusterConfig::from_kubeconfig(kubeconfig, &Settings::default())
    }

    #[test]
    fn test_settings_defaults_fill_missing_fields() {
        let settings: Settings =
            serde_json::from_str(r#"{"selected_contexts": ["prod"]}"#).unwrap();
        assert_eq!(settings.selected_contexts, vec!["prod"]);
        assert!(settings.warm_kinds.is_empty());
        assert_eq!(settings.connect_timeout(), Duration::from_secs(10));
        assert_eq!(settings.read_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_settings_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        let settings = Settings {
            selected_contexts: vec!["prod-eu".to_string()],
            warm_kinds: vec!["Pod".to_string()],
            read_timeout_secs: 5,
            ..Default::default()
        };
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_settings_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = Settings::load_from(&temp_dir.path().join("config.json")).unwrap();
        assert_eq!(loaded, Settings::default());
    }

    #[test]
    fn test_settings_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        let err = Settings::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_warm_gvks() {
        let mut scheme = Scheme::new();
        add_kubernetes_types(&mut scheme).unwrap();

        let settings = Settings {
            warm_kinds: vec!["pods".to_string(), "apps/v1/Deployment".to_string()],
            ..Default::default()
        };
        let gvks = settings.warm_gvks(&scheme).unwrap();
        assert_eq!(gvks, vec![gvk_of::<Pod>(), gvk_of::<Deployment>()]);

        let bad = Settings {
            warm_kinds: vec!["Widget".to_string()],
            ..Default::default()
        };
        assert!(bad.warm_gvks(&scheme).is_err());
    }

    #[test]
    fn test_select_precedence() {
        let config = cluster_config();

        assert_eq!(config.select(Some("prod-*"), &[]).unwrap(), vec!["prod-eu", "prod-us"]);

        let saved = vec!["prod-us".to_string(), "gone".to_string()];
        assert_eq!(config.select(None, &saved).unwrap(), vec!["prod-us"]);

        assert_eq!(config.select(None, &[]).unwrap(), vec!["dev"]);
        assert!(config.select(Some("qa"), &[]).is_err());
    }

    #[tokio::test]
    async fn test_kube_config_applies_timeouts() {
        let config = cluster_config();
        let kube_config = config.kube_config("prod-us").await.unwrap();

        assert_eq!(kube_config.cluster_url.host(), Some("prod.example.com"));
        assert_eq!(kube_config.default_namespace, "payments");
        assert_eq!(kube_config.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(kube_config.read_timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_kube_config_unknown_context() {
        let err = cluster_config().kube_config("staging").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
