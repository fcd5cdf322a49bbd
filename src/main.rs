// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
mod output;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use kube::api::{DynamicObject, ListParams};
use kube::core::GroupVersionKind;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use clusterlink::config::{self, ClusterConfig, Settings};
use clusterlink::kubernetes::{CacheOptions, ClientOptions, ClusterClient};
use clusterlink::multicluster::{self, MultiClustersManager};
use clusterlink::progress::{
    ProgressHandle, ProgressUpdate, create_progress_handle, create_spinner,
};
use clusterlink::scheme;

use cli::{Args, Command, TopCommand};
use output::Listing;

/// Initialize logging with file output and optional stderr
fn init_logging(verbose: bool) {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return;
    }

    // Rotate daily or at 10MB, keep 5 files
    let log_path = log_dir.join("clusterlink.log");
    let condition = RollingConditionBase::new()
        .daily()
        .max_size(10 * 1024 * 1024);

    let file_appender = match RollingFileAppenderBase::new(log_path, condition, 5) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {}", e);
            return;
        }
    };

    let (non_blocking, guard) = file_appender.get_non_blocking_appender();
    // Keep the background writer alive for the life of the process
    std::mem::forget(guard);

    let filter = if verbose { "clusterlink=debug" } else { "clusterlink=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE);

    if verbose {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
}

/// Outcome of connecting one context
struct Connection {
    context: String,
    result: Result<Arc<ClusterClient>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (aws-lc-rs)
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    init_logging(args.verbose);

    let mut settings = Settings::load()?;
    let cluster_config = ClusterConfig::load(&settings)?;
    let contexts = cluster_config.select(args.context.as_deref(), &settings.selected_contexts)?;

    if args.save {
        settings.selected_contexts = contexts.clone();
        settings.save()?;
        info!(contexts = ?contexts, "Saved selected contexts");
    }

    // Parent of every cluster's cache loop
    let root = CancellationToken::new();
    let manager = multicluster::interface();

    let connections =
        connect_all(&args, &settings, &cluster_config, &contexts, manager, &root).await?;
    let result = run_command(&args, manager, &connections).await;

    manager.shutdown().await;
    root.cancel();
    result
}

async fn run_command(
    args: &Args,
    manager: &dyn MultiClustersManager,
    connections: &[Connection],
) -> Result<()> {
    let listing = match &args.command {
        Command::Status => status(connections).await,
        Command::Get { kind, direct } => {
            get(manager, kind, args.namespace.as_deref(), *direct).await?
        }
        Command::Top {
            what: TopCommand::Nodes,
        } => top_nodes(manager).await?,
        Command::Top {
            what: TopCommand::Pods,
        } => top_pods(manager, args.namespace.as_deref()).await?,
    };
    println!("{}", listing.format(&args.output, args.no_headers));
    Ok(())
}

/// Connect every selected context in parallel and register the successes
async fn connect_all(
    args: &Args,
    settings: &Settings,
    cluster_config: &ClusterConfig,
    contexts: &[String],
    manager: &dyn MultiClustersManager,
    root: &CancellationToken,
) -> Result<Vec<Connection>> {
    let snapshot = scheme::global().snapshot();
    let warm = settings.warm_gvks(&snapshot)?;
    let sync_timeout = Duration::from_secs(args.sync_timeout);

    let progress = create_progress_handle();
    progress.start_batch(contexts.len());
    let mut progress_rx = progress.subscribe();
    let spinner = create_spinner("Connecting to Kubernetes...");

    let connects = futures::future::join_all(contexts.iter().map(|context| {
        let snapshot = Arc::clone(&snapshot);
        let options = ClientOptions::named(context)
            .with_cache(CacheOptions { warm: warm.clone() })
            .with_progress(Arc::clone(&progress));
        async move {
            let result =
                connect_one(cluster_config, context, snapshot, options, root, sync_timeout).await;
            let result = match result {
                Ok(client) => manager.add(context, client).await.map_err(anyhow::Error::from),
                Err(e) => Err(e),
            };
            Connection {
                context: context.clone(),
                result,
            }
        }
    }));
    let mut connects = std::pin::pin!(connects);

    let connections = loop {
        tokio::select! {
            biased;
            update = progress_rx.recv() => {
                if let Ok(update) = update {
                    spinner.set_message(progress_message(&progress, &update));
                }
            }
            connections = &mut connects => break connections,
        }
    };
    spinner.finish_and_clear();

    let failures = connections
        .iter()
        .filter_map(|c| c.result.as_ref().err().map(|e| (&c.context, e)));
    for (context, error) in failures {
        warn!(context = %context, error = %error, "Cluster unavailable");
        eprintln!("Warning: {}: {:#}", context, error);
    }
    if connections.iter().all(|c| c.result.is_err()) {
        return Err(anyhow!("Could not connect to any cluster"));
    }
    Ok(connections)
}

async fn connect_one(
    cluster_config: &ClusterConfig,
    context: &str,
    snapshot: Arc<scheme::Scheme>,
    options: ClientOptions,
    root: &CancellationToken,
    sync_timeout: Duration,
) -> Result<ClusterClient> {
    let kube_config = cluster_config.kube_config(context).await?;
    let token = root.child_token();
    let connect = ClusterClient::connect(&kube_config, snapshot, options, token.clone());
    let Ok(result) = tokio::time::timeout(sync_timeout, connect).await else {
        token.cancel();
        return Err(anyhow!(
            "Cache of '{}' did not sync within {:?}",
            context,
            sync_timeout
        ));
    };
    result.with_context(|| format!("Failed to connect to cluster '{}'", context))
}

fn progress_message(progress: &ProgressHandle, update: &ProgressUpdate) -> String {
    let (done, total) = progress.progress();
    let cluster = update.cluster();
    let step = match update {
        ProgressUpdate::Connecting { .. } => "connecting...".to_string(),
        ProgressUpdate::FacetBuilt { facet, .. } => format!("{} client ready", facet),
        ProgressUpdate::CacheSyncing { .. } => "syncing cache...".to_string(),
        ProgressUpdate::Connected { elapsed_ms, .. } => format!("connected in {}ms", elapsed_ms),
        ProgressUpdate::Failed { .. } => "failed".to_string(),
    };
    format!("[{}/{}] {}: {}", done, total, cluster, step)
}

async fn status(connections: &[Connection]) -> Listing {
    let mut listing = Listing::new(&["CLUSTER", "VERSION", "PLATFORM", "CACHE", "WATCHING"]);
    for connection in connections {
        let row = match &connection.result {
            Ok(client) => {
                let version = client.server_version();
                let watching: Vec<String> = client
                    .cache()
                    .watched_kinds()
                    .await
                    .into_iter()
                    .map(|gvk| gvk.kind)
                    .collect();
                vec![
                    connection.context.clone(),
                    version.git_version.clone(),
                    version.platform.clone(),
                    client.health().to_string(),
                    watching.join(","),
                ]
            }
            Err(e) => vec![
                connection.context.clone(),
                "-".to_string(),
                "-".to_string(),
                format!("unavailable: {:#}", e),
                String::new(),
            ],
        };
        listing.push(row);
    }
    listing
}

fn resolve_kind(kind: &str) -> Result<GroupVersionKind> {
    let snapshot = scheme::global().snapshot();
    scheme::parse_gvk(kind)
        .filter(|gvk| snapshot.contains(gvk))
        .or_else(|| snapshot.find_kind(kind).map(|ty| ty.gvk.clone()))
        .ok_or_else(|| anyhow!("Kind '{}' is not registered", kind))
}

async fn get(
    manager: &dyn MultiClustersManager,
    kind: &str,
    namespace: Option<&str>,
    direct: bool,
) -> Result<Listing> {
    let gvk = resolve_kind(kind)?;
    let mut listing = Listing::new(&["CLUSTER", "NAMESPACE", "NAME", "CREATED", "LABELS"]);

    for name in manager.names().await {
        let client = manager.get(&name).await?;
        let objects: Vec<DynamicObject> = if direct {
            client
                .direct()
                .list_dynamic(&gvk, namespace, &ListParams::default())
                .await?
        } else {
            client
                .cache()
                .list_dynamic(&gvk, namespace)
                .await?
                .into_iter()
                .map(Arc::unwrap_or_clone)
                .collect()
        };

        for obj in objects {
            listing.push(object_row(&name, &obj));
        }
    }
    Ok(listing)
}

fn object_row(cluster: &str, obj: &DynamicObject) -> Vec<String> {
    let meta = &obj.metadata;
    let created = meta
        .creation_timestamp
        .as_ref()
        .and_then(|ts| serde_json::to_value(ts).ok())
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    let labels = meta
        .labels
        .as_ref()
        .map(|labels: &BTreeMap<String, String>| {
            labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();
    vec![
        cluster.to_string(),
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
        created,
        labels,
    ]
}

fn format_cpu(millis: Option<u64>) -> String {
    millis.map(|m| format!("{}m", m)).unwrap_or_else(|| "-".to_string())
}

fn format_memory(bytes: Option<u64>) -> String {
    bytes
        .map(|b| format!("{}Mi", b / (1024 * 1024)))
        .unwrap_or_else(|| "-".to_string())
}

async fn top_nodes(manager: &dyn MultiClustersManager) -> Result<Listing> {
    let mut listing = Listing::new(&["CLUSTER", "NODE", "CPU", "MEMORY"]);
    for name in manager.names().await {
        let client = manager.get(&name).await?;
        let nodes = client
            .metrics()
            .node_metrics()
            .await
            .with_context(|| format!("Failed to read node metrics from '{}'", name))?;
        for node in nodes {
            listing.push(vec![
                name.clone(),
                node.metadata.name.clone().unwrap_or_default(),
                format_cpu(node.cpu_millis()),
                format_memory(node.memory_bytes()),
            ]);
        }
    }
    Ok(listing)
}

async fn top_pods(manager: &dyn MultiClustersManager, namespace: Option<&str>) -> Result<Listing> {
    let mut listing = Listing::new(&["CLUSTER", "NAMESPACE", "POD", "CPU", "MEMORY"]);
    for name in manager.names().await {
        let client = manager.get(&name).await?;
        let pods = client
            .metrics()
            .pod_metrics(namespace)
            .await
            .with_context(|| format!("Failed to read pod metrics from '{}'", name))?;
        for pod in pods {
            listing.push(vec![
                name.clone(),
                pod.metadata.namespace.clone().unwrap_or_default(),
                pod.metadata.name.clone().unwrap_or_default(),
                format_cpu(Some(pod.cpu_millis())),
                format_memory(Some(pod.memory_bytes())),
            ]);
        }
    }
    Ok(listing)
}
