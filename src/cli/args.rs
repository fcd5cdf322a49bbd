// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "clusterlink")]
#[command(author, version, about = "Cache-aware access to many Kubernetes clusters")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Kubernetes context(s) to connect. Supports comma-separated lists,
    /// glob patterns and exclusions.
    /// Examples: -c prod, -c "prod,staging", -c "prod-*,!prod-canary"
    #[arg(short, long, value_name = "CONTEXT", global = true)]
    pub context: Option<String>,

    /// Namespace to read from (all namespaces if omitted)
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Omit column headers in output
    #[arg(long, global = true)]
    pub no_headers: bool,

    /// Remember the selected contexts for later runs
    #[arg(long, global = true)]
    pub save: bool,

    /// Give up on clusters whose cache has not synced after this many seconds
    #[arg(long, default_value = "60", value_name = "SECS", global = true)]
    pub sync_timeout: u64,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect the selected clusters and show version and cache health
    Status,

    /// List objects of a registered kind from every connected cluster
    Get {
        /// Kind, plural or group/version/Kind (e.g. pods, Deployment, apps/v1/Deployment)
        kind: String,

        /// Read from the API server instead of the cache
        #[arg(long)]
        direct: bool,
    },

    /// Show resource usage from metrics.k8s.io
    Top {
        #[command(subcommand)]
        what: TopCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum TopCommand {
    /// Node CPU and memory usage
    Nodes,
    /// Pod CPU and memory usage
    Pods,
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_direct() {
        let args = Args::parse_from(["clusterlink", "-c", "prod-*", "get", "pods", "--direct"]);
        assert_eq!(args.context.as_deref(), Some("prod-*"));
        match args.command {
            Command::Get { kind, direct } => {
                assert_eq!(kind, "pods");
                assert!(direct);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["clusterlink", "top", "nodes", "-o", "json", "-v"]);
        assert!(matches!(args.command, Command::Top { what: TopCommand::Nodes }));
        assert!(matches!(args.output, OutputFormat::Json));
        assert!(args.verbose);
        assert_eq!(args.sync_timeout, 60);
    }

    #[test]
    fn test_command_required() {
        assert!(Args::try_parse_from(["clusterlink"]).is_err());
    }
}
