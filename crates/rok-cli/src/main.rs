// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
mod commands;
mod format;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use format::{Formatter, OutputFormat};
use rok_signing::{Algorithm, HttpSigningGateway, SigningGateway};
use rok_store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit code for runtime errors (config, store, signer, or command failures).
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "rok", version, about = "Release-orchestration kernel operator and verifier CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a kernel TOML config file. Falls back to defaults plus
    /// environment overrides when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output rendering.
    #[arg(long, global = true, default_value = "json-pretty")]
    format: OutputFormatArg,

    /// Signature algorithm the audit chain was signed under.
    #[arg(long, global = true, value_enum, default_value_t = AlgorithmArg::Ed25519)]
    algorithm: AlgorithmArg,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Ed25519,
    RsaSha256,
}

impl From<AlgorithmArg> for Algorithm {
    fn from(value: AlgorithmArg) -> Self {
        match value {
            AlgorithmArg::Ed25519 => Algorithm::Ed25519,
            AlgorithmArg::RsaSha256 => Algorithm::RsaSha256,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OutputFormatArg(OutputFormat);

impl std::str::FromStr for OutputFormatArg {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(OutputFormatArg)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify hash integrity, chain linkage, and signatures over a time window.
    VerifyChain {
        /// Start of the window (RFC 3339).
        #[arg(long)]
        from: String,
        /// End of the window (RFC 3339).
        #[arg(long)]
        to: String,
    },

    /// Export a time window as a single ad hoc batch to object storage.
    Export {
        /// Start of the window (RFC 3339).
        #[arg(long)]
        from: String,
        /// End of the window (RFC 3339).
        #[arg(long)]
        to: String,
        /// Destination object store URI, e.g. `file:///tmp/exports` or `s3://bucket/prefix`.
        #[arg(long = "to-uri")]
        to_uri: String,
        /// Service name the batch is filed under.
        #[arg(long, default_value = "rok")]
        service: String,
        /// Batch sequence number within this export run.
        #[arg(long, default_value_t = 0)]
        batch_number: u32,
    },

    /// Fold a time window of audit events into the latest state touched per entity.
    Replay {
        /// Start of the window (RFC 3339).
        #[arg(long)]
        from: String,
        /// End of the window (RFC 3339).
        #[arg(long)]
        to: String,
    },

    /// Publish task administration.
    Publish {
        #[command(subcommand)]
        action: PublishAction,
    },
}

#[derive(Subcommand, Debug)]
enum PublishAction {
    /// Reset a `failed_fatal` publish task back to `pending`.
    Resubmit {
        /// The publish task id.
        task_id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("rok=debug")
    } else {
        EnvFilter::new("rok=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = run(cli).await;
    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = rok_config::load_config(cli.config.as_deref()).context("loading config")?;
    let formatter = Formatter::new(cli.format.0);
    let algorithm: Algorithm = cli.algorithm.into();

    match cli.command {
        Commands::VerifyChain { from, to } => {
            let from = commands::parse_timestamp(&from)?;
            let to = commands::parse_timestamp(&to)?;
            commands::require_ordered_window(from, to)?;
            let chain = build_audit_chain(&config, algorithm).await?;
            let report = commands::verify_chain(&chain, from, to).await?;
            println!(
                "{}",
                formatter.render(&report, |r| vec![
                    format!("events checked: {}", r.events_checked),
                    format!("ok:             {}", r.ok),
                    format!(
                        "broken at:      {}",
                        r.broken_at.map_or_else(|| "<none>".to_string(), |id| id.to_string())
                    ),
                ])
            );
            if !report.ok {
                std::process::exit(EXIT_RUNTIME_ERROR);
            }
            Ok(())
        }
        Commands::Export {
            from,
            to,
            to_uri,
            service,
            batch_number,
        } => {
            let from = commands::parse_timestamp(&from)?;
            let to = commands::parse_timestamp(&to)?;
            commands::require_ordered_window(from, to)?;
            let object_store = commands::build_object_store(&to_uri)?;
            let chain = build_audit_chain(&config, algorithm).await?;
            let summary =
                commands::export_batch(&chain, object_store, &service, from, to, batch_number).await?;
            println!(
                "{}",
                formatter.render(
                    &serde_json::json!({
                        "objectPath": summary.object_path,
                        "eventCount": summary.event_count,
                        "digest": summary.digest,
                    }),
                    |_| vec![
                        format!("object path: {}", summary.object_path),
                        format!("event count: {}", summary.event_count),
                        format!("digest:      {}", summary.digest),
                    ]
                )
            );
            Ok(())
        }
        Commands::Replay { from, to } => {
            let from = commands::parse_timestamp(&from)?;
            let to = commands::parse_timestamp(&to)?;
            commands::require_ordered_window(from, to)?;
            let chain = build_audit_chain(&config, algorithm).await?;
            let summary = commands::replay(&chain, from, to).await?;
            println!(
                "{}",
                formatter.render(&summary, |s| {
                    let mut lines = vec![format!("events replayed: {}", s.events_replayed)];
                    for (id, state) in &s.packages {
                        lines.push(format!("package  {id}: {state}"));
                    }
                    for (id, state) in &s.manifests {
                        lines.push(format!("manifest {id}: {state}"));
                    }
                    for (id, state) in &s.upgrades {
                        lines.push(format!("upgrade  {id}: {state}"));
                    }
                    lines
                })
            );
            Ok(())
        }
        Commands::Publish {
            action: PublishAction::Resubmit { task_id },
        } => {
            let task_id = commands::parse_task_id(&task_id)?;
            let store = Store::connect(&config.database_url, config.max_connections)
                .await
                .context("connecting to store")?;
            let chain = build_audit_chain(&config, algorithm).await?;
            let publisher = rok_publisher::PublishDriver::new(store, Arc::new(chain), Default::default());
            commands::resubmit_publish_task(&publisher, task_id).await?;
            println!(
                "{}",
                formatter.render(
                    &serde_json::json!({"taskId": task_id, "status": "pending"}),
                    |_| vec![format!("task {task_id} reset to pending")]
                )
            );
            Ok(())
        }
    }
}

async fn build_audit_chain(
    config: &rok_config::KernelConfig,
    algorithm: Algorithm,
) -> Result<rok_audit::AuditChain> {
    let store = Store::connect(&config.database_url, config.max_connections)
        .await
        .context("connecting to store")?;
    let signer: Arc<dyn SigningGateway> =
        Arc::new(HttpSigningGateway::new(config.signing_gateway_url.clone(), Duration::from_secs(300)));
    Ok(rok_audit::AuditChain::new(
        store,
        signer,
        config.audit_signer_kid.clone(),
        algorithm,
        rok_audit::SamplingPolicy::from_rules(config.audit_sampling_policy.clone()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_verify_chain() {
        let cli = Cli::parse_from([
            "rok",
            "verify-chain",
            "--from",
            "2026-01-01T00:00:00Z",
            "--to",
            "2026-01-02T00:00:00Z",
        ]);
        assert!(matches!(cli.command, Commands::VerifyChain { .. }));
    }

    #[test]
    fn cli_parses_publish_resubmit() {
        let cli = Cli::parse_from([
            "rok",
            "publish",
            "resubmit",
            "5b6e3b1a-1111-4f1a-9a1a-000000000000",
        ]);
        assert!(matches!(
            cli.command,
            Commands::Publish {
                action: PublishAction::Resubmit { .. }
            }
        ));
    }

    #[test]
    fn cli_command_is_well_formed() {
        Cli::command().debug_assert();
    }
}
