mod analyzer;
mod cli;
mod commands;
mod config;
mod coordinator;
mod diff;
mod error;
mod k8s;
mod kubectl;
mod manifest;
mod model;
mod resolver;
mod store;
mod timeline;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{CliArgs, Command};
use commands::{Outcome, Session, history_diff, load_timeline};
use config::RuntimeConfig;
use coordinator::{Coordinator, SnapshotLink};
use k8s::KubeGateway;
use kubectl::Kubectl;
use resolver::FALLBACK_NAMESPACE;
use std::io::{self, IsTerminal, Write};
use store::KubeRecordStore;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = RuntimeConfig::discover()?;
    let log_filter = args
        .log_filter
        .as_deref()
        .or(config.log_filter.as_deref())
        .unwrap_or(DEFAULT_LOG_FILTER);
    init_tracing(log_filter)?;
    if let Some(source) = config.source.as_deref() {
        info!(config = %source, "loaded configuration");
    }

    let kubectl = Kubectl::new(
        args.kubectl
            .clone()
            .unwrap_or_else(|| config.kubectl.clone()),
    );
    let color = !args.no_color && io::stdout().is_terminal();

    match args.command {
        Command::Apply(mut apply) => {
            apply.namespace = config.namespace_or(apply.namespace);
            let outcome = recording_session(&config, kubectl).await.apply(&apply).await?;
            report(&outcome);
        }
        Command::Delete(mut delete) => {
            delete.namespace = config.namespace_or(delete.namespace);
            let outcome = recording_session(&config, kubectl).await.delete(&delete).await?;
            report(&outcome);
        }
        Command::Patch(mut patch) => {
            patch.namespace = config.namespace_or(patch.namespace);
            let outcome = recording_session(&config, kubectl).await.patch(&patch).await?;
            report(&outcome);
        }
        Command::Diff(diff) => {
            let gateway = KubeGateway::connect().await?;
            let namespace = namespace_for(diff.namespace.as_deref(), &config, &gateway);
            match diff.history_id {
                Some(history_id) => show_diff(&gateway, &namespace, &history_id, color).await?,
                None => show_timeline(&gateway, &namespace).await?,
            }
        }
        Command::Timeline(timeline) => {
            let gateway = KubeGateway::connect().await?;
            let namespace = namespace_for(timeline.namespace.as_deref(), &config, &gateway);
            show_timeline(&gateway, &namespace).await?;
        }
    }

    Ok(())
}

fn init_tracing(level_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("failed to initialize tracing filter")?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(io::stderr)
        .try_init();

    Ok(())
}

/// Recording is best-effort: without a cluster client the command still runs.
/// The session namespace only backs commands that pass no `-n`, so it follows the
/// kubeconfig context kubectl itself would use.
async fn recording_session(
    config: &RuntimeConfig,
    kubectl: Kubectl,
) -> Session<KubeRecordStore, Kubectl, Kubectl> {
    match KubeGateway::connect().await {
        Ok(gateway) => {
            info!(context = %gateway.context(), "recording changes");
            let namespace = gateway.default_namespace().to_string();
            let coordinator = Coordinator::new(
                KubeRecordStore::new(gateway.client()),
                config.applied_by.clone(),
            );
            Session::new(Some(coordinator), kubectl.clone(), kubectl, namespace)
        }
        Err(error) => {
            warn!("could not create Kubernetes client, skipping history recording: {error}");
            let namespace = FALLBACK_NAMESPACE.to_string();
            Session::new(None, kubectl.clone(), kubectl, namespace)
        }
    }
}

fn report(outcome: &Outcome) {
    debug!(
        changed = outcome.analysis.changes.len(),
        has_changes = outcome.analysis.has_changes,
        "kubectl output analyzed"
    );
    match &outcome.history {
        Some(history) => match history.snapshot_link {
            SnapshotLink::Unlinked => warn!(
                history = %history.name,
                snapshot = outcome.snapshot.as_deref().unwrap_or_default(),
                "history recorded but its snapshot stays pending"
            ),
            _ => info!(history = %history.name, "change recorded"),
        },
        None => debug!(snapshot = ?outcome.snapshot, "nothing recorded"),
    }
}

fn namespace_for(requested: Option<&str>, config: &RuntimeConfig, gateway: &KubeGateway) -> String {
    requested
        .or(config.namespace.as_deref())
        .map(str::trim)
        .filter(|namespace| !namespace.is_empty())
        .unwrap_or_else(|| gateway.default_namespace())
        .to_string()
}

async fn show_diff(
    gateway: &KubeGateway,
    namespace: &str,
    history_id: &str,
    color: bool,
) -> Result<()> {
    let store = KubeRecordStore::new(gateway.client());
    let diff = history_diff(&store, namespace, history_id)
        .await
        .with_context(|| format!("failed to diff history {history_id}"))?;

    let mut out = io::stdout().lock();
    if !diff.has_changes() {
        writeln!(out, "No differences between before and after for {history_id}")?;
        return Ok(());
    }
    writeln!(out, "Diff between before and after (filtered):")?;
    writeln!(out, "{}", diff.render(color))?;
    Ok(())
}

async fn show_timeline(gateway: &KubeGateway, namespace: &str) -> Result<()> {
    info!(%namespace, "showing timeline of changes");
    let store = KubeRecordStore::new(gateway.client());
    let timeline = load_timeline(&store, namespace)
        .await
        .context("failed to list histories")?;

    let mut out = io::stdout().lock();
    timeline.render(&mut out)?;
    if timeline.is_empty() {
        writeln!(out, "No history records found in namespace {namespace}")?;
        return Ok(());
    }
    timeline.prompt(&mut io::stdin().lock(), &mut out)?;
    Ok(())
}
