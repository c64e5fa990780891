use crate::analyzer::{OutputAnalysis, analyze_output, analyze_patch_output};
use crate::cli::{ApplyArgs, DeleteArgs, PatchArgs, PatchType};
use crate::coordinator::{Coordinator, DELETE_PREFIX, PATCH_PREFIX, RecordedHistory, generate_name};
use crate::diff::{RenderedDiff, diff_documents};
use crate::error::KronoformError;
use crate::kubectl::{Invocation, StateSource, ToolRunner};
use crate::manifest::load_manifests;
use crate::resolver::{FALLBACK_NAMESPACE, resolve_actual_state};
use crate::store::{HISTORY_KIND, RecordStore, SNAPSHOT_KIND};
use crate::timeline::Timeline;
use anyhow::{Context, Result};
use std::slice;
use tracing::{info, warn};

/// Result of one wrapped command, mostly useful to callers that want to report on it.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub snapshot: Option<String>,
    pub history: Option<RecordedHistory>,
    pub analysis: OutputAnalysis,
}

/// Everything one invocation needs, injected up front. `coordinator` is `None` when the
/// cluster client could not be built; the wrapped command still runs, unrecorded.
pub struct Session<S, R, Q> {
    coordinator: Option<Coordinator<S>>,
    runner: R,
    state: Q,
    default_namespace: String,
}

impl<S, R, Q> Session<S, R, Q>
where
    S: RecordStore,
    R: ToolRunner,
    Q: StateSource,
{
    pub fn new(
        coordinator: Option<Coordinator<S>>,
        runner: R,
        state: Q,
        default_namespace: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            runner,
            state,
            default_namespace: default_namespace.into(),
        }
    }

    #[cfg(test)]
    pub fn coordinator(&self) -> Option<&Coordinator<S>> {
        self.coordinator.as_ref()
    }

    pub async fn apply(&self, args: &ApplyArgs) -> Result<Outcome> {
        info!("starting apply operation");

        let manifest = if args.filenames.is_empty() {
            String::new()
        } else {
            load_manifests(&args.filenames).context("failed to read manifest files")?
        };
        let namespace = self.namespace(args.namespace.as_deref());
        let recorder = if args.dry_run {
            None
        } else {
            self.coordinator.as_ref()
        };

        let mut snapshot = None;
        if let Some(coordinator) = recorder
            && !manifest.is_empty()
        {
            match coordinator.create_snapshot(&manifest, &namespace).await {
                Ok(name) => snapshot = Some(name),
                Err(error) if error.is_recording_only() => {
                    warn!("could not create snapshot: {error:#}")
                }
                Err(error) => return Err(error.into()),
            }
        }

        let output = self
            .runner
            .run(&apply_invocation(args))
            .await
            .context("kubectl apply failed")?;
        info!("apply operation completed successfully");

        let analysis = analyze_output(&output);
        let history = match (recorder, snapshot.as_deref()) {
            (Some(coordinator), Some(snapshot_name)) if analysis.has_changes => {
                let actual = resolve_actual_state(&self.state, &manifest, &namespace).await;
                let actual = if actual.trim().is_empty() {
                    manifest
                } else {
                    actual
                };
                record(coordinator, &actual, snapshot_name, &namespace, &analysis, "apply").await?
            }
            (Some(coordinator), Some(snapshot_name)) => {
                info!("no changes detected, skipping history recording");
                coordinator.cleanup_snapshot(snapshot_name, &namespace).await;
                None
            }
            _ => {
                if !analysis.has_changes {
                    info!("no changes detected, skipping history recording");
                }
                None
            }
        };

        Ok(Outcome {
            snapshot,
            history,
            analysis,
        })
    }

    pub async fn delete(&self, args: &DeleteArgs) -> Result<Outcome> {
        info!("starting delete operation");

        let manifest = if args.filenames.is_empty() {
            None
        } else {
            Some(load_manifests(&args.filenames).context("failed to read manifest files")?)
        };
        let namespace = self.namespace(args.namespace.as_deref());
        let before = if self.coordinator.is_some() {
            Some(self.capture_delete_state(args, manifest, &namespace).await)
        } else {
            None
        };

        let output = self
            .runner
            .run(&delete_invocation(args))
            .await
            .context("kubectl delete failed")?;
        info!("delete operation completed successfully");

        let analysis = analyze_output(&output);
        let history = match (self.coordinator.as_ref(), before) {
            (Some(coordinator), Some(before)) if analysis.has_changes => {
                let reference = generate_name(DELETE_PREFIX);
                record(coordinator, &before, &reference, &namespace, &analysis, "delete").await?
            }
            _ => None,
        };

        Ok(Outcome {
            snapshot: None,
            history,
            analysis,
        })
    }

    pub async fn patch(&self, args: &PatchArgs) -> Result<Outcome> {
        info!("starting patch operation");

        let namespace = self.namespace(args.namespace.as_deref());
        let before = if self.coordinator.is_some() {
            Some(self.capture_patch_state(args, &namespace).await)
        } else {
            None
        };

        let output = self
            .runner
            .run(&patch_invocation(args))
            .await
            .context("kubectl patch failed")?;
        info!("patch operation completed successfully");

        let analysis = analyze_patch_output(&output);
        let history = match (self.coordinator.as_ref(), before) {
            (Some(coordinator), Some(before)) if analysis.has_changes => {
                let reference = generate_name(PATCH_PREFIX);
                record(coordinator, &before, &reference, &namespace, &analysis, "patch").await?
            }
            _ => None,
        };

        Ok(Outcome {
            snapshot: None,
            history,
            analysis,
        })
    }

    fn namespace(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|namespace| !namespace.is_empty())
            .or_else(|| Some(self.default_namespace.trim()).filter(|ns| !ns.is_empty()))
            .unwrap_or(FALLBACK_NAMESPACE)
            .to_string()
    }

    async fn capture_delete_state(
        &self,
        args: &DeleteArgs,
        manifest: Option<String>,
        namespace: &str,
    ) -> String {
        if let Some(manifest) = manifest {
            let resolved = resolve_actual_state(&self.state, &manifest, namespace).await;
            return if resolved.trim().is_empty() {
                manifest
            } else {
                resolved
            };
        }

        if !args.resources.is_empty() {
            let target = args.resources.join(" ");
            return match self.state.fetch(&args.resources, namespace).await {
                Ok(live) if !live.trim().is_empty() => live,
                Ok(_) => format!("# Deleting resource: {target}\n"),
                Err(error) => {
                    warn!(resource = %target, %namespace, "could not capture current state: {error:#}");
                    format!("# Deleting resource: {target}\n")
                }
            };
        }

        let mut header = String::from("# Captured state before delete operation\n");
        if let Some(selector) = args.selector.as_deref() {
            header.push_str(&format!("# Selector: {selector}\n"));
        }
        if args.all {
            header.push_str("# All resources\n");
        }
        header
    }

    async fn capture_patch_state(&self, args: &PatchArgs, namespace: &str) -> String {
        match self
            .state
            .fetch(slice::from_ref(&args.resource), namespace)
            .await
        {
            Ok(live) if !live.trim().is_empty() => live,
            Ok(_) => format!("# Current state of resource: {}\n", args.resource),
            Err(error) => {
                warn!(resource = %args.resource, %namespace, "could not capture current state: {error:#}");
                format!("# Current state of resource: {}\n", args.resource)
            }
        }
    }
}

async fn record<S: RecordStore>(
    coordinator: &Coordinator<S>,
    manifest: &str,
    snapshot_ref: &str,
    namespace: &str,
    analysis: &OutputAnalysis,
    verb: &str,
) -> Result<Option<RecordedHistory>, KronoformError> {
    match coordinator
        .create_history(manifest, snapshot_ref, namespace, analysis.changes.clone())
        .await
    {
        Ok(recorded) => {
            info!(history = %recorded.name, "{verb} history recorded successfully");
            Ok(Some(recorded))
        }
        Err(error) if error.is_recording_only() => {
            warn!("could not create {verb} history: {error:#}");
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

pub fn apply_invocation(args: &ApplyArgs) -> Invocation {
    Invocation::new("apply")
        .repeated("-f", &args.filenames)
        .switch("--dry-run=client", args.dry_run)
        .value("-n", args.namespace.as_deref())
        .positional(&args.extra)
}

pub fn delete_invocation(args: &DeleteArgs) -> Invocation {
    Invocation::new("delete")
        .repeated("-f", &args.filenames)
        .value("-l", args.selector.as_deref())
        .value("-n", args.namespace.as_deref())
        .switch("--all", args.all)
        .assigned("--ignore-not-found", &args.ignore_not_found)
        .positional(&args.resources)
}

pub fn patch_invocation(args: &PatchArgs) -> Invocation {
    let patch_type = (args.patch_type != PatchType::Strategic).then(|| args.patch_type.as_str());

    Invocation::new("patch")
        .repeated("-p", slice::from_ref(&args.patch))
        .value("--type", patch_type)
        .value("-n", args.namespace.as_deref())
        .positional(slice::from_ref(&args.resource))
}

/// Diff between a history record and the snapshot it followed.
pub async fn history_diff<S: RecordStore>(
    store: &S,
    namespace: &str,
    history_id: &str,
) -> Result<RenderedDiff, KronoformError> {
    let history = store
        .get_history(namespace, history_id)
        .await?
        .ok_or_else(|| KronoformError::LookupNotFound {
            kind: HISTORY_KIND,
            name: history_id.to_string(),
            namespace: namespace.to_string(),
        })?;

    let snapshot_ref = history.spec.snapshot_ref.as_str();
    let snapshot = store
        .get_snapshot(namespace, snapshot_ref)
        .await?
        .ok_or_else(|| KronoformError::LookupNotFound {
            kind: SNAPSHOT_KIND,
            name: snapshot_ref.to_string(),
            namespace: namespace.to_string(),
        })?;

    diff_documents(&snapshot.spec.manifests, &history.spec.manifests)
}

pub async fn load_timeline<S: RecordStore>(
    store: &S,
    namespace: &str,
) -> Result<Timeline, KronoformError> {
    let histories = store.list_histories(namespace).await?;
    info!(%namespace, records = histories.len(), "loaded history records");
    Ok(Timeline::from_histories(histories))
}
