use crate::error::KronoformError;
use crate::model::{
    KronoformHistory, KronoformHistorySpec, KronoformHistoryStatus, KronoformSnapshot,
    KronoformSnapshotSpec, KronoformSnapshotStatus, ResourceChange, SnapshotPhase, change_summary,
    resource_types,
};
use crate::resolver::FALLBACK_NAMESPACE;
use crate::store::RecordStore;
use chrono::{Local, SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::jiff::Timestamp;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SNAPSHOT_PREFIX: &str = "kronoform-snapshot";
pub const HISTORY_PREFIX: &str = "kronoform-history";
pub const DELETE_PREFIX: &str = "delete";
pub const PATCH_PREFIX: &str = "patch";

/// What happened to the snapshot after its history was committed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SnapshotLink {
    Linked,
    /// No snapshot under that name; expected for delete and patch.
    Missing,
    /// History is durable but the snapshot could not be updated and stays pending.
    Unlinked,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RecordedHistory {
    pub name: String,
    pub snapshot_link: SnapshotLink,
}

/// Owns the snapshot → history lifecycle for one applier.
///
/// The snapshot/history pair is linked in two independent writes: the history is
/// committed first, then the snapshot is updated best-effort. A failure in the second
/// write leaves the snapshot `Pending` for a later reconciliation pass.
pub struct Coordinator<S> {
    store: S,
    applied_by: String,
}

impl<S: RecordStore> Coordinator<S> {
    pub fn new(store: S, applied_by: impl Into<String>) -> Self {
        Self {
            store,
            applied_by: applied_by.into(),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn create_snapshot(
        &self,
        manifest: &str,
        namespace: &str,
    ) -> Result<String, KronoformError> {
        let name = generate_name(SNAPSHOT_PREFIX);
        let now = Local::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut snapshot = KronoformSnapshot::new(
            &name,
            KronoformSnapshotSpec {
                manifests: manifest.to_string(),
                description: format!("Applied by {} at {now}", self.applied_by),
                dry_run: false,
                target_namespace: namespace.to_string(),
            },
        );
        let namespace = target_namespace(namespace);
        snapshot.metadata.namespace = Some(namespace.to_string());

        self.store.create_snapshot(&snapshot).await?;
        info!(snapshot = %name, "created snapshot");

        let status = KronoformSnapshotStatus {
            phase: Some(SnapshotPhase::Pending),
            ..KronoformSnapshotStatus::default()
        };
        if let Err(error) = self
            .store
            .patch_snapshot_status(namespace, &name, &status)
            .await
        {
            warn!(snapshot = %name, "could not mark snapshot pending: {error:#}");
        }
        Ok(name)
    }

    pub async fn create_history(
        &self,
        manifest: &str,
        snapshot_name: &str,
        namespace: &str,
        changes: Vec<ResourceChange>,
    ) -> Result<RecordedHistory, KronoformError> {
        let name = generate_name(HISTORY_PREFIX);
        let namespace = target_namespace(namespace);
        let applied_at = Time(Timestamp::now());

        let mut history = KronoformHistory::new(
            &name,
            KronoformHistorySpec {
                manifests: manifest.to_string(),
                snapshot_ref: snapshot_name.to_string(),
                description: format!("Applied by {}", self.applied_by),
                applied_by: self.applied_by.clone(),
                resource_types: resource_types(&changes),
                resource_changes: changes,
            },
        );
        history.metadata.namespace = Some(namespace.to_string());

        self.store.create_history(&history).await?;
        info!(history = %name, snapshot = %snapshot_name, "recorded history");

        let status = KronoformHistoryStatus {
            applied_at: Some(applied_at.clone()),
            summary: change_summary(&history.spec.resource_changes),
        };
        if let Err(error) = self
            .store
            .patch_history_status(namespace, &name, &status)
            .await
        {
            warn!(history = %name, "could not write history status: {error:#}");
        }

        let snapshot_link = self
            .link_snapshot(namespace, snapshot_name, &name, applied_at)
            .await;
        Ok(RecordedHistory {
            name,
            snapshot_link,
        })
    }

    async fn link_snapshot(
        &self,
        namespace: &str,
        snapshot_name: &str,
        history_name: &str,
        applied_at: Time,
    ) -> SnapshotLink {
        let snapshot = match self.store.get_snapshot(namespace, snapshot_name).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!(snapshot = %snapshot_name, "history recorded without snapshot update");
                return SnapshotLink::Missing;
            }
            Err(error) => {
                warn!(snapshot = %snapshot_name, "could not read snapshot, leaving it pending: {error:#}");
                return SnapshotLink::Unlinked;
            }
        };

        let phase = snapshot.phase();
        if !phase.can_transition_to(SnapshotPhase::Completed) {
            warn!(snapshot = %snapshot_name, %phase, "snapshot is no longer pending, not linking");
            return SnapshotLink::Unlinked;
        }

        let status = KronoformSnapshotStatus {
            phase: Some(SnapshotPhase::Completed),
            message: Some("Successfully applied and recorded".to_string()),
            applied_at: Some(applied_at),
            history_ref: Some(history_name.to_string()),
        };
        match self
            .store
            .patch_snapshot_status(namespace, snapshot_name, &status)
            .await
        {
            Ok(_) => {
                debug!(snapshot = %snapshot_name, history = %history_name, "linked snapshot");
                SnapshotLink::Linked
            }
            Err(error) => {
                warn!(snapshot = %snapshot_name, "could not link snapshot to history, it stays pending: {error:#}");
                SnapshotLink::Unlinked
            }
        }
    }

    /// Retires a snapshot whose command changed nothing. Never fails; every problem is
    /// logged and swallowed.
    pub async fn cleanup_snapshot(&self, snapshot_name: &str, namespace: &str) {
        let namespace = target_namespace(namespace);
        let snapshot = match self.store.get_snapshot(namespace, snapshot_name).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(error) => {
                warn!(snapshot = %snapshot_name, "could not read unused snapshot: {error:#}");
                return;
            }
        };

        let phase = snapshot.phase();
        if !phase.can_transition_to(SnapshotPhase::NoChanges) {
            warn!(snapshot = %snapshot_name, %phase, "refusing to discard a snapshot that is not pending");
            return;
        }

        let mut status = snapshot.status.clone().unwrap_or_default();
        status.phase = Some(SnapshotPhase::NoChanges);
        status.message = Some("No changes detected, snapshot not needed".to_string());
        if let Err(error) = self
            .store
            .patch_snapshot_status(namespace, snapshot_name, &status)
            .await
        {
            warn!(snapshot = %snapshot_name, "could not update snapshot status: {error:#}");
        }

        match self.store.delete_snapshot(namespace, snapshot_name).await {
            Ok(()) => info!(snapshot = %snapshot_name, "cleaned up unused snapshot"),
            Err(error) => {
                warn!(snapshot = %snapshot_name, "could not delete unused snapshot: {error:#}")
            }
        }
    }
}

/// `<prefix>-<unix seconds>-<8 hex>`; the random tail keeps same-second invocations apart.
pub fn generate_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}-{}", Utc::now().timestamp(), &suffix[..8])
}

pub fn target_namespace(namespace: &str) -> &str {
    let namespace = namespace.trim();
    if namespace.is_empty() {
        FALLBACK_NAMESPACE
    } else {
        namespace
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Coordinator, HISTORY_PREFIX, SNAPSHOT_PREFIX, SnapshotLink, generate_name, target_namespace,
    };
    use crate::model::{
        KronoformSnapshot, KronoformSnapshotSpec, KronoformSnapshotStatus, Operation,
        ResourceChange, SnapshotPhase,
    };
    use crate::resolver::is_valid_kubernetes_name;
    use crate::store::memory::{Faults, MemoryRecordStore};
    use kube::ResourceExt;

    fn coordinator(faults: Faults) -> Coordinator<MemoryRecordStore> {
        Coordinator::new(MemoryRecordStore::with_faults(faults), "alice")
    }

    fn created(resource: &str) -> Vec<ResourceChange> {
        vec![ResourceChange::new(resource, Operation::Created)]
    }

    #[test]
    fn generated_names_are_unique_and_valid() {
        let first = generate_name(SNAPSHOT_PREFIX);
        let second = generate_name(SNAPSHOT_PREFIX);

        assert_ne!(first, second);
        assert!(first.starts_with("kronoform-snapshot-"));
        assert!(is_valid_kubernetes_name(&first));
    }

    #[test]
    fn empty_namespace_targets_default() {
        assert_eq!(target_namespace(""), "default");
        assert_eq!(target_namespace("team-a"), "team-a");
    }

    #[tokio::test]
    async fn snapshot_is_created_pending_with_applier() {
        let coordinator = coordinator(Faults::default());
        let name = coordinator
            .create_snapshot("kind: ConfigMap", "")
            .await
            .expect("snapshot created");

        let snapshots = coordinator.store().snapshots();
        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.name_any(), name);
        assert_eq!(snapshot.namespace().as_deref(), Some("default"));
        assert_eq!(snapshot.phase(), SnapshotPhase::Pending);
        assert!(snapshot.spec.description.starts_with("Applied by alice at "));
        assert_eq!(snapshot.spec.manifests, "kind: ConfigMap");
    }

    #[tokio::test]
    async fn snapshot_write_failure_is_reported() {
        let coordinator = coordinator(Faults {
            snapshot_create: true,
            ..Faults::default()
        });
        let error = coordinator
            .create_snapshot("kind: ConfigMap", "default")
            .await
            .expect_err("write fails");

        assert!(error.is_recording_only());
    }

    #[tokio::test]
    async fn history_completes_and_links_snapshot() {
        let coordinator = coordinator(Faults::default());
        let snapshot = coordinator
            .create_snapshot("kind: Deployment", "apps")
            .await
            .expect("snapshot created");

        let recorded = coordinator
            .create_history("live state", &snapshot, "apps", created("deployment/demo"))
            .await
            .expect("history created");

        assert_eq!(recorded.snapshot_link, SnapshotLink::Linked);
        assert!(recorded.name.starts_with(HISTORY_PREFIX));

        let histories = coordinator.store().histories();
        assert_eq!(histories.len(), 1);
        let history = &histories[0];
        assert_eq!(history.spec.snapshot_ref, snapshot);
        assert_eq!(history.spec.applied_by, "alice");
        assert_eq!(history.spec.resource_types, vec!["deployment"]);
        assert_eq!(
            history.status.as_ref().map(|status| status.summary.as_str()),
            Some("Successfully applied manifests: 1 created")
        );

        let snapshots = coordinator.store().snapshots();
        let status = snapshots[0].status.as_ref().expect("status written");
        assert_eq!(status.phase, Some(SnapshotPhase::Completed));
        assert_eq!(status.history_ref.as_deref(), Some(recorded.name.as_str()));
        assert!(status.applied_at.is_some());
    }

    #[tokio::test]
    async fn history_without_snapshot_is_still_recorded() {
        let coordinator = coordinator(Faults::default());
        let recorded = coordinator
            .create_history("before", "delete-1700000000-abcd1234", "", created("pod/x"))
            .await
            .expect("history created");

        assert_eq!(recorded.snapshot_link, SnapshotLink::Missing);
        assert_eq!(coordinator.store().histories().len(), 1);
    }

    #[tokio::test]
    async fn failed_link_leaves_snapshot_pending() {
        let coordinator = coordinator(Faults {
            snapshot_status: true,
            ..Faults::default()
        });
        let mut pending = KronoformSnapshot::new("kronoform-snapshot-1", KronoformSnapshotSpec::default());
        pending.metadata.namespace = Some("default".to_string());
        coordinator.store().insert_snapshot(pending);

        let recorded = coordinator
            .create_history("after", "kronoform-snapshot-1", "default", created("configmap/a"))
            .await
            .expect("history is committed regardless");

        assert_eq!(recorded.snapshot_link, SnapshotLink::Unlinked);
        assert_eq!(coordinator.store().histories().len(), 1);
        assert_eq!(coordinator.store().snapshots()[0].phase(), SnapshotPhase::Pending);
    }

    #[tokio::test]
    async fn history_write_failure_does_not_touch_snapshot() {
        let coordinator = coordinator(Faults {
            history_create: true,
            ..Faults::default()
        });
        let mut pending = KronoformSnapshot::new("kronoform-snapshot-1", KronoformSnapshotSpec::default());
        pending.metadata.namespace = Some("default".to_string());
        coordinator.store().insert_snapshot(pending);

        let error = coordinator
            .create_history("after", "kronoform-snapshot-1", "default", created("configmap/a"))
            .await
            .expect_err("history write fails");

        assert!(error.is_recording_only());
        assert_eq!(coordinator.store().snapshots()[0].phase(), SnapshotPhase::Pending);
    }

    #[tokio::test]
    async fn cleanup_marks_no_changes_then_deletes() {
        let coordinator = coordinator(Faults::default());
        let snapshot = coordinator
            .create_snapshot("kind: ConfigMap", "default")
            .await
            .expect("snapshot created");

        coordinator.cleanup_snapshot(&snapshot, "default").await;

        assert!(coordinator.store().snapshots().is_empty());
        let deleted = coordinator.store().deleted_snapshots();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].phase(), SnapshotPhase::NoChanges);
    }

    #[tokio::test]
    async fn cleanup_of_missing_snapshot_is_a_no_op() {
        let coordinator = coordinator(Faults::default());
        coordinator.cleanup_snapshot("kronoform-snapshot-404", "default").await;
        assert!(coordinator.store().deleted_snapshots().is_empty());
    }

    #[tokio::test]
    async fn cleanup_still_deletes_when_status_update_fails() {
        let coordinator = coordinator(Faults {
            snapshot_status: true,
            ..Faults::default()
        });
        let mut pending = KronoformSnapshot::new("kronoform-snapshot-1", KronoformSnapshotSpec::default());
        pending.metadata.namespace = Some("default".to_string());
        coordinator.store().insert_snapshot(pending);

        coordinator.cleanup_snapshot("kronoform-snapshot-1", "default").await;

        assert!(coordinator.store().snapshots().is_empty());
    }

    #[tokio::test]
    async fn cleanup_leaves_completed_snapshots_alone() {
        let coordinator = coordinator(Faults::default());
        let mut completed = KronoformSnapshot::new("kronoform-snapshot-1", KronoformSnapshotSpec::default());
        completed.metadata.namespace = Some("default".to_string());
        completed.status = Some(KronoformSnapshotStatus {
            phase: Some(SnapshotPhase::Completed),
            history_ref: Some("kronoform-history-1".to_string()),
            ..KronoformSnapshotStatus::default()
        });
        coordinator.store().insert_snapshot(completed);

        coordinator.cleanup_snapshot("kronoform-snapshot-1", "default").await;

        assert_eq!(coordinator.store().snapshots()[0].phase(), SnapshotPhase::Completed);
    }

    #[tokio::test]
    async fn history_status_failure_still_links_snapshot() {
        let coordinator = coordinator(Faults {
            history_status: true,
            ..Faults::default()
        });
        let snapshot = coordinator
            .create_snapshot("kind: ConfigMap", "default")
            .await
            .expect("snapshot created");

        let recorded = coordinator
            .create_history("after", &snapshot, "default", created("configmap/a"))
            .await
            .expect("history exists even without its status");

        assert_eq!(recorded.snapshot_link, SnapshotLink::Linked);
        let histories = coordinator.store().histories();
        assert_eq!(histories.len(), 1);
        assert!(histories[0].status.is_none());
        assert_eq!(coordinator.store().snapshots()[0].phase(), SnapshotPhase::Completed);
    }

    #[tokio::test]
    async fn snapshot_status_failure_keeps_the_created_snapshot() {
        let coordinator = coordinator(Faults {
            snapshot_status: true,
            ..Faults::default()
        });

        let name = coordinator
            .create_snapshot("kind: ConfigMap", "default")
            .await
            .expect("snapshot exists even without its status");

        let snapshots = coordinator.store().snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name_any(), name);
        assert_eq!(snapshots[0].phase(), SnapshotPhase::Pending);
    }

    #[tokio::test]
    async fn cleanup_survives_a_failed_delete() {
        let coordinator = coordinator(Faults {
            snapshot_delete: true,
            ..Faults::default()
        });
        let snapshot = coordinator
            .create_snapshot("kind: ConfigMap", "default")
            .await
            .expect("snapshot created");

        coordinator.cleanup_snapshot(&snapshot, "default").await;

        let snapshots = coordinator.store().snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].phase(), SnapshotPhase::NoChanges);
        assert!(coordinator.store().deleted_snapshots().is_empty());
    }
}
