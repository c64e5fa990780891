use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Outcome of a single resource line reported by the wrapped tool.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Created,
    Configured,
    Deleted,
    Unchanged,
}

impl Operation {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "created" => Some(Self::Created),
            "configured" => Some(Self::Configured),
            "deleted" => Some(Self::Deleted),
            "unchanged" => Some(Self::Unchanged),
            _ => None,
        }
    }

    pub fn is_change(self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Deleted => "deleted",
            Self::Unchanged => "unchanged",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub resource: String,
    pub operation: Operation,
}

impl ResourceChange {
    pub fn new(resource: impl Into<String>, operation: Operation) -> Self {
        Self {
            resource: resource.into(),
            operation,
        }
    }

    /// Resource type portion of the identifier, `deployment` for `deployment/demo`.
    pub fn resource_type(&self) -> &str {
        self.resource
            .split_once('/')
            .map(|(kind, _)| kind)
            .unwrap_or(&self.resource)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Serialize, Deserialize)]
pub enum SnapshotPhase {
    #[default]
    Pending,
    Completed,
    NoChanges,
}

impl SnapshotPhase {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed) | (Self::Pending, Self::NoChanges)
        )
    }
}

impl Display for SnapshotPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::Completed => f.write_str("Completed"),
            Self::NoChanges => f.write_str("NoChanges"),
        }
    }
}

/// Captured state immediately before the wrapped command runs.
#[derive(CustomResource, Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[kube(
    group = "history.kronoform.io",
    version = "v1alpha1",
    kind = "KronoformSnapshot",
    namespaced,
    status = "KronoformSnapshotStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct KronoformSnapshotSpec {
    pub manifests: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_namespace: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KronoformSnapshotStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<SnapshotPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_ref: Option<String>,
}

impl KronoformSnapshot {
    /// Status phase; a snapshot whose status was never written counts as pending.
    pub fn phase(&self) -> SnapshotPhase {
        self.status
            .as_ref()
            .and_then(|status| status.phase)
            .unwrap_or_default()
    }
}

/// Immutable record of an invocation that changed something.
#[derive(CustomResource, Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[kube(
    group = "history.kronoform.io",
    version = "v1alpha1",
    kind = "KronoformHistory",
    namespaced,
    status = "KronoformHistoryStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct KronoformHistorySpec {
    pub manifests: String,
    pub snapshot_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub applied_by: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_changes: Vec<ResourceChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KronoformHistoryStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<Time>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

/// Distinct resource types in first-seen order.
pub fn resource_types(changes: &[ResourceChange]) -> Vec<String> {
    let mut types = Vec::<String>::new();
    for change in changes {
        let kind = change.resource_type();
        if !types.iter().any(|known| known == kind) {
            types.push(kind.to_string());
        }
    }
    types
}

pub fn change_summary(changes: &[ResourceChange]) -> String {
    let counts = [
        Operation::Created,
        Operation::Configured,
        Operation::Deleted,
    ]
    .into_iter()
    .filter_map(|operation| {
        let count = changes
            .iter()
            .filter(|change| change.operation == operation)
            .count();
        (count > 0).then(|| format!("{count} {operation}"))
    })
    .collect::<Vec<_>>();

    if counts.is_empty() {
        "Successfully applied manifests".to_string()
    } else {
        format!("Successfully applied manifests: {}", counts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        KronoformSnapshot, KronoformSnapshotSpec, Operation, ResourceChange, SnapshotPhase,
        change_summary, resource_types,
    };

    #[test]
    fn operation_tokens_are_case_insensitive() {
        assert_eq!(Operation::from_token("CREATED"), Some(Operation::Created));
        assert_eq!(Operation::from_token("Configured"), Some(Operation::Configured));
        assert_eq!(Operation::from_token("patched"), None);
    }

    #[test]
    fn phase_transitions_only_leave_pending() {
        assert!(SnapshotPhase::Pending.can_transition_to(SnapshotPhase::Completed));
        assert!(SnapshotPhase::Pending.can_transition_to(SnapshotPhase::NoChanges));
        assert!(!SnapshotPhase::Completed.can_transition_to(SnapshotPhase::NoChanges));
        assert!(!SnapshotPhase::NoChanges.can_transition_to(SnapshotPhase::Completed));
        assert!(!SnapshotPhase::Pending.can_transition_to(SnapshotPhase::Pending));
    }

    #[test]
    fn snapshot_without_status_is_pending() {
        let snapshot = KronoformSnapshot::new("kronoform-snapshot-1", KronoformSnapshotSpec::default());
        assert_eq!(snapshot.phase(), SnapshotPhase::Pending);
    }

    #[test]
    fn resource_types_are_distinct_and_ordered() {
        let changes = vec![
            ResourceChange::new("deployment/web", Operation::Created),
            ResourceChange::new("configmap/web", Operation::Configured),
            ResourceChange::new("deployment/worker", Operation::Created),
        ];

        assert_eq!(resource_types(&changes), vec!["deployment", "configmap"]);
    }

    #[test]
    fn summary_counts_only_real_changes() {
        let changes = vec![
            ResourceChange::new("deployment/web", Operation::Created),
            ResourceChange::new("configmap/a", Operation::Configured),
            ResourceChange::new("configmap/b", Operation::Configured),
            ResourceChange::new("service/web", Operation::Unchanged),
        ];

        assert_eq!(
            change_summary(&changes),
            "Successfully applied manifests: 1 created, 2 configured"
        );
    }

    #[test]
    fn snapshot_status_serializes_camel_case_phase() {
        let status = super::KronoformSnapshotStatus {
            phase: Some(SnapshotPhase::NoChanges),
            history_ref: Some("kronoform-history-1".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).expect("status serializes");

        assert_eq!(value["phase"], "NoChanges");
        assert_eq!(value["historyRef"], "kronoform-history-1");
        assert!(value.get("appliedAt").is_none());
    }
}
