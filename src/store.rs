use crate::error::KronoformError;
use crate::model::{
    KronoformHistory, KronoformHistoryStatus, KronoformSnapshot, KronoformSnapshotStatus,
};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde::Serialize;

pub const SNAPSHOT_KIND: &str = "KronoformSnapshot";
pub const HISTORY_KIND: &str = "KronoformHistory";

/// Persistence for snapshot and history records. Every call is a single blocking
/// round trip; there is no batching or retry.
///
/// Creation writes the spec only. Status lives behind the status subresource and is
/// written with the `patch_*_status` calls, so a failed status write never hides a
/// record that was already created.
pub trait RecordStore {
    async fn create_snapshot(
        &self,
        snapshot: &KronoformSnapshot,
    ) -> Result<KronoformSnapshot, KronoformError>;

    async fn get_snapshot(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KronoformSnapshot>, KronoformError>;

    async fn patch_snapshot_status(
        &self,
        namespace: &str,
        name: &str,
        status: &KronoformSnapshotStatus,
    ) -> Result<KronoformSnapshot, KronoformError>;

    async fn delete_snapshot(&self, namespace: &str, name: &str) -> Result<(), KronoformError>;

    async fn create_history(
        &self,
        history: &KronoformHistory,
    ) -> Result<KronoformHistory, KronoformError>;

    async fn patch_history_status(
        &self,
        namespace: &str,
        name: &str,
        status: &KronoformHistoryStatus,
    ) -> Result<KronoformHistory, KronoformError>;

    async fn get_history(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KronoformHistory>, KronoformError>;

    async fn list_histories(&self, namespace: &str) -> Result<Vec<KronoformHistory>, KronoformError>;
}

#[derive(Clone)]
pub struct KubeRecordStore {
    client: Client,
}

#[derive(Debug, Serialize)]
struct StatusPatch<'a, S: Serialize> {
    status: &'a S,
}

impl KubeRecordStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn snapshots(&self, namespace: &str) -> Api<KronoformSnapshot> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn histories(&self, namespace: &str) -> Api<KronoformHistory> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl RecordStore for KubeRecordStore {
    async fn create_snapshot(
        &self,
        snapshot: &KronoformSnapshot,
    ) -> Result<KronoformSnapshot, KronoformError> {
        let namespace = snapshot.namespace().unwrap_or_default();
        self.snapshots(&namespace)
            .create(&PostParams::default(), snapshot)
            .await
            .map_err(|error| write_error(SNAPSHOT_KIND, &snapshot.name_any(), error))
    }

    async fn get_snapshot(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KronoformSnapshot>, KronoformError> {
        self.snapshots(namespace)
            .get_opt(name)
            .await
            .map_err(|error| read_error(SNAPSHOT_KIND, namespace, error))
    }

    async fn patch_snapshot_status(
        &self,
        namespace: &str,
        name: &str,
        status: &KronoformSnapshotStatus,
    ) -> Result<KronoformSnapshot, KronoformError> {
        let patch = Patch::Merge(StatusPatch { status });
        self.snapshots(namespace)
            .patch_status(name, &PatchParams::default(), &patch)
            .await
            .map_err(|error| write_error(SNAPSHOT_KIND, name, error))
    }

    async fn delete_snapshot(&self, namespace: &str, name: &str) -> Result<(), KronoformError> {
        let _ = self
            .snapshots(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|error| write_error(SNAPSHOT_KIND, name, error))?;
        Ok(())
    }

    async fn create_history(
        &self,
        history: &KronoformHistory,
    ) -> Result<KronoformHistory, KronoformError> {
        let namespace = history.namespace().unwrap_or_default();
        self.histories(&namespace)
            .create(&PostParams::default(), history)
            .await
            .map_err(|error| write_error(HISTORY_KIND, &history.name_any(), error))
    }

    async fn patch_history_status(
        &self,
        namespace: &str,
        name: &str,
        status: &KronoformHistoryStatus,
    ) -> Result<KronoformHistory, KronoformError> {
        let patch = Patch::Merge(StatusPatch { status });
        self.histories(namespace)
            .patch_status(name, &PatchParams::default(), &patch)
            .await
            .map_err(|error| write_error(HISTORY_KIND, name, error))
    }

    async fn get_history(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<KronoformHistory>, KronoformError> {
        self.histories(namespace)
            .get_opt(name)
            .await
            .map_err(|error| read_error(HISTORY_KIND, namespace, error))
    }

    async fn list_histories(&self, namespace: &str) -> Result<Vec<KronoformHistory>, KronoformError> {
        let list = self
            .histories(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|error| read_error(HISTORY_KIND, namespace, error))?;
        Ok(list.items)
    }
}

fn write_error(kind: &'static str, name: &str, error: kube::Error) -> KronoformError {
    KronoformError::StoreWrite {
        kind,
        name: name.to_string(),
        source: Box::new(error),
    }
}

fn read_error(kind: &'static str, namespace: &str, error: kube::Error) -> KronoformError {
    KronoformError::StoreRead {
        kind,
        namespace: namespace.to_string(),
        source: Box::new(error),
    }
}
