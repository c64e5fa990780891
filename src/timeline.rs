use crate::coordinator::{DELETE_PREFIX, PATCH_PREFIX};
use crate::model::{KronoformHistory, Operation};
use chrono::{DateTime, Local};
use kube::ResourceExt;
use std::fmt::{Display, Formatter};
use std::io::{self, BufRead, Write};

const BUCKET_LIMIT: usize = 33;
const BUCKET_KEEP: usize = 30;
const RULE_WIDTH: usize = 173;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OperationLabel {
    Apply,
    Delete,
    Patch,
}

impl OperationLabel {
    /// Derived from the snapshot reference naming convention.
    pub fn from_snapshot_ref(snapshot_ref: &str) -> Self {
        if snapshot_ref.starts_with(&format!("{DELETE_PREFIX}-")) {
            Self::Delete
        } else if snapshot_ref.starts_with(&format!("{PATCH_PREFIX}-")) {
            Self::Patch
        } else {
            Self::Apply
        }
    }
}

impl Display for OperationLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Apply => "Apply",
            Self::Delete => "Delete",
            Self::Patch => "Patch",
        };
        f.pad(label)
    }
}

#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub name: String,
    pub created_at: Option<DateTime<Local>>,
    pub operation: OperationLabel,
    pub created: String,
    pub modified: String,
    pub deleted: String,
    pub snapshot_ref: String,
    pub manifests: String,
}

impl TimelineEntry {
    fn from_history(history: KronoformHistory) -> Self {
        let created_at = history
            .metadata
            .creation_timestamp
            .as_ref()
            .and_then(|time| DateTime::from_timestamp(time.0.as_second(), 0))
            .map(|time| time.with_timezone(&Local));

        let bucket = |operation: Operation| {
            let joined = history
                .spec
                .resource_changes
                .iter()
                .filter(|change| change.operation == operation)
                .map(|change| change.resource.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            truncate_bucket(&joined)
        };

        Self {
            name: history.name_any(),
            created_at,
            operation: OperationLabel::from_snapshot_ref(&history.spec.snapshot_ref),
            created: bucket(Operation::Created),
            modified: bucket(Operation::Configured),
            deleted: bucket(Operation::Deleted),
            snapshot_ref: history.spec.snapshot_ref.clone(),
            manifests: history.spec.manifests.clone(),
        }
    }

    fn time_label(&self) -> String {
        self.created_at
            .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

/// Chronological view over the recorded histories of one namespace.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn from_histories(mut histories: Vec<KronoformHistory>) -> Self {
        // stable: equal timestamps keep listing order
        histories.sort_by_key(|history| {
            history
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|time| time.0)
        });

        Self {
            entries: histories
                .into_iter()
                .map(TimelineEntry::from_history)
                .collect(),
        }
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Timeline of Changes:")?;
        writeln!(out, "====================")?;
        writeln!(
            out,
            "{:<3} {:<20} {:<15} {:<35} {:<35} {:<35} {:<30}",
            "#", "Time", "Operation", "Created", "Modified", "Deleted", "Snapshot ID"
        )?;
        writeln!(out, "{}", "-".repeat(RULE_WIDTH))?;

        for (index, entry) in self.entries.iter().enumerate() {
            writeln!(
                out,
                "{:<3} {:<20} {:<15} {:<35} {:<35} {:<35} {:<30}",
                index + 1,
                entry.time_label(),
                entry.operation,
                entry.created,
                entry.modified,
                entry.deleted,
                entry.snapshot_ref
            )?;
        }
        Ok(())
    }

    /// 1-based selection; anything else selects nothing.
    pub fn select(&self, input: &str) -> Option<&TimelineEntry> {
        let choice = input.trim().parse::<usize>().ok()?;
        choice.checked_sub(1).and_then(|index| self.entries.get(index))
    }

    /// Asks for one selection and prints the chosen record's manifests.
    pub fn prompt<R: BufRead, W: Write>(&self, input: &mut R, out: &mut W) -> io::Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }

        write!(
            out,
            "\nEnter the number of the history to view YAML content (1-{}, or 0 to exit): ",
            self.entries.len()
        )?;
        out.flush()?;

        let mut line = String::new();
        input.read_line(&mut line)?;
        let Some(entry) = self.select(&line) else {
            return Ok(());
        };

        writeln!(out, "\nYAML Content for History {}:", entry.name)?;
        writeln!(out, "=====================================")?;
        writeln!(out, "{}", entry.manifests)?;
        Ok(())
    }
}

fn truncate_bucket(joined: &str) -> String {
    if joined.chars().count() <= BUCKET_LIMIT {
        return joined.to_string();
    }

    let mut out = joined.chars().take(BUCKET_KEEP).collect::<String>();
    out.push_str("...");
    out
}
