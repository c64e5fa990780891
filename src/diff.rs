use crate::error::{DocumentSide, KronoformError};
use crossterm::style::Stylize;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use similar::{ChangeTag, TextDiff};
use std::fmt::Write as _;

/// Server-managed metadata that never reflects a user edit.
const VOLATILE_METADATA: [&str; 6] = [
    "creationTimestamp",
    "resourceVersion",
    "uid",
    "generation",
    "managedFields",
    "annotations",
];

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DiffSpan {
    pub tag: ChangeTag,
    pub text: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RenderedDiff {
    spans: Vec<DiffSpan>,
}

impl RenderedDiff {
    #[cfg(test)]
    pub fn spans(&self) -> &[DiffSpan] {
        &self.spans
    }

    pub fn has_changes(&self) -> bool {
        self.spans.iter().any(|span| span.tag != ChangeTag::Equal)
    }

    #[cfg(test)]
    pub fn inserted(&self) -> String {
        self.collect(ChangeTag::Insert)
    }

    #[cfg(test)]
    pub fn deleted(&self) -> String {
        self.collect(ChangeTag::Delete)
    }

    #[cfg(test)]
    fn collect(&self, tag: ChangeTag) -> String {
        self.spans
            .iter()
            .filter(|span| span.tag == tag)
            .map(|span| span.text.as_str())
            .collect()
    }

    /// Inline rendering: coloured on a terminal, `[-…-]` / `{+…+}` markers otherwise.
    pub fn render(&self, color: bool) -> String {
        let mut out = String::new();
        for span in &self.spans {
            let _ = match (span.tag, color) {
                (ChangeTag::Equal, _) => write!(out, "{}", span.text),
                (ChangeTag::Delete, true) => write!(out, "{}", span.text.as_str().red().crossed_out()),
                (ChangeTag::Insert, true) => write!(out, "{}", span.text.as_str().green()),
                (ChangeTag::Delete, false) => write!(out, "[-{}-]", span.text),
                (ChangeTag::Insert, false) => write!(out, "{{+{}+}}", span.text),
            };
        }
        out
    }
}

/// Normalizes both documents and diffs the canonical text character by character.
pub fn diff_documents(before: &str, after: &str) -> Result<RenderedDiff, KronoformError> {
    let before = canonical_text(before, DocumentSide::Before)?;
    let after = canonical_text(after, DocumentSide::After)?;
    Ok(diff_text(&before, &after))
}

pub fn diff_text(before: &str, after: &str) -> RenderedDiff {
    let diff = TextDiff::from_chars(before, after);
    let mut spans = Vec::<DiffSpan>::new();

    for change in diff.iter_all_changes() {
        let tag = change.tag();
        let value = change.value();
        match spans.last_mut() {
            Some(last) if last.tag == tag => last.text.push_str(value),
            _ => spans.push(DiffSpan {
                tag,
                text: value.to_string(),
            }),
        }
    }

    RenderedDiff { spans }
}

/// Parses every document, strips volatile fields, orders keys and re-serializes.
pub fn canonical_text(text: &str, side: DocumentSide) -> Result<String, KronoformError> {
    let malformed = |reason: String| KronoformError::MalformedDocument { side, reason };

    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document).map_err(|error| malformed(error.to_string()))?;
        let mut mapping = match value {
            Value::Null => continue,
            Value::Mapping(mapping) => mapping,
            _ => return Err(malformed("document is not a mapping".to_string())),
        };
        strip_volatile_fields(&mut mapping);
        let canonical = sort_keys(Value::Mapping(mapping));
        documents.push(serde_yaml::to_string(&canonical).map_err(|error| malformed(error.to_string()))?);
    }

    Ok(documents.join("---\n"))
}

pub fn strip_volatile_fields(document: &mut Mapping) {
    document.remove("status");
    if let Some(metadata) = document
        .get_mut("metadata")
        .and_then(Value::as_mapping_mut)
    {
        for field in VOLATILE_METADATA {
            metadata.remove(field);
        }
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Mapping(mapping) => {
            let mut entries = mapping
                .into_iter()
                .map(|(key, value)| (key, sort_keys(value)))
                .collect::<Vec<_>>();
            entries.sort_by_cached_key(|(key, _)| key_text(key));
            Value::Mapping(entries.into_iter().collect())
        }
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

fn key_text(key: &Value) -> String {
    match key {
        Value::String(text) => text.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default(),
    }
}
