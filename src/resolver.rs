use crate::kubectl::StateSource;
use crate::manifest::DOCUMENT_SEPARATOR;
use tracing::{debug, warn};

pub const FALLBACK_NAMESPACE: &str = "default";
const MAX_NAME_LEN: usize = 253;

/// Identity of one manifest document as it would be addressed on the cluster.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceIdentity {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ResourceIdentity {
    fn target(&self) -> Vec<String> {
        vec![self.kind.clone(), self.name.clone()]
    }
}

/// Replaces every manifest document with its live serialized form, keeping order.
/// Documents whose identity cannot be extracted are dropped; documents whose lookup
/// fails are kept as written.
pub async fn resolve_actual_state<Q: StateSource>(
    source: &Q,
    manifest: &str,
    default_namespace: &str,
) -> String {
    let mut resolved = Vec::new();

    for document in split_documents(manifest) {
        let Some(identity) = identify_document(document, default_namespace) else {
            debug!("skipping manifest document without a valid kind/name");
            continue;
        };

        match source.fetch(&identity.target(), &identity.namespace).await {
            Ok(live) => resolved.push(live),
            Err(error) => {
                warn!(
                    kind = %identity.kind,
                    name = %identity.name,
                    namespace = %identity.namespace,
                    "could not read live state, recording manifest document instead: {error:#}"
                );
                resolved.push(document.to_string());
            }
        }
    }

    resolved.join(DOCUMENT_SEPARATOR)
}

/// Splits on `---` separator lines; empty documents are skipped.
pub fn split_documents(manifest: &str) -> Vec<&str> {
    let mut documents = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in manifest.split_inclusive('\n') {
        if is_separator(line) {
            documents.push(&manifest[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    documents.push(&manifest[start..]);

    documents
        .into_iter()
        .map(str::trim)
        .filter(|document| !document.is_empty())
        .collect()
}

/// Extracts kind/name/namespace from the first line declaring each field.
///
/// This is line matching, not a YAML parse: a nested `name:` inside the spec can be
/// picked up if it precedes the metadata name.
///
/// The kind is lowercased before validation, so `ConfigMap` is accepted and looked up
/// as `configmap`. Names and namespaces are validated exactly as written.
pub fn identify_document(document: &str, default_namespace: &str) -> Option<ResourceIdentity> {
    let kind = first_field(document, "kind")?.to_ascii_lowercase();
    let name = first_field(document, "name")?.to_string();
    if !is_valid_kubernetes_name(&kind) || !is_valid_kubernetes_name(&name) {
        return None;
    }

    let namespace = match first_field(document, "namespace") {
        Some(namespace) if is_valid_kubernetes_name(namespace) => namespace.to_string(),
        Some(_) => FALLBACK_NAMESPACE.to_string(),
        None if default_namespace.trim().is_empty() => FALLBACK_NAMESPACE.to_string(),
        None => default_namespace.trim().to_string(),
    };

    Some(ResourceIdentity {
        kind,
        name,
        namespace,
    })
}

/// Lowercase RFC 1123 subdomain check used before any value reaches a command line.
pub fn is_valid_kubernetes_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }

    let alphanumeric = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let first = name.chars().next();
    let last = name.chars().last();

    first.is_some_and(alphanumeric)
        && last.is_some_and(alphanumeric)
        && name
            .chars()
            .all(|c| alphanumeric(c) || c == '-' || c == '.')
}

fn first_field<'a>(document: &'a str, field: &str) -> Option<&'a str> {
    document.lines().find_map(|line| {
        let line = line.trim_start();
        let line = line.strip_prefix("- ").unwrap_or(line);
        let value = line.strip_prefix(field)?.strip_prefix(':')?;
        let token = value.split_whitespace().next()?;
        let token = token.trim_matches(|c| c == '"' || c == '\'');
        (!token.is_empty()).then_some(token)
    })
}

fn is_separator(line: &str) -> bool {
    let line = line.trim_end();
    line == "---" || line.starts_with("--- ")
}
