use crate::model::{Operation, ResourceChange};

/// API group suffixes dropped from resource types for display.
const GROUP_SUFFIXES: [&str; 7] = [
    ".apps",
    ".v1",
    ".batch",
    ".networking.k8s.io",
    ".rbac.authorization.k8s.io",
    ".storage.k8s.io",
    ".apiextensions.k8s.io",
];

const OPERATION_WORDS: [&str; 4] = ["created", "configured", "unchanged", "deleted"];

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct OutputAnalysis {
    pub has_changes: bool,
    pub changes: Vec<ResourceChange>,
}

/// Classifies the wrapped tool's status output, one resource per line.
pub fn analyze_output(output: &str) -> OutputAnalysis {
    summarize(output.lines().filter_map(parse_status_line).collect())
}

/// `kubectl patch` reports `<resource> patched`, or `<resource> patched (no change)`
/// for a no-op patch. The bare form counts as `Configured`.
pub fn analyze_patch_output(output: &str) -> OutputAnalysis {
    summarize(
        output
            .lines()
            .filter_map(|line| parse_status_line(line).or_else(|| parse_patched_line(line)))
            .collect(),
    )
}

fn summarize(changes: Vec<ResourceChange>) -> OutputAnalysis {
    let has_changes = changes.iter().any(|change| change.operation.is_change());

    OutputAnalysis {
        has_changes,
        changes,
    }
}

/// Parses one status line such as `deployment.apps/web configured` or
/// `deployment.apps "web" deleted`. Lines in any other shape yield `None`.
pub fn parse_status_line(line: &str) -> Option<ResourceChange> {
    let parts = line.split_whitespace().collect::<Vec<_>>();

    let (resource, operation) = match parts.as_slice() {
        [] | [_] => return None,
        [resource, operation] => ((*resource).to_string(), Operation::from_token(operation)?),
        [resource, quoted, operation]
            if is_quoted(quoted) && Operation::from_token(operation) == Some(Operation::Deleted) =>
        {
            let name = &quoted[1..quoted.len() - 1];
            (format!("{resource}/{name}"), Operation::Deleted)
        }
        _ => {
            let index = parts
                .iter()
                .position(|part| OPERATION_WORDS.contains(part))?;
            if index == 0 {
                return None;
            }
            (parts[..index].join(" "), Operation::from_token(parts[index])?)
        }
    };

    Some(ResourceChange::new(clean_resource_name(&resource), operation))
}

/// Shortens `deployment.apps/web` to `deployment/web`; the name part is left untouched.
pub fn clean_resource_name(resource: &str) -> String {
    let (kind, rest) = match resource.split_once('/') {
        Some((kind, name)) => (kind, Some(name)),
        None => (resource, None),
    };

    let mut kind = kind;
    for suffix in GROUP_SUFFIXES {
        if let Some(stripped) = kind.strip_suffix(suffix)
            && !stripped.is_empty()
        {
            kind = stripped;
        }
    }

    match rest {
        Some(name) => format!("{kind}/{name}"),
        None => kind.to_string(),
    }
}

fn parse_patched_line(line: &str) -> Option<ResourceChange> {
    match line.split_whitespace().collect::<Vec<_>>().as_slice() {
        [resource, word] if word.eq_ignore_ascii_case("patched") => Some(ResourceChange::new(
            clean_resource_name(resource),
            Operation::Configured,
        )),
        _ => None,
    }
}

fn is_quoted(token: &str) -> bool {
    token.len() >= 3 && token.starts_with('"') && token.ends_with('"')
}
