use crate::error::KronoformError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

pub const DOCUMENT_SEPARATOR: &str = "\n---\n";

/// Reads every manifest file in order and joins them into one multi-document blob.
///
/// All paths are validated before any file is opened, so a rejected path never
/// touches the filesystem.
pub fn load_manifests<P: AsRef<str>>(filenames: &[P]) -> Result<String, KronoformError> {
    let paths = filenames
        .iter()
        .map(|filename| validate_manifest_path(filename.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut combined = String::new();
    for (filename, path) in filenames.iter().zip(paths) {
        let content = read_manifest(filename.as_ref(), &path)?;
        if content.is_empty() {
            continue;
        }
        if !combined.is_empty() {
            combined.push_str(DOCUMENT_SEPARATOR);
        }
        combined.push_str(&content);
    }

    Ok(combined)
}

/// Rejects absolute paths and any path with a `..` segment; returns the cleaned relative path.
pub fn validate_manifest_path(filename: &str) -> Result<PathBuf, KronoformError> {
    let candidate = Path::new(filename);
    let mut cleaned = PathBuf::new();

    for component in candidate.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(segment) => cleaned.push(segment),
            Component::ParentDir => {
                return Err(KronoformError::InvalidPath {
                    path: filename.to_string(),
                    reason: "contains '..'",
                });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(KronoformError::InvalidPath {
                    path: filename.to_string(),
                    reason: "absolute paths not allowed",
                });
            }
        }
    }

    if cleaned.as_os_str().is_empty() {
        return Err(KronoformError::InvalidPath {
            path: filename.to_string(),
            reason: "empty path",
        });
    }

    Ok(cleaned)
}

fn read_manifest(filename: &str, path: &Path) -> Result<String, KronoformError> {
    fs::read_to_string(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => KronoformError::NotFound {
            path: filename.to_string(),
        },
        _ => KronoformError::Io {
            path: filename.to_string(),
            source,
        },
    })
}
