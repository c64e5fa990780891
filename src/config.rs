use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_KUBECTL: &str = "kubectl";
const UNKNOWN_APPLIER: &str = "unknown";
const CONFIG_ENV: &str = "KRONOFORM_CONFIG";
const LOCAL_CONFIG_FILES: [&str; 3] = ["kronoform.yaml", "kronoform.yml", ".kronoform.yaml"];
const USER_CONFIG_FILES: [&str; 3] = [
    ".config/kronoform/config.yaml",
    ".config/kronoform/config.yml",
    ".kronoform.yaml",
];

/// Settings resolved once at startup and passed down explicitly.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RuntimeConfig {
    pub source: Option<String>,
    pub kubectl: String,
    pub applied_by: String,
    pub namespace: Option<String>,
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct KronoformConfigFile {
    #[serde(default, alias = "kubectlPath")]
    kubectl: Option<String>,
    #[serde(default, alias = "user")]
    applied_by: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    log_filter: Option<String>,
}

impl RuntimeConfig {
    /// `$KRONOFORM_CONFIG` when set, else the first existing file among the local and
    /// per-user candidates.
    pub fn discover() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let path = non_blank(env(CONFIG_ENV)).map(PathBuf::from).or_else(|| {
            candidate_paths(env("HOME").map(PathBuf::from))
                .into_iter()
                .find(|candidate| candidate.is_file())
        });
        Self::load(path.as_deref(), env)
    }

    pub fn load<E>(path: Option<&Path>, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let parsed = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_yaml::from_str::<Option<KronoformConfigFile>>(&raw)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
                    .unwrap_or_default()
            }
            None => KronoformConfigFile::default(),
        };

        Ok(Self {
            source: path.map(|path| path.display().to_string()),
            kubectl: non_blank(parsed.kubectl).unwrap_or_else(|| DEFAULT_KUBECTL.to_string()),
            applied_by: resolve_applier(parsed.applied_by, &env),
            namespace: non_blank(parsed.namespace),
            log_filter: non_blank(parsed.log_filter),
        })
    }

    /// Namespace handed to kubectl and used for records: `-n` first, then the
    /// configured one. `None` leaves both on the kubeconfig default.
    pub fn namespace_or(&self, requested: Option<String>) -> Option<String> {
        non_blank(requested).or_else(|| self.namespace.clone())
    }
}

fn candidate_paths(home: Option<PathBuf>) -> Vec<PathBuf> {
    let local = LOCAL_CONFIG_FILES.iter().map(PathBuf::from);
    let user = home
        .into_iter()
        .flat_map(|home| USER_CONFIG_FILES.iter().map(move |file| home.join(file)));
    local.chain(user).collect()
}

fn resolve_applier<E>(configured: Option<String>, env: &E) -> String
where
    E: Fn(&str) -> Option<String>,
{
    non_blank(configured)
        .or_else(|| non_blank(env("USER")))
        .or_else(|| non_blank(env("USERNAME")))
        .unwrap_or_else(|| UNKNOWN_APPLIER.to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{RuntimeConfig, candidate_paths};
    use std::fs;
    use std::path::PathBuf;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_without_a_file() {
        let config = RuntimeConfig::load(None, no_env).expect("defaults");

        assert_eq!(config.source, None);
        assert_eq!(config.kubectl, "kubectl");
        assert_eq!(config.applied_by, "unknown");
        assert_eq!(config.namespace, None);
    }

    #[test]
    fn file_values_are_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kronoform.yaml");
        fs::write(
            &path,
            "kubectl: /usr/local/bin/kubectl\nappliedBy: ci-bot\nnamespace: staging\nlogFilter: debug\n",
        )
        .expect("write config");

        let config = RuntimeConfig::load(Some(path.as_path()), no_env).expect("config");

        assert_eq!(config.kubectl, "/usr/local/bin/kubectl");
        assert_eq!(config.applied_by, "ci-bot");
        assert_eq!(config.namespace.as_deref(), Some("staging"));
        assert_eq!(config.log_filter.as_deref(), Some("debug"));
        assert!(config.source.is_some());
    }

    #[test]
    fn empty_file_is_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kronoform.yaml");
        fs::write(&path, "").expect("write config");

        let config = RuntimeConfig::load(Some(path.as_path()), no_env).expect("config");
        assert_eq!(config.kubectl, "kubectl");
    }

    #[test]
    fn applier_falls_back_through_environment() {
        let config = RuntimeConfig::load(None, |key| match key {
            "USER" => Some("  ".to_string()),
            "USERNAME" => Some("bob".to_string()),
            _ => None,
        })
        .expect("config");

        assert_eq!(config.applied_by, "bob");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kronoform.yaml");
        fs::write(&path, "namespace: [unclosed").expect("write config");

        assert!(RuntimeConfig::load(Some(path.as_path()), no_env).is_err());
    }

    #[test]
    fn candidates_check_the_working_directory_before_home() {
        let candidates = candidate_paths(Some(PathBuf::from("/home/alice")));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("kronoform.yaml"),
                PathBuf::from("kronoform.yml"),
                PathBuf::from(".kronoform.yaml"),
                PathBuf::from("/home/alice/.config/kronoform/config.yaml"),
                PathBuf::from("/home/alice/.config/kronoform/config.yml"),
                PathBuf::from("/home/alice/.kronoform.yaml"),
            ]
        );
        assert_eq!(candidate_paths(None).len(), 3);
    }

    #[test]
    fn flag_namespace_wins_over_configured_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kronoform.yaml");
        fs::write(&path, "namespace: staging\n").expect("write config");
        let config = RuntimeConfig::load(Some(path.as_path()), no_env).expect("config");

        assert_eq!(config.namespace_or(Some("prod".to_string())).as_deref(), Some("prod"));
        assert_eq!(config.namespace_or(Some(" ".to_string())).as_deref(), Some("staging"));
        assert_eq!(config.namespace_or(None).as_deref(), Some("staging"));

        let bare = RuntimeConfig::load(None, no_env).expect("defaults");
        assert_eq!(bare.namespace_or(None), None);
    }
}
