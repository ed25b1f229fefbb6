//! PS-015: Source actions: resolve a local checkout.

use crate::core::types::{Action, Payload};
use crate::provenance::hasher;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Parameters of a source action.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    /// Clone URL or local directory
    #[serde(default)]
    pub repository: Option<String>,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Local checkout directory, relative to the workspace
    #[serde(default)]
    pub path: Option<String>,
}

fn default_branch() -> String {
    "master".to_string()
}

impl SourceSpec {
    pub fn from_action(action: &Action) -> Result<Self, String> {
        let params = serde_yaml_ng::to_value(&action.parameters)
            .map_err(|e| format!("invalid source parameters: {}", e))?;
        serde_yaml_ng::from_value(params).map_err(|e| format!("invalid source parameters: {}", e))
    }
}

/// Resolve the checkout directory and fingerprint its contents.
pub fn run_source(action: &Action, workspace: &Path) -> Result<Payload, String> {
    let spec = SourceSpec::from_action(action)?;

    let candidate: PathBuf = match (&spec.path, &spec.repository) {
        (Some(path), _) => workspace.join(path),
        (None, Some(repo)) if workspace.join(repo).is_dir() => workspace.join(repo),
        (None, Some(repo)) => {
            return Err(format!(
                "repository '{}' is not a local checkout; set 'path'",
                repo
            ))
        }
        (None, None) => workspace.to_path_buf(),
    };

    let checkout = candidate
        .canonicalize()
        .map_err(|e| format!("checkout {} is not accessible: {}", candidate.display(), e))?;
    if !checkout.is_dir() {
        return Err(format!("checkout {} is not a directory", checkout.display()));
    }

    let digest = hasher::hash_directory(&checkout).map_err(|e| e.to_string())?;
    info!(action = %action.name, branch = %spec.branch, checkout = %checkout.display(), "source retrieved");
    Ok(Payload {
        location: checkout.to_string_lossy().to_string(),
        digest: Some(digest),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ActionKind;

    #[test]
    fn test_ps015_source_from_path() {
        let ws = tempfile::tempdir().unwrap();
        std::fs::create_dir(ws.path().join("app")).unwrap();
        std::fs::write(ws.path().join("app/app.py"), "print('hi')").unwrap();
        let action = Action::new("RetrieveSource", ActionKind::Source)
            .parameter("path", "app")
            .parameter("branch", "main");
        let payload = run_source(&action, ws.path()).unwrap();
        assert!(payload.location.ends_with("app"));
        assert!(payload.digest.unwrap().starts_with("blake3:"));
    }

    #[test]
    fn test_ps015_default_branch() {
        let action = Action::new("RetrieveSource", ActionKind::Source);
        assert_eq!(SourceSpec::from_action(&action).unwrap().branch, "master");
    }

    #[test]
    fn test_ps015_remote_repository_rejected() {
        let ws = tempfile::tempdir().unwrap();
        let action = Action::new("RetrieveSource", ActionKind::Source).parameter(
            "repository",
            "https://git-codecommit.us-east-1.amazonaws.com/v1/repos/flask-repo",
        );
        let err = run_source(&action, ws.path()).unwrap_err();
        assert!(err.contains("not a local checkout"));
    }

    #[test]
    fn test_ps015_missing_path() {
        let ws = tempfile::tempdir().unwrap();
        let action = Action::new("RetrieveSource", ActionKind::Source).parameter("path", "nope");
        assert!(run_source(&action, ws.path()).unwrap_err().contains("not accessible"));
    }
}
