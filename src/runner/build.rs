//! PS-016: Build actions: run a command list, then select artifact files.

use super::local::exec_local;
use crate::core::resolver::interpolate_env;
use crate::core::types::{Action, Payload};
use crate::provenance::hasher;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Parameters of a build action.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSpec {
    pub commands: Vec<String>,
    pub artifacts: ArtifactsParam,
    #[serde(default)]
    pub environment: IndexMap<String, String>,
}

/// `artifacts` may be a single pattern, a list of patterns, or a full selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ArtifactsParam {
    Pattern(String),
    Patterns(Vec<String>),
    Selection(ArtifactSelection),
}

/// Which files a build publishes.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactSelection {
    pub files: Vec<String>,

    #[serde(default = "default_base", alias = "base-directory")]
    pub base_directory: String,

    #[serde(default, alias = "discard-paths", deserialize_with = "yes_no")]
    pub discard_paths: bool,
}

fn default_base() -> String {
    ".".to_string()
}

/// Accept `true`/`false` as well as `"yes"`/`"no"`.
fn yes_no<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Word(String),
    }
    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Word(w) => match w.to_ascii_lowercase().as_str() {
            "yes" | "true" => Ok(true),
            "no" | "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected yes/no, got '{}'",
                other
            ))),
        },
    }
}

impl ArtifactsParam {
    pub fn selection(&self) -> ArtifactSelection {
        match self {
            Self::Pattern(p) => ArtifactSelection {
                files: vec![p.clone()],
                base_directory: default_base(),
                discard_paths: false,
            },
            Self::Patterns(ps) => ArtifactSelection {
                files: ps.clone(),
                base_directory: default_base(),
                discard_paths: false,
            },
            Self::Selection(s) => s.clone(),
        }
    }
}

impl BuildSpec {
    pub fn from_action(action: &Action) -> Result<Self, String> {
        let params = serde_yaml_ng::to_value(&action.parameters)
            .map_err(|e| format!("invalid build parameters: {}", e))?;
        serde_yaml_ng::from_value(params).map_err(|e| format!("invalid build parameters: {}", e))
    }

    /// The bash script: strict mode, then each command with `$VAR` references substituted.
    pub fn script(&self) -> String {
        let mut script = String::from("set -eo pipefail\n");
        for command in &self.commands {
            script.push_str(&interpolate_env(command, &self.environment));
            script.push('\n');
        }
        script
    }
}

/// Select files matching `selection` under `work_dir`. Returns published
/// name → path, with names flattened to file names when `discard_paths` is set.
pub fn select_files(
    work_dir: &Path,
    selection: &ArtifactSelection,
) -> Result<BTreeMap<String, PathBuf>, String> {
    let base = work_dir.join(&selection.base_directory);
    // Only the user pattern may carry glob syntax.
    let root = glob::Pattern::escape(&base.to_string_lossy());
    let mut selected: BTreeMap<String, PathBuf> = BTreeMap::new();

    for pattern in &selection.files {
        let full = format!("{}/{}", root.trim_end_matches('/'), pattern);
        let paths = glob::glob(&full).map_err(|e| format!("invalid pattern '{}': {}", pattern, e))?;
        for path in paths.filter_map(|p| p.ok()).filter(|p| p.is_file()) {
            let rel = path
                .strip_prefix(&base)
                .map_err(|e| format!("path prefix error: {}", e))?;
            let name = if selection.discard_paths {
                rel.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default()
            } else {
                rel.to_string_lossy().to_string()
            };
            if let Some(previous) = selected.get(&name) {
                if previous != &path {
                    return Err(format!(
                        "discard_paths maps both {} and {} to '{}'",
                        previous.display(),
                        path.display(),
                        name
                    ));
                }
                continue;
            }
            selected.insert(name, path);
        }
    }

    if selected.is_empty() {
        return Err(format!(
            "no files matched artifact patterns [{}] under {}",
            selection.files.join(", "),
            base.display()
        ));
    }
    Ok(selected)
}

/// Run the build in `work_dir` and publish the selected files.
pub fn run_build(action: &Action, work_dir: &Path) -> Result<Payload, String> {
    let spec = BuildSpec::from_action(action)?;
    let script = spec.script();
    debug!(action = %action.name, script = %script, "build script");

    let out = exec_local(&script, work_dir, &spec.environment)?;
    if !out.success() {
        return Err(format!(
            "build commands failed with exit code {}: {}",
            out.exit_code,
            out.stderr.trim()
        ));
    }

    let selection = spec.artifacts.selection();
    let selected = select_files(work_dir, &selection)?;
    let entries: Vec<(String, PathBuf)> = selected.into_iter().collect();
    let digest = hasher::hash_named_files(&entries).map_err(|e| e.to_string())?;
    let base = work_dir.join(&selection.base_directory);
    info!(action = %action.name, files = entries.len(), digest = %digest, "build artifacts selected");

    Ok(Payload {
        location: base.to_string_lossy().to_string(),
        digest: Some(digest),
    })
}
