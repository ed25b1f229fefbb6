//! Action runners: local execution of pipeline actions.

pub mod build;
pub mod local;
pub mod source;

use crate::core::executor::{ActionOutputs, ActionRunner};
use crate::core::types::{Action, ActionKind, Artifact, Payload, Stage};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Runs source and build actions on this machine.
///
/// Source actions resolve a checkout relative to `workspace`. Build actions
/// run in a fresh directory under `scratch`, seeded with a copy of their
/// first input, so published artifacts are never modified downstream.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    workspace: PathBuf,
    scratch: PathBuf,
}

impl LocalRunner {
    pub fn new(workspace: impl Into<PathBuf>, scratch: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            scratch: scratch.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Root of the per-action build directories.
    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// Empty `<scratch>/<stage>/<action>` holding a copy of the first input.
    fn build_dir(&self, stage: &Stage, action: &Action, inputs: &[&Artifact]) -> Result<PathBuf, String> {
        let dir = self
            .scratch
            .join(path_safe(&stage.name))
            .join(path_safe(&action.name));
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .map_err(|e| format!("cannot clear {}: {}", dir.display(), e))?;
        }
        std::fs::create_dir_all(&dir).map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
        let scratch = self
            .scratch
            .canonicalize()
            .map_err(|e| format!("cannot resolve {}: {}", self.scratch.display(), e))?;

        if let Some(input) = inputs
            .first()
            .map(|a| PathBuf::from(&a.payload.location))
            .filter(|p| p.is_dir())
        {
            let input = input
                .canonicalize()
                .map_err(|e| format!("cannot resolve {}: {}", input.display(), e))?;
            copy_tree(&input, &dir, &scratch)
                .map_err(|e| format!("cannot copy {} for build: {}", input.display(), e))?;
            debug!(from = %input.display(), to = %dir.display(), "build input copied");
        }
        Ok(dir)
    }
}

fn path_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Copy regular files and directories from `src` into `dst`. Symlinks, `.git`
/// and anything under `skip` (the scratch root itself) are left out.
fn copy_tree(src: &Path, dst: &Path, skip: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_symlink() || entry.file_name() == ".git" || path.starts_with(skip) {
            continue;
        }
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            copy_tree(&path, &target, skip)?;
        } else {
            std::fs::copy(&path, &target)?;
        }
    }
    Ok(())
}

/// Every declared output carries the same payload.
fn publish(action: &Action, payload: Payload) -> ActionOutputs {
    action
        .outputs
        .iter()
        .map(|o| (o.clone(), payload.clone()))
        .collect()
}

impl ActionRunner for LocalRunner {
    fn run(
        &mut self,
        stage: &Stage,
        action: &Action,
        inputs: &[&Artifact],
    ) -> Result<ActionOutputs, String> {
        debug!(stage = %stage.name, action = %action.name, kind = %action.kind, "running action");
        let payload = match action.kind {
            ActionKind::Source => source::run_source(action, &self.workspace)?,
            ActionKind::Build => build::run_build(action, &self.build_dir(stage, action, inputs)?)?,
            ActionKind::Deploy => return Err("deploy actions are not implemented".to_string()),
        };
        Ok(publish(action, payload))
    }
}
