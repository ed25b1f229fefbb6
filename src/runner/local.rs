//! PS-014: Local command execution via bash.

use indexmap::IndexMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Output from executing a script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Execute a shell script via `bash` in `cwd` with extra environment variables.
/// Uses bash (not sh/dash) because build scripts run with `set -o pipefail`.
pub fn exec_local(script: &str, cwd: &Path, env: &IndexMap<String, String>) -> Result<ExecOutput, String> {
    let mut child = Command::new("bash")
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn bash in {}: {}", cwd.display(), e))?;

    if let Some(ref mut stdin) = child.stdin {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("stdin write error: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("wait error: {}", e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
