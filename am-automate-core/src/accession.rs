//! Accession number lookup through an external script.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::contract::SourcePath;

/// Runs a user-supplied executable to derive an accession id for a source.
#[derive(Debug, Clone)]
pub struct AccessionLookup {
    script: Option<PathBuf>,
}

impl AccessionLookup {
    pub fn new(script: Option<PathBuf>) -> Self {
        Self { script }
    }

    pub fn disabled() -> Self {
        Self { script: None }
    }

    /// Executes the script with `path` as its only argument and returns its
    /// trimmed, unquoted stdout.
    ///
    /// No script, a script that cannot run, a non-zero exit or empty output
    /// all mean "no accession".
    pub async fn lookup(&self, path: &SourcePath) -> Option<String> {
        let script = self.script.as_deref()?;
        if !script.is_file() {
            debug!(script = %script.display(), "Accession script not found, skipping");
            return None;
        }
        run_script(script, path).await
    }
}

async fn run_script(script: &Path, path: &SourcePath) -> Option<String> {
    let output = match Command::new(script).arg(path_arg(path)).output().await {
        Ok(output) => output,
        Err(e) => {
            warn!(script = %script.display(), error = %e, "Could not run accession script");
            return None;
        }
    };

    if !output.status.success() {
        warn!(
            script = %script.display(),
            path = %path,
            status = %output.status,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "Accession script failed"
        );
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let accession = stdout.trim().trim_matches('"').trim_matches('\'').trim();
    if accession.is_empty() {
        return None;
    }
    debug!(path = %path, accession = %accession, "Resolved accession number");
    Some(accession.to_string())
}

#[cfg(unix)]
fn path_arg(path: &SourcePath) -> std::ffi::OsString {
    use std::os::unix::ffi::OsStringExt;
    std::ffi::OsString::from_vec(path.as_bytes().to_vec())
}

#[cfg(not(unix))]
fn path_arg(path: &SourcePath) -> std::ffi::OsString {
    path.to_string().into()
}
