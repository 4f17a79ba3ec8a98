//! On-demand installation of pyright versions.
//!
//! Each exact version lives in its own directory under the install root;
//! presence of that directory is the whole "already installed" check.
//! Installs go through `npm install --prefix`, which is also what pins
//! the language-server entry point at a predictable path.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// The version string is not something that can name an install
    /// directory. Versions come from callers, so this is reachable.
    #[error("invalid pyright version {0:?}")]
    InvalidVersion(String),

    /// The install root or version directory could not be prepared.
    #[error("failed to prepare install directory {}", path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// npm itself could not be started.
    #[error("failed to run {command}")]
    InstallerStart {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// npm ran and reported failure.
    #[error("install of pyright@{version} failed: {detail}")]
    InstallerFailed { version: String, detail: String },
}

pub(crate) struct Installer {
    root: PathBuf,
    npm_command: String,
}

impl Installer {
    pub fn new(root: PathBuf, npm_command: String) -> Self {
        Self { root, npm_command }
    }

    /// Path of the language-server entry point inside an install directory.
    pub fn langserver_entry(install_dir: &Path) -> PathBuf {
        install_dir
            .join("node_modules")
            .join("pyright")
            .join("langserver.index.js")
    }

    /// Make sure `version` is installed and return its directory.
    ///
    /// Idempotent: an existing directory is trusted as a completed
    /// install and returned without any work. On a failed install the
    /// half-written directory is removed again so the next attempt starts
    /// clean.
    pub async fn ensure_installed(&self, version: &str) -> Result<PathBuf, InstallError> {
        if !is_plausible_version(version) {
            return Err(InstallError::InvalidVersion(version.to_string()));
        }

        let install_dir = self.root.join(version);
        if tokio::fs::try_exists(&install_dir).await.unwrap_or(false) {
            tracing::info!("pyright {version} already installed");
            return Ok(install_dir);
        }

        tokio::fs::create_dir_all(&install_dir)
            .await
            .map_err(|source| InstallError::Prepare {
                path: install_dir.clone(),
                source,
            })?;

        tracing::info!("installing pyright {version}");
        let output = Command::new(&self.npm_command)
            .arg("install")
            .arg(format!("pyright@{version}"))
            .arg("--prefix")
            .arg(&install_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(source) => {
                let _ = tokio::fs::remove_dir_all(&install_dir).await;
                return Err(InstallError::InstallerStart {
                    command: self.npm_command.clone(),
                    source,
                });
            }
        };

        if !output.status.success() {
            let _ = tokio::fs::remove_dir_all(&install_dir).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("unknown error").to_string();
            tracing::error!("install of pyright {version} failed: {detail}");
            return Err(InstallError::InstallerFailed {
                version: version.to_string(),
                detail,
            });
        }

        tracing::info!("install of pyright {version} succeeded");
        Ok(install_dir)
    }
}

/// Versions become directory names, so only the characters that appear in
/// real npm versions are allowed.
fn is_plausible_version(version: &str) -> bool {
    !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'))
}
