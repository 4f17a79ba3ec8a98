//! Per-session working directory.
//!
//! Each session owns a temp directory the analyzer process runs in. It
//! holds a `pyrightconfig.json` synthesized from the session options and
//! an empty `venv/lib/site-packages` tree; pointing pyright's `venvPath`
//! at that shim keeps it from resolving imports against whatever Python
//! environment the host happens to have installed.

use std::io;
use std::path::Path;

use tempfile::TempDir;

use crate::config::ServiceConfig;
use crate::options::SessionOptions;

pub(crate) struct Workdir {
    dir: TempDir,
}

impl Workdir {
    /// Create the directory, the config file, and the venv shim.
    ///
    /// The directory is removed when the `Workdir` is dropped, which is
    /// exactly when its session terminates.
    pub async fn create(options: &SessionOptions, config: &ServiceConfig) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("pyground-session-")
            .tempdir()?;

        let analyzer_config = synthesize_config(options, config);
        let body = serde_json::to_vec(&analyzer_config).map_err(io::Error::other)?;
        tokio::fs::write(dir.path().join("pyrightconfig.json"), body).await?;

        tokio::fs::create_dir_all(dir.path().join("venv").join("lib").join("site-packages"))
            .await?;

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `file://` URI of the directory, for the protocol handshake.
    pub fn root_uri(&self) -> String {
        // TempDir paths are always absolute, so the conversion cannot fail.
        url::Url::from_directory_path(self.dir.path())
            .map(|url| url.to_string())
            .unwrap_or_else(|()| format!("file://{}", self.dir.path().display()))
    }
}

/// Build the `pyrightconfig.json` contents for one session.
fn synthesize_config(options: &SessionOptions, config: &ServiceConfig) -> serde_json::Value {
    let python_version = options
        .python_version
        .clone()
        .unwrap_or_else(|| config.default_python_version.clone());
    let python_platform = options
        .python_platform
        .clone()
        .unwrap_or_else(|| config.default_python_platform.clone());

    let mut analyzer_config = serde_json::json!({
        "pythonVersion": python_version,
        "pythonPlatform": python_platform,
        "venvPath": ".",
        "venv": "venv",
        // Native-library stubs are expensive to load and a playground
        // document can never import one.
        "skipNativeLibraries": true,
    });

    if options.type_checking_mode.as_deref() == Some("strict") {
        analyzer_config["typeCheckingMode"] = "strict".into();
    }

    for (key, value) in &options.config_overrides {
        analyzer_config[key.as_str()] = (*value).into();
    }

    analyzer_config
}
