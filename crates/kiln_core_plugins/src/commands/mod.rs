//! The built-in `build`, `dev` and `generate` commands.

mod build;
mod dev;
mod generate;

pub use build::BuildCommand;
pub use dev::{DEFAULT_HOST, DEFAULT_PORT, DevCommand, resolve_host, resolve_port};
pub use generate::{GenerateCommand, REGISTER_GENERATOR};

use std::path::Path;

use kiln_service::api::PluginApi;
use kiln_service::error::ServiceError;
use kiln_service::hook::ApplyPlugins;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::BuiltInError;

/// Entry kept when the tmp directory is cleaned.
const CACHE_DIR: &str = ".cache";

/// Empties the tmp directory, keeping `.cache`.
pub(crate) fn clean_tmp_except_cache(tmp: &Path) -> Result<(), BuiltInError> {
    let Ok(entries) = std::fs::read_dir(tmp) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        if entry.file_name() == CACHE_DIR {
            continue;
        }
        let path = entry.path();
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.map_err(|source| BuiltInError::Io {
            action: "clean",
            path: path.clone(),
            source,
        })?;
    }
    debug!(path = %tmp.display(), "cleaned tmp directory");
    Ok(())
}

/// Builds the bundle config through `modifyBundleConfigOpts` and
/// `modifyBundleConfig`.
///
/// `port` is set for dev servers; it also turns hot reloading on unless
/// `$KILN_HMR` is `none`.
pub(crate) async fn bundle_config(api: &PluginApi, port: Option<u16>) -> Result<Value, ServiceError> {
    let env = if api.env() == "production" {
        "production"
    } else {
        "development"
    };
    let paths = api.paths();
    let hot = port.is_some() && std::env::var("KILN_HMR").as_deref() != Ok("none");

    let opts = api
        .apply_plugins(
            ApplyPlugins::modify("modifyBundleConfigOpts")
                .initial_value(json!({
                    "env": env,
                    "type": "csr",
                    "port": port,
                    "hot": hot,
                    "entry": { "kiln": paths.abs_tmp_path.join("kiln.ts") },
                }))
                .args(json!({ "type": "csr" })),
        )
        .await?;

    let config = json!({
        "mode": env,
        "entry": opts["entry"],
        "output": { "path": paths.abs_output_path },
        "hot": opts["hot"],
    });
    api.apply_plugins(
        ApplyPlugins::modify("modifyBundleConfig")
            .initial_value(config)
            .args(json!({ "env": env, "type": "csr", "opts": opts })),
    )
    .await
}
