use std::sync::Arc;

use kiln_service::api::PluginApi;
use kiln_service::command::Command;
use kiln_service::error::BoxError;
use kiln_service::hook::ApplyPlugins;
use kiln_service::plugin::{ApplyOutput, Plugin};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{bundle_config, clean_tmp_except_cache};
use crate::bundler::{BuildRequest, Bundler, DryRunBundler};
use crate::error::BuiltInError;
use crate::generate_files::generate_files;

/// Registers `build`: builds the application for production.
///
/// Cleans the tmp directory, generates tmp files, prepares the bundle config
/// and hands it to the [`Bundler`]. `onBuildComplete` fires with `{ stats }`
/// on success and `{ err }` on failure; the failure is still returned.
#[derive(Clone)]
pub struct BuildCommand {
    bundler: Arc<dyn Bundler>,
}

impl Default for BuildCommand {
    fn default() -> Self {
        Self::new(Arc::new(DryRunBundler))
    }
}

impl BuildCommand {
    /// Creates the command around a bundler.
    #[must_use]
    pub fn new(bundler: Arc<dyn Bundler>) -> Self {
        Self { bundler }
    }
}

async fn build(api: PluginApi, bundler: Arc<dyn Bundler>) -> Result<Value, BoxError> {
    let paths = api.paths();
    clean_tmp_except_cache(&paths.abs_tmp_path)?;
    generate_files(&api).await?;
    let config = bundle_config(&api, None).await?;

    if std::env::var("KILN_CLEAR_OUTPUT").as_deref() != Ok("none")
        && paths.abs_output_path.is_dir()
    {
        debug!(path = %paths.abs_output_path.display(), "clearing output path");
        std::fs::remove_dir_all(&paths.abs_output_path).map_err(|source| BuiltInError::Io {
            action: "clear",
            path: paths.abs_output_path.clone(),
            source,
        })?;
    }

    let request = BuildRequest {
        config,
        output_path: paths.abs_output_path.clone(),
    };
    match bundler.build(request).await {
        Ok(stats) => {
            let stats = serde_json::to_value(stats)?;
            info!(output = %paths.abs_output_path.display(), "build complete");
            api.apply_plugins(
                ApplyPlugins::event("onBuildComplete").args(json!({ "stats": stats })),
            )
            .await?;
            Ok(stats)
        }
        Err(err) => {
            api.apply_plugins(
                ApplyPlugins::event("onBuildComplete").args(json!({ "err": err.to_string() })),
            )
            .await?;
            Err(err)
        }
    }
}

impl Plugin for BuildCommand {
    const ID: &'static str = "kiln:command-build";

    fn apply(&self, api: &PluginApi) -> Result<ApplyOutput, BoxError> {
        let bundler = Arc::clone(&self.bundler);
        api.register_command(
            Command::new("build", move |api, _args| build(api, Arc::clone(&bundler)))
                .with_description("build application for production"),
        )?;
        Ok(ApplyOutput::default())
    }
}
