//! The [`Bundler`] trait the `build` and `dev` commands delegate to.

use std::path::PathBuf;

use async_trait::async_trait;
use kiln_service::error::BoxError;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

/// A production build request.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// The bundle config after `modifyBundleConfig`.
    pub config: Value,
    /// Where the output goes.
    pub output_path: PathBuf,
}

/// A dev server request.
#[derive(Debug, Clone)]
pub struct DevRequest {
    /// The bundle config after `modifyBundleConfig`.
    pub config: Value,
    /// Host the server should listen on.
    pub host: String,
    /// Port the server should listen on.
    pub port: u16,
    /// Middlewares collected from `addBeforeMiddlewares`.
    pub before_middlewares: Vec<Value>,
    /// Middlewares collected from `addMiddlewares`.
    pub middlewares: Vec<Value>,
}

/// What a bundler reports after compiling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Emitted files, relative to the output path.
    pub assets: Vec<String>,
    /// Compilation errors.
    pub errors: Vec<String>,
}

/// Trait implemented by bundler integrations.
///
/// The built-in commands prepare the bundle config through the extension
/// points and hand it to the bundler; compiling is entirely up to the
/// implementation.
#[async_trait]
pub trait Bundler: Send + Sync + 'static {
    /// Compiles a production build.
    async fn build(&self, request: BuildRequest) -> Result<BuildStats, BoxError>;

    /// Starts a dev server and returns once the first compilation finished.
    async fn dev(&self, request: DevRequest) -> Result<BuildStats, BoxError>;
}

/// A bundler that logs the requests it receives and emits nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunBundler;

#[async_trait]
impl Bundler for DryRunBundler {
    async fn build(&self, request: BuildRequest) -> Result<BuildStats, BoxError> {
        info!(
            output = %request.output_path.display(),
            config = %request.config,
            "dry run: skipping build"
        );
        Ok(BuildStats::default())
    }

    async fn dev(&self, request: DevRequest) -> Result<BuildStats, BoxError> {
        info!(
            host = %request.host,
            port = request.port,
            before_middlewares = request.before_middlewares.len(),
            middlewares = request.middlewares.len(),
            "dry run: skipping dev server"
        );
        Ok(BuildStats::default())
    }
}
