use std::sync::Arc;

use kiln_service::api::{Method, PluginApi};
use kiln_service::command::{Args, Command};
use kiln_service::error::BoxError;
use kiln_service::hook::ApplyPlugins;
use kiln_service::plugin::{ApplyOutput, Plugin};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::info;

use super::{bundle_config, clean_tmp_except_cache};
use crate::bundler::{Bundler, DevRequest, DryRunBundler};
use crate::error::BuiltInError;
use crate::generate_files::generate_files;

/// Port used when nothing else sets one.
pub const DEFAULT_PORT: u16 = 8000;

/// Host used when nothing else sets one.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Picks the first port set by `$PORT`, `--port` or `devServer.port`.
///
/// # Errors
///
/// Fails if the chosen value is not a valid port.
pub fn resolve_port(
    env: Option<&str>,
    arg: Option<&Value>,
    config: Option<&Value>,
) -> Result<u16, BuiltInError> {
    let raw = env
        .map(str::to_string)
        .or_else(|| arg.and_then(port_string))
        .or_else(|| config.and_then(port_string));
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BuiltInError::InvalidPort(raw)),
        None => Ok(DEFAULT_PORT),
    }
}

fn port_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(string) => Some(string.clone()),
        _ => None,
    }
}

/// Picks `$HOST`, then `devServer.host`, then [`DEFAULT_HOST`].
#[must_use]
pub fn resolve_host(env: Option<&str>, config: Option<&Value>) -> String {
    env.map(str::to_string)
        .or_else(|| config.and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_HOST.to_string())
}

/// Where the dev server listens, once `dev` has started.
#[derive(Debug, Default)]
struct Listening {
    port: Option<u16>,
    host: Option<String>,
}

/// Registers `dev` and the `getPort` / `getHostname` methods.
///
/// `dev` resolves the address, generates tmp files, collects middlewares from
/// `addBeforeMiddlewares` and `addMiddlewares`, hands everything to the
/// [`Bundler`] and fires `onDevCompileDone` with `{ stats }`.
#[derive(Clone)]
pub struct DevCommand {
    bundler: Arc<dyn Bundler>,
}

impl Default for DevCommand {
    fn default() -> Self {
        Self::new(Arc::new(DryRunBundler))
    }
}

impl DevCommand {
    /// Creates the command around a bundler.
    #[must_use]
    pub fn new(bundler: Arc<dyn Bundler>) -> Self {
        Self { bundler }
    }
}

async fn dev(
    api: PluginApi,
    args: Args,
    bundler: Arc<dyn Bundler>,
    listening: Arc<RwLock<Listening>>,
) -> Result<Value, BoxError> {
    let dev_server = api
        .config()
        .and_then(|config| config.get("devServer").cloned())
        .unwrap_or(Value::Null);
    let port = resolve_port(
        std::env::var("PORT").ok().as_deref(),
        args.get("port"),
        dev_server.get("port"),
    )?;
    let host = resolve_host(std::env::var("HOST").ok().as_deref(), dev_server.get("host"));
    {
        let mut listening = listening.write();
        listening.port = Some(port);
        listening.host = Some(host.clone());
    }
    info!(%host, port, "starting the development server");

    clean_tmp_except_cache(&api.paths().abs_tmp_path)?;
    generate_files(&api).await?;
    let config = bundle_config(&api, Some(port)).await?;

    let before_middlewares = collect(&api, "addBeforeMiddlewares").await?;
    let middlewares = collect(&api, "addMiddlewares").await?;

    let stats = bundler
        .dev(DevRequest {
            config,
            host: host.clone(),
            port,
            before_middlewares,
            middlewares,
        })
        .await?;
    let stats = serde_json::to_value(stats)?;
    api.apply_plugins(ApplyPlugins::event("onDevCompileDone").args(json!({ "stats": stats })))
        .await?;

    Ok(json!({ "port": port, "hostname": host, "stats": stats }))
}

async fn collect(api: &PluginApi, key: &str) -> Result<Vec<Value>, BoxError> {
    let items = api
        .apply_plugins(ApplyPlugins::add(key).args(json!({})))
        .await?;
    Ok(match items {
        Value::Array(items) => items,
        _ => Vec::new(),
    })
}

impl Plugin for DevCommand {
    const ID: &'static str = "kiln:command-dev";

    fn apply(&self, api: &PluginApi) -> Result<ApplyOutput, BoxError> {
        let listening = Arc::new(RwLock::new(Listening::default()));

        let bundler = Arc::clone(&self.bundler);
        let state = Arc::clone(&listening);
        api.register_command(
            Command::new("dev", move |api, args| {
                dev(api, args, Arc::clone(&bundler), Arc::clone(&state))
            })
            .with_description("start a dev server for development"),
        )?;

        let state = Arc::clone(&listening);
        api.register_method(Method::with_handler("getPort", move |caller, _| {
            if caller.env() != "development" {
                return Err(BuiltInError::DevelopmentOnly("getPort").into());
            }
            Ok(json!(state.read().port))
        }))?;

        let state = Arc::clone(&listening);
        api.register_method(Method::with_handler("getHostname", move |caller, _| {
            if caller.env() != "development" {
                return Err(BuiltInError::DevelopmentOnly("getHostname").into());
            }
            Ok(json!(state.read().host))
        }))?;

        Ok(ApplyOutput::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_precedence() {
        let arg = json!(3000);
        let config = json!("4000");
        assert_eq!(resolve_port(Some("5000"), Some(&arg), Some(&config)).unwrap(), 5000);
        assert_eq!(resolve_port(None, Some(&arg), Some(&config)).unwrap(), 3000);
        assert_eq!(resolve_port(None, None, Some(&config)).unwrap(), 4000);
        assert_eq!(resolve_port(None, None, None).unwrap(), DEFAULT_PORT);
    }

    #[test]
    fn invalid_ports_are_rejected() {
        assert!(matches!(
            resolve_port(Some("eighty"), None, None),
            Err(BuiltInError::InvalidPort(port)) if port == "eighty"
        ));
        assert!(resolve_port(None, Some(&json!(70000)), None).is_err());
    }

    #[test]
    fn host_precedence() {
        let config = json!("127.0.0.1");
        assert_eq!(resolve_host(Some("localhost"), Some(&config)), "localhost");
        assert_eq!(resolve_host(None, Some(&config)), "127.0.0.1");
        assert_eq!(resolve_host(None, None), DEFAULT_HOST);
    }
}
