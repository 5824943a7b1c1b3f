//! Generated tmp files: the runtime plugin registry and the polyfill entry.

use std::path::Path;

use kiln_service::api::{Describe, PluginApi};
use kiln_service::error::{BoxError, ServiceError};
use kiln_service::hook::{ApplyPlugins, Handler};
use kiln_service::plugin::{ApplyOutput, ConfigChangeType, EnableBy, Plugin, PluginConfig};
use serde_json::{Value, json};
use tracing::debug;

use crate::methods::{TmpFile, write_tmp_file};

/// Module the generated runtime registry imports its `Plugin` class from.
pub const RUNTIME_PATH: &str = "@kiln/runtime";

/// Runtime keys every application may export from `src/app`.
pub const RUNTIME_PLUGIN_KEYS: [&str; 5] = [
    "modifyClientRenderOpts",
    "patchRoutes",
    "rootContainer",
    "render",
    "onRouteChange",
];

/// Env var that turns the polyfill plugin off when set to `none`.
pub const POLYFILL_ENV: &str = "KILN_POLYFILL";

/// Fires `onGenerateFiles` so every plugin writes its tmp files.
///
/// # Errors
///
/// Fails with the first error an `onGenerateFiles` hook returns.
pub async fn generate_files(api: &PluginApi) -> Result<(), ServiceError> {
    debug!("generating tmp files");
    api.apply_plugins(ApplyPlugins::event("onGenerateFiles").args(json!({ "isFirstTime": true })))
        .await?;
    Ok(())
}

/// Converts Windows separators so generated imports work everywhere.
fn slash_path(path: &str) -> String {
    path.replace('\\', "/")
}

fn as_strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime plugins
// ─────────────────────────────────────────────────────────────────────────────

/// Returns `src/app.{ts,tsx,js,jsx}`, whichever exists first.
fn app_file(src: &Path) -> Option<String> {
    ["ts", "tsx", "js", "jsx"]
        .iter()
        .map(|extension| src.join(format!("app.{extension}")))
        .find(|path| path.is_file())
        .map(|path| path.to_string_lossy().into_owned())
}

fn render_plugin(valid_keys: &[String]) -> String {
    let keys = valid_keys
        .iter()
        .map(|key| format!("'{key}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "import {{ Plugin }} from '{RUNTIME_PATH}';\n\n\
         const plugin = new Plugin({{\n  validKeys: [{keys}],\n}});\n\n\
         export {{ plugin }};\n"
    )
}

fn render_plugin_register(plugins: &[String]) -> String {
    let mut out = String::from("import { plugin } from './plugin';\n");
    for (index, path) in plugins.iter().enumerate() {
        out.push_str(&format!("import * as Plugin_{index} from '{}';\n", slash_path(path)));
    }
    out.push('\n');
    for (index, path) in plugins.iter().enumerate() {
        out.push_str(&format!(
            "plugin.register({{\n  apply: Plugin_{index},\n  path: '{}',\n}});\n",
            slash_path(path)
        ));
    }
    out
}

/// Writes `core/plugin.ts` and `core/pluginRegister.ts`.
///
/// The valid runtime keys come from `addRuntimePluginKey` (seeded with
/// [`RUNTIME_PLUGIN_KEYS`]); the runtime plugins from `addRuntimePlugin`
/// (seeded with `src/app.*` when it exists).
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimePluginsPlugin;

impl Plugin for RuntimePluginsPlugin {
    const ID: &'static str = "kiln:runtime-plugins";

    fn apply(&self, api: &PluginApi) -> Result<ApplyOutput, BoxError> {
        let generator = api.clone();
        api.call(
            "onGenerateFiles",
            Handler::new(move |_| {
                let api = generator.clone();
                async move {
                    let valid_keys = api
                        .apply_plugins(
                            ApplyPlugins::add("addRuntimePluginKey")
                                .initial_value(json!(RUNTIME_PLUGIN_KEYS)),
                        )
                        .await?;
                    let seed: Vec<String> = app_file(&api.paths().abs_src_path).into_iter().collect();
                    let plugins = api
                        .apply_plugins(ApplyPlugins::add("addRuntimePlugin").initial_value(json!(seed)))
                        .await?;

                    write_tmp_file(
                        &api,
                        &TmpFile::new("core/plugin.ts", render_plugin(&as_strings(&valid_keys))),
                    )?;
                    write_tmp_file(
                        &api,
                        &TmpFile::new(
                            "core/pluginRegister.ts",
                            render_plugin_register(&as_strings(&plugins)),
                        ),
                    )?;
                    Ok::<_, BoxError>(Value::Null)
                }
            }),
        )?;
        api.call(
            "addKilnExports",
            Handler::sync(|_| Ok(json!([{ "specifiers": ["plugin"], "source": "./plugin" }]))),
        )?;
        Ok(ApplyOutput::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Polyfill
// ─────────────────────────────────────────────────────────────────────────────

fn render_polyfill(imports: &[String]) -> String {
    imports.iter().map(|source| format!("import '{source}';\n")).collect()
}

/// Writes `core/polyfill.ts` from `config.polyfill.imports`.
///
/// Disabled when `$KILN_POLYFILL` is `none`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolyfillPlugin;

impl Plugin for PolyfillPlugin {
    const ID: &'static str = "kiln:polyfill";

    fn apply(&self, api: &PluginApi) -> Result<ApplyOutput, BoxError> {
        api.describe(
            Describe::new()
                .with_key("polyfill")
                .with_config(PluginConfig::new().with_schema(json!({
                    "type": "object",
                    "properties": {
                        "imports": { "type": "array", "items": { "type": "string" }, "uniqueItems": true },
                    },
                    "required": ["imports"],
                })).with_on_change(ConfigChangeType::RegenerateTmpFiles))
                .with_enable_by(EnableBy::predicate(|| {
                    std::env::var(POLYFILL_ENV).as_deref() != Ok("none")
                })),
        )?;

        api.call(
            "addPolyfillImports",
            Handler::sync(|_| Ok(json!([{ "source": "./core/polyfill" }]))),
        )?;

        let generator = api.clone();
        api.call(
            "onGenerateFiles",
            Handler::sync(move |_| {
                let imports = generator
                    .config()
                    .map(|config| as_strings(&config["polyfill"]["imports"]))
                    .unwrap_or_default();
                write_tmp_file(&generator, &TmpFile::new("core/polyfill.ts", render_polyfill(&imports)))?;
                Ok(Value::Null)
            }),
        )?;
        Ok(ApplyOutput::default())
    }
}
