//! Extension points of the built-in preset and the `writeTmpFile` method.

use std::path::{Component, Path, PathBuf};

use kiln_service::api::{Method, MethodArg, PluginApi};
use kiln_service::error::{BoxError, ServiceError};
use kiln_service::plugin::{ApplyOutput, Plugin};
use kiln_service::stage::ServiceStage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::BuiltInError;

/// Hook-registering methods published by [`RegisterMethodsPlugin`].
///
/// Calling one registers the argument as a hook under the method's name.
pub const EXTENSION_POINTS: &[&str] = &[
    "onGenerateFiles",
    "onBuildComplete",
    "onExit",
    "onPatchRoute",
    "onPatchRouteBefore",
    "onPatchRoutes",
    "onPatchRoutesBefore",
    "onDevCompileDone",
    "addBeforeMiddlewares",
    "addDepInfo",
    "addDevScripts",
    "addMiddlewares",
    "addRuntimePlugin",
    "addRuntimePluginKey",
    "addKilnExports",
    "addProjectFirstLibraries",
    "addPolyfillImports",
    "addEntryImportsAhead",
    "addEntryImports",
    "addEntryCodeAhead",
    "addEntryCode",
    "addHTMLMetas",
    "addHTMLLinks",
    "addHTMLStyles",
    "addHTMLHeadScripts",
    "addHTMLScripts",
    "addTmpGenerateWatcherPaths",
    "modifyHTML",
    "modifyBundler",
    "modifyBundleConfigOpts",
    "modifyBundleConfig",
    "modifyBundleConfigs",
    "modifyBundleImplementor",
    "modifyDevHTMLContent",
    "modifyProdHTMLContent",
    "modifyPublicPathStr",
    "modifyRendererPath",
    "modifyRoutes",
];

/// Name of the tmp file writing method.
pub const WRITE_TMP_FILE: &str = "writeTmpFile";

const TS_NOCHECK: &str = "// @ts-nocheck";

/// A file to write under the tmp directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TmpFile {
    /// Path relative to the tmp directory.
    pub path: String,
    /// File content.
    pub content: String,
    /// Prefixes TypeScript files with `// @ts-nocheck`. Defaults to true.
    #[serde(default = "skip_ts_check_default", rename = "skipTSCheck")]
    pub skip_ts_check: bool,
}

fn skip_ts_check_default() -> bool {
    true
}

impl TmpFile {
    /// Creates a file that skips type checking.
    #[must_use]
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            skip_ts_check: true,
        }
    }

    /// Keeps TypeScript checks on for this file.
    #[must_use]
    pub fn with_ts_check(mut self) -> Self {
        self.skip_ts_check = false;
        self
    }
}

/// Writes a tmp file through the `writeTmpFile` method.
///
/// Returns whether the file on disk changed.
///
/// # Errors
///
/// Fails if `writeTmpFile` is not registered or the write fails.
pub fn write_tmp_file(api: &PluginApi, file: &TmpFile) -> Result<bool, ServiceError> {
    let arg = serde_json::to_value(file).map_err(|err| ServiceError::Method {
        name: WRITE_TMP_FILE.to_string(),
        source: err.into(),
    })?;
    let written = api.call(WRITE_TMP_FILE, arg)?;
    Ok(written.as_bool().unwrap_or(false))
}

/// Returns true for `.ts` and `.tsx` files (declaration files included).
fn is_ts_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .is_some_and(|extension| extension == "ts" || extension == "tsx")
}

/// Writes `file` under `tmp_dir` unless the content on disk is identical.
///
/// `file.path` must be relative and free of `..`.
fn write_under(tmp_dir: &Path, file: &TmpFile) -> Result<bool, BuiltInError> {
    let escapes = Path::new(&file.path).components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(BuiltInError::TmpPathEscapes(file.path.clone()));
    }
    let target: PathBuf = tmp_dir.join(&file.path);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|source| BuiltInError::Io {
            action: "create",
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let content = if is_ts_file(&file.path) && file.skip_ts_check {
        format!("{TS_NOCHECK}\n{}", file.content)
    } else {
        file.content.clone()
    };

    if std::fs::read_to_string(&target).is_ok_and(|existing| existing == content) {
        return Ok(false);
    }
    std::fs::write(&target, content).map_err(|source| BuiltInError::Io {
        action: "write",
        path: target.clone(),
        source,
    })?;
    debug!(path = %target.display(), "wrote tmp file");
    Ok(true)
}

fn write_tmp_file_method(api: &PluginApi, arg: MethodArg) -> Result<Value, BoxError> {
    let stage = api.stage();
    if stage < ServiceStage::PluginReady {
        return Err(BuiltInError::TmpFileTooEarly(stage).into());
    }
    let value = arg.as_value().cloned().ok_or(BuiltInError::InvalidArgument {
        method: WRITE_TMP_FILE,
        reason: "expected { path, content }".to_string(),
    })?;
    let file: TmpFile =
        serde_json::from_value(value).map_err(|err| BuiltInError::InvalidArgument {
            method: WRITE_TMP_FILE,
            reason: err.to_string(),
        })?;
    let written = write_under(&api.paths().abs_tmp_path, &file)?;
    Ok(Value::Bool(written))
}

/// Publishes [`EXTENSION_POINTS`] and `writeTmpFile`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterMethodsPlugin;

impl Plugin for RegisterMethodsPlugin {
    const ID: &'static str = "kiln:register-methods";

    fn apply(&self, api: &PluginApi) -> Result<ApplyOutput, BoxError> {
        for name in EXTENSION_POINTS {
            api.register_method(Method::new(*name))?;
        }
        api.register_method(Method::with_handler(WRITE_TMP_FILE, write_tmp_file_method))?;
        Ok(ApplyOutput::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typescript_detection() {
        assert!(is_ts_file("core/plugin.ts"));
        assert!(is_ts_file("pages/index.tsx"));
        assert!(is_ts_file("types.d.ts"));
        assert!(!is_ts_file("core/polyfill.js"));
        assert!(!is_ts_file("README"));
    }

    #[test]
    fn tmp_file_defaults_to_skipping_checks() {
        let file: TmpFile =
            serde_json::from_value(serde_json::json!({ "path": "a.ts", "content": "" })).unwrap();
        assert!(file.skip_ts_check);
    }

    #[test]
    fn writes_only_when_content_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = TmpFile::new("core/plugin.ts", "export {};");

        assert!(write_under(dir.path(), &file).unwrap());
        assert!(!write_under(dir.path(), &file).unwrap());

        let written = std::fs::read_to_string(dir.path().join("core/plugin.ts")).unwrap();
        assert_eq!(written, "// @ts-nocheck\nexport {};");

        let checked = TmpFile::new("core/plugin.ts", "export {};").with_ts_check();
        assert!(write_under(dir.path(), &checked).unwrap());
        let written = std::fs::read_to_string(dir.path().join("core/plugin.ts")).unwrap();
        assert_eq!(written, "export {};");
    }

    #[test]
    fn paths_outside_the_tmp_dir_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let tmp = root.path().join("tmp");

        for path in ["../escape.ts", "core/../../escape.ts", "/etc/escape.ts"] {
            let err = write_under(&tmp, &TmpFile::new(path, "")).unwrap_err();
            assert!(matches!(&err, BuiltInError::TmpPathEscapes(rejected) if rejected == path));
        }
        assert!(!root.path().join("escape.ts").exists());
        assert!(write_under(&tmp, &TmpFile::new("./core/ok.ts", "")).unwrap());
    }
}
