//! Absolute project paths derived from the working directory and config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output directory used when the config does not set `outputPath`.
pub const DEFAULT_OUTPUT_PATH: &str = "dist";

/// Project paths handed to plugins.
///
/// Serialized in camelCase (`absSrcPath`, ...), which is the shape
/// `modifyPaths` hooks receive and return. Fields a hook drops fall back to
/// empty paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Paths {
    /// The project root.
    pub cwd: PathBuf,
    /// `node_modules` under the project root.
    pub abs_node_modules_path: PathBuf,
    /// `src` when it exists, otherwise the project root.
    pub abs_src_path: PathBuf,
    /// `pages` under the source directory (`page` when only that exists).
    pub abs_pages_path: PathBuf,
    /// Build output directory.
    pub abs_output_path: PathBuf,
    /// Directory for generated temporary files.
    pub abs_tmp_path: PathBuf,
}

impl Paths {
    /// Derives the paths for `cwd`.
    ///
    /// `config.outputPath` overrides the output directory. The tmp directory
    /// is `.kiln` in the source directory, suffixed with the env name outside
    /// `development` (`.kiln-production`).
    ///
    /// ```
    /// use std::path::Path;
    /// use kiln_service::paths::Paths;
    /// use serde_json::json;
    ///
    /// let paths = Paths::resolve(Path::new("/no/such/app"), &json!({ "outputPath": "build" }), "production");
    /// assert_eq!(paths.abs_src_path, Path::new("/no/such/app"));
    /// assert_eq!(paths.abs_output_path, Path::new("/no/such/app/build"));
    /// assert_eq!(paths.abs_tmp_path, Path::new("/no/such/app/.kiln-production"));
    /// ```
    #[must_use]
    pub fn resolve(cwd: &Path, config: &Value, env: &str) -> Self {
        let src = cwd.join("src");
        let abs_src_path = if src.is_dir() { src } else { cwd.to_path_buf() };

        let singular = abs_src_path.join("page");
        let abs_pages_path = if singular.is_dir() {
            singular
        } else {
            abs_src_path.join("pages")
        };

        let output = config
            .get("outputPath")
            .and_then(Value::as_str)
            .filter(|output| !output.is_empty())
            .unwrap_or(DEFAULT_OUTPUT_PATH);

        let tmp = if env == "development" {
            ".kiln".to_string()
        } else {
            format!(".kiln-{env}")
        };

        Self {
            cwd: cwd.to_path_buf(),
            abs_node_modules_path: cwd.join("node_modules"),
            abs_tmp_path: abs_src_path.join(tmp),
            abs_pages_path,
            abs_src_path,
            abs_output_path: cwd.join(output),
        }
    }
}
