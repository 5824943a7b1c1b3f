//! Loading the user configuration and combining it with plugin defaults.
//!
//! The service itself never interprets configuration values beyond a few
//! well-known keys (`presets`, `plugins`, `outputPath`). Everything else is a
//! flat JSON object in which every plugin owns the entry under its key.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ServiceError;

/// Config files probed, in order, when none are given explicitly.
pub const DEFAULT_CONFIG_FILES: [&str; 2] = [".kilnrc.json", "config/config.json"];

/// Supplies the user configuration and merges it with defaults.
///
/// The default implementation of the merge methods is what [`JsonConfig`]
/// uses; custom sources usually only implement [`load`](Self::load).
pub trait ConfigSource: Send + Sync + 'static {
    /// Reads the user configuration for `cwd`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    fn load(&self, cwd: &Path, env: &str) -> Result<Map<String, Value>, ServiceError>;

    /// Builds the default configuration from `(key, default)` pairs.
    ///
    /// Pairs are applied in order; a later pair deep-merges over an earlier
    /// one with the same key.
    fn default_config(&self, defaults: Vec<(String, Value)>) -> Value {
        let mut config = Value::Object(Map::new());
        for (key, value) in defaults {
            let mut fragment = Map::new();
            fragment.insert(key, value);
            deep_merge(&mut config, &Value::Object(fragment));
        }
        config
    }

    /// Merges the user configuration over the (modified) defaults.
    fn merge(&self, defaults: &Value, user: &Map<String, Value>) -> Value {
        let mut config = if defaults.is_object() {
            defaults.clone()
        } else {
            Value::Object(Map::new())
        };
        deep_merge(&mut config, &Value::Object(user.clone()));
        config
    }
}

/// Reads the configuration from a JSON file in the project directory.
///
/// In the `development` env a `.local` sibling (`.kilnrc.local.json`) is merged
/// over the main file when present.
#[derive(Debug, Clone)]
pub struct JsonConfig {
    files: Vec<PathBuf>,
}

impl Default for JsonConfig {
    fn default() -> Self {
        Self {
            files: DEFAULT_CONFIG_FILES.iter().map(PathBuf::from).collect(),
        }
    }
}

impl JsonConfig {
    /// Probes [`DEFAULT_CONFIG_FILES`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Probes `files` instead. Relative paths are resolved against `cwd`.
    #[must_use]
    pub fn with_files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            files: files.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the first existing config file, if any.
    #[must_use]
    pub fn find(&self, cwd: &Path) -> Option<PathBuf> {
        self.files
            .iter()
            .map(|file| cwd.join(file))
            .find(|path| path.is_file())
    }
}

impl ConfigSource for JsonConfig {
    fn load(&self, cwd: &Path, env: &str) -> Result<Map<String, Value>, ServiceError> {
        let Some(main) = self.find(cwd) else {
            debug!(cwd = %cwd.display(), "no config file found");
            return Ok(Map::new());
        };

        let mut config = Value::Object(read_object(&main)?);
        if env == "development" {
            let local = local_sibling(&main);
            if local.is_file() {
                deep_merge(&mut config, &Value::Object(read_object(&local)?));
            }
        }

        match config {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

/// `.kilnrc.json` -> `.kilnrc.local.json`.
fn local_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(extension) => format!("{stem}.local.{}", extension.to_string_lossy()),
        None => format!("{stem}.local"),
    };
    path.with_file_name(name)
}

fn read_object(path: &Path) -> Result<Map<String, Value>, ServiceError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ServiceError::ConfigIo {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded config file");
    serde_json::from_str(&raw).map_err(|source| ServiceError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively merges `source` into `target`.
///
/// Objects merge key by key; anything else in `source` (arrays included)
/// replaces the value in `target`.
///
/// ```
/// use kiln_service::config::deep_merge;
/// use serde_json::json;
///
/// let mut config = json!({ "devServer": { "port": 8000, "host": "0.0.0.0" }, "hash": false });
/// deep_merge(&mut config, &json!({ "devServer": { "port": 3000 }, "hash": true }));
/// assert_eq!(config, json!({ "devServer": { "port": 3000, "host": "0.0.0.0" }, "hash": true }));
/// ```
pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arrays_are_replaced_not_concatenated() {
        let mut config = json!({ "plugins": ["a", "b"] });
        deep_merge(&mut config, &json!({ "plugins": ["c"] }));
        assert_eq!(config, json!({ "plugins": ["c"] }));
    }

    #[test]
    fn local_sibling_names() {
        assert_eq!(
            local_sibling(Path::new("/app/.kilnrc.json")),
            PathBuf::from("/app/.kilnrc.local.json")
        );
        assert_eq!(
            local_sibling(Path::new("/app/config/config.json")),
            PathBuf::from("/app/config/config.local.json")
        );
    }

    #[test]
    fn defaults_are_keyed_and_merged_in_order() {
        let source = JsonConfig::new();
        let config = source.default_config(vec![
            ("devServer".to_string(), json!({ "port": 8000 })),
            ("hash".to_string(), json!(false)),
            ("devServer".to_string(), json!({ "host": "0.0.0.0" })),
        ]);
        assert_eq!(
            config,
            json!({ "devServer": { "port": 8000, "host": "0.0.0.0" }, "hash": false })
        );
    }

    #[test]
    fn merge_puts_user_over_defaults() {
        let source = JsonConfig::new();
        let mut user = Map::new();
        user.insert("hash".to_string(), json!(true));
        let merged = source.merge(&json!({ "hash": false, "title": "kiln" }), &user);
        assert_eq!(merged, json!({ "hash": true, "title": "kiln" }));
    }
}
