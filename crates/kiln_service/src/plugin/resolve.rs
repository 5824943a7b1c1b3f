//! Turning bare module references into descriptors.
//!
//! There is no dynamic `require` in a compiled binary, so bare paths are looked
//! up in a [`ModuleLoader`]. The loader owns the entry functions; this module
//! derives each descriptor's id and key from the path.

use std::path::{Component, Path};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;

use super::{ApplyFn, PluginDescriptor, PluginKind};
use crate::error::ServiceError;

/// Module extensions stripped when deriving ids and keys.
const MODULE_EXTENSIONS: [&str; 7] = ["js", "jsx", "ts", "tsx", "mjs", "cjs", "rs"];

/// Prefixes stripped from package names when deriving keys.
const KEY_PREFIXES: [&str; 4] = ["@kiln/plugin-", "@kiln/preset-", "kiln-plugin-", "kiln-preset-"];

// ─────────────────────────────────────────────────────────────────────────────
// ModuleLoader
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves a module path to an entry function.
pub trait ModuleLoader: Send + Sync + 'static {
    /// Returns the entry function for `path`, or `None` if it is unknown.
    fn load(&self, path: &str) -> Option<ApplyFn>;
}

/// In-memory [`ModuleLoader`] keyed by path.
///
/// Cloning shares the underlying table, so modules added through one handle are
/// visible through every other.
///
/// # Example
///
/// ```
/// use kiln_service::plugin::{ApplyOutput, ModuleLoader, ModuleRegistry, apply_sync};
///
/// let modules = ModuleRegistry::new()
///     .with("./plugins/routes", apply_sync(|_| Ok(ApplyOutput::default())));
///
/// assert!(modules.load("./plugins/routes").is_some());
/// assert!(modules.load("./plugins/missing").is_none());
/// ```
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Arc<RwLock<HashMap<String, ApplyFn>>>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module and returns the registry.
    #[must_use]
    pub fn with(self, path: impl Into<String>, apply: ApplyFn) -> Self {
        self.insert(path, apply);
        self
    }

    /// Adds or replaces a module.
    pub fn insert(&self, path: impl Into<String>, apply: ApplyFn) {
        self.modules.write().insert(path.into(), apply);
    }

    /// Returns true if a module is registered under `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.modules.read().contains_key(path)
    }
}

impl ModuleLoader for ModuleRegistry {
    fn load(&self, path: &str) -> Option<ApplyFn> {
        self.modules.read().get(path).cloned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Id and key derivation
// ─────────────────────────────────────────────────────────────────────────────

/// Derives a descriptor id from a module path.
///
/// Paths inside `cwd` become `./relative/path`, other relative paths keep
/// their form, package names are used verbatim. Module extensions are dropped.
///
/// ```
/// use std::path::Path;
/// use kiln_service::plugin::id_for_path;
///
/// let cwd = Path::new("/app");
/// assert_eq!(id_for_path("/app/plugins/foo.ts", cwd), "./plugins/foo");
/// assert_eq!(id_for_path("./plugins/bar.js", cwd), "./plugins/bar");
/// assert_eq!(id_for_path("@kiln/plugin-routes", cwd), "@kiln/plugin-routes");
/// ```
#[must_use]
pub fn id_for_path(path: &str, cwd: &Path) -> String {
    let candidate = Path::new(path);
    let id = match candidate.strip_prefix(cwd) {
        Ok(relative) if candidate.is_absolute() => {
            let segments: Vec<_> = relative
                .components()
                .filter_map(|component| match component {
                    Component::Normal(segment) => segment.to_str(),
                    _ => None,
                })
                .collect();
            format!("./{}", segments.join("/"))
        }
        _ => path.replace('\\', "/"),
    };
    strip_extension(&id).to_string()
}

/// Derives a config key from a descriptor id.
///
/// ```
/// use kiln_service::plugin::key_for_id;
///
/// assert_eq!(key_for_id("kiln-plugin-dark-mode"), "darkMode");
/// assert_eq!(key_for_id("@kiln/preset-react"), "react");
/// assert_eq!(key_for_id("./plugins/route_table/index"), "routeTable");
/// assert_eq!(key_for_id("kiln:register-methods"), "registerMethods");
/// ```
#[must_use]
pub fn key_for_id(id: &str) -> String {
    let id = strip_extension(id);
    let mut segments = id.rsplit('/').filter(|segment| !segment.is_empty());
    let mut name = segments.next().unwrap_or(id);
    if name == "index" {
        name = segments.next().unwrap_or(name);
    }
    let name = name.rsplit(':').next().unwrap_or(name);
    let name = KEY_PREFIXES
        .iter()
        .filter_map(|prefix| {
            let short = prefix.rsplit('/').next().unwrap_or(prefix);
            name.strip_prefix(short)
        })
        .next()
        .unwrap_or(name);
    name.split('.')
        .map(camel_case)
        .collect::<Vec<_>>()
        .join(".")
}

fn strip_extension(path: &str) -> &str {
    match path.rsplit_once('.') {
        Some((stem, extension))
            if MODULE_EXTENSIONS.contains(&extension) && !stem.ends_with('/') =>
        {
            stem
        }
        _ => path,
    }
}

fn camel_case(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let words = part
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty());
    for (index, word) in words.enumerate() {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            if index == 0 {
                out.extend(first.to_lowercase());
            } else {
                out.extend(first.to_uppercase());
            }
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Resolves a bare module path into a descriptor of the given kind.
pub(crate) fn path_to_descriptor(
    kind: PluginKind,
    path: &str,
    cwd: &Path,
    loader: &dyn ModuleLoader,
) -> Result<PluginDescriptor, ServiceError> {
    let apply = loader
        .load(path)
        .ok_or_else(|| ServiceError::ModuleNotFound {
            kind,
            path: path.to_string(),
        })?;
    let id = id_for_path(path, cwd);
    Ok(PluginDescriptor::new(kind, id, apply).with_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{ApplyOutput, apply_sync};

    #[test]
    fn ids_outside_cwd_keep_their_path() {
        let cwd = Path::new("/app");
        assert_eq!(id_for_path("/elsewhere/plugin.js", cwd), "/elsewhere/plugin");
        assert_eq!(id_for_path("../shared/plugin", cwd), "../shared/plugin");
    }

    #[test]
    fn keys_keep_dotted_namespaces() {
        assert_eq!(key_for_id("kiln-plugin-foo.bar-baz"), "foo.barBaz");
    }

    #[test]
    fn resolving_unknown_module_fails() {
        let loader = ModuleRegistry::new();
        let err = path_to_descriptor(PluginKind::Plugin, "./missing", Path::new("/app"), &loader)
            .unwrap_err();
        assert!(matches!(err, ServiceError::ModuleNotFound { .. }));
    }

    #[test]
    fn resolving_known_module_derives_identity() {
        let loader = ModuleRegistry::new().with(
            "/app/plugins/dark-mode.ts",
            apply_sync(|_| Ok(ApplyOutput::default())),
        );
        let descriptor = path_to_descriptor(
            PluginKind::Preset,
            "/app/plugins/dark-mode.ts",
            Path::new("/app"),
            &loader,
        )
        .unwrap();
        assert_eq!(descriptor.id(), "./plugins/dark-mode");
        assert_eq!(descriptor.key(), "darkMode");
        assert_eq!(descriptor.path(), "/app/plugins/dark-mode.ts");
        assert!(descriptor.is_preset());
    }
}
