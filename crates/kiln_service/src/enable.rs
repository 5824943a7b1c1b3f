//! Whether a plugin's hooks take part in a dispatch.
//!
//! The decision is re-evaluated on every dispatch, so a plugin skipped or
//! disabled after registration drops out of every later call.

use serde_json::Value;

use crate::plugin::EnableBy;

/// Decides whether a registered plugin is enabled.
///
/// Checked in order:
///
/// 1. A plugin in the skip set is disabled.
/// 2. A plugin whose key is set to `false` in the user configuration is
///    disabled. Any other value, including `null`, does not disable it.
/// 3. An [`EnableBy::Config`] plugin is disabled when its key is absent.
/// 4. An [`EnableBy::Predicate`] plugin takes the predicate's answer.
/// 5. Otherwise the plugin is enabled.
///
/// ```
/// use kiln_service::enable::is_enabled;
/// use kiln_service::plugin::EnableBy;
/// use serde_json::json;
///
/// assert!(is_enabled(false, None, &EnableBy::Register));
/// assert!(!is_enabled(false, Some(&json!(false)), &EnableBy::Register));
/// assert!(!is_enabled(false, None, &EnableBy::Config));
/// assert!(is_enabled(false, Some(&json!({})), &EnableBy::Config));
/// ```
#[must_use]
pub fn is_enabled(skipped: bool, configured: Option<&Value>, enable_by: &EnableBy) -> bool {
    if skipped {
        return false;
    }
    if matches!(configured, Some(Value::Bool(false))) {
        return false;
    }
    match enable_by {
        EnableBy::Register => true,
        EnableBy::Config => configured.is_some(),
        EnableBy::Predicate(predicate) => predicate(),
    }
}
