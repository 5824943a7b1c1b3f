//! Ordering and composition of hooks for one dispatch call.

use core::fmt;
use core::str::FromStr;

use serde_json::Value;
use tracing::debug;

use super::{HookInput, HookRecord};
use crate::error::ServiceError;

// ─────────────────────────────────────────────────────────────────────────────
// ApplyKind
// ─────────────────────────────────────────────────────────────────────────────

/// How the results of the hooks on one key are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyKind {
    /// Concatenate the items every hook returns onto an initial array.
    Add,
    /// Fold: each hook receives the previous hook's output.
    Modify,
    /// Run every hook for its side effects; results are discarded.
    Event,
}

impl ApplyKind {
    /// Returns `"add"`, `"modify"` or `"event"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for ApplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplyKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Self::Add),
            "modify" => Ok(Self::Modify),
            "event" => Ok(Self::Event),
            other => Err(ServiceError::UnknownApplyKind(other.to_string())),
        }
    }
}

/// Shape of the value a dispatch is seeded with.
///
/// Together with the [`ApplyKind`] it is fixed by the first dispatch of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeedShape {
    /// No seed, `null`, or a seed the kind ignores.
    Empty,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
    /// A string, number or boolean.
    Scalar,
}

impl SeedShape {
    /// Returns the shape of `value`.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Empty,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
            Value::Bool(_) | Value::Number(_) | Value::String(_) => Self::Scalar,
        }
    }
}

impl fmt::Display for SeedShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "an empty",
            Self::Array => "an array",
            Self::Object => "an object",
            Self::Scalar => "a scalar",
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ApplyPlugins
// ─────────────────────────────────────────────────────────────────────────────

/// A dispatch request: which key, how to compose, and what to seed it with.
///
/// # Example
///
/// ```
/// use kiln_service::hook::{ApplyKind, ApplyPlugins};
/// use serde_json::json;
///
/// let request = ApplyPlugins::add("addRuntimePluginKey")
///     .initial_value(json!(["patchRoutes"]))
///     .args(json!({ "env": "development" }));
///
/// assert_eq!(request.kind(), ApplyKind::Add);
/// assert_eq!(request.key(), "addRuntimePluginKey");
/// ```
#[derive(Debug, Clone)]
pub struct ApplyPlugins {
    key: String,
    kind: ApplyKind,
    initial_value: Option<Value>,
    args: Value,
}

impl ApplyPlugins {
    /// Creates a request for `key` composed with `kind`.
    #[must_use]
    pub fn new(key: impl Into<String>, kind: ApplyKind) -> Self {
        Self {
            key: key.into(),
            kind,
            initial_value: None,
            args: Value::Null,
        }
    }

    /// Creates an [`Add`](ApplyKind::Add) request.
    #[must_use]
    pub fn add(key: impl Into<String>) -> Self {
        Self::new(key, ApplyKind::Add)
    }

    /// Creates a [`Modify`](ApplyKind::Modify) request.
    #[must_use]
    pub fn modify(key: impl Into<String>) -> Self {
        Self::new(key, ApplyKind::Modify)
    }

    /// Creates an [`Event`](ApplyKind::Event) request.
    #[must_use]
    pub fn event(key: impl Into<String>) -> Self {
        Self::new(key, ApplyKind::Event)
    }

    /// Sets the seed value. `Add` requires an array and defaults to `[]`.
    #[must_use]
    pub fn initial_value(mut self, value: Value) -> Self {
        self.initial_value = Some(value);
        self
    }

    /// Sets the arguments passed to every hook.
    #[must_use]
    pub fn args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the composition kind.
    #[must_use]
    pub fn kind(&self) -> ApplyKind {
        self.kind
    }

    /// Returns the seed shape after defaults. `Event` ignores its seed.
    #[must_use]
    pub fn seed_shape(&self) -> SeedShape {
        match (self.kind, &self.initial_value) {
            (ApplyKind::Event, _) => SeedShape::Empty,
            (ApplyKind::Add, None) => SeedShape::Array,
            (_, Some(value)) => SeedShape::of(value),
            (_, None) => SeedShape::Empty,
        }
    }

    /// Checks the seed against the kind and returns the starting memo.
    fn seed(&self) -> Result<Value, ServiceError> {
        match (self.kind, &self.initial_value) {
            (ApplyKind::Add, None) => Ok(Value::Array(Vec::new())),
            (ApplyKind::Add, Some(value)) if !value.is_array() => {
                Err(ServiceError::InitialValueNotArray(self.key.clone()))
            }
            (ApplyKind::Event, _) => Ok(Value::Null),
            (_, value) => Ok(value.clone().unwrap_or(Value::Null)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ordering
// ─────────────────────────────────────────────────────────────────────────────

/// Orders hooks by stage, then `before`, then registration order.
///
/// Hooks are inserted one at a time. Each new hook walks back from the tail
/// and never passes a hook with a lower stage. Within that bound it moves past
/// any hook with a greater stage, and past its `before` target's last hook and
/// everything after it. A `before` naming an owner that has no hook in the
/// list carries the hook to the front of its stage.
pub(crate) fn order_hooks(hooks: Vec<HookRecord>) -> Vec<HookRecord> {
    let mut ordered: Vec<HookRecord> = Vec::with_capacity(hooks.len());
    for hook in hooks {
        let mut before = hook.before.as_deref();
        let mut position = ordered.len();
        while position > 0 {
            let previous = &ordered[position - 1];
            if previous.stage < hook.stage {
                break;
            }
            if let Some(target) = before {
                if previous.owner == target {
                    before = None;
                }
                position -= 1;
                continue;
            }
            if previous.stage > hook.stage {
                position -= 1;
                continue;
            }
            break;
        }
        ordered.insert(position, hook);
    }
    ordered
}

// ─────────────────────────────────────────────────────────────────────────────
// Composition
// ─────────────────────────────────────────────────────────────────────────────

/// Runs `hooks`, already filtered and ordered, one after another.
pub(crate) async fn compose(
    request: &ApplyPlugins,
    hooks: Vec<HookRecord>,
) -> Result<Value, ServiceError> {
    let mut memo = request.seed()?;
    debug!(
        key = %request.key,
        kind = %request.kind,
        hooks = hooks.len(),
        "applying plugins"
    );

    for hook in &hooks {
        match request.kind {
            ApplyKind::Add => {
                let items = hook
                    .invoke(HookInput {
                        memo: memo.clone(),
                        args: request.args.clone(),
                    })
                    .await?;
                concat(&mut memo, items);
            }
            ApplyKind::Modify => {
                memo = hook
                    .invoke(HookInput {
                        memo,
                        args: request.args.clone(),
                    })
                    .await?;
            }
            ApplyKind::Event => {
                hook.invoke(HookInput {
                    memo: Value::Null,
                    args: request.args.clone(),
                })
                .await?;
            }
        }
    }

    Ok(memo)
}

/// Appends `items` to the `memo` array.
fn concat(memo: &mut Value, items: Value) {
    let Value::Array(accumulated) = memo else {
        return;
    };
    match items {
        Value::Array(items) => accumulated.extend(items),
        Value::Null => {}
        item => accumulated.push(item),
    }
}
