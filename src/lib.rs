//! An extensible build-tool core: presets, plugins, hooks and commands
//! orchestrated through a staged lifecycle.

pub use kiln_internal::*;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use kiln_internal::prelude::*;
}
