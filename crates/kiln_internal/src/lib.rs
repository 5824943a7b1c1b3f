//! # Kiln Internal Library
//!
//! Re-exports the core Kiln crates for convenience.

/// Layer 1: presets, plugins, hooks and the lifecycle orchestrator.
pub use kiln_service;

/// Layer 2: the built-in preset, commands and tracing.
pub use kiln_core_plugins;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use kiln_core_plugins::prelude::*;
    pub use kiln_service::prelude::*;
}
