//! The monotonic lifecycle stage of a [`Service`](crate::service::Service).
//!
//! The service progresses through these stages linearly:
//!
//! `Uninitialized` → `Init` → `InitPresets` → `InitPlugins` → `InitHooks` →
//! `PluginReady` → `GetConfig` → `GetPaths` → `Run`
//!
//! A stage never regresses. Several facade operations assert a stage (or a
//! minimum stage) before they proceed.

use core::fmt;

/// Lifecycle stage of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ServiceStage {
    /// The service was constructed but `init()` has not started.
    #[default]
    Uninitialized,
    /// `init()` has started.
    Init,
    /// Presets are being expanded.
    InitPresets,
    /// Plugins are being expanded.
    InitPlugins,
    /// Staged hooks are being compiled into the hook table.
    InitHooks,
    /// Every plugin is registered and `onPluginReady` is firing.
    PluginReady,
    /// The final configuration is being computed.
    GetConfig,
    /// Derived paths are being recomputed.
    GetPaths,
    /// A command is running.
    Run,
}

impl ServiceStage {
    /// Returns the stage's position in the lifecycle, starting at 0.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Returns the stage's name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Init => "init",
            Self::InitPresets => "initPresets",
            Self::InitPlugins => "initPlugins",
            Self::InitHooks => "initHooks",
            Self::PluginReady => "pluginReady",
            Self::GetConfig => "getConfig",
            Self::GetPaths => "getPaths",
            Self::Run => "run",
        }
    }
}

impl fmt::Display for ServiceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(ServiceStage::Uninitialized < ServiceStage::Init);
        assert!(ServiceStage::InitPlugins < ServiceStage::InitHooks);
        assert!(ServiceStage::GetPaths < ServiceStage::Run);
        assert_eq!(ServiceStage::Run.ordinal(), 8);
    }

    #[test]
    fn display_uses_camel_case_names() {
        assert_eq!(ServiceStage::PluginReady.to_string(), "pluginReady");
    }
}
