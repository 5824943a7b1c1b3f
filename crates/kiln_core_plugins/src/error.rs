//! Errors raised by the built-in plugins.

use std::path::PathBuf;

use kiln_service::stage::ServiceStage;

/// Errors raised by built-in methods, generators and commands.
#[derive(Debug, thiserror::Error)]
pub enum BuiltInError {
    /// `writeTmpFile` was called while plugins were still registering.
    #[error("writeTmpFile() should not execute in register stage (current stage: {0})")]
    TmpFileTooEarly(ServiceStage),

    /// A method received an argument of the wrong shape.
    #[error("{method}() received an invalid argument: {reason}")]
    InvalidArgument {
        /// Name of the method.
        method: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// `writeTmpFile` was given a path that leaves the tmp directory.
    #[error("writeTmpFile() path {0} must be relative and stay inside the tmp directory")]
    TmpPathEscapes(String),

    /// A file-system operation failed.
    #[error("failed to {action} {path}: {source}")]
    Io {
        /// What was being done (`write`, `clean`, ...).
        action: &'static str,
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// `generate` was asked for a generator nobody registered.
    #[error("Generator {0} not found.")]
    UnknownGenerator(String),

    /// A dev-server method was called outside the `development` env.
    #[error("{0}() is only valid in development.")]
    DevelopmentOnly(&'static str),

    /// The port could not be parsed.
    #[error("invalid port {0}")]
    InvalidPort(String),
}
