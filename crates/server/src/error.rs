//! Errors of the server binary.

use ironvault_iam::{IamError, Scope};
use snafu::Snafu;

/// Result type alias for server operations.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;

/// Startup and runtime failures of a node.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServerError {
    /// The configuration file could not be read.
    #[snafu(display("reading {path}: {source}"))]
    ReadConfig {
        /// File path.
        path: String,
        /// Underlying io error.
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`Config`](crate::config::Config).
    #[snafu(display("parsing {path}: {source}"))]
    ParseConfig {
        /// File path.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A schema or example could not be rendered.
    #[snafu(display("rendering configuration: {message}"))]
    Render {
        /// Failure description.
        message: String,
    },

    /// Bootstrap of the backend failed.
    #[snafu(display("bootstrap: {source}"))]
    Bootstrap {
        /// Underlying error.
        source: IamError,
    },

    /// A consumer stopped with an error.
    #[snafu(display("{scope} consumer: {source}"))]
    Consumer {
        /// Scope of the consumer.
        scope: Scope,
        /// Underlying error.
        source: IamError,
    },

    /// Consumers reported an error while shutting down.
    #[snafu(display("shutdown: {source}"))]
    Shutdown {
        /// First consumer error.
        source: IamError,
    },
}
