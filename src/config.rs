//! Executor configuration.

use crate::driver::CommandKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout applied to commands that do not set their own
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Identity of the application issuing commands, attached to log events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub name: String,
    pub version: String,
}

impl ApplicationInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for ApplicationInfo {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }
}

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Passed to the driver untouched
    pub connection_string: String,
    #[serde(default = "default_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub default_kind: CommandKind,
    #[serde(default)]
    pub application: ApplicationInfo,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

impl ExecutorConfig {
    /// Create a config with default timeout, kind and application identity
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            default_kind: CommandKind::default(),
            application: ApplicationInfo::default(),
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }

    pub fn with_default_kind(mut self, kind: CommandKind) -> Self {
        self.default_kind = kind;
        self
    }

    pub fn with_application(mut self, application: ApplicationInfo) -> Self {
        self.application = application;
        self
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
