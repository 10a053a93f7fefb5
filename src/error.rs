//! Error types for command execution and result mapping.
//!
//! Every failure surfaces to the immediate caller; nothing here is retried or
//! recovered silently.

use crate::value::ConversionError;
use std::time::Duration;
use thiserror::Error;

/// Boxed source error carried by [`Error::ConnectionFailure`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while executing commands and mapping their results
#[derive(Debug, Error)]
pub enum Error {
    /// The connection could not be opened or the command could not run
    #[error("connection failure: {0}")]
    ConnectionFailure(#[source] BoxError),

    /// A stored procedure with this name is not known to the driver
    #[error("procedure not found: {0}")]
    UnknownProcedure(String),

    /// A row could not be bound to the target type
    #[error("failed to map column '{column}' into {type_name}: {source}")]
    MappingFailure {
        /// Column being assigned when the failure happened
        column: String,
        /// Target type name
        type_name: &'static str,
        /// Underlying conversion failure
        #[source]
        source: ConversionError,
    },

    /// No parameter with this exact name exists in the parameter set
    #[error("parameter not found: {0}")]
    ParameterNotFound(String),

    /// A named value could not be converted to the requested type
    #[error("cannot convert '{name}': {source}")]
    ConversionFailure {
        /// Parameter, column or command the value came from
        name: String,
        /// Underlying conversion failure
        #[source]
        source: ConversionError,
    },

    /// No column with this name exists in the row
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// The multi-result reader has no result set left to read
    #[error("no more result sets to read")]
    NoMoreResultSets,

    /// The command did not finish within its timeout
    #[error("command exceeded its timeout of {0:?}")]
    TimeoutExceeded(Duration),

    /// Two output parameters surface under the same bag alias
    #[error("duplicate bag key: {0}")]
    DuplicateBagKey(String),

    /// Error raised by a caller-supplied callback or continuation
    #[error(transparent)]
    Callback(#[from] anyhow::Error),
}

impl Error {
    /// Wrap anything error-like (including plain strings) as a connection failure.
    pub fn connection(source: impl Into<BoxError>) -> Self {
        Error::ConnectionFailure(source.into())
    }

    pub(crate) fn conversion(name: impl Into<String>, source: ConversionError) -> Self {
        Error::ConversionFailure {
            name: name.into(),
            source,
        }
    }
}
