//! The seam between the executor and a concrete database client.

use crate::cursor::Cursor;
use crate::error::Result;
use crate::params::Parameter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How the command text is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommandKind {
    /// The text names a stored procedure
    #[default]
    StoredProcedure,
    /// The text is one or more literal statements
    Text,
}

/// A command ready to run: text, kind and a snapshot of its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct BoundCommand {
    pub statement: String,
    pub kind: CommandKind,
    pub parameters: Vec<Parameter>,
}

/// Database client used by the executor
///
/// Each call opens its own connection, starts the command and returns a
/// cursor that owns that connection until it is dropped.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn execute(
        &self,
        connection_string: &str,
        command: BoundCommand,
    ) -> Result<Box<dyn Cursor>>;
}
