//! Parameterized SQL command execution and result mapping for the Runar ecosystem.
//!
//! # Intention
//!
//! - Run a named procedure or literal SQL with a declared parameter set,
//!   one scoped connection per call.
//! - Map rows into typed values by column name, and read several result sets
//!   from a single execution in order.
//! - Fold conventional output parameters (success flag, message, code) into
//!   an [`Outcome`] envelope; every other output lands in its [`Bag`].
//!
//! # Architectural Boundaries
//!
//! - The executor only talks to a [`Driver`]; [`SqliteDriver`] is the one
//!   shipped here.
//! - No pooling, transactions or query building. Callers own their SQL.
//!
//! ```ignore
//! use rust_sqlcommand::{entity, DataType, Executor, ExecutorConfig, Params, SqlCommand};
//!
//! #[derive(Default)]
//! struct Article { id: i64, description: String }
//! entity!(Article { id => "CodArticulo", description => "Descripcion" });
//!
//! let executor = Executor::sqlite(ExecutorConfig::new("ventas.db"));
//! let mut params = Params::new().with_input("pMin", DataType::Integer, 10);
//! let articles = executor
//!     .execute_typed::<Article>(
//!         SqlCommand::text("SELECT CodArticulo, Descripcion FROM articulos WHERE stock > :pMin"),
//!         Some(&mut params),
//!     )
//!     .await?;
//! ```

pub mod config;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod executor;
pub mod mapping;
pub mod outcome;
pub mod params;
pub mod reader;
pub mod sqlite;
pub mod value;

pub use config::{ApplicationInfo, ExecutorConfig};
pub use cursor::{Completion, Cursor, Row, RowIndex};
pub use driver::{BoundCommand, CommandKind, Driver};
pub use error::{Error, Result};
pub use executor::{Executor, SqlCommand};
pub use mapping::{Descriptor, Entity, FromRow};
pub use outcome::{Bag, Outcome, OutcomeList};
pub use params::{DataType, Direction, Parameter, Params, ParamsTemplate};
pub use reader::MultiReader;
pub use sqlite::{OpenMode, ProcedureContext, SqliteConnectionString, SqliteDriver};
pub use value::{ConversionError, FromValue, Value};
