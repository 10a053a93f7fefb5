//! The command executor: one scoped connection per call, rows mapped into
//! typed results, output parameters folded into an [`Outcome`].

use crate::config::ExecutorConfig;
use crate::cursor::{Cursor, Row};
use crate::driver::{BoundCommand, CommandKind, Driver};
use crate::error::{Error, Result};
use crate::mapping::{self, FromRow};
use crate::outcome::{self, Outcome, OutcomeList};
use crate::params::Params;
use crate::reader::MultiReader;
use crate::sqlite::SqliteDriver;
use crate::value::{FromValue, Value};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Command text plus how to run it
///
/// Kind and timeout left unset fall back to the executor's configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    pub statement: String,
    pub kind: Option<CommandKind>,
    pub timeout: Option<Duration>,
}

impl SqlCommand {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            kind: None,
            timeout: None,
        }
    }

    /// Call the named stored procedure
    pub fn procedure(name: impl Into<String>) -> Self {
        Self::new(name).with_kind(CommandKind::StoredProcedure)
    }

    /// Run literal statement text
    pub fn text(statement: impl Into<String>) -> Self {
        Self::new(statement).with_kind(CommandKind::Text)
    }

    pub fn with_kind(mut self, kind: CommandKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<&str> for SqlCommand {
    fn from(statement: &str) -> Self {
        SqlCommand::new(statement)
    }
}

impl From<String> for SqlCommand {
    fn from(statement: String) -> Self {
        SqlCommand::new(statement)
    }
}

/// Executes commands against one connection string
///
/// Cloning is cheap and every call opens its own connection, so an executor
/// can be shared freely between tasks. Parameter sets are not shared: give
/// every call its own (see [`ParamsTemplate`](crate::ParamsTemplate)).
#[derive(Clone)]
pub struct Executor {
    config: Arc<ExecutorConfig>,
    driver: Arc<dyn Driver>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(config: ExecutorConfig, driver: impl Driver + 'static) -> Self {
        Self {
            config: Arc::new(config),
            driver: Arc::new(driver),
        }
    }

    /// Executor backed by a [`SqliteDriver`] without registered procedures
    pub fn sqlite(config: ExecutorConfig) -> Self {
        Self::new(config, SqliteDriver::new())
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a command for its side effects and output parameters
    pub async fn execute(
        &self,
        command: impl Into<SqlCommand>,
        params: Option<&mut Params>,
    ) -> Result<Outcome> {
        self.run(command.into(), params, |cursor| async move {
            Ok((None::<()>, cursor))
        })
        .await
    }

    /// Stream the rows of the first result set through `callback` as they arrive
    pub async fn execute_rows<F>(
        &self,
        command: impl Into<SqlCommand>,
        params: Option<&mut Params>,
        mut callback: F,
    ) -> Result<Outcome>
    where
        F: FnMut(&Row) -> Result<()> + Send,
    {
        self.run(command.into(), params, |mut cursor| async move {
            if cursor.next_result().await? {
                while let Some(row) = cursor.next_row().await? {
                    callback(&row)?;
                }
            }
            Ok::<_, Error>((None::<()>, cursor))
        })
        .await
    }

    /// Map every row of the first result set into `T`
    pub async fn execute_typed<T: FromRow>(
        &self,
        command: impl Into<SqlCommand>,
        params: Option<&mut Params>,
    ) -> Result<OutcomeList<T>> {
        self.run(command.into(), params, |mut cursor| async move {
            let rows = if cursor.next_result().await? {
                mapping::map_rows::<T>(cursor.as_mut()).await?
            } else {
                Vec::new()
            };
            Ok::<_, Error>((Some(rows), cursor))
        })
        .await
    }

    /// Envelope plus the first mapped row, if any
    pub async fn execute_object<T: FromRow>(
        &self,
        command: impl Into<SqlCommand>,
        params: Option<&mut Params>,
    ) -> Result<Outcome<T>> {
        self.run(command.into(), params, |mut cursor| async move {
            let first = if cursor.next_result().await? {
                mapping::map_first::<T>(cursor.as_mut()).await?
            } else {
                None
            };
            Ok::<_, Error>((first, cursor))
        })
        .await
    }

    /// First column of the first row, converted to `T`
    ///
    /// A command that produces no row yields `Value::Null`, which only
    /// converts into `Option` or `Value` targets.
    pub async fn execute_scalar<T: FromValue + Send>(
        &self,
        command: impl Into<SqlCommand>,
        params: Option<&mut Params>,
    ) -> Result<Outcome<T>> {
        let command = command.into();
        let name = command.statement.clone();
        self.run(command, params, |mut cursor| async move {
            let mut scalar = Value::Null;
            if cursor.next_result().await? {
                if let Some(row) = cursor.next_row().await? {
                    scalar = row.into_values().into_iter().next().unwrap_or_default();
                }
            }
            let scalar = T::from_value(scalar).map_err(|e| Error::conversion(name, e))?;
            Ok::<_, Error>((Some(scalar), cursor))
        })
        .await
    }

    /// Hand every result set to `continuation` through a [`MultiReader`];
    /// its return value becomes the payload.
    ///
    /// ```ignore
    /// let outcome = executor
    ///     .execute_multi(SqlCommand::text("SELECT 1; SELECT 2 UNION ALL SELECT 3"), None, |reader| {
    ///         Box::pin(async move {
    ///             let first = reader.read_one::<i64>().await?;
    ///             let rest = reader.read_many::<i64>().await?;
    ///             Ok::<_, rust_sqlcommand::Error>((first, rest))
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn execute_multi<T, F>(
        &self,
        command: impl Into<SqlCommand>,
        params: Option<&mut Params>,
        continuation: F,
    ) -> Result<Outcome<T>>
    where
        T: Send,
        F: for<'r> FnOnce(&'r mut MultiReader) -> BoxFuture<'r, Result<T>> + Send,
    {
        self.run(command.into(), params, |cursor| async move {
            let mut reader = MultiReader::open(cursor).await?;
            let data = continuation(&mut reader).await?;
            Ok::<_, Error>((Some(data), reader.into_cursor()))
        })
        .await
    }

    /// Map every row and keep the first; no envelope
    pub async fn execute_single<T: FromRow>(
        &self,
        command: impl Into<SqlCommand>,
        params: Option<&mut Params>,
    ) -> Result<Option<T>> {
        let outcome = self.execute_typed::<T>(command, params).await?;
        Ok(outcome.data.and_then(|rows| rows.into_iter().next()))
    }

    /// open, bind, execute, consume, drain, release; then copy outputs back
    /// and extract the envelope. The timeout covers everything up to release.
    async fn run<T, F, Fut>(
        &self,
        command: SqlCommand,
        params: Option<&mut Params>,
        consume: F,
    ) -> Result<Outcome<T>>
    where
        F: FnOnce(Box<dyn Cursor>) -> Fut,
        Fut: Future<Output = Result<(Option<T>, Box<dyn Cursor>)>>,
    {
        let kind = command.kind.unwrap_or(self.config.default_kind);
        let timeout = command
            .timeout
            .unwrap_or_else(|| self.config.command_timeout());
        let bound = BoundCommand {
            statement: command.statement,
            kind,
            parameters: params.as_deref().map(Params::to_vec).unwrap_or_default(),
        };
        let app = self.config.application.name.as_str();
        debug!(app, statement = %bound.statement, ?kind, ?timeout, "executing command");

        let started = Instant::now();
        let statement = bound.statement.clone();
        let mut released = None;
        let work = async {
            let cursor = self
                .driver
                .execute(&self.config.connection_string, bound)
                .await?;
            released = Some(cursor.released());
            let (data, mut cursor) = consume(cursor).await?;
            let completion = cursor.finish().await?;
            Ok::<_, Error>((data, completion))
        };
        let result = tokio::time::timeout(timeout, work).await;
        // the cursor is gone by now on every path; wait for its connection
        if let Some(released) = released {
            released.await;
        }

        let (data, completion) = match result {
            Ok(result) => result?,
            Err(_) => {
                warn!(app, %statement, ?timeout, "command timed out");
                return Err(Error::TimeoutExceeded(timeout));
            }
        };
        debug!(
            app,
            %statement,
            elapsed_ms = started.elapsed().as_millis() as u64,
            rows_affected = completion.rows_affected,
            "command finished"
        );

        let outcome = match params {
            Some(params) => {
                params.apply_outputs(completion.outputs);
                outcome::extract(params)?
            }
            None => Outcome::default(),
        };
        Ok(outcome.replace_data(data))
    }
}
