//! SQLite implementation of [`Driver`].
//!
//! Every command opens its own connection on a blocking worker thread.
//! Result sets stream back to the async side over a bounded channel, so a
//! slow consumer holds the worker back instead of buffering whole results.
//!
//! SQLite has no server-side procedures; they are registered on the driver
//! as Rust functions that run against the open connection and may emit
//! result sets and set output parameters through a [`ProcedureContext`].

use crate::cursor::{Columns, Completion, Cursor, Row};
use crate::driver::{BoundCommand, CommandKind, Driver};
use crate::error::{Error, Result};
use crate::params::Parameter;
use crate::value::{FromValue, Value, TIMESTAMP_FORMAT};
use async_trait::async_trait;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Batch, Connection, InterruptHandle, OpenFlags, Statement};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

/// Rows buffered between the worker and the cursor
const EVENT_BUFFER: usize = 64;

const MEMORY_SOURCE: &str = ":memory:";

// ---------------------------------------------------------------------------
// Connection strings
// ---------------------------------------------------------------------------

/// How the database file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    #[default]
    ReadWriteCreate,
    ReadWrite,
    ReadOnly,
    /// Private in-memory database, discarded with the connection
    Memory,
}

impl OpenMode {
    fn flags(self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            OpenMode::ReadWriteCreate | OpenMode::Memory => {
                base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
            OpenMode::ReadWrite => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpenMode::ReadWriteCreate => "ReadWriteCreate",
            OpenMode::ReadWrite => "ReadWrite",
            OpenMode::ReadOnly => "ReadOnly",
            OpenMode::Memory => "Memory",
        };
        f.write_str(name)
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalize_key(s).as_str() {
            "readwritecreate" | "rwc" => Ok(OpenMode::ReadWriteCreate),
            "readwrite" | "rw" => Ok(OpenMode::ReadWrite),
            "readonly" | "ro" => Ok(OpenMode::ReadOnly),
            "memory" => Ok(OpenMode::Memory),
            _ => Err(Error::connection(format!("unknown open mode '{s}'"))),
        }
    }
}

/// Parsed SQLite connection string
///
/// Accepts a bare path (`ventas.db`, `:memory:`) or `key=value` pairs
/// separated by `;`. Keys ignore case and spaces:
///
/// | key                                  | value                                  |
/// |--------------------------------------|----------------------------------------|
/// | `Data Source`, `DataSource`, `Filename` | database path or `:memory:`         |
/// | `Mode`                               | `ReadWriteCreate`, `ReadWrite`, `ReadOnly`, `Memory` |
/// | `Busy Timeout`                       | milliseconds to wait on a locked database |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConnectionString {
    pub source: String,
    pub mode: OpenMode,
    pub busy_timeout: Option<Duration>,
}

impl SqliteConnectionString {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let mode = if source == MEMORY_SOURCE {
            OpenMode::Memory
        } else {
            OpenMode::default()
        };
        Self {
            source,
            mode,
            busy_timeout: None,
        }
    }

    pub fn with_mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    /// Open a connection as described
    pub fn open(&self) -> Result<Connection> {
        let conn = match self.mode {
            OpenMode::Memory => Connection::open_in_memory()?,
            mode => Connection::open_with_flags(&self.source, mode.flags())?,
        };
        if let Some(timeout) = self.busy_timeout {
            conn.busy_timeout(timeout)?;
        }
        Ok(conn)
    }
}

impl FromStr for SqliteConnectionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::connection("empty connection string"));
        }
        if !s.contains('=') {
            return Ok(SqliteConnectionString::new(s));
        }

        let mut source = String::new();
        let mut mode = None;
        let mut busy_timeout = None;
        for pair in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::connection(format!("malformed connection string entry '{pair}'")))?;
            let value = value.trim();
            match normalize_key(key).as_str() {
                "datasource" | "filename" => source = value.to_string(),
                "mode" => mode = Some(value.parse::<OpenMode>()?),
                "busytimeout" => {
                    let millis = value.parse::<u64>().map_err(|_| {
                        Error::connection(format!("invalid busy timeout '{value}'"))
                    })?;
                    busy_timeout = Some(Duration::from_millis(millis));
                }
                _ => {
                    return Err(Error::connection(format!(
                        "unknown connection string key '{}'",
                        key.trim()
                    )))
                }
            }
        }

        let mode = match mode {
            Some(mode) => mode,
            None if source == MEMORY_SOURCE => OpenMode::Memory,
            None => OpenMode::default(),
        };
        if source.is_empty() {
            if mode != OpenMode::Memory {
                return Err(Error::connection("connection string has no data source"));
            }
            source = MEMORY_SOURCE.to_string();
        }
        Ok(Self {
            source,
            mode,
            busy_timeout,
        })
    }
}

impl fmt::Display for SqliteConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data Source={};Mode={}", self.source, self.mode)?;
        if let Some(timeout) = self.busy_timeout {
            write!(f, ";Busy Timeout={}", timeout.as_millis())?;
        }
        Ok(())
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

// ---------------------------------------------------------------------------
// Value conversions
// ---------------------------------------------------------------------------

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            Value::Boolean(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
            Value::Timestamp(v) => {
                ToSqlOutput::Owned(SqlValue::Text(v.format(TIMESTAMP_FORMAT).to_string()))
            }
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            // text that is not valid UTF-8 comes back untouched as a blob
            ValueRef::Text(v) => match std::str::from_utf8(v) {
                Ok(text) => Value::Text(text.to_owned()),
                Err(_) => Value::Blob(v.to_vec()),
            },
            ValueRef::Blob(v) => Value::Blob(v.to_vec()),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::ConnectionFailure(Box::new(err))
    }
}

// ---------------------------------------------------------------------------
// Procedures
// ---------------------------------------------------------------------------

/// A registered procedure body
pub type Procedure = Arc<dyn Fn(&mut ProcedureContext<'_>) -> Result<()> + Send + Sync>;

/// What a procedure body sees while it runs
///
/// Parameter lookups ignore a leading `@`, `:` or `$` and ASCII case, the
/// same way placeholders are bound.
pub struct ProcedureContext<'a> {
    conn: &'a Connection,
    sink: &'a EventSink,
    parameters: &'a mut Vec<Parameter>,
    rows_affected: u64,
}

impl<'a> ProcedureContext<'a> {
    pub fn connection(&self) -> &Connection {
        self.conn
    }

    /// Current value of an input (or input/output) parameter
    pub fn input<T: FromValue>(&self, name: &str) -> Result<T> {
        let parameter = self
            .parameters
            .iter()
            .find(|p| p.direction.is_input() && p.answers_to(name))
            .ok_or_else(|| Error::ParameterNotFound(name.to_string()))?;
        T::from_value(parameter.value.clone()).map_err(|e| Error::conversion(&parameter.name, e))
    }

    /// Set the value reported back for an output parameter
    pub fn set_output(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let parameter = self
            .parameters
            .iter_mut()
            .find(|p| p.direction.is_output() && p.answers_to(name))
            .ok_or_else(|| Error::ParameterNotFound(name.to_string()))?;
        parameter.value = value.into();
        Ok(())
    }

    /// Run statements with the procedure's parameters bound. Queries become
    /// result sets of the procedure; returns the rows changed by this call.
    pub fn run(&mut self, sql: &str) -> Result<u64> {
        let changed = run_batch(self.conn, sql, self.parameters.as_slice(), self.sink)?;
        self.rows_affected += changed;
        Ok(changed)
    }

    /// First column of the first row of a query, kept private to the procedure
    pub fn query_value<T: FromValue>(&self, sql: &str) -> Result<Option<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        Binder::new(self.parameters.as_slice()).bind(&mut stmt)?;
        let mut rows = stmt.raw_query();
        match rows.next()? {
            Some(row) => {
                let value = Value::from(row.get_ref(0)?);
                T::from_value(value)
                    .map(Some)
                    .map_err(|e| Error::conversion(sql, e))
            }
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// SQLite driver with an optional registry of procedures
///
/// ```ignore
/// let driver = SqliteDriver::new().with_procedure("ProcExistencias", |ctx| {
///     let id: i64 = ctx.input("pId")?;
///     let stock = ctx.query_value::<i64>("SELECT stock FROM articulos WHERE id = :pId")?;
///     ctx.set_output("pResultado", stock.unwrap_or(0) > 0)?;
///     ctx.run("SELECT * FROM articulos WHERE id = :pId")?;
///     Ok(())
/// });
/// ```
#[derive(Clone, Default)]
pub struct SqliteDriver {
    procedures: Arc<HashMap<String, Procedure>>,
}

impl fmt::Debug for SqliteDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.procedures.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("SqliteDriver")
            .field("procedures", &names)
            .finish()
    }
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure; names are matched ignoring case
    pub fn with_procedure<F>(mut self, name: &str, procedure: F) -> Self
    where
        F: Fn(&mut ProcedureContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.procedures).insert(procedure_key(name), Arc::new(procedure));
        self
    }

    pub fn has_procedure(&self, name: &str) -> bool {
        self.procedures.contains_key(&procedure_key(name))
    }

    fn procedure(&self, name: &str) -> Result<Procedure> {
        self.procedures
            .get(&procedure_key(name))
            .cloned()
            .ok_or_else(|| Error::UnknownProcedure(name.to_string()))
    }
}

fn procedure_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn execute(
        &self,
        connection_string: &str,
        command: BoundCommand,
    ) -> Result<Box<dyn Cursor>> {
        let target: SqliteConnectionString = connection_string.parse()?;
        let procedure = match command.kind {
            CommandKind::StoredProcedure => Some(self.procedure(&command.statement)?),
            CommandKind::Text => None,
        };

        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let (released_tx, released) = watch::channel(());
        debug!(source = %target.source, mode = %target.mode, "opening sqlite connection");
        tokio::task::spawn_blocking(move || {
            run_command(target, procedure, command, EventSink { tx }, released_tx)
        });

        match rx.recv().await {
            Some(Event::Opened(interrupt)) => {
                Ok(Box::new(SqliteCursor::new(rx, interrupt, released)))
            }
            Some(Event::Failed(err)) => Err(err),
            _ => Err(Error::connection(
                "sqlite worker stopped before the connection was opened",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

enum Event {
    Opened(InterruptHandle),
    ResultSet(Columns),
    Row(Vec<Value>),
    Completed(Completion),
    Failed(Error),
}

struct EventSink {
    tx: mpsc::Sender<Event>,
}

impl EventSink {
    fn send(&self, event: Event) -> Result<()> {
        self.tx.blocking_send(event).map_err(|_| cancelled())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.tx.is_closed() {
            Err(cancelled())
        } else {
            Ok(())
        }
    }
}

fn cancelled() -> Error {
    Error::connection("command cancelled by the caller")
}

/// Runs one command on its own connection.
///
/// `_released` is dropped only after `conn`, which is what
/// [`SqliteCursor::released`] waits on.
fn run_command(
    target: SqliteConnectionString,
    procedure: Option<Procedure>,
    command: BoundCommand,
    sink: EventSink,
    _released: watch::Sender<()>,
) {
    let conn = match target.open() {
        Ok(conn) => conn,
        Err(err) => {
            let _ = sink.send(Event::Failed(err));
            return;
        }
    };
    if sink.send(Event::Opened(conn.get_interrupt_handle())).is_err() {
        return;
    }

    let result = match procedure {
        Some(procedure) => {
            debug!(procedure = %command.statement, "running sqlite procedure");
            run_procedure(&conn, &procedure, command.parameters, &sink)
        }
        None => run_batch(&conn, &command.statement, &command.parameters, &sink).map(
            |rows_affected| Completion {
                outputs: Vec::new(),
                rows_affected,
            },
        ),
    };
    let event = match result {
        Ok(completion) => {
            trace!(statement = %command.statement, rows_affected = completion.rows_affected, "sqlite command completed");
            Event::Completed(completion)
        }
        Err(err) => {
            debug!(statement = %command.statement, error = %err, "sqlite command failed");
            Event::Failed(err)
        }
    };
    let _ = sink.send(event);
}

fn run_procedure(
    conn: &Connection,
    procedure: &Procedure,
    mut parameters: Vec<Parameter>,
    sink: &EventSink,
) -> Result<Completion> {
    let mut ctx = ProcedureContext {
        conn,
        sink,
        parameters: &mut parameters,
        rows_affected: 0,
    };
    procedure(&mut ctx)?;
    let rows_affected = ctx.rows_affected;

    let outputs = parameters
        .into_iter()
        .filter(|p| p.direction.is_output())
        .map(|p| (p.name, p.value))
        .collect();
    Ok(Completion {
        outputs,
        rows_affected,
    })
}

/// Run every statement of `sql` in order, streaming the rows of each query.
///
/// Returns the rows changed by the batch. `sqlite3_changes` keeps its value
/// across DDL, so the count comes from `total_changes()` instead.
fn run_batch(
    conn: &Connection,
    sql: &str,
    parameters: &[Parameter],
    sink: &EventSink,
) -> Result<u64> {
    let mut batch = Batch::new(conn, sql);
    let mut binder = Binder::new(parameters);
    let changes_before = total_changes(conn)?;

    while let Some(mut stmt) = batch.next()? {
        sink.ensure_open()?;
        binder.bind(&mut stmt)?;
        if stmt.column_count() == 0 {
            stmt.raw_execute()?;
            continue;
        }

        let columns: Columns = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        sink.send(Event::ResultSet(columns))?;
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(Value::from(row.get_ref(idx)?));
            }
            sink.send(Event::Row(values))?;
        }
    }
    Ok(total_changes(conn)?.saturating_sub(changes_before))
}

/// Rows inserted, updated or deleted since the connection was opened
fn total_changes(conn: &Connection) -> Result<u64> {
    let total: i64 = conn.query_row("SELECT total_changes()", [], |row| row.get(0))?;
    Ok(u64::try_from(total).unwrap_or_default())
}

/// Binds parameters to placeholders
///
/// Named placeholders take the parameter answering to that name. Anonymous
/// `?` take input parameters in declaration order, continuing across the
/// statements of a batch; `?N` takes the N-th input parameter. Placeholders
/// with no matching parameter stay NULL.
struct Binder<'p> {
    parameters: &'p [Parameter],
    inputs: Vec<&'p Parameter>,
    next_anonymous: usize,
}

impl<'p> Binder<'p> {
    fn new(parameters: &'p [Parameter]) -> Self {
        Self {
            parameters,
            inputs: parameters.iter().filter(|p| p.direction.is_input()).collect(),
            next_anonymous: 0,
        }
    }

    fn bind(&mut self, stmt: &mut Statement<'_>) -> Result<()> {
        for index in 1..=stmt.parameter_count() {
            let parameter = match stmt.parameter_name(index) {
                None => {
                    let parameter = self.inputs.get(self.next_anonymous).copied();
                    self.next_anonymous += 1;
                    parameter
                }
                Some(name) => match name.strip_prefix('?') {
                    Some(number) => number
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .and_then(|n| self.inputs.get(n).copied()),
                    None => self.parameters.iter().find(|p| p.answers_to(name)),
                },
            };
            if let Some(parameter) = parameter {
                stmt.raw_bind_parameter(index, &parameter.value)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Not positioned on a result set
    Between,
    InResultSet,
    /// The worker reported completion or failure
    Done,
}

/// Cursor fed by a worker thread; dropping it interrupts an unfinished command.
pub struct SqliteCursor {
    events: mpsc::Receiver<Event>,
    interrupt: InterruptHandle,
    lookahead: Option<Event>,
    columns: Columns,
    state: CursorState,
    completion: Option<Completion>,
    released: watch::Receiver<()>,
}

impl SqliteCursor {
    fn new(
        events: mpsc::Receiver<Event>,
        interrupt: InterruptHandle,
        released: watch::Receiver<()>,
    ) -> Self {
        Self {
            events,
            interrupt,
            released,
            lookahead: None,
            columns: Columns::from(Vec::new()),
            state: CursorState::Between,
            completion: None,
        }
    }

    async fn recv(&mut self) -> Result<Event> {
        if let Some(event) = self.lookahead.take() {
            return Ok(event);
        }
        match self.events.recv().await {
            Some(event) => Ok(event),
            None => {
                self.state = CursorState::Done;
                Err(Error::connection("sqlite worker stopped unexpectedly"))
            }
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        self.state = CursorState::Done;
        err
    }
}

#[async_trait]
impl Cursor for SqliteCursor {
    fn columns(&self) -> &[String] {
        match self.state {
            CursorState::InResultSet => &self.columns[..],
            _ => &[],
        }
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        if self.state != CursorState::InResultSet {
            return Ok(None);
        }
        loop {
            match self.recv().await? {
                Event::Row(values) => return Ok(Some(Row::new(self.columns.clone(), values))),
                Event::Failed(err) => return Err(self.fail(err)),
                Event::Opened(_) => continue,
                event => {
                    self.lookahead = Some(event);
                    self.state = CursorState::Between;
                    return Ok(None);
                }
            }
        }
    }

    async fn next_result(&mut self) -> Result<bool> {
        if self.state == CursorState::Done {
            return Ok(false);
        }
        loop {
            match self.recv().await? {
                Event::ResultSet(columns) => {
                    self.columns = columns;
                    self.state = CursorState::InResultSet;
                    return Ok(true);
                }
                Event::Completed(completion) => {
                    self.completion = Some(completion);
                    self.state = CursorState::Done;
                    return Ok(false);
                }
                Event::Failed(err) => return Err(self.fail(err)),
                Event::Row(_) | Event::Opened(_) => continue,
            }
        }
    }

    async fn finish(&mut self) -> Result<Completion> {
        while self.next_result().await? {}
        Ok(self.completion.clone().unwrap_or_default())
    }

    fn released(&self) -> BoxFuture<'static, ()> {
        let mut released = self.released.clone();
        // the worker never sends; `changed` errors once it drops the sender
        Box::pin(async move { while released.changed().await.is_ok() {} })
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        if self.state != CursorState::Done {
            self.interrupt.interrupt();
        }
    }
}
