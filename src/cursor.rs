//! Forward-only access to the result sets of a running command.

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Column names of one result set, shared by all of its rows.
pub type Columns = Arc<[String]>;

/// What a command reports once it has run to completion
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Completion {
    /// Final values of the output parameters, by parameter name
    pub outputs: Vec<(String, Value)>,
    pub rows_affected: u64,
}

/// Cursor over a running command
///
/// A fresh cursor sits before the first result set; [`next_result`] moves
/// onto it. Dropping a cursor releases the underlying connection, cancelling
/// the command if it has not finished. Closing may finish after the drop;
/// [`released`] tells when it has.
///
/// [`next_result`]: Cursor::next_result
/// [`released`]: Cursor::released
#[async_trait]
pub trait Cursor: Send {
    /// Columns of the current result set (empty when not positioned on one)
    fn columns(&self) -> &[String];

    /// Next row of the current result set, `None` at its end
    async fn next_row(&mut self) -> Result<Option<Row>>;

    /// Skip what is left of the current result set and move to the next one.
    /// Returns `false` once the command has no further result sets.
    async fn next_result(&mut self) -> Result<bool>;

    /// Drain the command and report its completion
    async fn finish(&mut self) -> Result<Completion>;

    /// Resolves once the underlying connection is closed. The future does
    /// not borrow the cursor, so it can be awaited after the cursor is gone.
    fn released(&self) -> BoxFuture<'static, ()> {
        Box::pin(futures::future::ready(()))
    }
}

/// One row of a result set
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Columns,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Columns, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value by position or (case-insensitive) column name
    pub fn value<I: RowIndex>(&self, index: I) -> Result<&Value> {
        let idx = index.index(&self.columns)?;
        self.values
            .get(idx)
            .ok_or_else(|| Error::ColumnNotFound(idx.to_string()))
    }

    /// Typed value by position or (case-insensitive) column name
    pub fn get<T: FromValue, I: RowIndex>(&self, index: I) -> Result<T> {
        let idx = index.index(&self.columns)?;
        let value = self
            .values
            .get(idx)
            .cloned()
            .ok_or_else(|| Error::ColumnNotFound(idx.to_string()))?;
        let name = self.columns.get(idx).map(String::as_str).unwrap_or_default();
        T::from_value(value).map_err(|e| Error::conversion(name, e))
    }

    /// `(column, value)` pairs in column order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Shared column list plus the owned values
    pub(crate) fn into_parts(self) -> (Columns, Vec<Value>) {
        (self.columns, self.values)
    }
}

/// Ways of addressing a column in a [`Row`]
pub trait RowIndex {
    fn index(&self, columns: &[String]) -> Result<usize>;
}

impl RowIndex for usize {
    fn index(&self, columns: &[String]) -> Result<usize> {
        if *self < columns.len() {
            Ok(*self)
        } else {
            Err(Error::ColumnNotFound(self.to_string()))
        }
    }
}

impl RowIndex for &str {
    fn index(&self, columns: &[String]) -> Result<usize> {
        columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(self))
            .or_else(|| {
                let wanted = self.to_lowercase();
                columns.iter().position(|c| c.to_lowercase() == wanted)
            })
            .ok_or_else(|| Error::ColumnNotFound(self.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory cursor over prepared result sets.
    pub(crate) struct StaticCursor {
        pending: VecDeque<(Columns, VecDeque<Vec<Value>>)>,
        current: Option<(Columns, VecDeque<Vec<Value>>)>,
        outputs: Vec<(String, Value)>,
    }

    impl StaticCursor {
        pub(crate) fn new(sets: Vec<(Vec<&str>, Vec<Vec<Value>>)>) -> Self {
            let pending = sets
                .into_iter()
                .map(|(columns, rows)| {
                    let columns: Columns = columns.into_iter().map(String::from).collect();
                    (columns, rows.into_iter().collect())
                })
                .collect();
            Self {
                pending,
                current: None,
                outputs: Vec::new(),
            }
        }

        pub(crate) fn with_outputs(mut self, outputs: Vec<(&str, Value)>) -> Self {
            self.outputs = outputs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect();
            self
        }
    }

    #[async_trait]
    impl Cursor for StaticCursor {
        fn columns(&self) -> &[String] {
            self.current.as_ref().map(|(c, _)| &c[..]).unwrap_or(&[])
        }

        async fn next_row(&mut self) -> Result<Option<Row>> {
            Ok(self
                .current
                .as_mut()
                .and_then(|(columns, rows)| rows.pop_front().map(|v| Row::new(columns.clone(), v))))
        }

        async fn next_result(&mut self) -> Result<bool> {
            self.current = self.pending.pop_front();
            Ok(self.current.is_some())
        }

        async fn finish(&mut self) -> Result<Completion> {
            self.pending.clear();
            self.current = None;
            Ok(Completion {
                outputs: std::mem::take(&mut self.outputs),
                rows_affected: 0,
            })
        }
    }
}
