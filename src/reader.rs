//! Sequential consumption of the result sets produced by one command.

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::mapping::{self, FromRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    HasNext,
    Exhausted,
}

/// Reads the result sets of a single execution, strictly in order.
///
/// Each read consumes the current result set and moves on to the next one.
/// Reading once every set has been consumed fails with
/// [`Error::NoMoreResultSets`]; so does any read after a failed one.
pub struct MultiReader {
    cursor: Box<dyn Cursor>,
    state: ReaderState,
}

impl MultiReader {
    /// Position on the first result set of the cursor
    pub async fn open(mut cursor: Box<dyn Cursor>) -> Result<Self> {
        let state = if cursor.next_result().await? {
            ReaderState::HasNext
        } else {
            ReaderState::Exhausted
        };
        Ok(Self { cursor, state })
    }

    pub fn has_next(&self) -> bool {
        self.state == ReaderState::HasNext
    }

    /// Map the first row of the current result set, discarding the rest of it
    pub async fn read_one<T: FromRow>(&mut self) -> Result<Option<T>> {
        self.ensure_available()?;
        let item = mapping::map_first::<T>(self.cursor.as_mut()).await;
        self.advance(item).await
    }

    /// Map every row of the current result set
    pub async fn read_many<T: FromRow>(&mut self) -> Result<Vec<T>> {
        self.ensure_available()?;
        let items = mapping::map_rows::<T>(self.cursor.as_mut()).await;
        self.advance(items).await
    }

    pub(crate) fn into_cursor(self) -> Box<dyn Cursor> {
        self.cursor
    }

    fn ensure_available(&self) -> Result<()> {
        match self.state {
            ReaderState::HasNext => Ok(()),
            ReaderState::Exhausted => Err(Error::NoMoreResultSets),
        }
    }

    async fn advance<T>(&mut self, read: Result<T>) -> Result<T> {
        let value = match read {
            Ok(value) => value,
            Err(e) => {
                self.state = ReaderState::Exhausted;
                return Err(e);
            }
        };
        match self.cursor.next_result().await {
            Ok(true) => self.state = ReaderState::HasNext,
            Ok(false) => self.state = ReaderState::Exhausted,
            Err(e) => {
                self.state = ReaderState::Exhausted;
                return Err(e);
            }
        }
        Ok(value)
    }
}
