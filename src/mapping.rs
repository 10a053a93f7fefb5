//! Row-to-type binding.
//!
//! Rust has no runtime member introspection, so each target type registers a
//! [`Descriptor`]: an ordered table of members, the column each one binds to,
//! and a setter. The table is built once per type and never changes after
//! that. For every result set the descriptor resolves the columns into a
//! [`ColumnPlan`] so per-row work is a lookup by index.
//!
//! Binding rules:
//!
//! - column names match members case-insensitively, using the member name
//!   unless the registration overrides the column;
//! - a null cell leaves the member at its default;
//! - unmatched columns and unmatched members are ignored;
//! - the first failed assignment aborts the read with
//!   [`Error::MappingFailure`].
//!
//! Scalar targets (numbers, strings, dates, [`Value`], `Option` of those)
//! take the first non-null column of each row instead.

use crate::cursor::{Cursor, Row};
use crate::error::{Error, Result};
use crate::value::{ConversionError, FromValue, Value};
use chrono::{NaiveDate, NaiveDateTime};
use std::any::type_name;
use std::collections::HashMap;
use std::fmt;

/// Types that can be built from a result-set row
pub trait FromRow: Sized + Send {
    /// Per-result-set preparation derived from the column names
    type Plan: Send + Sync;

    fn plan(columns: &[String]) -> Self::Plan;

    fn from_row(plan: &Self::Plan, row: Row) -> Result<Self>;
}

/// Types with a registered mapping descriptor
pub trait Entity: Default + Send + Sized + 'static {
    fn descriptor() -> &'static Descriptor<Self>;
}

type Setter<T> = Box<dyn Fn(&mut T, Value) -> std::result::Result<(), ConversionError> + Send + Sync>;

struct Binding<T> {
    member: &'static str,
    column: String,
    assign: Setter<T>,
}

/// Column-name-to-member binding table for `T`
pub struct Descriptor<T> {
    bindings: Vec<Binding<T>>,
    by_column: HashMap<String, Vec<usize>>,
}

impl<T> fmt::Debug for Descriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.bindings.iter().map(|b| (b.member, &b.column)))
            .finish()
    }
}

impl<T: Default + 'static> Descriptor<T> {
    pub fn builder() -> DescriptorBuilder<T> {
        DescriptorBuilder {
            bindings: Vec::new(),
        }
    }

    /// `(member, column)` pairs in registration order; columns are lower-cased
    pub fn members(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.bindings.iter().map(|b| (b.member, b.column.as_str()))
    }

    /// Resolve the columns of a result set against this descriptor
    pub fn plan(&self, columns: &[String]) -> ColumnPlan {
        let targets = columns
            .iter()
            .map(|column| {
                self.by_column
                    .get(&column.to_lowercase())
                    .cloned()
                    .unwrap_or_default()
            })
            .collect();
        ColumnPlan { targets }
    }

    /// Build one instance from a row
    pub fn bind(&self, plan: &ColumnPlan, row: Row) -> Result<T> {
        let (columns, values) = row.into_parts();
        let mut target = T::default();
        for (index, value) in values.into_iter().enumerate() {
            if value.is_null() {
                continue;
            }
            let Some(targets) = plan.targets.get(index) else {
                continue;
            };
            for &binding in targets {
                (self.bindings[binding].assign)(&mut target, value.clone()).map_err(|source| {
                    Error::MappingFailure {
                        column: columns.get(index).cloned().unwrap_or_default(),
                        type_name: type_name::<T>(),
                        source,
                    }
                })?;
            }
        }
        Ok(target)
    }
}

/// Bindings resolved for one result set: for each column, the members it feeds
#[derive(Debug, Clone, Default)]
pub struct ColumnPlan {
    targets: Vec<Vec<usize>>,
}

impl ColumnPlan {
    /// Number of columns that bind to at least one member
    pub fn bound_columns(&self) -> usize {
        self.targets.iter().filter(|t| !t.is_empty()).count()
    }
}

/// Builder for [`Descriptor`]
pub struct DescriptorBuilder<T> {
    bindings: Vec<Binding<T>>,
}

impl<T: Default + 'static> DescriptorBuilder<T> {
    /// Bind a member to the column of the same name
    pub fn field<V, F>(self, member: &'static str, set: F) -> Self
    where
        V: FromValue,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.field_as(member, member, set)
    }

    /// Bind a member to an explicitly named column
    pub fn field_as<V, F>(self, member: &'static str, column: &str, set: F) -> Self
    where
        V: FromValue,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.field_with(member, column, move |target, value| {
            set(target, V::from_value(value)?);
            Ok(())
        })
    }

    /// Bind a member through a custom conversion
    pub fn field_with<F>(mut self, member: &'static str, column: &str, assign: F) -> Self
    where
        F: Fn(&mut T, Value) -> std::result::Result<(), ConversionError> + Send + Sync + 'static,
    {
        self.bindings.push(Binding {
            member,
            column: column.to_lowercase(),
            assign: Box::new(assign),
        });
        self
    }

    pub fn build(self) -> Descriptor<T> {
        let mut by_column: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, binding) in self.bindings.iter().enumerate() {
            by_column.entry(binding.column.clone()).or_default().push(index);
        }
        Descriptor {
            bindings: self.bindings,
            by_column,
        }
    }
}

/// Register a struct for row binding.
///
/// Each listed field binds to the column of the same name, or to the quoted
/// column after `=>`. The struct must implement `Default`; every field type
/// must implement [`FromValue`](crate::FromValue).
///
/// ```ignore
/// #[derive(Debug, Default)]
/// struct Article {
///     code: i64,
///     description: String,
///     price: f64,
/// }
///
/// entity! {
///     Article {
///         code => "CodArticulo",
///         description => "Descripcion",
///         price => "Precio",
///     }
/// }
/// ```
#[macro_export]
macro_rules! entity {
    ($ty:ident { $($field:ident $(=> $column:literal)?),* $(,)? }) => {
        impl $crate::mapping::Entity for $ty {
            fn descriptor() -> &'static $crate::mapping::Descriptor<$ty> {
                static DESCRIPTOR: ::std::sync::OnceLock<$crate::mapping::Descriptor<$ty>> =
                    ::std::sync::OnceLock::new();
                DESCRIPTOR.get_or_init(|| {
                    $crate::mapping::Descriptor::<$ty>::builder()
                        $(
                            .field_as(
                                stringify!($field),
                                $crate::entity!(@column $field $(, $column)?),
                                |target: &mut $ty, value| target.$field = value,
                            )
                        )*
                        .build()
                })
            }
        }

        impl $crate::mapping::FromRow for $ty {
            type Plan = $crate::mapping::ColumnPlan;

            fn plan(columns: &[::std::string::String]) -> Self::Plan {
                <$ty as $crate::mapping::Entity>::descriptor().plan(columns)
            }

            fn from_row(
                plan: &Self::Plan,
                row: $crate::cursor::Row,
            ) -> $crate::error::Result<Self> {
                <$ty as $crate::mapping::Entity>::descriptor().bind(plan, row)
            }
        }
    };
    (@column $field:ident) => {
        stringify!($field)
    };
    (@column $field:ident, $column:literal) => {
        $column
    };
}

/// First non-null column of the row, or `T::default()` when every cell is null.
fn first_non_null<T: FromValue + Default>(row: Row) -> Result<T> {
    let (columns, values) = row.into_parts();
    for (index, value) in values.into_iter().enumerate() {
        if value.is_null() {
            continue;
        }
        return T::from_value(value).map_err(|source| Error::MappingFailure {
            column: columns.get(index).cloned().unwrap_or_default(),
            type_name: type_name::<T>(),
            source,
        });
    }
    Ok(T::default())
}

macro_rules! scalar_from_row {
    ($($t:ty),* $(,)?) => {
        $(
            impl FromRow for $t {
                type Plan = ();

                fn plan(_columns: &[String]) -> Self::Plan {}

                fn from_row(_plan: &Self::Plan, row: Row) -> Result<Self> {
                    first_non_null(row)
                }
            }
        )*
    };
}

scalar_from_row!(
    bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, char, String, Vec<u8>,
    NaiveDate, NaiveDateTime, Value,
);

impl<T: FromValue + Send> FromRow for Option<T> {
    type Plan = ();

    fn plan(_columns: &[String]) -> Self::Plan {}

    fn from_row(_plan: &Self::Plan, row: Row) -> Result<Self> {
        first_non_null(row)
    }
}

/// Map every remaining row of the cursor's current result set.
pub async fn map_rows<T: FromRow>(cursor: &mut dyn Cursor) -> Result<Vec<T>> {
    let plan = T::plan(cursor.columns());
    let mut items = Vec::new();
    while let Some(row) = cursor.next_row().await? {
        items.push(T::from_row(&plan, row)?);
    }
    Ok(items)
}

/// Map the first row of the current result set and discard the others.
pub async fn map_first<T: FromRow>(cursor: &mut dyn Cursor) -> Result<Option<T>> {
    let plan = T::plan(cursor.columns());
    let first = match cursor.next_row().await? {
        Some(row) => Some(T::from_row(&plan, row)?),
        None => None,
    };
    while cursor.next_row().await?.is_some() {}
    Ok(first)
}
