//! Command parameters, parameter sets and reusable parameter templates.

use crate::error::{Error, Result};
use crate::value::{parse_datetime, FromValue, Value};
use serde::{Deserialize, Serialize};

/// Default declared size for variable-length character parameters.
pub const DEFAULT_VARCHAR_SIZE: usize = 300;

/// Logical data type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Decimal,
    Real,
    Char,
    VarChar,
    NVarChar,
    Text,
    Date,
    DateTime,
    Blob,
}

impl DataType {
    /// Size used when an output parameter is declared without one.
    pub fn default_size(self) -> usize {
        match self {
            DataType::VarChar | DataType::NVarChar => DEFAULT_VARCHAR_SIZE,
            _ => 0,
        }
    }

    /// Normalize a value written back by a driver to this type's shape.
    pub fn coerce(self, value: Value) -> Value {
        match (self, value) {
            (DataType::Boolean, Value::Integer(v)) => Value::Boolean(v != 0),
            (DataType::Decimal | DataType::Real, Value::Integer(v)) => Value::Real(v as f64),
            (DataType::Date | DataType::DateTime, Value::Text(text)) => match parse_datetime(&text) {
                Some(ts) => Value::Timestamp(ts),
                None => Value::Text(text),
            },
            (_, value) => value,
        }
    }
}

/// Whether a value flows into the command, out of it, or both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Input,
    Output,
    InputOutput,
}

impl Direction {
    pub fn is_input(self) -> bool {
        matches!(self, Direction::Input | Direction::InputOutput)
    }

    pub fn is_output(self) -> bool {
        matches!(self, Direction::Output | Direction::InputOutput)
    }
}

/// One declared command parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub data_type: DataType,
    pub direction: Direction,
    pub size: usize,
    pub value: Value,
    /// Name under which an output value is surfaced in the outcome bag
    pub alias: Option<String>,
}

impl Parameter {
    /// Input parameter carrying a literal value
    pub fn input(name: impl Into<String>, data_type: DataType, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            data_type,
            direction: Direction::Input,
            size: 0,
            value: value.into(),
            alias: None,
        }
    }

    /// Output parameter with the type's default size
    pub fn output(name: impl Into<String>, data_type: DataType) -> Self {
        Self::declared(name, data_type, Direction::Output)
    }

    /// Parameter with no value yet and the type's default size
    pub fn declared(name: impl Into<String>, data_type: DataType, direction: Direction) -> Self {
        Self {
            name: name.into(),
            data_type,
            direction,
            size: data_type.default_size(),
            value: Value::Null,
            alias: None,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = value.into();
        self
    }

    /// The alias, if one is set and not blank.
    pub fn bag_alias(&self) -> Option<&str> {
        self.alias.as_deref().map(str::trim).filter(|a| !a.is_empty())
    }

    /// Loose name comparison used when binding to SQL placeholders:
    /// ignores a leading `@`, `:` or `$` and ASCII case.
    pub fn answers_to(&self, placeholder: &str) -> bool {
        strip_sigil(&self.name).eq_ignore_ascii_case(strip_sigil(placeholder))
    }
}

fn strip_sigil(name: &str) -> &str {
    name.trim_start_matches(['@', ':', '$'])
}

/// Ordered set of parameters for one command
///
/// Insertion order is bind order. Cloning is deep: two sets never share a
/// parameter.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    parameters: Vec<Parameter>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input parameter with a literal value
    pub fn with_input(self, name: &str, data_type: DataType, value: impl Into<Value>) -> Self {
        self.with_parameter(Parameter::input(name, data_type, value))
    }

    /// Add an output parameter using the type's default size
    pub fn with_output(self, name: &str, data_type: DataType) -> Self {
        self.with_parameter(Parameter::output(name, data_type))
    }

    /// Add an output parameter with an explicit size
    pub fn with_output_sized(self, name: &str, data_type: DataType, size: usize) -> Self {
        self.with_parameter(Parameter::output(name, data_type).with_size(size))
    }

    /// Add an output parameter whose value is surfaced in the outcome bag
    pub fn with_output_alias(self, name: &str, data_type: DataType, alias: &str) -> Self {
        self.with_parameter(Parameter::output(name, data_type).with_alias(alias))
    }

    /// Declare a parameter with an explicit direction and no value
    pub fn with_direction(self, name: &str, data_type: DataType, direction: Direction) -> Self {
        self.with_parameter(Parameter::declared(name, data_type, direction))
    }

    pub fn with_direction_sized(
        self,
        name: &str,
        data_type: DataType,
        direction: Direction,
        size: usize,
    ) -> Self {
        self.with_parameter(Parameter::declared(name, data_type, direction).with_size(size))
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.push(parameter);
        self
    }

    /// Append a parameter; one with the same name is replaced in place
    pub fn push(&mut self, parameter: Parameter) {
        match self.parameters.iter_mut().find(|p| p.name == parameter.name) {
            Some(existing) => *existing = parameter,
            None => self.parameters.push(parameter),
        }
    }

    /// Typed fetch of a parameter's current value (exact, case-sensitive name)
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .value(name)
            .ok_or_else(|| Error::ParameterNotFound(name.to_string()))?;
        T::from_value(value.clone()).map_err(|e| Error::conversion(name, e))
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.parameter(name).map(|p| &p.value)
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let parameter = self
            .parameters
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::ParameterNotFound(name.to_string()))?;
        parameter.value = value.into();
        Ok(())
    }

    /// Write values reported by a driver back into the matching output parameters.
    pub fn apply_outputs(&mut self, outputs: Vec<(String, Value)>) {
        for (name, value) in outputs {
            if let Some(parameter) = self
                .parameters
                .iter_mut()
                .find(|p| p.direction.is_output() && p.name == name)
            {
                parameter.value = parameter.data_type.coerce(value);
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn clear(&mut self) {
        self.parameters.clear();
    }

    pub(crate) fn to_vec(&self) -> Vec<Parameter> {
        self.parameters.clone()
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.parameters.iter()
    }
}

/// Reusable default parameters (typically the status outputs every
/// procedure declares). Each call to [`create_default`](Self::create_default)
/// hands out an independent copy, so concurrent commands never write into
/// each other's output values.
#[derive(Debug, Default, Clone)]
pub struct ParamsTemplate {
    defaults: Params,
}

impl ParamsTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_default_input(&mut self, name: &str, data_type: DataType, value: impl Into<Value>) {
        self.defaults.push(Parameter::input(name, data_type, value));
    }

    pub fn add_default_param(&mut self, name: &str, data_type: DataType, direction: Direction) {
        self.defaults.push(Parameter::declared(name, data_type, direction));
    }

    pub fn add_default_param_sized(
        &mut self,
        name: &str,
        data_type: DataType,
        direction: Direction,
        size: usize,
    ) {
        self.defaults
            .push(Parameter::declared(name, data_type, direction).with_size(size));
    }

    pub fn add_default_output(&mut self, name: &str, data_type: DataType) {
        self.defaults.push(Parameter::output(name, data_type));
    }

    pub fn add_default_output_sized(&mut self, name: &str, data_type: DataType, size: usize) {
        self.defaults
            .push(Parameter::output(name, data_type).with_size(size));
    }

    /// Replace every default with the given set
    pub fn set_defaults(&mut self, defaults: Params) {
        self.defaults = defaults;
    }

    pub fn defaults(&self) -> &Params {
        &self.defaults
    }

    /// A fresh parameter set holding value-copies of the defaults
    pub fn create_default(&self) -> Params {
        self.defaults.clone()
    }
}
