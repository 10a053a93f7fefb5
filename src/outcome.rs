//! The success/message/code envelope returned by every command, and the
//! naming conventions that fill it from output parameters.

use crate::error::{Error, Result};
use crate::params::{Parameter, Params};
use crate::value::{FromValue, Value};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Message of an outcome no convention parameter has overridden.
pub const DEFAULT_MESSAGE: &str = "the query has been executed correctly";

/// Fragments that mark a parameter as the success flag
pub const SUCCESS_NAMES: &[&str] = &["result", "presult", "resultado", "presultado"];
/// Fragments that mark a parameter as the message
pub const MESSAGE_NAMES: &[&str] = &["msg", "pmsg", "message", "pmessage", "mensaje", "pmensaje"];
/// Fragments that mark a parameter as the status code
pub const CODE_NAMES: &[&str] = &["codigo", "pcodigo", "code", "pcode"];

/// Envelope fields an output parameter can fill by naming convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Success,
    Message,
    Code,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Success, Role::Message, Role::Code];

    pub fn vocabulary(self) -> &'static [&'static str] {
        match self {
            Role::Success => SUCCESS_NAMES,
            Role::Message => MESSAGE_NAMES,
            Role::Code => CODE_NAMES,
        }
    }

    /// Case-insensitive substring match against this role's vocabulary
    pub fn matches(self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.vocabulary().iter().any(|word| name.contains(word))
    }
}

/// Whether the name is exactly one of the role words (ignoring case).
/// Only these names are withheld from the bag.
pub fn is_role_word(name: &str) -> bool {
    Role::ALL
        .into_iter()
        .flat_map(Role::vocabulary)
        .any(|word| word.eq_ignore_ascii_case(name))
}

/// The first role (Success, Message, Code) whose vocabulary matches the name.
pub fn classify(name: &str) -> Option<Role> {
    Role::ALL.into_iter().find(|role| role.matches(name))
}

/// Extra named output values, in insertion order, without duplicate keys
///
/// Serializes as a map (a JSON object) whose entries keep insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bag {
    entries: Vec<(String, Value)>,
}

impl Serialize for Bag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Bag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct BagVisitor;

        impl<'de> Visitor<'de> for BagVisitor {
            type Value = Bag;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of bag entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Bag, A::Error> {
                let mut bag = Bag::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    if bag.contains_key(&key) {
                        return Err(serde::de::Error::custom(format!("duplicate bag key: {key}")));
                    }
                    bag.entries.push((key, value));
                }
                Ok(bag)
            }
        }

        deserializer.deserialize_map(BagVisitor)
    }
}

impl Bag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; an existing key is rejected rather than overwritten
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        if self.contains_key(&key) {
            return Err(Error::DuplicateBagKey(key));
        }
        self.entries.push((key, value.into()));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_as<T: FromValue>(&self, key: &str) -> Result<T> {
        let value = self
            .get(key)
            .ok_or_else(|| Error::ParameterNotFound(key.to_string()))?;
        T::from_value(value.clone()).map_err(|e| Error::conversion(key, e))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result envelope of a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T = ()> {
    pub success: bool,
    pub message: String,
    pub code: i32,
    pub data: Option<T>,
    pub bag: Bag,
}

/// Outcome carrying every mapped row
pub type OutcomeList<T> = Outcome<Vec<T>>;

impl<T> Default for Outcome<T> {
    fn default() -> Self {
        Self {
            success: true,
            message: DEFAULT_MESSAGE.to_string(),
            code: 0,
            data: None,
            bag: Bag::default(),
        }
    }
}

impl<T> Outcome<T> {
    pub fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(false, message)
    }

    /// Failed outcome whose message is the error's text
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        Self::failure(error.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Same envelope and bag, payload replaced
    pub fn with_data<U>(self, data: U) -> Outcome<U> {
        self.replace_data(Some(data))
    }

    /// Same envelope and bag, no payload
    pub fn cast<U>(self) -> Outcome<U> {
        self.replace_data(None)
    }

    /// Same envelope and bag, payload transformed
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        Outcome {
            success: self.success,
            message: self.message,
            code: self.code,
            data: self.data.map(f),
            bag: self.bag,
        }
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub(crate) fn replace_data<U>(self, data: Option<U>) -> Outcome<U> {
        Outcome {
            success: self.success,
            message: self.message,
            code: self.code,
            data,
            bag: self.bag,
        }
    }
}

/// Build the envelope from the output parameters of an executed command.
///
/// For each role the first matching output parameter in declaration order
/// wins; a null value leaves that field at its default. Every output
/// parameter whose name is not exactly a role word and that carries an alias
/// lands in the bag (null becomes an empty string).
pub fn extract(params: &Params) -> Result<Outcome> {
    let outputs: Vec<&Parameter> = params.iter().filter(|p| p.direction.is_output()).collect();
    let mut outcome = Outcome::default();

    if let Some(success) = role_value::<bool>(&outputs, Role::Success)? {
        outcome.success = success;
    }
    if let Some(message) = role_value::<String>(&outputs, Role::Message)? {
        outcome.message = message;
    }
    if let Some(code) = role_value::<i32>(&outputs, Role::Code)? {
        outcome.code = code;
    }

    for parameter in outputs {
        if is_role_word(&parameter.name) {
            continue;
        }
        let Some(alias) = parameter.bag_alias() else {
            continue;
        };
        let value = match &parameter.value {
            Value::Null => Value::Text(String::new()),
            other => other.clone(),
        };
        outcome.bag.insert(alias, value)?;
    }

    Ok(outcome)
}

fn role_value<T: FromValue>(outputs: &[&Parameter], role: Role) -> Result<Option<T>> {
    let Some(parameter) = outputs.iter().find(|p| role.matches(&p.name)) else {
        return Ok(None);
    };
    Option::<T>::from_value(parameter.value.clone()).map_err(|e| Error::conversion(&parameter.name, e))
}
