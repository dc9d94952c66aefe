//! # Node Parameters
//!
//! Typed, per-node key/value settings. A parameter must be declared before it
//! can be read or written, and keeps the type it was declared with.
//!
//! ```text
//! declare("publish_string_prefix", "Hello World")
//! get("publish_string_prefix")      → String("Hello World")
//! set("publish_string_prefix", 3)   → InvalidArgument (type is fixed)
//! get("undeclared")                 → InvalidArgument
//! ```
//!
//! Names are `.`-separated tokens of `[A-Za-z0-9_]`, each token not starting
//! with a digit (`qos.depth`, `use_sim_time`).

use crate::domain::errors::{RclError, RclResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Type tag of a [`ParameterValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterType {
    NotSet,
    Bool,
    Integer,
    Double,
    String,
    ByteArray,
    BoolArray,
    IntegerArray,
    DoubleArray,
    StringArray,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotSet => "not set",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::String => "string",
            Self::ByteArray => "byte array",
            Self::BoolArray => "bool array",
            Self::IntegerArray => "integer array",
            Self::DoubleArray => "double array",
            Self::StringArray => "string array",
        };
        f.write_str(name)
    }
}

/// Value of a node parameter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum ParameterValue {
    #[default]
    NotSet,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    ByteArray(Vec<u8>),
    BoolArray(Vec<bool>),
    IntegerArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
}

impl ParameterValue {
    #[must_use]
    pub fn parameter_type(&self) -> ParameterType {
        match self {
            Self::NotSet => ParameterType::NotSet,
            Self::Bool(_) => ParameterType::Bool,
            Self::Integer(_) => ParameterType::Integer,
            Self::Double(_) => ParameterType::Double,
            Self::String(_) => ParameterType::String,
            Self::ByteArray(_) => ParameterType::ByteArray,
            Self::BoolArray(_) => ParameterType::BoolArray,
            Self::IntegerArray(_) => ParameterType::IntegerArray,
            Self::DoubleArray(_) => ParameterType::DoubleArray,
            Self::StringArray(_) => ParameterType::StringArray,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }
}

macro_rules! impl_from_value {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for ParameterValue {
                fn from(value: $source) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

impl_from_value! {
    bool => Bool,
    i32 => Integer,
    i64 => Integer,
    f64 => Double,
    &str => String,
    String => String,
    Vec<u8> => ByteArray,
    Vec<bool> => BoolArray,
    Vec<i64> => IntegerArray,
    Vec<f64> => DoubleArray,
    Vec<String> => StringArray,
}

/// Declared parameters of one node.
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    values: BTreeMap<String, ParameterValue>,
}

impl ParameterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name` with its initial value, which also fixes its type.
    ///
    /// # Errors
    /// - `InvalidArgument`: invalid name, or `name` is already declared
    pub fn declare(&mut self, name: &str, value: ParameterValue) -> RclResult<ParameterValue> {
        validate_parameter_name(name)?;
        if self.values.contains_key(name) {
            return Err(RclError::InvalidArgument(format!(
                "parameter '{}' is already declared",
                name
            )));
        }
        self.values.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// # Errors
    /// - `InvalidArgument`: `name` is not declared
    pub fn get(&self, name: &str) -> RclResult<ParameterValue> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| undeclared(name))
    }

    /// Replace the value of a declared parameter.
    ///
    /// A parameter declared as `NotSet` takes the type of its first value.
    ///
    /// # Errors
    /// - `InvalidArgument`: `name` is not declared, or `value` has another type
    pub fn set(&mut self, name: &str, value: ParameterValue) -> RclResult<()> {
        let current = self.values.get_mut(name).ok_or_else(|| undeclared(name))?;
        let declared = current.parameter_type();
        if declared != ParameterType::NotSet && declared != value.parameter_type() {
            return Err(RclError::InvalidArgument(format!(
                "parameter '{}' is {}, got {}",
                name,
                declared,
                value.parameter_type()
            )));
        }
        *current = value;
        Ok(())
    }

    /// # Errors
    /// - `InvalidArgument`: `name` is not declared
    pub fn undeclare(&mut self, name: &str) -> RclResult<()> {
        self.values
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| undeclared(name))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Declared names in lexical order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

fn undeclared(name: &str) -> RclError {
    RclError::InvalidArgument(format!("parameter '{}' is not declared", name))
}

fn validate_parameter_name(name: &str) -> RclResult<()> {
    let valid_token = |token: &str| {
        let mut chars = token.chars();
        matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    if name.split('.').all(valid_token) {
        Ok(())
    } else {
        Err(RclError::InvalidArgument(format!(
            "invalid parameter name '{}'",
            name
        )))
    }
}
