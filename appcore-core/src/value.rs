//! Typed process-variable values.
//!
//! The set of element types is closed, so values are a tagged union over
//! vectors of each supported element type. A scalar is a one-element
//! vector. [`UserType`] maps Rust types onto the union for typed accessors.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Element type of a process variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 32-bit signed integer.
    Int32,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit unsigned integer.
    UInt64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    String,
    /// No data; the transfer itself is the information (triggers).
    Void,
}

impl DataType {
    /// Whether this type carries no data.
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Void => "void",
        };
        f.write_str(name)
    }
}

/// Marker type for data-less variables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Void;

/// A value of one of the supported element types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum Value {
    /// 32-bit signed integers.
    Int32(Vec<i32>),
    /// 32-bit unsigned integers.
    UInt32(Vec<u32>),
    /// 64-bit signed integers.
    Int64(Vec<i64>),
    /// 64-bit unsigned integers.
    UInt64(Vec<u64>),
    /// 32-bit floats.
    Float32(Vec<f32>),
    /// 64-bit floats.
    Float64(Vec<f64>),
    /// Booleans.
    Bool(Vec<bool>),
    /// Strings.
    String(Vec<String>),
    /// Data-less transfer with the given element count.
    Void(usize),
}

impl Value {
    /// The default ("construction-time") value for a type and length.
    pub fn default_for(data_type: DataType, len: usize) -> Self {
        match data_type {
            DataType::Int32 => Self::Int32(vec![0; len]),
            DataType::UInt32 => Self::UInt32(vec![0; len]),
            DataType::Int64 => Self::Int64(vec![0; len]),
            DataType::UInt64 => Self::UInt64(vec![0; len]),
            DataType::Float32 => Self::Float32(vec![0.0; len]),
            DataType::Float64 => Self::Float64(vec![0.0; len]),
            DataType::Bool => Self::Bool(vec![false; len]),
            DataType::String => Self::String(vec![String::new(); len]),
            DataType::Void => Self::Void(len),
        }
    }

    /// The element type tag.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Int32(_) => DataType::Int32,
            Self::UInt32(_) => DataType::UInt32,
            Self::Int64(_) => DataType::Int64,
            Self::UInt64(_) => DataType::UInt64,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
            Self::Bool(_) => DataType::Bool,
            Self::String(_) => DataType::String,
            Self::Void(_) => DataType::Void,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Self::Int32(v) => v.len(),
            Self::UInt32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::UInt64(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::String(v) => v.len(),
            Self::Void(n) => *n,
        }
    }

    /// Whether the value has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extract the elements as a Rust type, if the tag matches.
    pub fn to_vec<T: UserType>(&self) -> Option<Vec<T>> {
        T::from_value(self)
    }

    /// Render as JSON, for diagnostics and reports.
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Rust types usable as accessor element types.
pub trait UserType: Clone + Default + Send + Sync + fmt::Debug + 'static {
    /// The runtime tag for this type.
    const DATA_TYPE: DataType;

    /// Pack a slice of elements into a value.
    fn to_value(values: &[Self]) -> Value;

    /// Unpack a value; `None` if the tag does not match.
    fn from_value(value: &Value) -> Option<Vec<Self>>;
}

macro_rules! impl_user_type {
    ($ty:ty, $variant:ident) => {
        impl UserType for $ty {
            const DATA_TYPE: DataType = DataType::$variant;

            fn to_value(values: &[Self]) -> Value {
                Value::$variant(values.to_vec())
            }

            fn from_value(value: &Value) -> Option<Vec<Self>> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_user_type!(i32, Int32);
impl_user_type!(u32, UInt32);
impl_user_type!(i64, Int64);
impl_user_type!(u64, UInt64);
impl_user_type!(f32, Float32);
impl_user_type!(f64, Float64);
impl_user_type!(bool, Bool);
impl_user_type!(String, String);

impl UserType for Void {
    const DATA_TYPE: DataType = DataType::Void;

    fn to_value(values: &[Self]) -> Value {
        Value::Void(values.len())
    }

    fn from_value(value: &Value) -> Option<Vec<Self>> {
        match value {
            Value::Void(n) => Some(vec![Void; *n]),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_type_and_length() {
        let v = Value::default_for(DataType::Float64, 4);
        assert_eq!(v.data_type(), DataType::Float64);
        assert_eq!(v.len(), 4);
        assert_eq!(v.to_vec::<f64>(), Some(vec![0.0; 4]));
    }

    #[test]
    fn typed_extraction_checks_tag() {
        let v = i32::to_value(&[7]);
        assert_eq!(v.to_vec::<i32>(), Some(vec![7]));
        assert_eq!(v.to_vec::<u32>(), None);
        assert_eq!(v.to_vec::<String>(), None);
    }

    #[test]
    fn void_carries_only_length() {
        let v = Void::to_value(&[Void]);
        assert_eq!(v, Value::Void(1));
        assert!(v.data_type().is_void());
        assert_eq!(Void::from_value(&v), Some(vec![Void]));
    }

    #[test]
    fn json_rendering() {
        let v = String::to_value(&["ok".to_string()]);
        let json = v.to_json();
        assert_eq!(json["type"], "string");
        assert_eq!(json["values"][0], "ok");
    }
}
