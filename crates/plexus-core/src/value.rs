//! Runtime values flowing through plugs.
//!
//! [`Value`] is what a plug holds locally and what a node's `compute`
//! produces. Large payloads are reference counted so that handing a cached
//! value to many readers never copies the buffer.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hash::FingerprintHasher;

/// The static type of a plug. Connections and local values are checked
/// against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Str,
    FloatList,
    Unit,
}

impl ValueType {
    /// Returns a human-readable name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Bool => "Bool",
            ValueType::Int => "Int",
            ValueType::Float => "Float",
            ValueType::Str => "Str",
            ValueType::FloatList => "FloatList",
            ValueType::Unit => "Unit",
        }
    }

    /// The value an unconnected plug of this type holds when none is given.
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::Str => Value::Str(Arc::from("")),
            ValueType::FloatList => Value::FloatList(Arc::from(Vec::<f64>::new())),
            ValueType::Unit => Value::Unit,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value held by a plug or produced by a computation.
///
/// Floats compare by bit pattern, matching [`Value::hash_into`]: `0.0` and
/// `-0.0` differ, and a NaN equals an identical NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    FloatList(Arc<[f64]>),
    Unit,
}

impl Value {
    /// Returns the [`ValueType`] of this value based on its variant.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Str(_) => ValueType::Str,
            Value::FloatList(_) => ValueType::FloatList,
            Value::Unit => ValueType::Unit,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a float, widening integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_float_list(&self) -> Option<&[f64]> {
        match self {
            Value::FloatList(v) => Some(v),
            _ => None,
        }
    }

    /// Approximate heap + inline footprint in bytes. Drives the cache's
    /// byte budget; exactness is not required, monotonicity in payload size is.
    pub fn approx_bytes(&self) -> usize {
        let inline = std::mem::size_of::<Value>();
        match self {
            Value::Str(s) => inline + s.len(),
            Value::FloatList(v) => inline + std::mem::size_of_val::<[f64]>(v),
            _ => inline,
        }
    }

    /// Mixes this value into a fingerprint. Used when an unconnected plug's
    /// local value feeds a downstream hash, and for context variables.
    pub fn hash_into(&self, hasher: &mut FingerprintHasher) {
        hasher.append_str(self.value_type().name());
        match self {
            Value::Bool(b) => {
                hasher.append_bool(*b);
            }
            Value::Int(v) => {
                hasher.append_i64(*v);
            }
            Value::Float(v) => {
                hasher.append_f64(*v);
            }
            Value::Str(s) => {
                hasher.append_str(s);
            }
            Value::FloatList(v) => {
                hasher.append_f64_slice(v);
            }
            Value::Unit => {}
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::FloatList(a), Value::FloatList(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Value::Unit, Value::Unit) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::FloatList(Arc::from(v))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::FloatList(v) => write!(f, "[{} floats]", v.len()),
            Value::Unit => f.write_str("()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_matches_variant() {
        assert_eq!(Value::Int(3).value_type(), ValueType::Int);
        assert_eq!(Value::from("x").value_type(), ValueType::Str);
        assert_eq!(Value::from(vec![1.0]).value_type(), ValueType::FloatList);
        for ty in [
            ValueType::Bool,
            ValueType::Int,
            ValueType::Float,
            ValueType::Str,
            ValueType::FloatList,
            ValueType::Unit,
        ] {
            assert_eq!(ty.default_value().value_type(), ty);
        }
    }

    #[test]
    fn approx_bytes_grows_with_payload() {
        let small = Value::from(vec![0.0; 4]);
        let large = Value::from(vec![0.0; 4096]);
        assert!(large.approx_bytes() > small.approx_bytes());
        assert!(large.approx_bytes() >= 4096 * 8);
    }

    #[test]
    fn hash_distinguishes_int_and_float() {
        let mut a = FingerprintHasher::new();
        Value::Int(1).hash_into(&mut a);
        let mut b = FingerprintHasher::new();
        Value::Float(1.0).hash_into(&mut b);
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn floats_compare_by_bit_pattern() {
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::from(vec![f64::NAN, 1.0]), Value::from(vec![f64::NAN, 1.0]));
        assert_ne!(Value::from(vec![0.0]), Value::from(vec![-0.0]));
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn float_accessor_widens_ints() {
        assert_eq!(Value::Int(4).as_float(), Some(4.0));
        assert_eq!(Value::Bool(true).as_float(), None);
    }
}
