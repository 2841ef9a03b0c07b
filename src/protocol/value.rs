//! Decoded field values
//!
//! A parsed packet is an ordered tuple of [`Value`]s ([`PacketValues`]).
//! Names live on the packet definition, so converting to [`NamedValues`]
//! goes through [`Packet::tonamed`](super::Packet::tonamed).

use std::ops::{Deref, Index};

use bytes::Bytes;

/// One decoded field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bytes(Bytes),
    /// A nested group of fields.
    Seq(Vec<Value>),
}

impl Value {
    /// Integer view used for range checks when encoding.
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Value::Bool(v) => Some(v as i128),
            Value::U8(v) => Some(v.into()),
            Value::I8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::I16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::U64(v) => Some(v.into()),
            Value::I64(v) => Some(v.into()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v.into()),
            Value::F64(v) => Some(v),
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    /// Non-negative integer usable as a byte length.
    pub fn as_len(&self) -> Option<usize> {
        match self {
            Value::Bool(_) => None,
            _ => self.as_i128().and_then(|v| usize::try_from(v).ok()),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(v) => Some(v),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::U8(_) => "u8",
            Value::I8(_) => "i8",
            Value::U16(_) => "u16",
            Value::I16(_) => "i16",
            Value::U32(_) => "u32",
            Value::I32(_) => "i32",
            Value::U64(_) => "u64",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Bytes(_) => "bytes",
            Value::Seq(_) => "group",
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Bytes => Bytes,
    Vec<Value> => Seq,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(v.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<PacketValues> for Value {
    fn from(v: PacketValues) -> Self {
        Value::Seq(v.0)
    }
}

/// Ordered tuple of decoded values, addressable by position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacketValues(Vec<Value>);

impl PacketValues {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}

impl Deref for PacketValues {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for PacketValues {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl TryFrom<Value> for PacketValues {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Value> {
        match value {
            Value::Seq(values) => Ok(Self(values)),
            other => Err(other),
        }
    }
}

/// Name to value mapping in field order. Unnamed fields are omitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedValues(Vec<(String, Value)>);

impl NamedValues {
    pub(crate) fn push(&mut self, name: String, value: Value) {
        self.0.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl Index<&str> for NamedValues {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        match self.get(name) {
            Some(v) => v,
            None => panic!("no field named {name:?}"),
        }
    }
}

/// Builds [`PacketValues`] from anything convertible into [`Value`].
///
/// ```
/// use sockframe::values;
/// let v = values![5u32, 2u8, "ABCDE"];
/// assert_eq!(v.len(), 3);
/// ```
#[macro_export]
macro_rules! values {
    ($($v:expr),* $(,)?) => {
        $crate::protocol::PacketValues::from(
            vec![$($crate::protocol::Value::from($v)),*]
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_len() {
        assert_eq!(Value::U32(5).as_len(), Some(5));
        assert_eq!(Value::I8(-1).as_len(), None);
        assert_eq!(Value::Bool(true).as_len(), None);
        assert_eq!(Value::from("abc").as_len(), None);
    }

    #[test]
    fn test_values_macro() {
        let v = values![5u32, 2u8, "ABCDE"];
        assert_eq!(v[0], Value::U32(5));
        assert_eq!(v[1], Value::U8(2));
        assert_eq!(v[2].as_bytes(), Some(&b"ABCDE"[..]));
    }

    #[test]
    fn test_named_lookup() {
        let mut named = NamedValues::default();
        named.push("len".into(), Value::U16(3));
        assert_eq!(named["len"], Value::U16(3));
        assert!(named.get("missing").is_none());
    }
}
