//! Fixed-size primitive layouts
//!
//! Endian-aware encode/decode on top of `bytes::Buf` / `bytes::BufMut`.

use bytes::{Buf, BufMut, BytesMut};

use super::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    /// Network order.
    #[default]
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl Primitive {
    pub const fn size(self) -> usize {
        match self {
            Primitive::Bool | Primitive::U8 | Primitive::I8 => 1,
            Primitive::U16 | Primitive::I16 => 2,
            Primitive::U32 | Primitive::I32 | Primitive::F32 => 4,
            Primitive::U64 | Primitive::I64 | Primitive::F64 => 8,
        }
    }

    /// Whether decoded values can serve as a lookback length.
    pub const fn is_integer(self) -> bool {
        !matches!(self, Primitive::Bool | Primitive::F32 | Primitive::F64)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::U8 => "u8",
            Primitive::I8 => "i8",
            Primitive::U16 => "u16",
            Primitive::I16 => "i16",
            Primitive::U32 => "u32",
            Primitive::I32 => "i32",
            Primitive::U64 => "u64",
            Primitive::I64 => "i64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
        }
    }
}

/// Primitive kind plus byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub kind: Primitive,
    pub endian: Endian,
}

macro_rules! get_endian {
    ($buf:expr, $endian:expr, $be:ident, $le:ident) => {
        match $endian {
            Endian::Big => $buf.$be(),
            Endian::Little => $buf.$le(),
        }
    };
}

macro_rules! put_endian {
    ($out:expr, $endian:expr, $be:ident, $le:ident, $v:expr) => {
        match $endian {
            Endian::Big => $out.$be($v),
            Endian::Little => $out.$le($v),
        }
    };
}

impl Layout {
    pub const fn new(kind: Primitive, endian: Endian) -> Self {
        Self { kind, endian }
    }

    pub const fn big(kind: Primitive) -> Self {
        Self::new(kind, Endian::Big)
    }

    #[inline(always)]
    pub const fn size(&self) -> usize {
        self.kind.size()
    }

    /// Decode exactly `self.size()` bytes.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than the layout.
    pub fn decode(&self, mut buf: &[u8]) -> Value {
        let e = self.endian;
        match self.kind {
            Primitive::Bool => Value::Bool(buf.get_u8() != 0),
            Primitive::U8 => Value::U8(buf.get_u8()),
            Primitive::I8 => Value::I8(buf.get_i8()),
            Primitive::U16 => Value::U16(get_endian!(buf, e, get_u16, get_u16_le)),
            Primitive::I16 => Value::I16(get_endian!(buf, e, get_i16, get_i16_le)),
            Primitive::U32 => Value::U32(get_endian!(buf, e, get_u32, get_u32_le)),
            Primitive::I32 => Value::I32(get_endian!(buf, e, get_i32, get_i32_le)),
            Primitive::U64 => Value::U64(get_endian!(buf, e, get_u64, get_u64_le)),
            Primitive::I64 => Value::I64(get_endian!(buf, e, get_i64, get_i64_le)),
            Primitive::F32 => Value::F32(get_endian!(buf, e, get_f32, get_f32_le)),
            Primitive::F64 => Value::F64(get_endian!(buf, e, get_f64, get_f64_le)),
        }
    }

    /// Append the encoding of `value`.
    ///
    /// Returns `false` (and writes nothing) when the value does not fit the layout.
    pub fn encode(&self, value: &Value, out: &mut BytesMut) -> bool {
        let e = self.endian;
        match self.kind {
            Primitive::Bool => match value {
                Value::Bool(b) => out.put_u8(*b as u8),
                _ => match int::<u8>(value).filter(|v| *v <= 1) {
                    Some(v) => out.put_u8(v),
                    None => return false,
                },
            },
            Primitive::U8 => match int::<u8>(value) {
                Some(v) => out.put_u8(v),
                None => return false,
            },
            Primitive::I8 => match int::<i8>(value) {
                Some(v) => out.put_i8(v),
                None => return false,
            },
            Primitive::U16 => match int::<u16>(value) {
                Some(v) => put_endian!(out, e, put_u16, put_u16_le, v),
                None => return false,
            },
            Primitive::I16 => match int::<i16>(value) {
                Some(v) => put_endian!(out, e, put_i16, put_i16_le, v),
                None => return false,
            },
            Primitive::U32 => match int::<u32>(value) {
                Some(v) => put_endian!(out, e, put_u32, put_u32_le, v),
                None => return false,
            },
            Primitive::I32 => match int::<i32>(value) {
                Some(v) => put_endian!(out, e, put_i32, put_i32_le, v),
                None => return false,
            },
            Primitive::U64 => match int::<u64>(value) {
                Some(v) => put_endian!(out, e, put_u64, put_u64_le, v),
                None => return false,
            },
            Primitive::I64 => match int::<i64>(value) {
                Some(v) => put_endian!(out, e, put_i64, put_i64_le, v),
                None => return false,
            },
            Primitive::F32 => match value.as_f64() {
                Some(v) => put_endian!(out, e, put_f32, put_f32_le, v as f32),
                None => return false,
            },
            Primitive::F64 => match value.as_f64() {
                Some(v) => put_endian!(out, e, put_f64, put_f64_le, v),
                None => return false,
            },
        }
        true
    }
}

fn int<T: TryFrom<i128>>(value: &Value) -> Option<T> {
    match value {
        Value::Bool(_) => None,
        _ => value.as_i128().and_then(|v| T::try_from(v).ok()),
    }
}
