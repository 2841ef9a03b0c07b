//! Packet expressions
//!
//! An [`Expr`] is a plain tree describing a binary layout. Nothing happens
//! until [`Expr::compile`] checks the definition and flattens it into a
//! [`Packet`], which then parses (via collectors) and produces bytes.
//!
//! ```
//! use sockframe::protocol::Expr;
//! use sockframe::values;
//!
//! let e = Expr::u32().then(Expr::u8()).then(Expr::lookback(0));
//! let packet = e.compile().unwrap();
//! let bytes = packet.produce(&values![5u32, 2u8, "ABCDE"]).unwrap();
//! assert_eq!(&bytes[..], b"\x00\x00\x00\x05\x02ABCDE");
//! ```

use std::collections::HashMap;

use super::packet::{FieldKind, FieldSpec, Packet};
use super::{Endian, Layout, Primitive};
use crate::error::ExprError;

/// Reference from a lookback field to an earlier sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    Index(usize),
    Name(String),
}

impl From<usize> for FieldRef {
    fn from(index: usize) -> Self {
        FieldRef::Index(index)
    }
}

impl From<&str> for FieldRef {
    fn from(name: &str) -> Self {
        FieldRef::Name(name.to_owned())
    }
}

impl From<String> for FieldRef {
    fn from(name: String) -> Self {
        FieldRef::Name(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Fixed-size primitive.
    Primitive { layout: Layout, name: Option<String> },
    /// Byte string of a fixed length.
    Bytes { len: usize, name: Option<String> },
    /// Byte string whose length is the decoded value of an earlier field.
    Lookback { target: FieldRef, name: Option<String> },
    /// Nested expression decoded as a single [`Value::Seq`](super::Value::Seq) field.
    /// Names and lookback positions inside are local to the group.
    Group { inner: Box<Expr>, name: Option<String> },
    /// Fields in order. Always flat: sequencing two sequences concatenates them.
    Sequence(Vec<Expr>),
}

macro_rules! primitive_ctor {
    ($($fn:ident => $kind:ident),* $(,)?) => {
        $(
            pub fn $fn() -> Self {
                Self::primitive(Primitive::$kind)
            }
        )*
    };
}

impl Expr {
    pub fn primitive(kind: Primitive) -> Self {
        Expr::Primitive {
            layout: Layout::big(kind),
            name: None,
        }
    }

    primitive_ctor! {
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
    }

    pub fn bytes(len: usize) -> Self {
        Expr::Bytes { len, name: None }
    }

    pub fn lookback(target: impl Into<FieldRef>) -> Self {
        Expr::Lookback {
            target: target.into(),
            name: None,
        }
    }

    pub fn group(inner: Expr) -> Self {
        Expr::Group {
            inner: Box::new(inner),
            name: None,
        }
    }

    /// Tag this field with a name. Naming a sequence turns it into a named group.
    pub fn named(self, name: impl Into<String>) -> Self {
        let name = Some(name.into());
        match self {
            Expr::Primitive { layout, .. } => Expr::Primitive { layout, name },
            Expr::Bytes { len, .. } => Expr::Bytes { len, name },
            Expr::Lookback { target, .. } => Expr::Lookback { target, name },
            Expr::Group { inner, .. } => Expr::Group { inner, name },
            seq @ Expr::Sequence(_) => Expr::Group {
                inner: Box::new(seq),
                name,
            },
        }
    }

    /// Switch every primitive in this expression to little endian.
    pub fn little_endian(self) -> Self {
        self.with_endian(Endian::Little)
    }

    pub fn with_endian(self, endian: Endian) -> Self {
        match self {
            Expr::Primitive { layout, name } => Expr::Primitive {
                layout: Layout::new(layout.kind, endian),
                name,
            },
            Expr::Group { inner, name } => Expr::Group {
                inner: Box::new(inner.with_endian(endian)),
                name,
            },
            Expr::Sequence(items) => {
                Expr::Sequence(items.into_iter().map(|e| e.with_endian(endian)).collect())
            }
            other => other,
        }
    }

    /// Append `next` after this expression.
    pub fn then(self, next: Expr) -> Self {
        sequence(self, next)
    }

    /// Number of top-level fields.
    pub fn field_count(&self) -> usize {
        match self {
            Expr::Sequence(items) => items.len(),
            _ => 1,
        }
    }

    fn into_fields(self) -> Vec<Expr> {
        match self {
            Expr::Sequence(items) => items.into_iter().flat_map(Expr::into_fields).collect(),
            single => vec![single],
        }
    }

    /// Check the definition and build the reusable [`Packet`].
    pub fn compile(&self) -> Result<Packet, ExprError> {
        let fields = self.clone().into_fields();
        let mut specs = Vec::with_capacity(fields.len());
        let mut names: HashMap<String, usize> = HashMap::new();

        // Every name in scope, so a lookback to a later name reads as forward
        // rather than unknown.
        for (index, field) in fields.iter().enumerate() {
            if let Some(name) = field.name() {
                if names.insert(name.to_owned(), index).is_some() {
                    return Err(ExprError::DuplicateName(name.to_owned()));
                }
            }
        }

        for (index, field) in fields.into_iter().enumerate() {
            let spec = match field {
                Expr::Primitive { layout, name } => FieldSpec {
                    name,
                    kind: FieldKind::Primitive(layout),
                },
                Expr::Bytes { len, name } => FieldSpec {
                    name,
                    kind: FieldKind::Bytes(len),
                },
                Expr::Lookback { target, name } => {
                    let target = resolve(index, &target, &names)?;
                    match &specs[target] {
                        FieldSpec {
                            kind: FieldKind::Primitive(layout),
                            ..
                        } if layout.kind.is_integer() => {}
                        _ => return Err(ExprError::NotALength { target }),
                    }
                    FieldSpec {
                        name,
                        kind: FieldKind::Lookback(target),
                    }
                }
                Expr::Group { inner, name } => FieldSpec {
                    name,
                    kind: FieldKind::Group(inner.compile()?),
                },
                Expr::Sequence(_) => unreachable!("into_fields flattens sequences"),
            };
            specs.push(spec);
        }
        Ok(Packet::from_fields(specs))
    }

    fn name(&self) -> Option<&str> {
        match self {
            Expr::Primitive { name, .. }
            | Expr::Bytes { name, .. }
            | Expr::Lookback { name, .. }
            | Expr::Group { name, .. } => name.as_deref(),
            Expr::Sequence(_) => None,
        }
    }
}

/// Sequence two expressions. Associative: nested sequences are flattened.
pub fn sequence(first: Expr, second: Expr) -> Expr {
    let mut items = first.into_fields();
    items.extend(second.into_fields());
    Expr::Sequence(items)
}

fn resolve(
    field: usize,
    target: &FieldRef,
    names: &HashMap<String, usize>,
) -> Result<usize, ExprError> {
    let index = match target {
        FieldRef::Index(index) => *index,
        FieldRef::Name(name) => match names.get(name) {
            Some(index) => *index,
            None => {
                return Err(ExprError::UnknownName {
                    field,
                    name: name.clone(),
                })
            }
        },
    };
    if index >= field {
        return Err(ExprError::ForwardReference {
            field,
            target: index,
        });
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_flat_and_associative() {
        let left = sequence(sequence(Expr::u8(), Expr::u16()), Expr::u32());
        let right = sequence(Expr::u8(), sequence(Expr::u16(), Expr::u32()));
        assert_eq!(left, right);
        assert_eq!(left.field_count(), 3);
    }

    #[test]
    fn test_forward_and_self_reference_rejected() {
        let forward = Expr::lookback(1).then(Expr::u8());
        assert_eq!(
            forward.compile().unwrap_err(),
            ExprError::ForwardReference { field: 0, target: 1 }
        );

        let selfref = Expr::u8().then(Expr::lookback(1));
        assert_eq!(
            selfref.compile().unwrap_err(),
            ExprError::ForwardReference { field: 1, target: 1 }
        );

        let by_name = Expr::lookback("len").then(Expr::u8().named("len"));
        assert_eq!(
            by_name.compile().unwrap_err(),
            ExprError::ForwardReference { field: 0, target: 1 }
        );
    }

    #[test]
    fn test_unknown_name_rejected() {
        let e = Expr::u8().named("a").then(Expr::lookback("b"));
        assert_eq!(
            e.compile().unwrap_err(),
            ExprError::UnknownName {
                field: 1,
                name: "b".into()
            }
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let e = Expr::u8().named("x").then(Expr::u16().named("x"));
        assert_eq!(e.compile().unwrap_err(), ExprError::DuplicateName("x".into()));
    }

    #[test]
    fn test_lookback_needs_integer() {
        let e = Expr::f32().then(Expr::lookback(0));
        assert_eq!(e.compile().unwrap_err(), ExprError::NotALength { target: 0 });

        let e = Expr::bytes(2).then(Expr::lookback(0));
        assert_eq!(e.compile().unwrap_err(), ExprError::NotALength { target: 0 });
    }

    #[test]
    fn test_group_scopes_names() {
        // The inner "len" is not visible outside the group.
        let inner = Expr::u8().named("len").then(Expr::lookback("len"));
        let e = Expr::group(inner).then(Expr::lookback("len"));
        assert!(matches!(
            e.compile().unwrap_err(),
            ExprError::UnknownName { field: 1, .. }
        ));
    }

    #[test]
    fn test_named_sequence_becomes_group() {
        let e = Expr::u8().then(Expr::u8()).named("pair");
        assert!(matches!(e, Expr::Group { .. }));
        assert_eq!(e.field_count(), 1);
    }

    #[test]
    fn test_little_endian_applies_recursively() {
        let e = Expr::u16().then(Expr::group(Expr::u32())).little_endian();
        let Expr::Sequence(items) = e else {
            panic!("expected sequence")
        };
        assert!(matches!(
            items[0],
            Expr::Primitive { layout: Layout { endian: Endian::Little, .. }, .. }
        ));
        let Expr::Group { inner, .. } = &items[1] else {
            panic!("expected group")
        };
        assert!(matches!(
            **inner,
            Expr::Primitive { layout: Layout { endian: Endian::Little, .. }, .. }
        ));
    }
}
