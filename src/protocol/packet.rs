//! Compiled packet definitions
//!
//! A [`Packet`] is immutable and cheap to clone, so one compiled definition
//! serves every connection: `packet.collector()` for each inbound message,
//! `packet.produce(..)` for each outbound one.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use super::{
    BytesCollector, BytesInput, Collector, DelimitedCollector, Layout, NamedValues,
    PacketValues, Step, StructCollector, Value,
};
use crate::error::{CodecError, ExprError};

#[derive(Debug, Clone)]
pub(crate) enum FieldKind {
    Primitive(Layout),
    Bytes(usize),
    /// Length taken from the decoded value at this earlier position.
    Lookback(usize),
    Group(Packet),
}

#[derive(Debug, Clone)]
pub(crate) struct FieldSpec {
    pub(crate) name: Option<String>,
    pub(crate) kind: FieldKind,
}

#[derive(Debug, Clone)]
pub struct Packet {
    fields: Arc<[FieldSpec]>,
}

impl Packet {
    pub(crate) fn from_fields(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields: fields.into(),
        }
    }

    /// Number of top-level fields (the arity of a values tuple).
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encoded size when it does not depend on the values.
    pub fn fixed_size(&self) -> Option<usize> {
        self.fields.iter().try_fold(0, |acc, field| {
            let size = match &field.kind {
                FieldKind::Primitive(layout) => layout.size(),
                FieldKind::Bytes(len) => *len,
                FieldKind::Lookback(_) => return None,
                FieldKind::Group(inner) => inner.fixed_size()?,
            };
            Some(acc + size)
        })
    }

    /// Field names by position.
    pub fn names(&self) -> impl Iterator<Item = Option<&str>> {
        self.fields.iter().map(|f| f.name.as_deref())
    }

    /// Fresh parser for one packet.
    pub fn collector(&self) -> PacketCollector {
        PacketCollector {
            fields: self.fields.clone(),
            values: Vec::with_capacity(self.fields.len()),
            current: None,
            started: false,
            done: false,
        }
    }

    /// Parse one packet from the front of `data`.
    ///
    /// Returns the values and the number of bytes used, or `Ok(None)` when
    /// `data` ends before the packet does.
    pub fn parse(&self, data: &[u8]) -> Result<Option<(PacketValues, usize)>, CodecError> {
        let mut collector = self.collector();
        let step = collector.add_data(data)?;
        if !step.done {
            return Ok(None);
        }
        Ok(Some((collector.into_values(), step.consumed)))
    }

    /// Encode a values tuple.
    ///
    /// Lookback fields are written as given: the declared length field is not
    /// compared with the byte string that follows. Keeping the two consistent
    /// is up to the caller.
    pub fn produce(&self, values: &[Value]) -> Result<Bytes, ExprError> {
        let mut out = BytesMut::new();
        self.encode_into(values, &mut out)?;
        Ok(out.freeze())
    }

    /// [`produce`](Self::produce), wrapped as an input ready to queue on a handler.
    pub fn produce_input(&self, values: &[Value]) -> Result<BytesInput, ExprError> {
        self.produce(values).map(BytesInput::new)
    }

    fn encode_into(&self, values: &[Value], out: &mut BytesMut) -> Result<(), ExprError> {
        self.check_arity(values)?;
        for (index, (field, value)) in self.fields.iter().zip(values).enumerate() {
            match &field.kind {
                FieldKind::Primitive(layout) => {
                    if !layout.encode(value, out) {
                        return Err(mismatch(index, layout.kind.name(), value));
                    }
                }
                FieldKind::Bytes(len) => {
                    let bytes = value.as_bytes().ok_or_else(|| mismatch(index, "bytes", value))?;
                    if bytes.len() != *len {
                        return Err(ExprError::LengthMismatch {
                            index,
                            expected: *len,
                            got: bytes.len(),
                        });
                    }
                    out.extend_from_slice(bytes);
                }
                FieldKind::Lookback(_) => {
                    let bytes = value.as_bytes().ok_or_else(|| mismatch(index, "bytes", value))?;
                    out.extend_from_slice(bytes);
                }
                FieldKind::Group(inner) => {
                    let seq = value.as_seq().ok_or_else(|| mismatch(index, "group", value))?;
                    inner.encode_into(seq, out)?;
                }
            }
        }
        Ok(())
    }

    /// Zip positional values with field names, skipping unnamed fields.
    pub fn tonamed(&self, values: &[Value]) -> Result<NamedValues, ExprError> {
        self.check_arity(values)?;
        let mut named = NamedValues::default();
        for (field, value) in self.fields.iter().zip(values) {
            if let Some(name) = &field.name {
                named.push(name.clone(), value.clone());
            }
        }
        Ok(named)
    }

    fn check_arity(&self, values: &[Value]) -> Result<(), ExprError> {
        if values.len() != self.fields.len() {
            return Err(ExprError::Arity {
                expected: self.fields.len(),
                got: values.len(),
            });
        }
        Ok(())
    }
}

fn mismatch(index: usize, expected: &'static str, value: &Value) -> ExprError {
    ExprError::Mismatch {
        index,
        expected,
        found: value.kind_name(),
    }
}

/// Parser for one packet: runs one field collector after another.
///
/// Lookback fields are built when their turn comes, from the value already
/// decoded at the referenced position.
pub struct PacketCollector {
    fields: Arc<[FieldSpec]>,
    values: Vec<Value>,
    current: Option<Box<dyn Collector>>,
    started: bool,
    done: bool,
}

impl PacketCollector {
    /// Values decoded so far, in field order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> PacketValues {
        PacketValues::new(self.values)
    }

    fn field_collector(&self, index: usize) -> Result<Box<dyn Collector>, CodecError> {
        let collector: Box<dyn Collector> = match &self.fields[index].kind {
            FieldKind::Primitive(layout) => Box::new(StructCollector::new(*layout)),
            FieldKind::Bytes(len) => Box::new(DelimitedCollector::new(BytesCollector::new(), *len)),
            FieldKind::Lookback(target) => {
                let len = self.values[*target]
                    .as_len()
                    .ok_or(CodecError::InvalidLength { field: *target })?;
                Box::new(DelimitedCollector::new(BytesCollector::new(), len))
            }
            FieldKind::Group(inner) => Box::new(inner.collector()),
        };
        Ok(collector)
    }
}

impl Collector for PacketCollector {
    fn add_data(&mut self, data: &[u8]) -> Result<Step, CodecError> {
        if self.done {
            return Ok(Step::done(0));
        }
        let mut offset = 0;
        while self.values.len() < self.fields.len() {
            let mut field = match self.current.take() {
                Some(field) => field,
                None => self.field_collector(self.values.len())?,
            };
            let step = field.add_data(&data[offset..])?;
            offset += step.consumed;
            self.started |= step.consumed > 0;
            if !step.done {
                self.current = Some(field);
                return Ok(Step::more(offset));
            }
            // Every field collector yields a value once done.
            let value = field.take_value().unwrap_or(Value::Seq(Vec::new()));
            self.values.push(value);
        }
        self.done = true;
        Ok(Step::done(offset))
    }

    fn close(&mut self) -> Result<bool, CodecError> {
        if self.done {
            return Ok(true);
        }
        if !self.started {
            return Ok(false);
        }
        Err(CodecError::Truncated {
            received: self.values.len(),
            expected: self.fields.len(),
        })
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn take_value(&mut self) -> Option<Value> {
        if !self.done {
            return None;
        }
        Some(Value::Seq(std::mem::take(&mut self.values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{feed, Expr};
    use crate::values;

    fn header_packet() -> Packet {
        Expr::u32()
            .then(Expr::u8())
            .then(Expr::lookback(0))
            .compile()
            .unwrap()
    }

    #[test]
    fn test_scenario_produce_and_parse() {
        let packet = header_packet();
        let bytes = packet.produce(&values![5u32, 2u8, "ABCDE"]).unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 5, 2, b'A', b'B', b'C', b'D', b'E']);

        let mut collector = packet.collector();
        let step = collector.add_data(&bytes).unwrap();
        assert_eq!(step, Step::done(10));
        assert_eq!(collector.into_values(), values![5u32, 2u8, "ABCDE"]);
    }

    #[test]
    fn test_parse_byte_at_a_time() {
        let packet = header_packet();
        let bytes = packet.produce(&values![3u32, 9u8, "xyz"]).unwrap();
        let mut collector = packet.collector();
        for (i, b) in bytes.iter().enumerate() {
            let step = collector.add_data(std::slice::from_ref(b)).unwrap();
            assert_eq!(step.consumed, 1);
            assert_eq!(step.done, i + 1 == bytes.len());
        }
        assert_eq!(collector.values()[2], Value::from("xyz"));
    }

    #[test]
    fn test_leaves_trailing_bytes() {
        let packet = header_packet();
        let mut data = packet.produce(&values![1u32, 0u8, "a"]).unwrap().to_vec();
        data.extend_from_slice(b"NEXT");
        let (values, used) = packet.parse(&data).unwrap().unwrap();
        assert_eq!(used, 6);
        assert_eq!(&data[used..], b"NEXT");
        assert_eq!(values[0], Value::U32(1));
    }

    #[test]
    fn test_lookback_by_name_and_zero_length() {
        let packet = Expr::u16()
            .named("len")
            .then(Expr::lookback("len").named("body"))
            .then(Expr::u8().named("tail"))
            .compile()
            .unwrap();
        let bytes = packet.produce(&values![0u16, "", 7u8]).unwrap();
        assert_eq!(&bytes[..], &[0, 0, 7]);
        let (values, _) = packet.parse(&bytes).unwrap().unwrap();
        let named = packet.tonamed(&values).unwrap();
        assert_eq!(named["len"], Value::U16(0));
        assert_eq!(named["body"].as_bytes(), Some(&b""[..]));
        assert_eq!(named["tail"], Value::U8(7));
    }

    #[test]
    fn test_tonamed_skips_unnamed() {
        let packet = Expr::u8()
            .named("a")
            .then(Expr::u8())
            .then(Expr::u8().named("c"))
            .compile()
            .unwrap();
        let named = packet.tonamed(&values![1u8, 2u8, 3u8]).unwrap();
        let pairs: Vec<_> = named.iter().map(|(n, v)| (n.to_owned(), v.clone())).collect();
        assert_eq!(
            pairs,
            vec![("a".to_owned(), Value::U8(1)), ("c".to_owned(), Value::U8(3))]
        );
    }

    #[test]
    fn test_produce_validation() {
        let packet = Expr::u8().then(Expr::bytes(3)).compile().unwrap();
        assert_eq!(
            packet.produce(&values![1u8]).unwrap_err(),
            ExprError::Arity { expected: 2, got: 1 }
        );
        assert_eq!(
            packet.produce(&values![300u32, "abc"]).unwrap_err(),
            ExprError::Mismatch {
                index: 0,
                expected: "u8",
                found: "u32"
            }
        );
        assert_eq!(
            packet.produce(&values![1u8, "ab"]).unwrap_err(),
            ExprError::LengthMismatch {
                index: 1,
                expected: 3,
                got: 2
            }
        );
    }

    #[test]
    fn test_lookback_length_not_cross_checked() {
        let packet = header_packet();
        // Declared length 2, actual string 5 bytes: written as given.
        let bytes = packet.produce(&values![2u32, 0u8, "ABCDE"]).unwrap();
        assert_eq!(bytes.len(), 10);
        let (values, used) = packet.parse(&bytes).unwrap().unwrap();
        assert_eq!(used, 7);
        assert_eq!(values[2], Value::from("AB"));
    }

    #[test]
    fn test_group_roundtrip() {
        let point = Expr::i16().then(Expr::i16()).little_endian();
        let packet = Expr::u8()
            .then(Expr::group(point).named("point"))
            .compile()
            .unwrap();
        assert_eq!(packet.fixed_size(), Some(5));
        let input = values![1u8, values![-1i16, 2i16]];
        let bytes = packet.produce(&input).unwrap();
        assert_eq!(&bytes[..], &[1, 0xff, 0xff, 2, 0]);
        let (output, _) = packet.parse(&bytes).unwrap().unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_close_semantics() {
        let packet = header_packet();
        let mut idle = packet.collector();
        assert!(!idle.close().unwrap());

        let mut partial = packet.collector();
        feed(&mut partial, &[0, 0, 0, 4, 1, b'a']).unwrap();
        assert!(matches!(
            partial.close(),
            Err(CodecError::Truncated { received: 2, expected: 3 })
        ));
    }

    #[test]
    fn test_incomplete_parse_is_none() {
        let packet = header_packet();
        assert!(packet.parse(&[0, 0]).unwrap().is_none());
    }

    #[test]
    fn test_packet_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Packet>();
    }
}
