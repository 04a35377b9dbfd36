//! Binary layout descriptors and decoding
//!
//! A [`Layout`] is an ordered sequence of fixed-width primitive fields with no
//! padding and an explicit wire byte order. Offsets are assigned as fields are
//! appended, so the declared order is the wire order.

use bytes::Buf;
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Wire byte order of a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Primitive field types found in telemetry packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
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

impl FieldType {
    /// Size of the field on the wire in bytes
    pub const fn size(&self) -> usize {
        match self {
            FieldType::U8 | FieldType::I8 => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::I32 | FieldType::F32 => 4,
            FieldType::U64 | FieldType::I64 | FieldType::F64 => 8,
        }
    }

    /// Read one value of this type, advancing the buffer
    fn read<B: Buf>(&self, buf: &mut B, order: ByteOrder) -> Value {
        use ByteOrder::{Big, Little};

        match (self, order) {
            (FieldType::U8, _) => Value::U8(buf.get_u8()),
            (FieldType::I8, _) => Value::I8(buf.get_i8()),
            (FieldType::U16, Little) => Value::U16(buf.get_u16_le()),
            (FieldType::U16, Big) => Value::U16(buf.get_u16()),
            (FieldType::I16, Little) => Value::I16(buf.get_i16_le()),
            (FieldType::I16, Big) => Value::I16(buf.get_i16()),
            (FieldType::U32, Little) => Value::U32(buf.get_u32_le()),
            (FieldType::U32, Big) => Value::U32(buf.get_u32()),
            (FieldType::I32, Little) => Value::I32(buf.get_i32_le()),
            (FieldType::I32, Big) => Value::I32(buf.get_i32()),
            (FieldType::U64, Little) => Value::U64(buf.get_u64_le()),
            (FieldType::U64, Big) => Value::U64(buf.get_u64()),
            (FieldType::I64, Little) => Value::I64(buf.get_i64_le()),
            (FieldType::I64, Big) => Value::I64(buf.get_i64()),
            (FieldType::F32, Little) => Value::F32(buf.get_f32_le()),
            (FieldType::F32, Big) => Value::F32(buf.get_f32()),
            (FieldType::F64, Little) => Value::F64(buf.get_f64_le()),
            (FieldType::F64, Big) => Value::F64(buf.get_f64()),
        }
    }
}

/// A decoded scalar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
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
}

impl Value {
    /// Numeric value widened to f64
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::U8(v) => v as f64,
            Value::I8(v) => v as f64,
            Value::U16(v) => v as f64,
            Value::I16(v) => v as f64,
            Value::U32(v) => v as f64,
            Value::I32(v) => v as f64,
            Value::U64(v) => v as f64,
            Value::I64(v) => v as f64,
            Value::F32(v) => v as f64,
            Value::F64(v) => v,
        }
    }

    /// Value as an index, for integer types holding a non-negative number
    pub fn as_index(&self) -> Option<usize> {
        match *self {
            Value::U8(v) => Some(v as usize),
            Value::U16(v) => Some(v as usize),
            Value::U32(v) => usize::try_from(v).ok(),
            Value::U64(v) => usize::try_from(v).ok(),
            Value::I8(v) => usize::try_from(v).ok(),
            Value::I16(v) => usize::try_from(v).ok(),
            Value::I32(v) => usize::try_from(v).ok(),
            Value::I64(v) => usize::try_from(v).ok(),
            Value::F32(_) | Value::F64(_) => None,
        }
    }
}

/// One named field within a layout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    /// Byte offset from the start of the record
    pub offset: usize,
}

/// Ordered, unpadded struct-of-primitives description
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    byte_order: ByteOrder,
    fields: Vec<FieldDef>,
    size: usize,
}

impl Layout {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self {
            byte_order,
            fields: Vec::new(),
            size: 0,
        }
    }

    /// Append a single field
    pub fn with_field(mut self, name: &str, ty: FieldType) -> Self {
        self.push(name.to_string(), ty);
        self
    }

    /// Append several fields sharing one type, e.g. the four wheels of a car
    pub fn with_fields(mut self, names: &[&str], ty: FieldType) -> Self {
        for name in names {
            self.push(name.to_string(), ty);
        }
        self
    }

    /// Append every field of another layout, in order
    pub fn with_layout(mut self, other: &Layout) -> Self {
        for field in &other.fields {
            self.push(field.name.clone(), field.ty);
        }
        self
    }

    /// Append `count` back-to-back copies of a record layout
    pub fn with_repeated(mut self, record: &Layout, count: usize) -> Self {
        for _ in 0..count {
            self = self.with_layout(record);
        }
        self
    }

    fn push(&mut self, name: String, ty: FieldType) {
        self.fields.push(FieldDef {
            name,
            ty,
            offset: self.size,
        });
        self.size += ty.size();
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Total size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Index of the first field with this name
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Decode the leading `size()` bytes of `data` into one value per field.
    /// Trailing bytes are ignored.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<Value>, SchemaError> {
        if data.len() < self.size {
            return Err(SchemaError::BufferTooShort {
                expected: self.size,
                actual: data.len(),
            });
        }

        let mut buf = &data[..self.size];
        let values = self
            .fields
            .iter()
            .map(|field| field.ty.read(&mut buf, self.byte_order))
            .collect();

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layout(order: ByteOrder) -> Layout {
        Layout::new(order)
            .with_field("format", FieldType::U16)
            .with_field("id", FieldType::U8)
            .with_field("temp", FieldType::I8)
            .with_field("speed", FieldType::F32)
            .with_field("session", FieldType::U64)
    }

    #[test]
    fn test_offsets_follow_declaration_order() {
        let layout = sample_layout(ByteOrder::Little);
        let offsets: Vec<usize> = layout.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 2, 3, 4, 8]);
        assert_eq!(layout.size(), 16);
        assert_eq!(layout.position("speed"), Some(3));
        assert_eq!(layout.position("missing"), None);
    }

    #[test]
    fn test_decode_little_endian() {
        let layout = sample_layout(ByteOrder::Little);
        let mut data = Vec::new();
        data.extend_from_slice(&2023u16.to_le_bytes());
        data.push(6);
        data.push((-5i8) as u8);
        data.extend_from_slice(&123.5f32.to_le_bytes());
        data.extend_from_slice(&0xDEAD_BEEFu64.to_le_bytes());

        let values = layout.decode(&data).unwrap();
        assert_eq!(
            values,
            vec![
                Value::U16(2023),
                Value::U8(6),
                Value::I8(-5),
                Value::F32(123.5),
                Value::U64(0xDEAD_BEEF),
            ]
        );
    }

    #[test]
    fn test_decode_big_endian() {
        let layout = Layout::new(ByteOrder::Big)
            .with_field("a", FieldType::U16)
            .with_field("b", FieldType::I32);
        let data = [0x01, 0x02, 0xFF, 0xFF, 0xFF, 0xFE];
        let values = layout.decode(&data).unwrap();
        assert_eq!(values, vec![Value::U16(0x0102), Value::I32(-2)]);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let layout = Layout::new(ByteOrder::Little).with_field("a", FieldType::U8);
        assert_eq!(layout.decode(&[7, 8, 9]).unwrap(), vec![Value::U8(7)]);
    }

    #[test]
    fn test_decode_short_buffer() {
        let layout = sample_layout(ByteOrder::Little);
        let err = layout.decode(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            SchemaError::BufferTooShort {
                expected: 16,
                actual: 10
            }
        );
    }

    #[test]
    fn test_repeated_records() {
        let record = Layout::new(ByteOrder::Little)
            .with_field("x", FieldType::U16)
            .with_field("y", FieldType::F32);
        let layout = Layout::new(ByteOrder::Little)
            .with_field("count", FieldType::U8)
            .with_repeated(&record, 3);
        assert_eq!(layout.len(), 7);
        assert_eq!(layout.size(), 1 + 3 * 6);
        assert_eq!(layout.fields()[6].offset, 1 + 2 * 6 + 2);
    }

    #[test]
    fn test_value_as_index() {
        assert_eq!(Value::U8(21).as_index(), Some(21));
        assert_eq!(Value::I8(-1).as_index(), None);
        assert_eq!(Value::F32(1.0).as_index(), None);
        assert_eq!(Value::I16(-3).as_f64(), -3.0);
    }
}
