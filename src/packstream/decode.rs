//! PackStream decoding: bytes → `BoltValue`.

use bytes::Buf;

use super::marker::{self, SizedMarker};
use crate::error::BoltError;
use crate::types::{
    tag, BoltDict, BoltNode, BoltPath, BoltRelationship, BoltStructure, BoltUnboundRelationship,
    BoltValue,
};

/// Decodes a single `BoltValue` from the buffer.
pub fn decode_value(buf: &mut impl Buf) -> Result<BoltValue, BoltError> {
    ensure_remaining(buf, 1)?;
    let m = buf.get_u8();

    if let Some(len) = size_of(buf, marker::STRING, m)? {
        return decode_string(buf, len).map(BoltValue::String);
    }
    if let Some(len) = size_of(buf, marker::LIST, m)? {
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(decode_value(buf)?);
        }
        return Ok(BoltValue::List(items));
    }
    if let Some(len) = size_of(buf, marker::DICT, m)? {
        return decode_dict(buf, len).map(BoltValue::Dict);
    }
    if let Some(len) = size_of(buf, marker::BYTES, m)? {
        ensure_remaining(buf, len)?;
        return Ok(BoltValue::Bytes(buf.copy_to_bytes(len).to_vec()));
    }

    match m {
        marker::NULL => Ok(BoltValue::Null),
        marker::FALSE => Ok(BoltValue::Boolean(false)),
        marker::TRUE => Ok(BoltValue::Boolean(true)),
        marker::FLOAT_64 => {
            ensure_remaining(buf, 8)?;
            Ok(BoltValue::Float(buf.get_f64()))
        }
        marker::INT_8 => {
            ensure_remaining(buf, 1)?;
            Ok(BoltValue::Integer(i64::from(buf.get_i8())))
        }
        marker::INT_16 => {
            ensure_remaining(buf, 2)?;
            Ok(BoltValue::Integer(i64::from(buf.get_i16())))
        }
        marker::INT_32 => {
            ensure_remaining(buf, 4)?;
            Ok(BoltValue::Integer(i64::from(buf.get_i32())))
        }
        marker::INT_64 => {
            ensure_remaining(buf, 8)?;
            Ok(BoltValue::Integer(buf.get_i64()))
        }
        0x00..=0x7F | 0xF0..=0xFF => Ok(BoltValue::Integer(i64::from(m as i8))),
        0xB0..=0xBF => {
            ensure_remaining(buf, 1)?;
            let tag_byte = buf.get_u8();
            decode_struct(buf, tag_byte, usize::from(m & 0x0F))
        }
        _ => Err(BoltError::Protocol(format!(
            "unknown PackStream marker: 0x{m:02X}"
        ))),
    }
}

/// Reads the header of a struct without decoding its fields: `(tag, field count)`.
pub fn decode_struct_header(buf: &mut impl Buf) -> Result<(u8, usize), BoltError> {
    ensure_remaining(buf, 2)?;
    let m = buf.get_u8();
    if m & 0xF0 != marker::TINY_STRUCT {
        return Err(BoltError::Protocol(format!(
            "expected structure marker, got 0x{m:02X}"
        )));
    }
    let tag_byte = buf.get_u8();
    Ok((tag_byte, usize::from(m & 0x0F)))
}

fn ensure_remaining(buf: &impl Buf, needed: usize) -> Result<(), BoltError> {
    if buf.remaining() < needed {
        Err(BoltError::Protocol(format!(
            "need {needed} bytes but only {} remaining",
            buf.remaining()
        )))
    } else {
        Ok(())
    }
}

/// Resolves the size for `m` if it belongs to `family`, consuming any prefix.
fn size_of(buf: &mut impl Buf, family: SizedMarker, m: u8) -> Result<Option<usize>, BoltError> {
    if let Some(len) = family.tiny_size(m) {
        return Ok(Some(len));
    }
    let Some(width) = family.prefix_width(m) else {
        return Ok(None);
    };
    ensure_remaining(buf, width)?;
    let len = match width {
        1 => usize::from(buf.get_u8()),
        2 => usize::from(buf.get_u16()),
        _ => buf.get_u32() as usize,
    };
    Ok(Some(len))
}

fn decode_string(buf: &mut impl Buf, len: usize) -> Result<String, BoltError> {
    ensure_remaining(buf, len)?;
    let data = buf.copy_to_bytes(len);
    String::from_utf8(data.to_vec())
        .map_err(|e| BoltError::Protocol(format!("invalid UTF-8 string: {e}")))
}

fn decode_dict(buf: &mut impl Buf, len: usize) -> Result<BoltDict, BoltError> {
    let mut dict = BoltDict::with_capacity(len.min(1024));
    for _ in 0..len {
        let key = match decode_value(buf)? {
            BoltValue::String(s) => s,
            other => {
                return Err(BoltError::Protocol(format!(
                    "dict key must be a string, got: {other}"
                )));
            }
        };
        let value = decode_value(buf)?;
        dict.insert(key, value);
    }
    Ok(dict)
}

fn decode_struct(buf: &mut impl Buf, tag_byte: u8, field_count: usize) -> Result<BoltValue, BoltError> {
    let mut fields = Vec::with_capacity(field_count);
    for _ in 0..field_count {
        fields.push(decode_value(buf)?);
    }
    let value = match tag_byte {
        tag::NODE => BoltValue::Node(node_from(fields)?),
        tag::RELATIONSHIP => BoltValue::Relationship(relationship_from(fields)?),
        tag::UNBOUND_RELATIONSHIP => BoltValue::UnboundRelationship(unbound_from(fields)?),
        tag::PATH => BoltValue::Path(path_from(fields)?),
        _ => BoltValue::Structure(BoltStructure {
            tag: tag_byte,
            fields,
        }),
    };
    Ok(value)
}

// -- Graph structures --

struct Fields {
    what: &'static str,
    items: std::vec::IntoIter<BoltValue>,
}

impl Fields {
    fn new(what: &'static str, fields: Vec<BoltValue>, min: usize) -> Result<Self, BoltError> {
        if fields.len() < min {
            return Err(BoltError::Protocol(format!(
                "{what} needs at least {min} fields, got {}",
                fields.len()
            )));
        }
        Ok(Self {
            what,
            items: fields.into_iter(),
        })
    }

    fn mismatch(&self, expected: &str, got: &BoltValue) -> BoltError {
        BoltError::Protocol(format!("{}: expected {expected}, got: {got}", self.what))
    }

    fn next(&mut self) -> BoltValue {
        self.items.next().unwrap_or(BoltValue::Null)
    }

    fn int(&mut self) -> Result<i64, BoltError> {
        match self.next() {
            BoltValue::Integer(i) => Ok(i),
            other => Err(self.mismatch("int", &other)),
        }
    }

    fn string(&mut self) -> Result<String, BoltError> {
        match self.next() {
            BoltValue::String(s) => Ok(s),
            other => Err(self.mismatch("string", &other)),
        }
    }

    fn optional_string(&mut self) -> Result<Option<String>, BoltError> {
        match self.next() {
            BoltValue::Null => Ok(None),
            BoltValue::String(s) => Ok(Some(s)),
            other => Err(self.mismatch("string", &other)),
        }
    }

    fn dict(&mut self) -> Result<BoltDict, BoltError> {
        match self.next() {
            BoltValue::Dict(d) => Ok(d),
            other => Err(self.mismatch("dict", &other)),
        }
    }

    fn list(&mut self) -> Result<Vec<BoltValue>, BoltError> {
        match self.next() {
            BoltValue::List(items) => Ok(items),
            other => Err(self.mismatch("list", &other)),
        }
    }
}

fn node_from(fields: Vec<BoltValue>) -> Result<BoltNode, BoltError> {
    let mut f = Fields::new("node", fields, 3)?;
    let id = f.int()?;
    let labels = f
        .list()?
        .into_iter()
        .map(|v| match v {
            BoltValue::String(s) => Ok(s),
            other => Err(f.mismatch("label string", &other)),
        })
        .collect::<Result<_, _>>()?;
    Ok(BoltNode {
        id,
        labels,
        properties: f.dict()?,
        element_id: f.optional_string()?,
    })
}

fn relationship_from(fields: Vec<BoltValue>) -> Result<BoltRelationship, BoltError> {
    let has_element_ids = fields.len() >= 8;
    let mut f = Fields::new("relationship", fields, 5)?;
    let id = f.int()?;
    let start_node_id = f.int()?;
    let end_node_id = f.int()?;
    let rel_type = f.string()?;
    let properties = f.dict()?;
    let element_ids = if has_element_ids {
        Some((f.string()?, f.string()?, f.string()?))
    } else {
        None
    };
    Ok(BoltRelationship {
        id,
        start_node_id,
        end_node_id,
        rel_type,
        properties,
        element_ids,
    })
}

fn unbound_from(fields: Vec<BoltValue>) -> Result<BoltUnboundRelationship, BoltError> {
    let mut f = Fields::new("unbound relationship", fields, 3)?;
    Ok(BoltUnboundRelationship {
        id: f.int()?,
        rel_type: f.string()?,
        properties: f.dict()?,
        element_id: f.optional_string()?,
    })
}

fn path_from(fields: Vec<BoltValue>) -> Result<BoltPath, BoltError> {
    let mut f = Fields::new("path", fields, 3)?;
    let nodes = f
        .list()?
        .into_iter()
        .map(|v| match v {
            BoltValue::Node(n) => Ok(n),
            other => Err(f.mismatch("node", &other)),
        })
        .collect::<Result<_, _>>()?;
    let rels = f
        .list()?
        .into_iter()
        .map(|v| match v {
            BoltValue::UnboundRelationship(r) => Ok(r),
            other => Err(f.mismatch("unbound relationship", &other)),
        })
        .collect::<Result<_, _>>()?;
    let indices = f
        .list()?
        .into_iter()
        .map(|v| match v {
            BoltValue::Integer(i) => Ok(i),
            other => Err(f.mismatch("index", &other)),
        })
        .collect::<Result<_, _>>()?;
    Ok(BoltPath {
        nodes,
        rels,
        indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packstream::encode;
    use bytes::BytesMut;

    fn round_trip(value: &BoltValue) -> BoltValue {
        let mut buf = BytesMut::new();
        encode::encode_value(&mut buf, value);
        let mut cursor = &buf[..];
        let decoded = decode_value(&mut cursor).expect("decode failed");
        assert!(cursor.is_empty(), "trailing bytes after decode");
        decoded
    }

    #[test]
    fn round_trip_integer_boundaries() {
        for i in [
            -16,
            127,
            -17,
            -128,
            128,
            -32769,
            i64::from(i32::MAX) + 1,
            i64::MIN,
        ] {
            assert_eq!(round_trip(&BoltValue::Integer(i)), BoltValue::Integer(i), "failed for {i}");
        }
    }

    #[test]
    fn round_trip_nested_containers() {
        let val = BoltValue::Dict(BoltDict::from([
            ("name".to_string(), BoltValue::String("Alice".into())),
            (
                "tags".to_string(),
                BoltValue::List(vec![BoltValue::Bytes(vec![1, 2]), BoltValue::Float(0.5)]),
            ),
            ("long".to_string(), BoltValue::String("é".repeat(40))),
        ]));
        assert_eq!(round_trip(&val), val);
    }

    #[test]
    fn round_trip_path() {
        let node = |id| BoltNode {
            id,
            labels: vec!["Person".into()],
            properties: BoltDict::new(),
            element_id: Some(format!("4:db:{id}")),
        };
        let path = BoltValue::Path(BoltPath {
            nodes: vec![node(1), node(2)],
            rels: vec![BoltUnboundRelationship {
                id: 9,
                rel_type: "KNOWS".into(),
                properties: BoltDict::new(),
                element_id: None,
            }],
            indices: vec![1, 1],
        });
        assert_eq!(round_trip(&path), path);
    }

    #[test]
    fn unknown_struct_passes_through() {
        // Date(19000) is not interpreted by the driver.
        let bytes = [0xB1, 0x44, marker::INT_16, 0x4A, 0x38];
        let mut cursor = &bytes[..];
        let value = decode_value(&mut cursor).unwrap();
        assert_eq!(
            value,
            BoltValue::Structure(BoltStructure {
                tag: 0x44,
                fields: vec![BoltValue::Integer(19000)],
            })
        );
    }

    #[test]
    fn v4_relationship_has_no_element_ids() {
        let bytes = [0xB5, tag::RELATIONSHIP, 0x01, 0x02, 0x03, 0x81, b'R', 0xA0];
        let mut cursor = &bytes[..];
        match decode_value(&mut cursor).unwrap() {
            BoltValue::Relationship(r) => {
                assert_eq!(r.rel_type, "R");
                assert!(r.element_ids.is_none());
            }
            other => panic!("expected relationship, got {other}"),
        }
    }

    #[test]
    fn truncated_input_is_protocol_error() {
        let mut cursor = &[0xD0u8, 0x05, b'a'][..];
        assert!(matches!(decode_value(&mut cursor), Err(BoltError::Protocol(_))));
    }

    #[test]
    fn reserved_marker_is_rejected() {
        let mut cursor = &[0xC4u8][..];
        let err = decode_value(&mut cursor).unwrap_err();
        assert!(err.to_string().contains("0xC4"));
    }

    #[test]
    fn non_string_dict_key_is_rejected() {
        let mut cursor = &[0xA1u8, 0x01, 0x02][..];
        assert!(decode_value(&mut cursor).is_err());
    }
}
