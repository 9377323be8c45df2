//! PackStream encoding: `BoltValue` → bytes.

use bytes::{BufMut, BytesMut};

use super::marker::{self, SizedMarker};
use crate::types::{
    tag, BoltDict, BoltNode, BoltPath, BoltRelationship, BoltUnboundRelationship, BoltValue,
};

/// Appends `value` to the buffer in PackStream form.
pub fn encode_value(buf: &mut BytesMut, value: &BoltValue) {
    match value {
        BoltValue::Null => buf.put_u8(marker::NULL),
        BoltValue::Boolean(b) => encode_bool(buf, *b),
        BoltValue::Integer(i) => encode_int(buf, *i),
        BoltValue::Float(f) => {
            buf.put_u8(marker::FLOAT_64);
            buf.put_f64(*f);
        }
        BoltValue::String(s) => encode_string(buf, s),
        BoltValue::Bytes(b) => {
            write_size(buf, marker::BYTES, b.len());
            buf.put_slice(b);
        }
        BoltValue::List(items) => encode_list(buf, items),
        BoltValue::Dict(dict) => encode_dict(buf, dict),
        BoltValue::Node(n) => encode_node(buf, n),
        BoltValue::Relationship(r) => encode_relationship(buf, r),
        BoltValue::UnboundRelationship(r) => encode_unbound_relationship(buf, r),
        BoltValue::Path(p) => encode_path(buf, p),
        BoltValue::Structure(s) => {
            encode_struct_header(buf, s.tag, s.fields.len());
            for field in &s.fields {
                encode_value(buf, field);
            }
        }
    }
}

pub fn encode_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(if value { marker::TRUE } else { marker::FALSE });
}

/// Integers always take the narrowest form that holds them.
pub fn encode_int(buf: &mut BytesMut, value: i64) {
    if (marker::TINY_INT_MIN..=marker::TINY_INT_MAX).contains(&value) {
        buf.put_i8(value as i8);
    } else if let Ok(v) = i8::try_from(value) {
        buf.put_u8(marker::INT_8);
        buf.put_i8(v);
    } else if let Ok(v) = i16::try_from(value) {
        buf.put_u8(marker::INT_16);
        buf.put_i16(v);
    } else if let Ok(v) = i32::try_from(value) {
        buf.put_u8(marker::INT_32);
        buf.put_i32(v);
    } else {
        buf.put_u8(marker::INT_64);
        buf.put_i64(value);
    }
}

/// Size is the UTF-8 byte length.
pub fn encode_string(buf: &mut BytesMut, value: &str) {
    write_size(buf, marker::STRING, value.len());
    buf.put_slice(value.as_bytes());
}

pub fn encode_list(buf: &mut BytesMut, items: &[BoltValue]) {
    write_size(buf, marker::LIST, items.len());
    for item in items {
        encode_value(buf, item);
    }
}

pub fn encode_dict(buf: &mut BytesMut, dict: &BoltDict) {
    write_size(buf, marker::DICT, dict.len());
    for (key, value) in dict {
        encode_string(buf, key);
        encode_value(buf, value);
    }
}

/// Writes a structure marker (0xB0 | field count) and its tag byte.
pub fn encode_struct_header(buf: &mut BytesMut, tag_byte: u8, field_count: usize) {
    debug_assert!(field_count <= marker::STRUCT_MAX_FIELDS);
    buf.put_u8(marker::TINY_STRUCT | field_count as u8);
    buf.put_u8(tag_byte);
}

fn write_size(buf: &mut BytesMut, family: SizedMarker, len: usize) {
    match family.tiny {
        Some(nibble) if len <= 15 => buf.put_u8(nibble | len as u8),
        _ if len <= usize::from(u8::MAX) => {
            buf.put_u8(family.size_8);
            buf.put_u8(len as u8);
        }
        _ if len <= usize::from(u16::MAX) => {
            buf.put_u8(family.size_16);
            buf.put_u16(len as u16);
        }
        _ => {
            buf.put_u8(family.size_32);
            buf.put_u32(len as u32);
        }
    }
}

// -- Graph structures --

fn encode_strings(buf: &mut BytesMut, items: &[String]) {
    write_size(buf, marker::LIST, items.len());
    for item in items {
        encode_string(buf, item);
    }
}

fn encode_node(buf: &mut BytesMut, n: &BoltNode) {
    let fields = if n.element_id.is_some() { 4 } else { 3 };
    encode_struct_header(buf, tag::NODE, fields);
    encode_int(buf, n.id);
    encode_strings(buf, &n.labels);
    encode_dict(buf, &n.properties);
    if let Some(element_id) = &n.element_id {
        encode_string(buf, element_id);
    }
}

fn encode_relationship(buf: &mut BytesMut, r: &BoltRelationship) {
    let fields = if r.element_ids.is_some() { 8 } else { 5 };
    encode_struct_header(buf, tag::RELATIONSHIP, fields);
    encode_int(buf, r.id);
    encode_int(buf, r.start_node_id);
    encode_int(buf, r.end_node_id);
    encode_string(buf, &r.rel_type);
    encode_dict(buf, &r.properties);
    if let Some((id, start, end)) = &r.element_ids {
        encode_string(buf, id);
        encode_string(buf, start);
        encode_string(buf, end);
    }
}

fn encode_unbound_relationship(buf: &mut BytesMut, r: &BoltUnboundRelationship) {
    let fields = if r.element_id.is_some() { 4 } else { 3 };
    encode_struct_header(buf, tag::UNBOUND_RELATIONSHIP, fields);
    encode_int(buf, r.id);
    encode_string(buf, &r.rel_type);
    encode_dict(buf, &r.properties);
    if let Some(element_id) = &r.element_id {
        encode_string(buf, element_id);
    }
}

fn encode_path(buf: &mut BytesMut, p: &BoltPath) {
    encode_struct_header(buf, tag::PATH, 3);
    write_size(buf, marker::LIST, p.nodes.len());
    for node in &p.nodes {
        encode_node(buf, node);
    }
    write_size(buf, marker::LIST, p.rels.len());
    for rel in &p.rels {
        encode_unbound_relationship(buf, rel);
    }
    write_size(buf, marker::LIST, p.indices.len());
    for &idx in &p.indices {
        encode_int(buf, idx);
    }
}
