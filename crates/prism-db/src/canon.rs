// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canonical encoder: a deterministic byte stream for hashing value graphs.
//!
//! The encoder is a `serde` [`Serializer`] that never produces output for
//! humans; it writes a tagged byte stream into a SHA-1 digest (or into a
//! scratch buffer when map entries need sorting).
//!
//! Enforces:
//! - every value starts with a one-byte tag; compound values end with
//!   [`tag::END`], which is never a value tag
//! - integers are widened (`i8..i64` → 8 bytes, `u8..u64` → 8 bytes, LE)
//! - floats are written bit-exactly (no normalisation of `-0.0` or NaN payloads)
//! - `None` (`tag::NONE`) is distinct from an empty sequence
//!   (`tag::SEQ, tag::END`)
//! - map entries are sorted by the encoded bytes of their keys, so `HashMap`
//!   iteration order never leaks into identifiers
//! - [`Shared`] values are hashed once per encode scope and emitted as their
//!   identifier; re-entering a `Shared` value that is still being encoded emits
//!   a back-reference carrying its distance up the shared stack
//!
//! Changing any of these rules changes every identifier in the database.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Display;
use std::ops::Deref;
use std::sync::Arc;

use serde::ser::{self, Serialize};
use sha1::{Digest, Sha1};

use crate::ident::Id;

/// Byte tags written ahead of every encoded value.
pub mod tag {
    /// `()`.
    pub const UNIT: u8 = 0x00;
    /// `Option::None`.
    pub const NONE: u8 = 0x01;
    /// `Option::Some`, followed by the value.
    pub const SOME: u8 = 0x02;
    /// `bool`, followed by one byte.
    pub const BOOL: u8 = 0x03;
    /// Signed integer up to 64 bits, 8 bytes LE.
    pub const INT: u8 = 0x04;
    /// Unsigned integer up to 64 bits, 8 bytes LE.
    pub const UINT: u8 = 0x05;
    /// `i128`, 16 bytes LE.
    pub const INT128: u8 = 0x06;
    /// `u128`, 16 bytes LE.
    pub const UINT128: u8 = 0x07;
    /// `f32` bits, 4 bytes LE.
    pub const F32: u8 = 0x08;
    /// `f64` bits, 8 bytes LE.
    pub const F64: u8 = 0x09;
    /// `char` as u32, 4 bytes LE.
    pub const CHAR: u8 = 0x0a;
    /// UTF-8 string: u64 length then bytes.
    pub const STR: u8 = 0x0b;
    /// Byte string: u64 length then bytes.
    pub const BYTES: u8 = 0x0c;
    /// Sequence: items then [`END`].
    pub const SEQ: u8 = 0x0d;
    /// Tuple: items then [`END`].
    pub const TUPLE: u8 = 0x0e;
    /// Map: u64 count then sorted key/value pairs.
    pub const MAP: u8 = 0x0f;
    /// Struct: name, (field name, value)* then [`END`].
    pub const STRUCT: u8 = 0x10;
    /// Unit struct: name.
    pub const UNIT_STRUCT: u8 = 0x11;
    /// Newtype struct: name then value.
    pub const NEWTYPE: u8 = 0x12;
    /// Tuple struct: name, items then [`END`].
    pub const TUPLE_STRUCT: u8 = 0x13;
    /// Enum variant: enum name, u32 index, variant name, then payload.
    pub const VARIANT: u8 = 0x14;
    /// Shared value, emitted as its identifier.
    pub const SHARED: u8 = 0x15;
    /// Back-reference to a shared value still being encoded.
    pub const CYCLE: u8 = 0x16;
    /// Raw bytes written by a fast-hash implementation.
    pub const RAW: u8 = 0x17;
    /// Terminates compound values.
    pub const END: u8 = 0xff;
}

/// Error raised when a value cannot be canonically encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct EncodeError(pub String);

impl ser::Error for EncodeError {
    fn custom<T: Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

enum Sink {
    Digest(Sha1),
    Buffer(Vec<u8>),
}

/// Streaming canonical encoder.
///
/// Fast-hash implementations receive a `&mut Encoder` and may use the typed
/// `write_*` helpers or [`Encoder::encode`] for nested serde values.
pub struct Encoder {
    sink: Sink,
}

impl Encoder {
    fn digest() -> Self {
        Self {
            sink: Sink::Digest(Sha1::new()),
        }
    }

    fn buffer() -> Self {
        Self {
            sink: Sink::Buffer(Vec::new()),
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        match &mut self.sink {
            Sink::Digest(h) => h.update(bytes),
            Sink::Buffer(v) => v.extend_from_slice(bytes),
        }
    }

    fn put_tag(&mut self, t: u8) {
        self.put(&[t]);
    }

    fn put_len(&mut self, len: usize) {
        self.put(&(len as u64).to_le_bytes());
    }

    fn put_str(&mut self, s: &str) {
        self.put_len(s.len());
        self.put(s.as_bytes());
    }

    fn into_buffer(self) -> Vec<u8> {
        match self.sink {
            Sink::Buffer(v) => v,
            Sink::Digest(_) => Vec::new(),
        }
    }

    fn finish(self) -> Id {
        match self.sink {
            Sink::Digest(h) => Id::from_digest(h),
            Sink::Buffer(v) => Id::of_bytes(&v),
        }
    }

    /// Writes a string value.
    pub fn write_str(&mut self, s: &str) {
        self.put_tag(tag::STR);
        self.put_str(s);
    }

    /// Writes a byte-string value.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.put_tag(tag::BYTES);
        self.put_len(bytes.len());
        self.put(bytes);
    }

    /// Writes an unsigned integer value.
    pub fn write_u64(&mut self, v: u64) {
        self.put_tag(tag::UINT);
        self.put(&v.to_le_bytes());
    }

    /// Writes a signed integer value.
    pub fn write_i64(&mut self, v: i64) {
        self.put_tag(tag::INT);
        self.put(&v.to_le_bytes());
    }

    /// Writes a boolean value.
    pub fn write_bool(&mut self, v: bool) {
        self.put_tag(tag::BOOL);
        self.put(&[u8::from(v)]);
    }

    /// Writes an identifier value.
    pub fn write_id(&mut self, id: &Id) {
        self.write_bytes(id.as_bytes());
    }

    /// Writes opaque bytes without a length prefix.
    ///
    /// Fast-hash implementations must ensure unequal values never produce the
    /// same raw stream.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.put_tag(tag::RAW);
        self.put(bytes);
    }

    /// Encodes a nested serde value.
    pub fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), EncodeError> {
        value.serialize(self)
    }
}

// ── Shared-value scope ──────────────────────────────────────────────────

#[derive(Default)]
struct Scope {
    done: HashMap<usize, Id>,
    stack: Vec<usize>,
}

thread_local! {
    static SCOPES: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

struct ScopeGuard;

impl ScopeGuard {
    fn enter() -> Self {
        SCOPES.with(|s| s.borrow_mut().push(Scope::default()));
        Self
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPES.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

enum Visit {
    Untracked,
    Fresh,
    Done(Id),
    Cycle(u64),
}

fn visit(key: usize) -> Visit {
    SCOPES.with(|s| {
        let scopes = s.borrow();
        let Some(scope) = scopes.last() else {
            return Visit::Untracked;
        };
        if let Some(id) = scope.done.get(&key) {
            return Visit::Done(*id);
        }
        match scope.stack.iter().rposition(|k| *k == key) {
            Some(pos) => Visit::Cycle((scope.stack.len() - pos) as u64),
            None => Visit::Fresh,
        }
    })
}

fn with_scope(f: impl FnOnce(&mut Scope)) {
    SCOPES.with(|s| {
        if let Some(scope) = s.borrow_mut().last_mut() {
            f(scope);
        }
    });
}

fn hash_shared<T: Serialize + ?Sized>(key: usize, value: &T) -> Result<Id, EncodeError> {
    with_scope(|scope| scope.stack.push(key));
    let mut enc = Encoder::digest();
    enc.put_tag(tag::SHARED);
    enc.put_str(std::any::type_name::<T>());
    let res = value.serialize(&mut enc);
    with_scope(|scope| {
        scope.stack.pop();
    });
    res?;
    let id = enc.finish();
    with_scope(|scope| {
        scope.done.insert(key, id);
    });
    Ok(id)
}

/// Reference-counted value that the canonical encoder emits once per encode.
///
/// A `Shared<T>` reachable several times from the same root is hashed a single
/// time and afterwards contributes only its identifier, so value DAGs encode in
/// linear time. Outside of an encode (e.g. when serialized to JSON) it
/// serializes transparently as `T`.
#[derive(Debug, Default)]
pub struct Shared<T: ?Sized>(pub Arc<T>);

impl<T> Shared<T> {
    /// Wraps `value`.
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: PartialEq + ?Sized> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl<T: Serialize + ?Sized> Serialize for Shared<T> {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let key = Arc::as_ptr(&self.0).cast::<()>() as usize;
        match visit(key) {
            Visit::Untracked => self.0.serialize(serializer),
            Visit::Done(id) => serializer.serialize_newtype_struct(SHARED_NAME, &SharedId(id)),
            Visit::Cycle(depth) => serializer.serialize_newtype_struct(CYCLE_NAME, &depth),
            Visit::Fresh => {
                let id = hash_shared(key, &*self.0).map_err(ser::Error::custom)?;
                serializer.serialize_newtype_struct(SHARED_NAME, &SharedId(id))
            }
        }
    }
}

impl<'de, T: serde::Deserialize<'de>> serde::Deserialize<'de> for Shared<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Self::new)
    }
}

const SHARED_NAME: &str = "$prism::Shared";
const CYCLE_NAME: &str = "$prism::Cycle";

struct SharedId(Id);

impl Serialize for SharedId {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0.as_bytes())
    }
}

/// Field wrapper for data that has no canonical converter.
///
/// Serializing an `Unencodable` always fails, so any value containing one is
/// rejected by the encoder with an *encoding-failed* error.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Unencodable<T>(pub T);

impl<T> Serialize for Unencodable<T> {
    fn serialize<S: ser::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(ser::Error::custom(format_args!(
            "no canonical converter registered for {}",
            std::any::type_name::<T>()
        )))
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Hashes `value`, prefixed by its type name.
pub fn hash<T: Serialize + ?Sized>(value: &T) -> Result<Id, EncodeError> {
    hash_with(std::any::type_name::<T>(), |enc| value.serialize(enc))
}

/// Hashes the output of `body` prefixed by `type_name`.
///
/// Opens a fresh shared-value scope for the duration of the call.
pub fn hash_with(
    type_name: &str,
    body: impl FnOnce(&mut Encoder) -> Result<(), EncodeError>,
) -> Result<Id, EncodeError> {
    let _guard = ScopeGuard::enter();
    let mut enc = Encoder::digest();
    enc.write_str(type_name);
    body(&mut enc)?;
    Ok(enc.finish())
}

/// Returns the canonical byte encoding of `value` (without type prefix).
pub fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let _guard = ScopeGuard::enter();
    let mut enc = Encoder::buffer();
    value.serialize(&mut enc)?;
    Ok(enc.into_buffer())
}

// ── Serializer ───────────────────────────────────────────────────────────

impl<'a> ser::Serializer for &'a mut Encoder {
    type Ok = ();
    type Error = EncodeError;
    type SerializeSeq = Compound<'a>;
    type SerializeTuple = Compound<'a>;
    type SerializeTupleStruct = Compound<'a>;
    type SerializeTupleVariant = Compound<'a>;
    type SerializeMap = MapEncoder<'a>;
    type SerializeStruct = Compound<'a>;
    type SerializeStructVariant = Compound<'a>;

    fn is_human_readable(&self) -> bool {
        false
    }

    fn serialize_bool(self, v: bool) -> Result<(), EncodeError> {
        self.write_bool(v);
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> Result<(), EncodeError> {
        self.write_i64(i64::from(v));
        Ok(())
    }

    fn serialize_i16(self, v: i16) -> Result<(), EncodeError> {
        self.write_i64(i64::from(v));
        Ok(())
    }

    fn serialize_i32(self, v: i32) -> Result<(), EncodeError> {
        self.write_i64(i64::from(v));
        Ok(())
    }

    fn serialize_i64(self, v: i64) -> Result<(), EncodeError> {
        self.write_i64(v);
        Ok(())
    }

    fn serialize_i128(self, v: i128) -> Result<(), EncodeError> {
        self.put_tag(tag::INT128);
        self.put(&v.to_le_bytes());
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> Result<(), EncodeError> {
        self.write_u64(u64::from(v));
        Ok(())
    }

    fn serialize_u16(self, v: u16) -> Result<(), EncodeError> {
        self.write_u64(u64::from(v));
        Ok(())
    }

    fn serialize_u32(self, v: u32) -> Result<(), EncodeError> {
        self.write_u64(u64::from(v));
        Ok(())
    }

    fn serialize_u64(self, v: u64) -> Result<(), EncodeError> {
        self.write_u64(v);
        Ok(())
    }

    fn serialize_u128(self, v: u128) -> Result<(), EncodeError> {
        self.put_tag(tag::UINT128);
        self.put(&v.to_le_bytes());
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Result<(), EncodeError> {
        self.put_tag(tag::F32);
        self.put(&v.to_bits().to_le_bytes());
        Ok(())
    }

    fn serialize_f64(self, v: f64) -> Result<(), EncodeError> {
        self.put_tag(tag::F64);
        self.put(&v.to_bits().to_le_bytes());
        Ok(())
    }

    fn serialize_char(self, v: char) -> Result<(), EncodeError> {
        self.put_tag(tag::CHAR);
        self.put(&u32::from(v).to_le_bytes());
        Ok(())
    }

    fn serialize_str(self, v: &str) -> Result<(), EncodeError> {
        self.write_str(v);
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<(), EncodeError> {
        self.write_bytes(v);
        Ok(())
    }

    fn serialize_none(self) -> Result<(), EncodeError> {
        self.put_tag(tag::NONE);
        Ok(())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), EncodeError> {
        self.put_tag(tag::SOME);
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), EncodeError> {
        self.put_tag(tag::UNIT);
        Ok(())
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<(), EncodeError> {
        self.put_tag(tag::UNIT_STRUCT);
        self.put_str(name);
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
    ) -> Result<(), EncodeError> {
        variant_header(self, name, variant_index, variant);
        self.put_tag(tag::UNIT);
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<(), EncodeError> {
        match name {
            SHARED_NAME => self.put_tag(tag::SHARED),
            CYCLE_NAME => self.put_tag(tag::CYCLE),
            _ => {
                self.put_tag(tag::NEWTYPE);
                self.put_str(name);
            }
        }
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<(), EncodeError> {
        variant_header(self, name, variant_index, variant);
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Compound<'a>, EncodeError> {
        self.put_tag(tag::SEQ);
        Ok(Compound { enc: self })
    }

    fn serialize_tuple(self, _len: usize) -> Result<Compound<'a>, EncodeError> {
        self.put_tag(tag::TUPLE);
        Ok(Compound { enc: self })
    }

    fn serialize_tuple_struct(
        self,
        name: &'static str,
        _len: usize,
    ) -> Result<Compound<'a>, EncodeError> {
        self.put_tag(tag::TUPLE_STRUCT);
        self.put_str(name);
        Ok(Compound { enc: self })
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Compound<'a>, EncodeError> {
        variant_header(self, name, variant_index, variant);
        self.put_tag(tag::TUPLE);
        Ok(Compound { enc: self })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapEncoder<'a>, EncodeError> {
        Ok(MapEncoder {
            enc: self,
            entries: Vec::new(),
            key: None,
        })
    }

    fn serialize_struct(
        self,
        name: &'static str,
        _len: usize,
    ) -> Result<Compound<'a>, EncodeError> {
        self.put_tag(tag::STRUCT);
        self.put_str(name);
        Ok(Compound { enc: self })
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Compound<'a>, EncodeError> {
        variant_header(self, name, variant_index, variant);
        self.put_tag(tag::STRUCT);
        self.put_str(variant);
        Ok(Compound { enc: self })
    }
}

fn variant_header(enc: &mut Encoder, name: &str, index: u32, variant: &str) {
    enc.put_tag(tag::VARIANT);
    enc.put_str(name);
    enc.put(&index.to_le_bytes());
    enc.put_str(variant);
}

/// Serializer state for sequences, tuples, and structs.
pub struct Compound<'a> {
    enc: &'a mut Encoder,
}

impl Compound<'_> {
    fn element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), EncodeError> {
        value.serialize(&mut *self.enc)
    }

    fn field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), EncodeError> {
        self.enc.write_str(key);
        value.serialize(&mut *self.enc)
    }

    fn close(self) {
        self.enc.put_tag(tag::END);
    }
}

impl ser::SerializeSeq for Compound<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), EncodeError> {
        self.element(value)
    }

    fn end(self) -> Result<(), EncodeError> {
        self.close();
        Ok(())
    }
}

impl ser::SerializeTuple for Compound<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), EncodeError> {
        self.element(value)
    }

    fn end(self) -> Result<(), EncodeError> {
        self.close();
        Ok(())
    }
}

impl ser::SerializeTupleStruct for Compound<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), EncodeError> {
        self.element(value)
    }

    fn end(self) -> Result<(), EncodeError> {
        self.close();
        Ok(())
    }
}

impl ser::SerializeTupleVariant for Compound<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), EncodeError> {
        self.element(value)
    }

    fn end(self) -> Result<(), EncodeError> {
        self.close();
        Ok(())
    }
}

impl ser::SerializeStruct for Compound<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), EncodeError> {
        self.field(key, value)
    }

    fn end(self) -> Result<(), EncodeError> {
        self.close();
        Ok(())
    }
}

impl ser::SerializeStructVariant for Compound<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), EncodeError> {
        self.field(key, value)
    }

    fn end(self) -> Result<(), EncodeError> {
        self.close();
        Ok(())
    }
}

/// Serializer state for maps; entries are buffered and sorted on `end`.
pub struct MapEncoder<'a> {
    enc: &'a mut Encoder,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    key: Option<Vec<u8>>,
}

fn encode_detached<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let mut sub = Encoder::buffer();
    value.serialize(&mut sub)?;
    Ok(sub.into_buffer())
}

impl ser::SerializeMap for MapEncoder<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), EncodeError> {
        self.key = Some(encode_detached(key)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), EncodeError> {
        let key = self
            .key
            .take()
            .ok_or_else(|| EncodeError("map value serialized before its key".into()))?;
        self.entries.push((key, encode_detached(value)?));
        Ok(())
    }

    fn end(mut self) -> Result<(), EncodeError> {
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));
        self.enc.put_tag(tag::MAP);
        self.enc.put_len(self.entries.len());
        for (k, v) in &self.entries {
            self.enc.put(k);
            self.enc.put(v);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    #[derive(serde::Serialize)]
    struct Pair {
        a: u32,
        b: Option<Vec<u8>>,
    }

    #[test]
    fn equal_values_hash_equal() {
        let x = Pair { a: 1, b: None };
        let y = Pair { a: 1, b: None };
        assert_eq!(hash(&x).unwrap(), hash(&y).unwrap());
    }

    #[test]
    fn none_differs_from_empty_sequence() {
        let none = Pair { a: 1, b: None };
        let empty = Pair {
            a: 1,
            b: Some(Vec::new()),
        };
        assert_ne!(hash(&none).unwrap(), hash(&empty).unwrap());
    }

    #[test]
    fn type_name_participates() {
        assert_ne!(hash(&1u32).unwrap(), hash(&1u64).unwrap());
    }

    #[test]
    fn map_order_does_not_leak() {
        let mut a = HashMap::new();
        let mut b = HashMap::new();
        for i in 0..64u32 {
            a.insert(i, i * 2);
        }
        for i in (0..64u32).rev() {
            b.insert(i, i * 2);
        }
        let sorted: BTreeMap<u32, u32> = a.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(to_bytes(&a).unwrap(), to_bytes(&b).unwrap());
        assert_eq!(to_bytes(&a).unwrap(), to_bytes(&sorted).unwrap());
    }

    #[test]
    fn floats_are_bit_exact() {
        assert_ne!(hash(&0.0f64).unwrap(), hash(&-0.0f64).unwrap());
    }

    #[test]
    fn shared_values_encode_as_identifier() {
        let leaf = Shared::new(vec![1u8, 2, 3]);
        let twice = vec![leaf.clone(), leaf.clone()];
        let distinct = vec![Shared::new(vec![1u8, 2, 3]), Shared::new(vec![1u8, 2, 3])];
        assert_eq!(hash(&twice).unwrap(), hash(&distinct).unwrap());
    }

    #[test]
    fn unencodable_fails() {
        let err = hash(&Unencodable(5u8)).unwrap_err();
        assert!(err.0.contains("no canonical converter"));
    }
}
