// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tagged value model for captured state.
//!
//! Captured API state is open-ended: every backend carries its own object
//! graph. Rather than reflecting over concrete types, state is expressed as a
//! [`Val`] tree and navigated with explicit field / index / key / slice
//! operations.

use std::collections::BTreeMap;
use std::fmt;

use prism_db::{Id, Storable};
use serde::{Deserialize, Serialize};

/// A captured value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Val {
    /// Absent value.
    #[default]
    Nil,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer (handles, sizes, enums).
    Uint(u64),
    /// Floating point, compared and hashed bit-exactly.
    Float(f64),
    /// UTF-8 text.
    Str(String),
    /// Opaque byte string.
    Bytes(Vec<u8>),
    /// Database identifier (blobs, resources).
    Id(Id),
    /// Ordered sequence.
    Array(Vec<Val>),
    /// Keyed collection, ordered by key.
    Map(#[serde(with = "map_entries")] BTreeMap<Key, Val>),
    /// Named record.
    Struct(Struct),
    /// Nullable reference.
    Ptr(Option<Box<Val>>),
    /// Link to another entity, as a path string.
    Link(String),
    /// Typed window into a memory pool.
    Memory(MemoryRange),
}

// Floats compare by bit pattern so equality agrees with the canonical
// encoding: NaN equals itself and `0.0 != -0.0`.
impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Nil, Val::Nil) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Int(a), Val::Int(b)) => a == b,
            (Val::Uint(a), Val::Uint(b)) => a == b,
            (Val::Float(a), Val::Float(b)) => a.to_bits() == b.to_bits(),
            (Val::Str(a), Val::Str(b)) | (Val::Link(a), Val::Link(b)) => a == b,
            (Val::Bytes(a), Val::Bytes(b)) => a == b,
            (Val::Id(a), Val::Id(b)) => a == b,
            (Val::Array(a), Val::Array(b)) => a == b,
            (Val::Map(a), Val::Map(b)) => a == b,
            (Val::Struct(a), Val::Struct(b)) => a == b,
            (Val::Ptr(a), Val::Ptr(b)) => a == b,
            (Val::Memory(a), Val::Memory(b)) => a == b,
            _ => false,
        }
    }
}

/// A key of a [`Val::Map`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    /// Boolean key.
    Bool(bool),
    /// Signed integer key.
    Int(i64),
    /// Unsigned integer key.
    Uint(u64),
    /// String key.
    Str(String),
    /// Identifier key.
    Id(Id),
}

/// A named record with ordered fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Struct {
    /// Record type name, used in diagnostics.
    pub type_name: String,
    /// Fields in declaration order.
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// One field of a [`Struct`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: Val,
}

/// `count` elements of `elem_size` bytes starting at `base` in `pool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRange {
    /// Memory pool identifier.
    pub pool: u32,
    /// First byte.
    pub base: u64,
    /// Number of elements.
    pub count: u64,
    /// Size of one element in bytes.
    pub elem_size: u64,
}

impl MemoryRange {
    /// Byte length of the range.
    pub fn byte_len(&self) -> u64 {
        self.count.saturating_mul(self.elem_size)
    }

    /// The sub-range of elements `[start, end)`; bounds are the caller's concern.
    pub fn slice(&self, start: u64, end: u64) -> Self {
        Self {
            pool: self.pool,
            base: self.base + start * self.elem_size,
            count: end - start,
            elem_size: self.elem_size,
        }
    }
}

impl Struct {
    /// Creates an empty record.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Returns the value of field `name`.
    pub fn get(&self, name: &str) -> Option<&Val> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Returns a mutable reference to field `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Val> {
        self.fields
            .iter_mut()
            .find(|f| f.name == name)
            .map(|f| &mut f.value)
    }

    /// Sets field `name`, appending it if absent.
    pub fn set(&mut self, name: &str, value: Val) {
        match self.get_mut(name) {
            Some(slot) => *slot = value,
            None => self.fields.push(Field {
                name: name.to_owned(),
                value,
            }),
        }
    }

    /// Builder form of [`Struct::set`].
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Val>) -> Self {
        self.set(name, value.into());
        self
    }
}

impl Val {
    /// Convenience constructor for a record.
    pub fn record<I, S>(type_name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Val)>,
        S: Into<String>,
    {
        Self::Struct(Struct {
            type_name: type_name.to_owned(),
            fields: fields
                .into_iter()
                .map(|(name, value)| Field {
                    name: name.into(),
                    value,
                })
                .collect(),
        })
    }

    /// Type name used in diagnostics (`"u64"`, `"array"`, a record's name…).
    pub fn type_name(&self) -> &str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "i64",
            Self::Uint(_) => "u64",
            Self::Float(_) => "f64",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Id(_) => "id",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Struct(s) => &s.type_name,
            Self::Ptr(_) => "pointer",
            Self::Link(_) => "link",
            Self::Memory(_) => "memory",
        }
    }

    /// Returns `true` for [`Val::Nil`] and null pointers.
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil | Self::Ptr(None))
    }

    /// Unsigned view of integer values.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            Self::Bool(b) => Some(u64::from(*b)),
            _ => None,
        }
    }

    /// Signed view of integer values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Uint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Text view of string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Number of directly indexable children, if the value is a container.
    pub fn len(&self) -> Option<u64> {
        match self {
            Self::Array(v) => Some(v.len() as u64),
            Self::Bytes(v) => Some(v.len() as u64),
            Self::Str(s) => Some(s.len() as u64),
            Self::Map(m) => Some(m.len() as u64),
            Self::Struct(s) => Some(s.fields.len() as u64),
            Self::Memory(r) => Some(r.count),
            _ => None,
        }
    }

    /// Returns `true` if the value is an empty container.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl Storable for Val {}

impl From<bool> for Val {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Val {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Val {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<u32> for Val {
    fn from(v: u32) -> Self {
        Self::Uint(u64::from(v))
    }
}

impl From<f64> for Val {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Val {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Val {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Id> for Val {
    fn from(v: Id) -> Self {
        Self::Id(v)
    }
}

impl From<Struct> for Val {
    fn from(v: Struct) -> Self {
        Self::Struct(v)
    }
}

impl From<Vec<Val>> for Val {
    fn from(v: Vec<Val>) -> Self {
        Self::Array(v)
    }
}

impl Key {
    /// Kind label used in *incorrect-map-key-type* diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "i64",
            Self::Uint(_) => "u64",
            Self::Str(_) => "string",
            Self::Id(_) => "id",
        }
    }

    /// Converts `self` to the key kind of `like`.
    ///
    /// Numeric keys convert between signed and unsigned when the value fits;
    /// hex strings convert to identifiers.
    pub fn convert_like(&self, like: &Key) -> Option<Key> {
        match (like, self) {
            (Self::Bool(_), Self::Bool(b)) => Some(Self::Bool(*b)),
            (Self::Int(_), Self::Int(v)) => Some(Self::Int(*v)),
            (Self::Int(_), Self::Uint(v)) => i64::try_from(*v).ok().map(Self::Int),
            (Self::Uint(_), Self::Uint(v)) => Some(Self::Uint(*v)),
            (Self::Uint(_), Self::Int(v)) => u64::try_from(*v).ok().map(Self::Uint),
            (Self::Str(_), Self::Str(s)) => Some(Self::Str(s.clone())),
            (Self::Id(_), Self::Id(id)) => Some(Self::Id(*id)),
            (Self::Id(_), Self::Str(s)) => s.parse().ok().map(Self::Id),
            _ => None,
        }
    }

    /// The key as a plain value.
    pub fn to_val(&self) -> Val {
        match self {
            Self::Bool(v) => Val::Bool(*v),
            Self::Int(v) => Val::Int(*v),
            Self::Uint(v) => Val::Uint(*v),
            Self::Str(v) => Val::Str(v.clone()),
            Self::Id(v) => Val::Id(*v),
        }
    }

    /// Interprets a value as a key.
    pub fn from_val(v: &Val) -> Option<Self> {
        match v {
            Val::Bool(b) => Some(Self::Bool(*b)),
            Val::Int(i) => Some(Self::Int(*i)),
            Val::Uint(u) => Some(Self::Uint(*u)),
            Val::Str(s) => Some(Self::Str(s.clone())),
            Val::Id(id) => Some(Self::Id(*id)),
            _ => None,
        }
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<u64> for Key {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Id(v) => write!(f, "{v}"),
        }
    }
}

const DISPLAY_ITEMS: usize = 8;

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil | Self::Ptr(None) => f.write_str("nil"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Self::Id(v) => write!(f, "{v}"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().take(DISPLAY_ITEMS).enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() > DISPLAY_ITEMS {
                    write!(f, ", … +{}", items.len() - DISPLAY_ITEMS)?;
                }
                f.write_str("]")
            }
            Self::Map(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.iter().take(DISPLAY_ITEMS).enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                if m.len() > DISPLAY_ITEMS {
                    write!(f, ", … +{}", m.len() - DISPLAY_ITEMS)?;
                }
                f.write_str("}")
            }
            Self::Struct(s) => write!(f, "{}{{{} fields}}", s.type_name, s.fields.len()),
            Self::Ptr(Some(v)) => write!(f, "&{v}"),
            Self::Link(p) => write!(f, "→ {p}"),
            Self::Memory(r) => write!(
                f,
                "pool {} [{:#x}; {} x {}]",
                r.pool, r.base, r.count, r.elem_size
            ),
        }
    }
}

/// Serializes a `BTreeMap<Key, Val>` as a sequence of `[key, value]` pairs so
/// non-string keys survive text formats.
mod map_entries {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::{Key, Val};

    pub(super) fn serialize<S: Serializer>(
        map: &BTreeMap<Key, Val>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.iter())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Key, Val>, D::Error> {
        let entries = Vec::<(Key, Val)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}
