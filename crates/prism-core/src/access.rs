// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reflective navigation and editing of [`Val`] trees.
//!
//! Readers follow non-nil pointers transparently. Values backed by memory
//! ([`Val::Memory`]) are read through the supplied [`GlobalState`]; without
//! one they report [`Error::DataUnavailable`].

use prism_capture::{GlobalState, Key, MemoryRange, Val};
use prism_db::{Error, Result};

/// Follows non-nil pointers.
///
/// # Errors
/// [`Error::NilDeref`] for a nil pointer; `what` names the dereferenced value.
pub fn deref<'a>(v: &'a Val, what: &str) -> Result<&'a Val> {
    let mut v = v;
    loop {
        match v {
            Val::Ptr(Some(inner)) => v = inner,
            Val::Ptr(None) => {
                return Err(Error::NilDeref {
                    path: what.to_owned(),
                })
            }
            other => return Ok(other),
        }
    }
}

fn deref_mut<'a>(v: &'a mut Val, what: &str) -> Result<&'a mut Val> {
    match v {
        Val::Ptr(Some(inner)) => deref_mut(inner, what),
        Val::Ptr(None) => Err(Error::NilDeref {
            path: what.to_owned(),
        }),
        other => Ok(other),
    }
}

/// Field `name` of a record.
///
/// # Errors
/// [`Error::FieldNotFound`] if the value is not a record or lacks the field.
pub fn field(v: &Val, name: &str) -> Result<Val> {
    match deref(v, name)? {
        Val::Struct(s) => s.get(name).cloned().ok_or_else(|| Error::FieldNotFound {
            field: name.to_owned(),
            type_name: s.type_name.clone(),
        }),
        other => Err(Error::FieldNotFound {
            field: name.to_owned(),
            type_name: other.type_name().to_owned(),
        }),
    }
}

/// Decodes one little-endian memory element.
pub fn decode_element(bytes: &[u8]) -> Val {
    match bytes.len() {
        1 | 2 | 4 | 8 => {
            let mut buf = [0u8; 8];
            buf[..bytes.len()].copy_from_slice(bytes);
            Val::Uint(u64::from_le_bytes(buf))
        }
        _ => Val::Bytes(bytes.to_vec()),
    }
}

fn read_range(range: &MemoryRange, state: Option<&GlobalState>) -> Result<Vec<u8>> {
    let state = state.ok_or_else(|| {
        Error::unavailable(format!(
            "memory pool {} is not readable without a state",
            range.pool
        ))
    })?;
    Ok(state.read_memory(range))
}

fn memory_elements(range: &MemoryRange, state: Option<&GlobalState>) -> Result<Val> {
    let bytes = read_range(range, state)?;
    if range.elem_size <= 1 {
        return Ok(Val::Bytes(bytes));
    }
    let size = usize::try_from(range.elem_size).map_err(|_| Error::invalid("element too large"))?;
    Ok(Val::Array(bytes.chunks(size).map(decode_element).collect()))
}

fn indexable_len(v: &Val) -> Result<u64> {
    match v {
        Val::Map(_) | Val::Struct(_) => None,
        other => other.len(),
    }
    .ok_or_else(|| Error::NotArrayIndexable {
        type_name: v.type_name().to_owned(),
    })
}

/// Element `index` of an array-like value.
///
/// # Errors
/// [`Error::OutOfBounds`] past the end; [`Error::NotArrayIndexable`] for
/// values without elements.
pub fn array_index(v: &Val, index: u64, state: Option<&GlobalState>) -> Result<Val> {
    let v = deref(v, "array")?;
    let len = indexable_len(v)?;
    if index >= len {
        return Err(Error::out_of_bounds(index, len));
    }
    let i = usize::try_from(index).map_err(|_| Error::out_of_bounds(index, len))?;
    match v {
        Val::Array(items) => Ok(items[i].clone()),
        Val::Bytes(b) => Ok(Val::Uint(u64::from(b[i]))),
        Val::Str(s) => Ok(Val::Uint(u64::from(s.as_bytes()[i]))),
        Val::Memory(range) => {
            let bytes = read_range(&range.slice(index, index + 1), state)?;
            Ok(decode_element(&bytes))
        }
        other => Err(Error::NotArrayIndexable {
            type_name: other.type_name().to_owned(),
        }),
    }
}

/// Elements `[start, end)` of an array-like value.
///
/// # Errors
/// [`Error::SliceOutOfBounds`] for an inverted or overlong range;
/// [`Error::NotSliceIndexable`] for values without elements.
pub fn slice(v: &Val, start: u64, end: u64, state: Option<&GlobalState>) -> Result<Val> {
    let v = deref(v, "slice")?;
    let not_sliceable = || Error::NotSliceIndexable {
        type_name: v.type_name().to_owned(),
    };
    if matches!(v, Val::Map(_) | Val::Struct(_)) {
        return Err(not_sliceable());
    }
    let len = v.len().ok_or_else(not_sliceable)?;
    if start > end || end > len {
        return Err(Error::SliceOutOfBounds { start, end, len });
    }
    let (s, e) = (start as usize, end as usize);
    match v {
        Val::Array(items) => Ok(Val::Array(items[s..e].to_vec())),
        Val::Bytes(b) => Ok(Val::Bytes(b[s..e].to_vec())),
        Val::Str(text) => text
            .get(s..e)
            .map(|t| Val::Str(t.to_owned()))
            .ok_or_else(|| Error::invalid(format!("[{start}:{end}] splits a character"))),
        Val::Memory(range) => memory_elements(&range.slice(start, end), state),
        _ => Err(not_sliceable()),
    }
}

fn resolve_key(map: &std::collections::BTreeMap<Key, Val>, key: &Key) -> Result<Key> {
    let Some(sample) = map.keys().next() else {
        return Ok(key.clone());
    };
    if std::mem::discriminant(sample) == std::mem::discriminant(key) {
        return Ok(key.clone());
    }
    key.convert_like(sample)
        .ok_or_else(|| Error::IncorrectMapKeyType {
            got: key.type_name().to_owned(),
            expected: sample.type_name().to_owned(),
        })
}

/// Entry `key` of a map. Integer keys convert between signed and unsigned
/// when the value fits, and hex strings convert to identifiers.
///
/// # Errors
/// [`Error::NotMapIndexable`] for non-maps;
/// [`Error::IncorrectMapKeyType`] for an inconvertible key;
/// [`Error::NotFound`] for a missing key.
pub fn map_index(v: &Val, key: &Key) -> Result<Val> {
    match deref(v, "map")? {
        Val::Map(m) => {
            let k = resolve_key(m, key)?;
            m.get(&k)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("map key {key}")))
        }
        other => Err(Error::NotMapIndexable {
            type_name: other.type_name().to_owned(),
        }),
    }
}

/// Replaces field `name` of a record.
///
/// # Errors
/// As for [`field`].
pub fn set_field(v: &mut Val, name: &str, value: Val) -> Result<()> {
    match deref_mut(v, name)? {
        Val::Struct(s) => {
            let type_name = s.type_name.clone();
            let slot = s.get_mut(name).ok_or_else(|| Error::FieldNotFound {
                field: name.to_owned(),
                type_name,
            })?;
            *slot = value;
            Ok(())
        }
        other => Err(Error::FieldNotFound {
            field: name.to_owned(),
            type_name: other.type_name().to_owned(),
        }),
    }
}

fn byte_of(value: &Val) -> Result<u8> {
    value
        .as_u64()
        .and_then(|b| u8::try_from(b).ok())
        .ok_or_else(|| Error::invalid(format!("{} is not a byte", value.type_name())))
}

/// Replaces element `index` of an array or byte string.
///
/// # Errors
/// As for [`array_index`]; memory-backed values are immutable.
pub fn set_index(v: &mut Val, index: u64, value: Val) -> Result<()> {
    let v = deref_mut(v, "array")?;
    let len = indexable_len(v)?;
    if index >= len {
        return Err(Error::out_of_bounds(index, len));
    }
    let i = index as usize;
    match v {
        Val::Array(items) => items[i] = value,
        Val::Bytes(b) => b[i] = byte_of(&value)?,
        Val::Memory(_) => {
            return Err(Error::Immutable {
                kind: "memory".into(),
            })
        }
        other => {
            return Err(Error::NotArrayIndexable {
                type_name: other.type_name().to_owned(),
            })
        }
    }
    Ok(())
}

/// Inserts or replaces entry `key` of a map.
///
/// # Errors
/// As for [`map_index`], except that missing keys are inserted.
pub fn set_key(v: &mut Val, key: &Key, value: Val) -> Result<()> {
    match deref_mut(v, "map")? {
        Val::Map(m) => {
            let k = resolve_key(m, key)?;
            m.insert(k, value);
            Ok(())
        }
        other => Err(Error::NotMapIndexable {
            type_name: other.type_name().to_owned(),
        }),
    }
}

/// Replaces elements `[start, end)` with the elements of `value`, which must
/// have exactly `end - start` of them.
///
/// # Errors
/// As for [`slice`]; [`Error::InvalidArgument`] on a length mismatch.
pub fn set_slice(v: &mut Val, start: u64, end: u64, value: Val) -> Result<()> {
    let v = deref_mut(v, "slice")?;
    let len = v.len().ok_or_else(|| Error::NotSliceIndexable {
        type_name: v.type_name().to_owned(),
    })?;
    if start > end || end > len {
        return Err(Error::SliceOutOfBounds { start, end, len });
    }
    let want = end - start;
    let got = value.len().unwrap_or(0);
    if got != want {
        return Err(Error::invalid(format!(
            "slice [{start}:{end}] needs {want} elements, got {got}"
        )));
    }
    let (s, e) = (start as usize, end as usize);
    match (v, value) {
        (Val::Array(items), Val::Array(new)) => {
            items.splice(s..e, new);
            Ok(())
        }
        (Val::Bytes(b), Val::Bytes(new)) => {
            b.splice(s..e, new);
            Ok(())
        }
        (Val::Bytes(b), Val::Array(new)) => {
            let bytes = new.iter().map(byte_of).collect::<Result<Vec<u8>>>()?;
            b.splice(s..e, bytes);
            Ok(())
        }
        (Val::Memory(_), _) => Err(Error::Immutable {
            kind: "memory".into(),
        }),
        (target, value) => Err(Error::invalid(format!(
            "cannot assign {} to a slice of {}",
            value.type_name(),
            target.type_name()
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use prism_capture::Struct;
    use prism_db::{ErrorKind, Id};

    use super::*;

    fn record() -> Val {
        Val::Struct(
            Struct::new("Viewport")
                .with("width", 800u64)
                .with("origin", Val::Ptr(Some(Box::new(Val::Array(vec![1u64.into(), 2u64.into()])))))
                .with("next", Val::Ptr(None)),
        )
    }

    #[test]
    fn fields_follow_pointers() {
        let origin = field(&record(), "origin").unwrap();
        assert_eq!(array_index(&origin, 1, None).unwrap(), Val::Uint(2));
        let err = field(&field(&record(), "next").unwrap(), "x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NilDeref);
        assert_eq!(
            field(&record(), "height").unwrap_err(),
            Error::FieldNotFound {
                field: "height".into(),
                type_name: "Viewport".into()
            }
        );
    }

    #[test]
    fn indices_are_bounds_checked() {
        let arr = Val::Array(vec![Val::Nil; 3]);
        assert_eq!(
            array_index(&arr, 3, None).unwrap_err(),
            Error::OutOfBounds {
                index: 3,
                min: 0,
                max: 2
            }
        );
        assert_eq!(
            slice(&arr, 2, 4, None).unwrap_err(),
            Error::SliceOutOfBounds {
                start: 2,
                end: 4,
                len: 3
            }
        );
        assert_eq!(
            array_index(&Val::Uint(1), 0, None).unwrap_err().kind(),
            ErrorKind::TypeNotArrayIndexable
        );
    }

    #[test]
    fn memory_reads_through_the_state() {
        let mut state = GlobalState::default();
        state.write_memory(0, 0x10, &[1, 0, 2, 0, 3, 0]).unwrap();
        let mem = Val::Memory(MemoryRange {
            pool: 0,
            base: 0x10,
            count: 3,
            elem_size: 2,
        });
        assert_eq!(array_index(&mem, 2, Some(&state)).unwrap(), Val::Uint(3));
        assert_eq!(
            slice(&mem, 0, 2, Some(&state)).unwrap(),
            Val::Array(vec![Val::Uint(1), Val::Uint(2)])
        );
        assert_eq!(
            array_index(&mem, 0, None).unwrap_err().kind(),
            ErrorKind::DataUnavailable
        );
    }

    #[test]
    fn map_keys_convert_between_integer_kinds() {
        let m = Val::Map([(Key::Uint(7), Val::from("seven"))].into_iter().collect());
        assert_eq!(map_index(&m, &Key::Int(7)).unwrap(), Val::from("seven"));
        assert_eq!(
            map_index(&m, &Key::Int(-1)).unwrap_err(),
            Error::IncorrectMapKeyType {
                got: "i64".into(),
                expected: "u64".into()
            }
        );
        let ids = Val::Map([(Key::Id(Id::of_str("a")), Val::Bool(true))].into_iter().collect());
        let hex = Key::Str(Id::of_str("a").to_string());
        assert_eq!(map_index(&ids, &hex).unwrap(), Val::Bool(true));
    }

    #[test]
    fn setters_edit_in_place() {
        let mut v = record();
        set_field(&mut v, "width", Val::Uint(640)).unwrap();
        assert_eq!(field(&v, "width").unwrap(), Val::Uint(640));
        assert_eq!(
            set_field(&mut v, "depth", Val::Uint(1)).unwrap_err().kind(),
            ErrorKind::FieldNotFound
        );

        let mut bytes = Val::Bytes(vec![0, 1, 2, 3]);
        set_slice(&mut bytes, 1, 3, Val::Array(vec![9u64.into(), 8u64.into()])).unwrap();
        assert_eq!(bytes, Val::Bytes(vec![0, 9, 8, 3]));
        assert_eq!(
            set_slice(&mut bytes, 0, 2, Val::Bytes(vec![1])).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );

        let mut m = Val::Map(Default::default());
        set_key(&mut m, &Key::from("k"), Val::Bool(false)).unwrap();
        assert_eq!(map_index(&m, &Key::from("k")).unwrap(), Val::Bool(false));
    }
}
