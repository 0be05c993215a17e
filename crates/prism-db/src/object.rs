// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Values the database can remember.
//!
//! Application types opt in by implementing [`Storable`]. The blanket
//! [`Object`] impl erases them so heterogeneous values can share one store;
//! [`Value`] is the reference-counted handle passed around by resolvers.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use serde::Serialize;

use crate::canon::{EncodeError, Encoder};
use crate::error::{Error, Result};
use crate::resolvable::Resolvable;

/// A value that can be stored in the database.
///
/// The default encoding is the type's `serde` shape fed through the canonical
/// encoder. Types with a cheaper exact encoding override
/// [`fast_hash`](Storable::fast_hash); the contract is that two values which
/// compare unequal must emit distinct bytes.
///
/// Resolvables override [`as_resolvable`](Storable::as_resolvable) so the
/// database knows to build them rather than return them.
pub trait Storable: Serialize + Debug + PartialEq + Send + Sync + 'static {
    /// Fast-hash capability. Return `None` to use the serde encoding.
    fn fast_hash(&self, _enc: &mut Encoder) -> Option<Result<(), EncodeError>> {
        None
    }

    /// Returns the resolvable view of this value, if it is one.
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        None
    }
}

/// Type-erased [`Storable`].
pub trait Object: Debug + Send + Sync + 'static {
    /// Stable, process-local name of the concrete type.
    fn type_name(&self) -> &'static str;
    /// Writes the canonical encoding of the value (without the type name).
    fn encode(&self, enc: &mut Encoder) -> Result<(), EncodeError>;
    /// Structural equality against another erased value.
    fn eq_object(&self, other: &dyn Object) -> bool;
    /// Returns the resolvable view of this value, if it is one.
    fn resolvable(&self) -> Option<&dyn Resolvable>;
    /// Upcasts to `Any` for downcasting by reference.
    fn as_any(&self) -> &dyn Any;
    /// Upcasts to `Any` for downcasting the shared handle.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Storable> Object for T {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn encode(&self, enc: &mut Encoder) -> Result<(), EncodeError> {
        match self.fast_hash(enc) {
            Some(res) => res,
            None => enc.encode(self),
        }
    }

    fn eq_object(&self, other: &dyn Object) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn resolvable(&self) -> Option<&dyn Resolvable> {
        self.as_resolvable()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Shared handle to a stored value.
pub type Value = Arc<dyn Object>;

/// Wraps a storable in a [`Value`].
pub fn value<T: Storable>(v: T) -> Value {
    Arc::new(v)
}

/// Downcasts a [`Value`] to its concrete type.
///
/// # Errors
/// Returns [`Error::Internal`] naming both types on mismatch.
pub fn downcast<T: Storable>(v: Value) -> Result<Arc<T>> {
    let found = v.type_name();
    v.into_any().downcast::<T>().map_err(|_| {
        Error::Internal(format!(
            "expected {}, found {found}",
            std::any::type_name::<T>()
        ))
    })
}

/// Hashes an erased value: type name followed by its canonical encoding.
///
/// # Errors
/// Returns [`Error::EncodingFailed`] when any part of the value graph has no
/// canonical converter.
pub fn hash_object(obj: &dyn Object) -> Result<crate::Id> {
    crate::canon::hash_with(obj.type_name(), |enc| obj.encode(enc)).map_err(|e| {
        Error::EncodingFailed {
            type_name: obj.type_name().to_owned(),
            reason: e.0,
        }
    })
}

macro_rules! storable_leaves {
    ($($t:ty),* $(,)?) => {
        $(impl Storable for $t {})*
    };
}

storable_leaves!(
    bool, u8, u16, u32, u64, i8, i16, i32, i64, f32, f64, String, Vec<u8>, crate::Id,
);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, serde::Serialize)]
    struct Quick(u32);

    impl Storable for Quick {
        fn fast_hash(&self, enc: &mut Encoder) -> Option<Result<(), EncodeError>> {
            enc.write_raw(&self.0.to_le_bytes());
            Some(Ok(()))
        }
    }

    #[test]
    fn downcast_round_trip() {
        let v = value(String::from("hello"));
        let s = downcast::<String>(v).unwrap();
        assert_eq!(s.as_str(), "hello");
    }

    #[test]
    fn downcast_mismatch_names_types() {
        let v = value(7u32);
        let err = downcast::<String>(v).unwrap_err();
        assert!(err.to_string().contains("u32"));
    }

    #[test]
    fn fast_hash_is_used() {
        let a = hash_object(&Quick(1)).unwrap();
        let b = hash_object(&Quick(2)).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, hash_object(&Quick(1)).unwrap());
    }

    #[test]
    fn erased_equality() {
        let a: Value = value(3u64);
        let b: Value = value(3u64);
        let c: Value = value(3u32);
        assert!(a.eq_object(&*b));
        assert!(!a.eq_object(&*c));
    }
}
