// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier type and derivation helpers.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

/// Width of an identifier in bytes (160 bits).
pub const ID_LEN: usize = 20;

/// Opaque 160-bit identifier addressing records in the database.
///
/// `Id`s are produced by the canonical encoder ([`crate::hash`]), by hashing a
/// UTF-8 string ([`Id::of_str`]), or by deriving a new identifier from an
/// existing one ([`Id::derive`]). The all-zero value is reserved as "unset".
///
/// Equality and total ordering are byte-wise. `Display` renders lowercase hex.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id(pub [u8; ID_LEN]);

impl Id {
    /// The reserved "unset" identifier.
    pub const ZERO: Id = Id([0; ID_LEN]);

    /// View the identifier as a byte array.
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Returns `true` unless this is [`Id::ZERO`].
    pub fn is_valid(&self) -> bool {
        *self != Self::ZERO
    }

    /// Hashes the UTF-8 bytes of `s`.
    pub fn of_str(s: &str) -> Self {
        Self::of_bytes(s.as_bytes())
    }

    /// Hashes raw bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        Self::from_digest(hasher)
    }

    /// Derives a new identifier as `sha1(prefix || id)`.
    ///
    /// Used to name the product of a resolvable; the prefix keeps derived
    /// identifiers in a namespace disjoint from encoded values, whose digests
    /// always begin with a type-name frame.
    pub fn derive(prefix: &str, id: &Id) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(prefix.as_bytes());
        hasher.update(id.0);
        Self::from_digest(hasher)
    }

    pub(crate) fn from_digest(hasher: Sha1) -> Self {
        let digest = hasher.finalize();
        let mut out = [0u8; ID_LEN];
        out.copy_from_slice(&digest[..ID_LEN]);
        Self(out)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

/// Error returned when parsing an [`Id`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier {text:?}: expected {} hex digits", ID_LEN * 2)]
pub struct ParseIdError {
    /// The rejected input.
    pub text: String,
}

impl FromStr for Id {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError { text: s.to_owned() };
        let bytes = hex::decode(s).map_err(|_| err())?;
        let arr: [u8; ID_LEN] = bytes.try_into().map_err(|_| err())?;
        Ok(Self(arr))
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            text.parse().map_err(D::Error::custom)
        } else {
            let bytes = serde_bytes_compat::deserialize(deserializer)?;
            let arr: [u8; ID_LEN] = bytes
                .try_into()
                .map_err(|_| D::Error::custom("identifier must be 20 bytes"))?;
            Ok(Self(arr))
        }
    }
}

mod serde_bytes_compat {
    use serde::de::{Deserializer, Error, SeqAccess, Visitor};
    use std::fmt;

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E: Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::new();
            while let Some(b) = seq.next_element::<u8>()? {
                out.push(b);
            }
            Ok(out)
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        d.deserialize_bytes(BytesVisitor)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_reserved() {
        assert!(!Id::ZERO.is_valid());
        assert!(Id::of_str("").is_valid());
    }

    #[test]
    fn hex_round_trip() {
        let id = Id::of_str("hello");
        let text = id.to_string();
        assert_eq!(text.len(), 40);
        assert_eq!(text, text.to_lowercase());
        assert_eq!(text.parse::<Id>().unwrap(), id);
    }

    #[test]
    fn parse_rejects_wrong_width() {
        assert!("abcd".parse::<Id>().is_err());
        assert!("zz".repeat(20).parse::<Id>().is_err());
    }

    #[test]
    fn derive_is_prefix_separated() {
        let id = Id::of_str("x");
        assert_ne!(Id::derive("resolvable:", &id), Id::derive("other:", &id));
        assert_ne!(Id::derive("resolvable:", &id), id);
    }

    #[test]
    fn of_str_matches_known_sha1() {
        // sha1("hello")
        assert_eq!(
            Id::of_str("hello").to_string(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }
}
