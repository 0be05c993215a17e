// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Content-addressed, lazy, deduplicating compute cache for Prism.
//!
//! `prism-db` stores values keyed by the SHA-1 of their canonical encoding
//! ([`Id`]). Values that are [`Resolvable`] are descriptions of computations:
//! resolving their identifier evaluates them at most once, stores the product
//! under a derived identifier, and hands the stored product to every caller.
//!
//! # Hash Domain Policy
//!
//! Value identifiers hash the value's type name followed by its canonical
//! encoding ([`canon`]). Product identifiers are `sha1("resolvable:" || id)`.
//! Identifiers are for deduplication only; they carry no integrity guarantee.
//!
//! # Concurrency
//!
//! [`Database::resolve`] is the only suspension point. It must run inside a
//! tokio runtime because builds are spawned as tasks.
#![forbid(unsafe_code)]

pub mod canon;
mod context;
mod database;
mod error;
mod ident;
mod object;
mod resolvable;

pub use canon::{EncodeError, Encoder, Shared, Unencodable};
pub use context::{Context, MAX_TRACE_FRAMES};
pub use database::{Database, PRODUCT_PREFIX};
pub use error::{Error, ErrorKind, Result};
pub use ident::{Id, ParseIdError, ID_LEN};
pub use object::{downcast, hash_object, value, Object, Storable, Value};
pub use resolvable::Resolvable;

/// Re-export so implementors of [`Resolvable`] need not depend on
/// `async-trait` directly.
pub use async_trait::async_trait;

/// Hashes a storable value exactly as [`Database::store`] would.
///
/// # Errors
/// Returns [`Error::EncodingFailed`] if the value graph cannot be encoded.
pub fn hash<T: Storable>(value: &T) -> Result<Id> {
    hash_object(value)
}
