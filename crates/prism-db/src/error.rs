// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy shared by the database and every resolver built on it.
//!
//! Resolvables run on background tasks and their terminal error is handed to
//! every waiter, so [`Error`] is `Clone`. Each variant maps to exactly one
//! [`ErrorKind`], the machine-readable discriminant exposed on the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ident::Id;

/// Result alias used throughout Prism.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while storing, resolving, or navigating values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An identifier, map key, or sub-command index is unknown.
    #[error("not found: {what}")]
    NotFound {
        /// Human-readable description of the missing item.
        what: String,
    },
    /// A numeric index fell outside the valid range.
    #[error("index {index} out of bounds [{min} - {max}]")]
    OutOfBounds {
        /// The requested index.
        index: u64,
        /// Lowest valid index.
        min: u64,
        /// Highest valid index.
        max: u64,
    },
    /// A `[start, end)` slice is not within `[0, len]` or `start > end`.
    #[error("slice [{start}:{end}] out of bounds for length {len}")]
    SliceOutOfBounds {
        /// Requested start.
        start: u64,
        /// Requested end.
        end: u64,
        /// Length of the sliced value.
        len: u64,
    },
    /// Navigation walked through a nil pointer or link.
    #[error("nil dereference at {path}")]
    NilDeref {
        /// Path of the nil value.
        path: String,
    },
    /// A struct has no field with the requested name.
    #[error("field {field:?} not found on {type_name}")]
    FieldNotFound {
        /// Requested field name.
        field: String,
        /// Type that was searched.
        type_name: String,
    },
    /// A command has no parameter with the requested name.
    #[error("parameter {name:?} not found on command {command}")]
    ParameterNotFound {
        /// Requested parameter name.
        name: String,
        /// Name of the command.
        command: String,
    },
    /// A command has no result value.
    #[error("command {command} has no result")]
    ResultNotFound {
        /// Name of the command.
        command: String,
    },
    /// The value does not support array indexing.
    #[error("type {type_name} is not array-indexable")]
    NotArrayIndexable {
        /// Type of the indexed value.
        type_name: String,
    },
    /// The value does not support slicing.
    #[error("type {type_name} is not slice-indexable")]
    NotSliceIndexable {
        /// Type of the sliced value.
        type_name: String,
    },
    /// The value does not support map indexing.
    #[error("type {type_name} is not map-indexable")]
    NotMapIndexable {
        /// Type of the indexed value.
        type_name: String,
    },
    /// A map key could not be converted to the map's key type.
    #[error("incorrect map key type: got {got}, map keys are {expected}")]
    IncorrectMapKeyType {
        /// Type of the supplied key.
        got: String,
        /// Key type of the map.
        expected: String,
    },
    /// Attempted to mutate a path node that forbids it.
    #[error("{kind} paths are immutable")]
    Immutable {
        /// Path node kind.
        kind: String,
    },
    /// Attempted to follow a value that is not a link.
    #[error("{path} is not followable")]
    NotFollowable {
        /// Path that was followed.
        path: String,
    },
    /// The data exists but cannot be computed at this point.
    #[error("data unavailable: {reason}")]
    DataUnavailable {
        /// Why the data is unavailable.
        reason: String,
    },
    /// The canonical encoder reached a value it cannot encode.
    #[error("encoding failed for {type_name}: {reason}")]
    EncodingFailed {
        /// Type being encoded.
        type_name: String,
        /// Encoder diagnostic.
        reason: String,
    },
    /// The ambient cancellation token fired.
    #[error("cancelled")]
    Cancelled,
    /// A command-tree group would straddle an existing group's boundary.
    #[error("group [{start}, {end}) overlaps existing group {existing:?}")]
    OverlappingGroup {
        /// Requested start.
        start: u64,
        /// Requested end (exclusive).
        end: u64,
        /// Name of the group in the way.
        existing: String,
    },
    /// A build task panicked.
    #[error("{message}\n{trace}")]
    RethrownPanic {
        /// Panic payload rendered as text.
        message: String,
        /// Resolve chain and build call sites, most recent first.
        trace: String,
    },
    /// The request was malformed.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong.
        reason: String,
    },
    /// The path kind is served by a collaborator that is not registered.
    #[error("{kind} paths are not supported by this service")]
    Unsupported {
        /// Path node kind.
        kind: String,
    },
    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Machine-readable error discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// See [`Error::NotFound`].
    NotFound,
    /// See [`Error::OutOfBounds`].
    OutOfBounds,
    /// See [`Error::SliceOutOfBounds`].
    SliceOutOfBounds,
    /// See [`Error::NilDeref`].
    NilDeref,
    /// See [`Error::FieldNotFound`].
    FieldNotFound,
    /// See [`Error::ParameterNotFound`].
    ParameterNotFound,
    /// See [`Error::ResultNotFound`].
    ResultNotFound,
    /// See [`Error::NotArrayIndexable`].
    TypeNotArrayIndexable,
    /// See [`Error::NotSliceIndexable`].
    TypeNotSliceIndexable,
    /// See [`Error::NotMapIndexable`].
    TypeNotMapIndexable,
    /// See [`Error::IncorrectMapKeyType`].
    IncorrectMapKeyType,
    /// See [`Error::Immutable`].
    Immutable,
    /// See [`Error::NotFollowable`].
    NotFollowable,
    /// See [`Error::DataUnavailable`].
    DataUnavailable,
    /// See [`Error::EncodingFailed`].
    EncodingFailed,
    /// See [`Error::Cancelled`].
    Cancelled,
    /// See [`Error::OverlappingGroup`].
    OverlappingGroup,
    /// See [`Error::RethrownPanic`].
    RethrownPanic,
    /// See [`Error::InvalidArgument`].
    InvalidArgument,
    /// See [`Error::Unsupported`].
    Unsupported,
    /// See [`Error::Internal`].
    Internal,
}

impl Error {
    /// Returns the machine-readable discriminant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            Self::SliceOutOfBounds { .. } => ErrorKind::SliceOutOfBounds,
            Self::NilDeref { .. } => ErrorKind::NilDeref,
            Self::FieldNotFound { .. } => ErrorKind::FieldNotFound,
            Self::ParameterNotFound { .. } => ErrorKind::ParameterNotFound,
            Self::ResultNotFound { .. } => ErrorKind::ResultNotFound,
            Self::NotArrayIndexable { .. } => ErrorKind::TypeNotArrayIndexable,
            Self::NotSliceIndexable { .. } => ErrorKind::TypeNotSliceIndexable,
            Self::NotMapIndexable { .. } => ErrorKind::TypeNotMapIndexable,
            Self::IncorrectMapKeyType { .. } => ErrorKind::IncorrectMapKeyType,
            Self::Immutable { .. } => ErrorKind::Immutable,
            Self::NotFollowable { .. } => ErrorKind::NotFollowable,
            Self::DataUnavailable { .. } => ErrorKind::DataUnavailable,
            Self::EncodingFailed { .. } => ErrorKind::EncodingFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::OverlappingGroup { .. } => ErrorKind::OverlappingGroup,
            Self::RethrownPanic { .. } => ErrorKind::RethrownPanic,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a missing database record.
    pub fn missing_id(id: &Id) -> Self {
        Self::NotFound {
            what: format!("record {id}"),
        }
    }

    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Shorthand for [`Error::DataUnavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::DataUnavailable {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::InvalidArgument`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Builds an [`Error::OutOfBounds`] for `index` against a collection of
    /// `len` elements.
    pub fn out_of_bounds(index: u64, len: u64) -> Self {
        Self::OutOfBounds {
            index,
            min: 0,
            max: len.saturating_sub(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_as_kebab_case() {
        let kind = Error::out_of_bounds(7, 3).kind();
        assert_eq!(kind, ErrorKind::OutOfBounds);
        let debug = format!("{:?}", ErrorKind::TypeNotMapIndexable);
        assert_eq!(debug, "TypeNotMapIndexable");
    }

    #[test]
    fn out_of_bounds_reports_valid_range() {
        let err = Error::out_of_bounds(5, 3);
        assert_eq!(err.to_string(), "index 5 out of bounds [0 - 2]");
    }
}
