// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The resolvable contract.

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;
use crate::object::Value;

/// A content-addressed description of a computation.
///
/// A resolvable is stored like any other value; resolving its identifier
/// evaluates [`resolve`](Resolvable::resolve) at most once and stores the
/// returned value under the product identifier
/// (`Id::derive("resolvable:", id)`). The returned value may itself be a
/// resolvable, in which case resolution continues through it.
///
/// Evaluation must be deterministic modulo the ambient [`Context`] (bound
/// capture and replay device). Long computations should poll
/// [`Context::check_cancelled`] at natural suspension points: once every
/// waiter has abandoned the build the context's token fires.
#[async_trait]
pub trait Resolvable: Send + Sync {
    /// Evaluates the description.
    async fn resolve(&self, ctx: &Context) -> Result<Value>;
}
