// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request scope threaded through every resolve.

use std::any::{Any, TypeId};
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::ident::Id;

/// One in-flight build in the resolve chain of a task.
///
/// Each build task extends its parent's chain so a panic deep inside a lazy
/// pipeline can report every resolvable that led to it.
#[derive(Debug)]
pub(crate) struct ChainLink {
    pub(crate) id: Id,
    pub(crate) type_name: &'static str,
    pub(crate) stored_at: &'static Location<'static>,
    pub(crate) built_at: &'static Location<'static>,
    pub(crate) parent: Option<Arc<ChainLink>>,
}

/// Maximum number of frames rendered by [`Context::resolve_trace`].
pub const MAX_TRACE_FRAMES: usize = 10;

type Extensions = FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Ambient bundle carried by every resolve: the database, the bound capture,
/// the replay device, a cancellation token, and the resolve chain.
///
/// Request-scoped services (API backends, device lists) ride along as typed
/// extensions so that stored descriptions stay plain data.
///
/// Contexts are cheap to clone; `with_*` builders return modified copies.
#[derive(Clone, Default)]
pub struct Context {
    database: Option<Database>,
    capture: Option<Id>,
    device: Option<Id>,
    cancel: CancellationToken,
    chain: Option<Arc<ChainLink>>,
    extensions: Arc<Extensions>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("database", &self.database.is_some())
            .field("capture", &self.capture)
            .field("device", &self.device)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("extensions", &self.extensions.len())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Creates an empty context with a fresh cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `db` to the context.
    ///
    /// # Panics
    /// Panics if a database is already attached; a context serves exactly one
    /// database for its lifetime.
    #[must_use]
    pub fn with_database(mut self, db: Database) -> Self {
        assert!(
            self.database.is_none(),
            "a database is already attached to this context"
        );
        self.database = Some(db);
        self
    }

    /// Returns the attached database.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if no database was attached.
    pub fn database(&self) -> Result<&Database> {
        self.database
            .as_ref()
            .ok_or_else(|| Error::Internal("no database attached to context".into()))
    }

    /// Binds the capture identifier.
    #[must_use]
    pub fn with_capture(mut self, capture: Id) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Returns the bound capture identifier.
    pub fn capture(&self) -> Option<Id> {
        self.capture
    }

    /// Binds the replay device identifier.
    #[must_use]
    pub fn with_device(mut self, device: Option<Id>) -> Self {
        self.device = device;
        self
    }

    /// Returns the bound replay device identifier.
    pub fn device(&self) -> Option<Id> {
        self.device
    }

    /// Attaches a request-scoped service, replacing any previous value of the
    /// same type.
    #[must_use]
    pub fn with_extension<T: Any + Send + Sync>(mut self, value: Arc<T>) -> Self {
        Arc::make_mut(&mut self.extensions).insert(TypeId::of::<T>(), value);
        self
    }

    /// Returns the request-scoped service of type `T`, if attached.
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.extensions
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns a copy whose token is a child of this context's token.
    ///
    /// Cancelling the child does not cancel the parent.
    #[must_use]
    pub fn child(&self) -> Self {
        let mut ctx = self.clone();
        ctx.cancel = self.cancel.child_token();
        ctx
    }

    /// The cancellation token of this context.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` once the context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails with [`Error::Cancelled`] once the context has been cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Completes when the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub(crate) fn for_build(&self, cancel: CancellationToken, link: Arc<ChainLink>) -> Self {
        Self {
            database: self.database.clone(),
            capture: self.capture,
            device: self.device,
            cancel,
            chain: Some(link),
            extensions: Arc::clone(&self.extensions),
        }
    }

    pub(crate) fn chain(&self) -> Option<&Arc<ChainLink>> {
        self.chain.as_ref()
    }

    /// Number of in-flight builds that led to this context.
    pub fn chain_depth(&self) -> usize {
        let mut depth = 0;
        let mut link = self.chain.as_deref();
        while let Some(l) = link {
            depth += 1;
            link = l.parent.as_deref();
        }
        depth
    }

    /// Renders the resolve chain, most recent build first.
    ///
    /// ```text
    /// <type> at <id>
    ///   Store(): <file:line:col>
    ///   Build() #0: <file:line:col>
    /// ```
    /// At most [`MAX_TRACE_FRAMES`] frames are rendered.
    pub fn resolve_trace(&self) -> String {
        let mut out = String::new();
        let mut link = self.chain.as_deref();
        let mut frame = 0;
        while let Some(l) = link {
            if frame == MAX_TRACE_FRAMES {
                out.push_str("  ...\n");
                break;
            }
            if frame == 0 {
                out.push_str(&format!("{} at {}\n", l.type_name, l.id));
                out.push_str(&format!("  Store(): {}\n", l.stored_at));
            }
            out.push_str(&format!("  Build() #{frame}: {} ({})\n", l.built_at, l.type_name));
            frame += 1;
            link = l.parent.as_deref();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "already attached")]
    fn attaching_two_databases_panics() {
        let _ = Context::new()
            .with_database(Database::new())
            .with_database(Database::new());
    }

    #[test]
    fn child_cancellation_does_not_propagate_up() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel_token().cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        parent.cancel_token().cancel();
        assert!(parent.check_cancelled().is_err());
    }

    #[test]
    fn extensions_are_typed_and_replaceable() {
        let ctx = Context::new().with_extension(Arc::new(7u32));
        assert_eq!(ctx.extension::<u32>().as_deref(), Some(&7));
        assert!(ctx.extension::<String>().is_none());
        let ctx = ctx.with_extension(Arc::new(9u32));
        assert_eq!(ctx.extension::<u32>().as_deref(), Some(&9));
    }

    #[test]
    fn trace_is_empty_outside_builds() {
        assert_eq!(Context::new().resolve_trace(), "");
        assert_eq!(Context::new().chain_depth(), 0);
    }
}
