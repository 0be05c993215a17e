// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory content-addressed store with at-most-once lazy resolution.
//!
//! # Record lifecycle
//!
//! - [`Database::store`] hashes a value and inserts a record under its
//!   identifier. Records live for the lifetime of the database.
//! - [`Database::resolve`] on a leaf record returns the stored value.
//! - [`Database::resolve`] on a resolvable record creates (at most one)
//!   resolve state, spawns the build on the ambient tokio runtime, and parks
//!   the caller until the build completes or the caller's token fires.
//! - When the last waiter leaves before the build completes, the build's token
//!   is cancelled, its task aborted, and the resolve state discarded; the next
//!   resolver starts a fresh build.
//! - A completed build is never cancelled. On success the product is stored
//!   under `Id::derive("resolvable:", id)` and resolution continues there.
//!
//! All resolve-state transitions happen under the store lock; waiting happens
//! outside it.

use std::collections::hash_map::Entry;
use std::panic::{AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::context::{ChainLink, Context};
use crate::error::{Error, Result};
use crate::ident::Id;
use crate::object::{downcast, hash_object, Storable, Value};

/// Prefix used to derive the product identifier of a resolvable.
pub const PRODUCT_PREFIX: &str = "resolvable:";

/// Build bookkeeping for a resolvable record.
struct ResolveState {
    generation: u64,
    product: Id,
    finished: watch::Sender<bool>,
    completed: bool,
    err: Option<Error>,
    waiters: usize,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct Record {
    object: Value,
    created: &'static Location<'static>,
    resolve: Option<ResolveState>,
}

struct Inner {
    records: Mutex<FxHashMap<Id, Record>>,
    generation: AtomicU64,
    builds: AtomicU64,
}

/// Shared handle to a content-addressed database.
///
/// Cloning the handle shares the underlying store.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("records", &self.len())
            .field("builds", &self.build_count())
            .finish()
    }
}

impl Database {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(FxHashMap::default()),
                generation: AtomicU64::new(0),
                builds: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<Id, Record>> {
        self.inner
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of records in the store.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of builds started over the lifetime of the database.
    pub fn build_count(&self) -> u64 {
        self.inner.builds.load(Ordering::Relaxed)
    }

    /// Stores `value` and returns its identifier.
    ///
    /// Storing an equal value again returns the same identifier and leaves the
    /// existing record untouched.
    ///
    /// # Errors
    /// Returns [`Error::EncodingFailed`] if the value cannot be hashed. In
    /// debug builds, returns [`Error::Internal`] if an existing record with the
    /// same identifier is not structurally equal to `value`.
    #[track_caller]
    pub fn store<T: Storable>(&self, value: T) -> Result<Id> {
        self.store_value(Arc::new(value))
    }

    /// Stores an already type-erased value.
    ///
    /// # Errors
    /// See [`Database::store`].
    #[track_caller]
    pub fn store_value(&self, value: Value) -> Result<Id> {
        let created = Location::caller();
        let id = hash_object(&*value)?;
        let mut records = self.lock();
        match records.entry(id) {
            Entry::Occupied(existing) => {
                if cfg!(debug_assertions) && !existing.get().object.eq_object(&*value) {
                    error!(%id, type_name = value.type_name(), "identifier collision");
                    return Err(Error::Internal(format!(
                        "identifier {id} already maps to a different {}",
                        existing.get().object.type_name()
                    )));
                }
            }
            Entry::Vacant(slot) => {
                debug!(%id, type_name = value.type_name(), %created, "stored record");
                slot.insert(Record {
                    object: value,
                    created,
                    resolve: None,
                });
            }
        }
        Ok(id)
    }

    /// Returns `true` if a record exists for `id`.
    pub fn contains(&self, id: &Id) -> bool {
        self.lock().contains_key(id)
    }

    /// Returns the raw stored object for `id` without building it.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if there is no record.
    pub fn object(&self, id: &Id) -> Result<Value> {
        self.lock()
            .get(id)
            .map(|r| Arc::clone(&r.object))
            .ok_or_else(|| Error::missing_id(id))
    }

    /// Resolves `id` to a value, building resolvables as needed.
    ///
    /// Concurrent calls for the same identifier share a single build. Chains
    /// of resolvables collapse to the terminal value.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if `id` (or a product in the chain) has no record
    /// - [`Error::Cancelled`] if `ctx` is cancelled while waiting
    /// - whatever error the build recorded, including
    ///   [`Error::RethrownPanic`]
    #[track_caller]
    pub fn resolve<'a>(
        &'a self,
        ctx: &'a Context,
        id: Id,
    ) -> impl std::future::Future<Output = Result<Value>> + Send + 'a {
        let caller = Location::caller();
        self.resolve_at(ctx, id, caller)
    }

    /// Resolves `id` and downcasts the result to `T`.
    ///
    /// # Errors
    /// See [`Database::resolve`]; additionally [`Error::Internal`] on a type
    /// mismatch.
    #[track_caller]
    pub fn resolve_as<'a, T: Storable>(
        &'a self,
        ctx: &'a Context,
        id: Id,
    ) -> impl std::future::Future<Output = Result<Arc<T>>> + Send + 'a {
        let caller = Location::caller();
        async move { downcast::<T>(self.resolve_at(ctx, id, caller).await?) }
    }

    /// Stores `value` and resolves it in one step.
    ///
    /// # Errors
    /// See [`Database::store`] and [`Database::resolve`].
    #[track_caller]
    pub fn build<'a, T: Storable>(
        &'a self,
        ctx: &'a Context,
        value: T,
    ) -> impl std::future::Future<Output = Result<Value>> + Send + 'a {
        let caller = Location::caller();
        let stored = self.store_value(Arc::new(value));
        async move { self.resolve_at(ctx, stored?, caller).await }
    }

    async fn resolve_at(
        &self,
        ctx: &Context,
        mut id: Id,
        caller: &'static Location<'static>,
    ) -> Result<Value> {
        loop {
            let (mut finished, generation) = {
                let mut records = self.lock();
                let record = records.get_mut(&id).ok_or_else(|| Error::missing_id(&id))?;
                if record.object.resolvable().is_none() {
                    return Ok(Arc::clone(&record.object));
                }
                if record.resolve.is_none() {
                    record.resolve = Some(self.start_build(ctx, id, record, caller));
                }
                let Some(state) = record.resolve.as_mut() else {
                    return Err(Error::Internal("resolve state vanished".into()));
                };
                state.waiters += 1;
                (state.finished.subscribe(), state.generation)
            };

            let guard = WaitGuard {
                db: self,
                id,
                generation,
                armed: true,
            };
            let cancelled = tokio::select! {
                biased;
                _ = finished.wait_for(|done| *done) => false,
                () = ctx.cancelled() => true,
            };
            let outcome = guard.leave();

            if cancelled {
                return Err(Error::Cancelled);
            }
            match outcome {
                Some(Ok(product)) => id = product,
                Some(Err(err)) => return Err(err),
                None => return Err(Error::Internal(format!("build of {id} ended unfinished"))),
            }
        }
    }

    fn start_build(
        &self,
        ctx: &Context,
        id: Id,
        record: &Record,
        caller: &'static Location<'static>,
    ) -> ResolveState {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let product = Id::derive(PRODUCT_PREFIX, &id);
        let (finished, _) = watch::channel(false);
        let cancel = CancellationToken::new();
        let link = Arc::new(ChainLink {
            id,
            type_name: record.object.type_name(),
            stored_at: record.created,
            built_at: caller,
            parent: ctx.chain().cloned(),
        });
        let build_ctx = ctx.for_build(cancel.clone(), link);
        let object = Arc::clone(&record.object);
        let db = self.clone();
        self.inner.builds.fetch_add(1, Ordering::Relaxed);
        debug!(%id, type_name = object.type_name(), %caller, "build started");

        let task = tokio::spawn(async move {
            let evaluate = async {
                match object.resolvable() {
                    Some(r) => r.resolve(&build_ctx).await,
                    None => Err(Error::Internal(format!("{id} is not resolvable"))),
                }
            };
            let result = tokio::select! {
                biased;
                () = build_ctx.cancelled() => Err(Error::Cancelled),
                caught = AssertUnwindSafe(evaluate).catch_unwind() => match caught {
                    Ok(result) => result,
                    Err(payload) => Err(rethrown(payload.as_ref(), &build_ctx)),
                },
            };
            db.finish_build(id, generation, result);
        });

        ResolveState {
            generation,
            product,
            finished,
            completed: false,
            err: None,
            waiters: 0,
            cancel,
            task: Some(task),
        }
    }

    fn finish_build(&self, id: Id, generation: u64, result: Result<Value>) {
        let mut records = self.lock();
        let (product, created) = match records.get(&id) {
            Some(Record {
                resolve: Some(state),
                created,
                ..
            }) if state.generation == generation => (state.product, *created),
            _ => {
                debug!(%id, "discarded build finished");
                return;
            }
        };
        let err = match result {
            Ok(value) => {
                records.entry(product).or_insert_with(|| Record {
                    object: value,
                    created,
                    resolve: None,
                });
                None
            }
            Err(err) => Some(err),
        };
        if let Some(state) = records.get_mut(&id).and_then(|r| r.resolve.as_mut()) {
            match &err {
                Some(e) => debug!(%id, error = %e, "build failed"),
                None => debug!(%id, %product, "build finished"),
            }
            state.err = err;
            state.completed = true;
            state.task = None;
            state.finished.send_replace(true);
        }
    }

    /// Detaches a waiter. Returns the build outcome once it has completed.
    fn leave(&self, id: Id, generation: u64) -> Option<Result<Id>> {
        let mut records = self.lock();
        let record = records.get_mut(&id)?;
        let state = record
            .resolve
            .as_mut()
            .filter(|s| s.generation == generation)?;
        state.waiters = state.waiters.saturating_sub(1);
        if state.completed {
            return Some(match &state.err {
                Some(err) => Err(err.clone()),
                None => Ok(state.product),
            });
        }
        if state.waiters == 0 {
            warn!(%id, "all waiters left; cancelling build");
            state.cancel.cancel();
            if let Some(task) = state.task.take() {
                task.abort();
            }
            record.resolve = None;
        }
        None
    }

    /// Returns the number of tasks currently waiting on the build of `id`.
    pub fn waiters(&self, id: &Id) -> usize {
        self.lock()
            .get(id)
            .and_then(|r| r.resolve.as_ref())
            .map_or(0, |s| s.waiters)
    }

    /// Returns `true` if `id` has a resolve state (building or built).
    pub fn has_resolve_state(&self, id: &Id) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|r| r.resolve.is_some())
    }
}

/// Decrements the waiter count when a resolve future is dropped mid-wait.
struct WaitGuard<'a> {
    db: &'a Database,
    id: Id,
    generation: u64,
    armed: bool,
}

impl WaitGuard<'_> {
    fn leave(mut self) -> Option<Result<Id>> {
        self.armed = false;
        self.db.leave(self.id, self.generation)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.db.leave(self.id, self.generation);
        }
    }
}

fn rethrown(payload: &(dyn std::any::Any + Send), ctx: &Context) -> Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with non-string payload".to_owned());
    let trace = ctx.resolve_trace();
    error!(%message, %trace, "build panicked");
    Error::RethrownPanic { message, trace }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn store_is_stable() {
        let db = Database::new();
        let a = db.store(String::from("hello")).unwrap();
        let b = db.store(String::from("hello")).unwrap();
        assert_eq!(a, b);
        assert_eq!(db.len(), 1);
        assert!(db.contains(&a));
    }

    #[tokio::test]
    async fn resolve_leaf_returns_value() {
        let db = Database::new();
        let ctx = Context::new().with_database(db.clone());
        let id = db.store(42u32).unwrap();
        let v = db.resolve_as::<u32>(&ctx, id).await.unwrap();
        assert_eq!(*v, 42);
        assert_eq!(db.build_count(), 0);
    }

    #[tokio::test]
    async fn resolve_missing_is_not_found() {
        let db = Database::new();
        let ctx = Context::new();
        let err = db.resolve(&ctx, Id::of_str("nope")).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[test]
    fn product_ids_are_disjoint_from_values() {
        let db = Database::new();
        let id = db.store(String::from("x")).unwrap();
        assert_ne!(Id::derive(PRODUCT_PREFIX, &id), id);
    }
}
