// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Resolve lifecycle: dedup, lazy pipelines, cancellation coalescing, chains.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prism_db::{
    async_trait, value, Context, Database, Error, ErrorKind, Id, Resolvable, Result, Storable,
    Value,
};
use serde::Serialize;
use tokio::time::timeout;

static ANSWER_CALLS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, PartialEq, Serialize)]
struct Answer {
    tag: &'static str,
}

#[async_trait]
impl Resolvable for Answer {
    async fn resolve(&self, _ctx: &Context) -> Result<Value> {
        ANSWER_CALLS.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(value(42i64))
    }
}

impl Storable for Answer {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

static SLEEPER_STARTS: AtomicUsize = AtomicUsize::new(0);

/// Sleeps until its build is cancelled.
#[derive(Debug, PartialEq, Serialize)]
struct Sleeper;

#[async_trait]
impl Resolvable for Sleeper {
    async fn resolve(&self, ctx: &Context) -> Result<Value> {
        SLEEPER_STARTS.fetch_add(1, Ordering::SeqCst);
        ctx.cancelled().await;
        Err(Error::Cancelled)
    }
}

impl Storable for Sleeper {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

/// Resolves to another resolvable, which resolves to a string.
#[derive(Debug, PartialEq, Serialize)]
struct Outer(u32);

#[derive(Debug, PartialEq, Serialize)]
struct Inner(u32);

#[async_trait]
impl Resolvable for Outer {
    async fn resolve(&self, _ctx: &Context) -> Result<Value> {
        Ok(value(Inner(self.0 + 1)))
    }
}

impl Storable for Outer {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

#[async_trait]
impl Resolvable for Inner {
    async fn resolve(&self, _ctx: &Context) -> Result<Value> {
        Ok(value(format!("inner {}", self.0)))
    }
}

impl Storable for Inner {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

/// Resolves a nested description and then panics.
#[derive(Debug, PartialEq, Serialize)]
struct Exploder {
    depth: u32,
}

#[async_trait]
impl Resolvable for Exploder {
    async fn resolve(&self, ctx: &Context) -> Result<Value> {
        if self.depth == 0 {
            panic!("kaboom");
        }
        let db = ctx.database()?;
        db.build(
            ctx,
            Exploder {
                depth: self.depth - 1,
            },
        )
        .await
    }
}

impl Storable for Exploder {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

/// Fails with a typed error.
#[derive(Debug, PartialEq, Serialize)]
struct Failing;

#[async_trait]
impl Resolvable for Failing {
    async fn resolve(&self, _ctx: &Context) -> Result<Value> {
        Err(Error::unavailable("no framebuffer bound"))
    }
}

impl Storable for Failing {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

fn setup() -> (Database, Context) {
    let db = Database::new();
    let ctx = Context::new().with_database(db.clone());
    (db, ctx)
}

#[tokio::test]
async fn equal_values_share_one_record() {
    let (db, ctx) = setup();
    let a = db.store(String::from("hello")).unwrap();
    let b = db.store(String::from("hello")).unwrap();
    assert_eq!(a, b);
    assert!(db.contains(&a));
    let v = db.resolve_as::<String>(&ctx, a).await.unwrap();
    assert_eq!(v.as_str(), "hello");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lazy_pipeline_builds_once_across_concurrent_waiters() {
    let (db, ctx) = setup();
    let id = db.store(Answer { tag: "s2" }).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let db = db.clone();
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            *db.resolve_as::<i64>(&ctx, id).await.unwrap()
        }));
    }
    for t in tasks {
        assert_eq!(t.await.unwrap(), 42);
    }
    assert_eq!(ANSWER_CALLS.load(Ordering::SeqCst), 1);

    let again = db.resolve_as::<i64>(&ctx, id).await.unwrap();
    assert_eq!(*again, 42);
    assert_eq!(ANSWER_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(db.build_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_coalesces_across_waiters() {
    let (db, ctx) = setup();
    let id = db.store(Sleeper).unwrap();

    let ctx_a = ctx.child();
    let ctx_b = ctx.child();
    let a = {
        let db = db.clone();
        let ctx_a = ctx_a.clone();
        tokio::spawn(async move { db.resolve(&ctx_a, id).await })
    };
    let b = {
        let db = db.clone();
        let ctx_b = ctx_b.clone();
        tokio::spawn(async move { db.resolve(&ctx_b, id).await })
    };

    // Wait until both are parked on the same build.
    timeout(Duration::from_secs(5), async {
        while db.waiters(&id) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("both waiters parked");
    assert_eq!(db.build_count(), 1);

    ctx_a.cancel_token().cancel();
    let res_a = a.await.unwrap();
    assert_eq!(res_a.unwrap_err(), Error::Cancelled);
    assert!(db.has_resolve_state(&id), "build continues for B");
    assert_eq!(db.waiters(&id), 1);

    ctx_b.cancel_token().cancel();
    let res_b = b.await.unwrap();
    assert_eq!(res_b.unwrap_err().kind(), ErrorKind::Cancelled);
    assert!(!db.has_resolve_state(&id), "abandoned build is discarded");

    // A third resolve starts a fresh build.
    let ctx_c = ctx.child();
    let c = {
        let db = db.clone();
        let ctx_c = ctx_c.clone();
        tokio::spawn(async move { db.resolve(&ctx_c, id).await })
    };
    timeout(Duration::from_secs(5), async {
        while db.waiters(&id) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("third waiter parked");
    assert_eq!(db.build_count(), 2);
    ctx_c.cancel_token().cancel();
    assert!(c.await.unwrap().is_err());
}

#[tokio::test]
async fn dropping_a_waiting_future_releases_the_build() {
    let (db, ctx) = setup();
    #[derive(Debug, PartialEq, Serialize)]
    struct Parked(u8);
    #[async_trait]
    impl Resolvable for Parked {
        async fn resolve(&self, ctx: &Context) -> Result<Value> {
            ctx.cancelled().await;
            Err(Error::Cancelled)
        }
    }
    impl Storable for Parked {
        fn as_resolvable(&self) -> Option<&dyn Resolvable> {
            Some(self)
        }
    }

    let id = db.store(Parked(1)).unwrap();
    let res = timeout(Duration::from_millis(50), db.resolve(&ctx, id)).await;
    assert!(res.is_err(), "timed out");
    assert_eq!(db.waiters(&id), 0);
    assert!(!db.has_resolve_state(&id));
}

#[tokio::test]
async fn chains_collapse_to_terminal_value() {
    let (db, ctx) = setup();
    let id = db.store(Outer(1)).unwrap();
    let v = db.resolve_as::<String>(&ctx, id).await.unwrap();
    assert_eq!(v.as_str(), "inner 2");
    assert_eq!(db.build_count(), 2);
}

#[tokio::test]
async fn build_errors_reach_every_waiter_and_stick() {
    let (db, ctx) = setup();
    let id = db.store(Failing).unwrap();
    let first = db.resolve(&ctx, id).await.unwrap_err();
    let second = db.resolve(&ctx, id).await.unwrap_err();
    assert_eq!(first, second);
    assert_eq!(first.kind(), ErrorKind::DataUnavailable);
    assert_eq!(db.build_count(), 1);
}

#[tokio::test]
async fn panics_are_rethrown_with_the_resolve_chain() {
    let (db, ctx) = setup();
    let id = db.store(Exploder { depth: 2 }).unwrap();
    let err = db.resolve(&ctx, id).await.unwrap_err();
    let Error::RethrownPanic { message, trace } = err else {
        panic!("expected a rethrown panic, got {err:?}");
    };
    assert_eq!(message, "kaboom");
    assert!(trace.contains("Exploder"), "{trace}");
    assert!(trace.contains("Store():"), "{trace}");
    assert!(trace.contains("Build() #2"), "{trace}");
}

#[tokio::test]
async fn cancelled_caller_returns_cancelled_immediately() {
    let (db, ctx) = setup();
    let id = db.store(Sleeper).unwrap();
    let ctx = ctx.child();
    ctx.cancel_token().cancel();
    let err = db.resolve(&ctx, id).await.unwrap_err();
    assert_eq!(err, Error::Cancelled);
    assert!(!db.has_resolve_state(&id));
}

#[test]
fn store_rejects_unencodable_values() {
    #[derive(Debug, PartialEq, Serialize)]
    struct Opaque {
        handle: prism_db::Unencodable<u64>,
    }
    impl Storable for Opaque {}

    let db = Database::new();
    let err = db
        .store(Opaque {
            handle: prism_db::Unencodable(7),
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EncodingFailed);
    assert!(db.is_empty());
}

#[test]
fn identical_encodings_share_identifiers_across_stores() {
    let a = Database::new();
    let b = Database::new();
    let x: Id = a.store(vec![1u8, 2, 3]).unwrap();
    let y: Id = b.store(vec![1u8, 2, 3]).unwrap();
    assert_eq!(x, y);
    let _: Arc<dyn prism_db::Object> = a.object(&x).unwrap();
}
