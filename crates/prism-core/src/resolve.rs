// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Path dispatcher.
//!
//! [`resolve`] routes a [`Path`] to the resolver for its node kind. Value
//! nodes (fields, indices, slices, map entries) walk their parent's value.
//! Compound nodes (command trees, reports, resources, framebuffer changes,
//! events, stats, state trees) store a resolvable description in the
//! database and resolve it, so each distinct request is computed once.
//! Kinds that need a replay or a renderer go to the context's
//! [`Collaborator`](crate::services::Collaborator).

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use prism_capture::{
    state_after, Attachment, AttachmentInfo, Capture, Command, ConstantSet, ContextInfo,
    FramebufferObservation, GlobalState, MemoryRange, Message, Struct, SubCmdIdx, Val,
};
use prism_db::{async_trait, value, Context, Error, Id, Resolvable, Result, Storable, Value};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::access;
use crate::events::{EventList, EventsResolvable};
use crate::framebuffer::{FramebufferChanges, FramebufferChangesResolvable};
use crate::path::{CapturePath, CommandPath, CommandTreeNodePath, Path, StateTreeNodePath};
use crate::report::{Report, ReportResolvable};
use crate::resources::{ResourceList, ResourcesResolvable};
use crate::services::{self, DeviceInfo};
use crate::state_tree::{StateTree, StateTreeNodeInfo, StateTreeResolvable};
use crate::stats::{Stats, StatsResolvable};
use crate::tree::{CommandTree, CommandTreeResolvable, TreeNodeInfo};
use crate::wire;

/// The internal shape of a resolved path.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum Resolved {
    Val(Val),
    Capture(Arc<Capture>),
    Commands(Vec<Command>),
    Command(Command),
    CommandTree { id: Id, tree: Arc<CommandTree> },
    CommandTreeNode(TreeNodeInfo),
    Contexts(Vec<ContextInfo>),
    Context(ContextInfo),
    ConstantSet(ConstantSet),
    Device(DeviceInfo),
    Events(Arc<EventList>),
    FramebufferAttachments(Vec<(Attachment, AttachmentInfo)>),
    Image(AttachmentInfo),
    FramebufferObservation(FramebufferObservation),
    Messages(Vec<Message>),
    Report(Arc<Report>),
    Resources(Arc<ResourceList>),
    StateTree { id: Id, tree: Arc<StateTree> },
    StateTreeNode(StateTreeNodeInfo),
    Stats(Arc<Stats>),
    Bytes(Vec<u8>),
    /// A path to continue from.
    Path(Path),
    /// A collaborator's answer, already in wire form.
    Wire(wire::Value),
}

impl Resolved {
    /// Converts the result to a [`Val`] so value nodes can navigate it.
    ///
    /// Results other than values are viewed through their wire encoding:
    /// records become structs, sequences arrays.
    ///
    /// # Errors
    /// [`Error::Internal`] if the wire encoding fails.
    pub fn into_val(self) -> Result<Val> {
        match self {
            Self::Val(v) | Self::Wire(wire::Value::Value(v)) => Ok(v),
            Self::Command(c) => Ok(c.to_val()),
            Self::Bytes(b) => Ok(Val::Bytes(b)),
            other => {
                let json = serde_json::to_value(wire::Value::from(other))
                    .map_err(|e| Error::Internal(format!("wire encoding: {e}")))?;
                let kind = json
                    .get("type")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("value")
                    .to_owned();
                let payload = json.get("value").cloned().unwrap_or_default();
                Ok(val_from_json(&kind, payload))
            }
        }
    }
}

fn val_from_json(type_name: &str, json: serde_json::Value) -> Val {
    use serde_json::Value as J;
    match json {
        J::Null => Val::Nil,
        J::Bool(b) => Val::Bool(b),
        J::Number(n) => n
            .as_u64()
            .map(Val::Uint)
            .or_else(|| n.as_i64().map(Val::Int))
            .unwrap_or_else(|| Val::Float(n.as_f64().unwrap_or_default())),
        J::String(s) => Val::Str(s),
        J::Array(items) => {
            Val::Array(items.into_iter().map(|v| val_from_json("object", v)).collect())
        }
        J::Object(fields) => {
            let mut s = Struct::new(type_name);
            for (name, v) in fields {
                s.set(&name, val_from_json("object", v));
            }
            Val::Struct(s)
        }
    }
}

/// Resolvable description of the global state after a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStateResolvable {
    /// Capture identifier.
    pub capture: Id,
    /// Command after which to take the state.
    pub after: SubCmdIdx,
}

impl Storable for GlobalStateResolvable {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

#[async_trait]
impl Resolvable for GlobalStateResolvable {
    async fn resolve(&self, ctx: &Context) -> Result<Value> {
        let capture = ctx.database()?.resolve_as::<Capture>(ctx, self.capture).await?;
        let state = state_after(ctx, &capture, &services::apis(ctx), &self.after)?;
        Ok(value(state))
    }
}

pub(crate) async fn load_capture(ctx: &Context, p: &CapturePath) -> Result<Arc<Capture>> {
    ctx.database()?.resolve_as::<Capture>(ctx, p.id).await
}

async fn load_command(ctx: &Context, p: &CommandPath) -> Result<Command> {
    let capture = load_capture(ctx, &p.capture).await?;
    Ok(capture.command_at(&p.indices)?.clone())
}

/// Checks that `p` names a command (or the initial position).
async fn check_command(ctx: &Context, p: &CommandPath) -> Result<()> {
    if !p.indices.is_initial() {
        load_capture(ctx, &p.capture).await?.command_at(&p.indices)?;
    }
    Ok(())
}

async fn build<D, T>(ctx: &Context, desc: D) -> Result<(Id, Arc<T>)>
where
    D: Storable,
    T: Storable,
{
    let db = ctx.database()?;
    let id = db.store(desc)?;
    let product = db.resolve_as::<T>(ctx, id).await?;
    Ok((id, product))
}

/// The global state after the command `p`.
///
/// # Errors
/// [`Error::NotFound`] for an unknown command.
pub async fn global_state(ctx: &Context, p: &CommandPath) -> Result<Arc<GlobalState>> {
    check_command(ctx, p).await?;
    let desc = GlobalStateResolvable {
        capture: p.capture.id,
        after: p.indices.clone(),
    };
    Ok(build(ctx, desc).await?.1)
}

async fn framebuffer_changes(ctx: &Context, after: &CommandPath) -> Result<Arc<FramebufferChanges>> {
    check_command(ctx, after).await?;
    let desc = FramebufferChangesResolvable {
        capture: after.capture.id,
    };
    Ok(build(ctx, desc).await?.1)
}

fn is_memory(v: &Val) -> bool {
    matches!(access::deref(v, "memory"), Ok(Val::Memory(_)))
}

/// State to read memory-backed `v` through, if it needs one.
async fn memory_state(ctx: &Context, v: &Val, parent: &Path) -> Result<Option<Arc<GlobalState>>> {
    if !is_memory(v) {
        return Ok(None);
    }
    match parent.command() {
        Some(cmd) => Ok(Some(global_state(ctx, &cmd).await?)),
        None => Ok(None),
    }
}

/// Rewrites nil dereferences to name the path that held the nil value.
fn at_parent<T>(res: Result<T>, parent: &Path) -> Result<T> {
    res.map_err(|e| match e {
        Error::NilDeref { .. } => Error::NilDeref {
            path: parent.to_string(),
        },
        other => other,
    })
}

/// Resolves `path` to a [`Val`].
///
/// # Errors
/// The error of the failing resolver; see [`resolve`].
pub fn resolve_val<'a>(ctx: &'a Context, path: &'a Path) -> BoxFuture<'a, Result<Val>> {
    async move {
        ctx.check_cancelled()?;
        match path {
            Path::Parameter(p) => Ok(load_command(ctx, &p.command)
                .await?
                .param_value(&p.name)?
                .clone()),
            Path::Result(p) => Ok(load_command(ctx, &p.command).await?.result_value()?.clone()),
            Path::GlobalState(p) => {
                let apis = services::apis(ctx);
                let state = global_state(ctx, &p.command).await?;
                Ok(state.to_val(|a| apis.name(a)))
            }
            Path::State(p) => {
                let state = global_state(ctx, &p.after).await?;
                state.apis.get(&p.api).cloned().ok_or_else(|| {
                    let name = services::apis(ctx).name(p.api);
                    Error::not_found(format!("{name} state after {}", p.after.indices))
                })
            }
            Path::Memory(p) => {
                let state = global_state(ctx, &p.after).await?;
                Ok(Val::Bytes(state.read_memory(&MemoryRange {
                    pool: p.pool,
                    base: p.address,
                    count: p.size,
                    elem_size: 1,
                })))
            }
            Path::ResourceData(p) => {
                let (_, list) = build::<_, ResourceList>(
                    ctx,
                    ResourcesResolvable {
                        capture: p.after.capture.id,
                    },
                )
                .await?;
                let handle = list.get(&p.id)?.handle;
                let state = global_state(ctx, &p.after).await?;
                state
                    .resources
                    .get(&handle)
                    .map(|r| r.data.clone())
                    .ok_or_else(|| {
                        Error::unavailable(format!(
                            "resource {} does not exist after {}",
                            p.id, p.after.indices
                        ))
                    })
            }
            Path::Field(p) => {
                let parent = resolve_val(ctx, &p.parent).await?;
                at_parent(access::field(&parent, &p.name), &p.parent)
            }
            Path::ArrayIndex(p) => {
                let parent = resolve_val(ctx, &p.parent).await?;
                let state = memory_state(ctx, &parent, &p.parent).await?;
                at_parent(access::array_index(&parent, p.index, state.as_deref()), &p.parent)
            }
            Path::Slice(p) => {
                let parent = resolve_val(ctx, &p.parent).await?;
                let state = memory_state(ctx, &parent, &p.parent).await?;
                at_parent(
                    access::slice(&parent, p.start, p.end, state.as_deref()),
                    &p.parent,
                )
            }
            Path::MapIndex(p) => {
                let parent = resolve_val(ctx, &p.parent).await?;
                at_parent(access::map_index(&parent, &p.key), &p.parent)
            }
            other => resolve(ctx, other).await?.into_val(),
        }
    }
    .boxed()
}

/// Resolves `path`.
///
/// # Errors
/// - [`Error::NotFound`] for unknown captures, commands, trees, contexts or
///   devices
/// - the accessor errors of [`crate::access`] for value nodes
/// - [`Error::Unsupported`] for collaborator kinds without a collaborator
/// - [`Error::Cancelled`] if `ctx` is cancelled
pub fn resolve<'a>(ctx: &'a Context, path: &'a Path) -> BoxFuture<'a, Result<Resolved>> {
    async move {
        ctx.check_cancelled()?;
        trace!(kind = %path.kind(), "resolve");
        Ok(match path {
            Path::Capture(p) => Resolved::Capture(load_capture(ctx, p).await?),
            Path::Commands(p) => {
                let capture = load_capture(ctx, &p.capture).await?;
                let len = capture.len();
                let (start, end) = p.range.unwrap_or((0, len));
                if start > end || end > len {
                    return Err(Error::SliceOutOfBounds { start, end, len });
                }
                Resolved::Commands(capture.commands[start as usize..end as usize].to_vec())
            }
            Path::Command(p) => Resolved::Command(load_command(ctx, p).await?),
            Path::CommandTree(p) => {
                let desc = CommandTreeResolvable {
                    capture: p.capture.id,
                    filter: p.filter.clone(),
                    options: p.options.with_defaults(&services::config(ctx)),
                };
                let (id, tree) = build(ctx, desc).await?;
                Resolved::CommandTree { id, tree }
            }
            Path::CommandTreeNode(p) => {
                let tree = ctx.database()?.resolve_as::<CommandTree>(ctx, p.tree).await?;
                Resolved::CommandTreeNode(tree.node(&p.indices)?)
            }
            Path::CommandTreeNodeForCommand(p) => {
                let tree = ctx.database()?.resolve_as::<CommandTree>(ctx, p.tree).await?;
                let indices = tree.root.indices(&p.command.indices, p.prefer_group);
                Resolved::Path(
                    CommandTreeNodePath {
                        tree: p.tree,
                        indices,
                    }
                    .into(),
                )
            }
            Path::Contexts(p) => {
                let capture = load_capture(ctx, &p.capture).await?;
                Resolved::Contexts(capture.contexts(&services::apis(ctx)))
            }
            Path::Context(p) => {
                let capture = load_capture(ctx, &p.capture).await?;
                let context = capture
                    .contexts(&services::apis(ctx))
                    .into_iter()
                    .find(|c| c.id == p.id)
                    .ok_or_else(|| Error::not_found(format!("context {}", p.id)))?;
                Resolved::Context(context)
            }
            Path::ConstantSet(p) => {
                let api = services::apis(ctx).get(p.api);
                let sets = api.constant_sets();
                if sets.is_empty() {
                    return Ok(Resolved::Wire(services::delegate(ctx, path).await?));
                }
                let set = sets
                    .get(p.index as usize)
                    .ok_or_else(|| Error::out_of_bounds(u64::from(p.index), sets.len() as u64))?;
                Resolved::ConstantSet(set.clone())
            }
            Path::Device(p) => Resolved::Device(services::devices(ctx).get(&p.id)?.clone()),
            Path::Events(p) => {
                let desc = EventsResolvable {
                    capture: p.capture.id,
                    filter: p.filter.clone(),
                    kinds: p.kinds.clone(),
                };
                Resolved::Events(build(ctx, desc).await?.1)
            }
            Path::Report(p) => {
                let desc = ReportResolvable {
                    capture: p.capture.id,
                    device: p.device.or(ctx.device()),
                    filter: p.filter.clone(),
                };
                Resolved::Report(build(ctx, desc).await?.1)
            }
            Path::Resources(p) => {
                let desc = ResourcesResolvable {
                    capture: p.capture.id,
                };
                Resolved::Resources(build(ctx, desc).await?.1)
            }
            Path::Stats(p) => {
                let desc = StatsResolvable {
                    capture: p.capture.id,
                    filter: p.filter.clone(),
                };
                Resolved::Stats(build(ctx, desc).await?.1)
            }
            Path::FramebufferAttachments(p) => {
                let changes = framebuffer_changes(ctx, &p.after).await?;
                Resolved::FramebufferAttachments(changes.bound_after(&p.after.indices))
            }
            Path::FramebufferAttachment(p) => {
                let changes = framebuffer_changes(ctx, &p.after).await?;
                Resolved::Image(changes.attachment_after(p.attachment, &p.after.indices)?)
            }
            Path::FramebufferObservation(p) => {
                let cmd = load_command(ctx, &p.command).await?;
                let observation = cmd.framebuffer_observation().cloned().ok_or_else(|| {
                    Error::unavailable(format!("no framebuffer observation at {}", p.command))
                })?;
                Resolved::FramebufferObservation(observation)
            }
            Path::ImageInfo(p) => {
                let info = ctx.database()?.resolve_as::<AttachmentInfo>(ctx, p.id).await?;
                Resolved::Image((*info).clone())
            }
            Path::Blob(p) => {
                let bytes = ctx.database()?.resolve_as::<Vec<u8>>(ctx, p.id).await?;
                Resolved::Bytes((*bytes).clone())
            }
            Path::Messages(p) => Resolved::Messages(load_capture(ctx, &p.capture).await?.messages.clone()),
            Path::StateTree(p) => {
                let desc = StateTreeResolvable {
                    state: (*p.state).clone(),
                    array_group_size: p
                        .array_group_size
                        .unwrap_or(services::config(ctx).state_tree_array_group_size),
                };
                let (id, tree) = build(ctx, desc).await?;
                Resolved::StateTree { id, tree }
            }
            Path::StateTreeNode(p) => {
                let tree = ctx.database()?.resolve_as::<StateTree>(ctx, p.tree).await?;
                Resolved::StateTreeNode(tree.node(&p.indices)?)
            }
            Path::StateTreeNodeForPath(p) => {
                let tree = ctx.database()?.resolve_as::<StateTree>(ctx, p.tree).await?;
                let indices = tree.indices_for(&p.member)?;
                Resolved::Path(
                    StateTreeNodePath {
                        tree: p.tree,
                        indices,
                    }
                    .into(),
                )
            }
            Path::Field(_)
            | Path::ArrayIndex(_)
            | Path::MapIndex(_)
            | Path::Slice(_)
            | Path::Parameter(_)
            | Path::Result(_)
            | Path::GlobalState(_)
            | Path::State(_)
            | Path::Memory(_)
            | Path::ResourceData(_) => Resolved::Val(resolve_val(ctx, path).await?),
            Path::As(_)
            | Path::MemoryAsType(_)
            | Path::Mesh(_)
            | Path::Thumbnail(_)
            | Path::Perfetto(_)
            | Path::Metrics(_)
            | Path::Pipelines(_)
            | Path::Framegraph(_)
            | Path::Type(_) => Resolved::Wire(services::delegate(ctx, path).await?),
        })
    }
    .boxed()
}

/// Resolves `path` and converts the result to its wire form.
///
/// # Errors
/// See [`resolve`].
pub async fn get(ctx: &Context, path: &Path) -> Result<wire::Value> {
    Ok(resolve(ctx, path).await?.into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use prism_capture::{ApiId, ApiRegistry, Effect};
    use prism_db::{Database, ErrorKind};

    use super::*;

    fn gl(name: &str) -> Command {
        Command::new(ApiId::GLES, 0, name)
    }

    fn setup(capture: Capture) -> (Context, CapturePath) {
        let db = Database::new();
        let id = db.store(capture).unwrap();
        let ctx = Context::new()
            .with_database(db)
            .with_extension(Arc::new(ApiRegistry::new()));
        (ctx, CapturePath::new(id))
    }

    fn set_state(path: &[&str], value: impl Into<Val>) -> Effect {
        Effect::SetState {
            path: path.iter().map(|s| (*s).to_owned()).collect(),
            value: value.into(),
        }
    }

    #[tokio::test]
    async fn value_nodes_walk_parameters() {
        let rect = Val::Struct(Struct::new("Rect").with("w", 640u64).with("h", 480u64));
        let capture = Capture::new("c").with_commands([gl("glViewport").param("rect", rect)]);
        let (ctx, c) = setup(capture);
        let w = c.command(0).parameter("rect").field("w");
        assert_eq!(resolve_val(&ctx, &w).await.unwrap(), Val::Uint(640));
        let missing = c.command(0).parameter("rect").field("d");
        let err = resolve_val(&ctx, &missing).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FieldNotFound);
    }

    #[tokio::test]
    async fn nil_dereferences_name_the_parent_path() {
        let capture = Capture::new("c").with_commands([gl("glBindBuffer").param("buf", Val::Ptr(None))]);
        let (ctx, c) = setup(capture);
        let parent = c.command(0).parameter("buf");
        let err = resolve_val(&ctx, &parent.clone().field("size")).await.unwrap_err();
        assert_eq!(
            err,
            Error::NilDeref {
                path: parent.to_string()
            }
        );
    }

    #[tokio::test]
    async fn state_is_taken_after_the_command() {
        let capture = Capture::new("c").with_commands([
            gl("glEnable").effect(set_state(&["blend"], true)),
            gl("glDisable").effect(set_state(&["blend"], false)),
        ]);
        let (ctx, c) = setup(capture);
        let blend = |i| c.command(i).state(ApiId::GLES).field("blend");
        assert_eq!(resolve_val(&ctx, &blend(0)).await.unwrap(), Val::Bool(true));
        assert_eq!(resolve_val(&ctx, &blend(1)).await.unwrap(), Val::Bool(false));
        let whole = c.command(1).global_state().field("OpenGL ES").field("blend");
        assert_eq!(resolve_val(&ctx, &whole).await.unwrap(), Val::Bool(false));
    }

    #[tokio::test]
    async fn command_ranges_are_checked() {
        let (ctx, c) = setup(Capture::new("c").with_commands([gl("a"), gl("b")]));
        let all = crate::path::CommandsPath {
            capture: c,
            range: Some((1, 2)),
        };
        let Resolved::Commands(cmds) = resolve(&ctx, &Path::Commands(all)).await.unwrap() else {
            unreachable!("expected commands")
        };
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].name, "b");
        let over = crate::path::CommandsPath {
            capture: c,
            range: Some((1, 3)),
        };
        let err = resolve(&ctx, &Path::Commands(over)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SliceOutOfBounds);
    }

    #[tokio::test]
    async fn compound_results_navigate_as_values() {
        let (ctx, c) = setup(Capture::new("nav").with_commands([gl("a")]));
        let name = Path::from(c).field("name");
        assert_eq!(resolve_val(&ctx, &name).await.unwrap(), Val::Str("nav".into()));
        let cmd_name = Path::from(c.command(0)).field("name");
        assert_eq!(resolve_val(&ctx, &cmd_name).await.unwrap(), Val::Str("a".into()));
    }

    #[tokio::test]
    async fn collaborator_kinds_are_unsupported_without_one() {
        let (ctx, c) = setup(Capture::new("c").with_commands([gl("a")]));
        let err = resolve(&ctx, &c.command(0).result().as_type("png")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
