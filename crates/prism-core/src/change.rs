// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Immutable edits.
//!
//! Captures are values, so an edit never changes a stored capture. Setting a
//! value below a command rebuilds each enclosing value up to the command,
//! stores the edited capture and returns the same path re-anchored at the new
//! capture's identifier.

use futures::future::{BoxFuture, FutureExt};
use prism_capture::{Command, Val};
use prism_db::{Context, Error, Result};
use tracing::debug;

use crate::access;
use crate::path::{CapturePath, CommandPath, ParameterPath, Path};
use crate::resolve::{load_capture, resolve_val};
use crate::wire;

fn expect_val(value: wire::Value) -> Result<Val> {
    match value {
        wire::Value::Value(v) => Ok(v),
        other => Err(Error::invalid(format!("expected a value, got {}", other.kind()))),
    }
}

/// Applies `edit` to a copy of the command `p` and stores the edited capture.
async fn edit_command<F>(ctx: &Context, p: &CommandPath, edit: F) -> Result<CommandPath>
where
    F: FnOnce(&mut Command) -> Result<()>,
{
    let mut capture = (*load_capture(ctx, &p.capture).await?).clone();
    edit(capture.command_at_mut(&p.indices)?)?;
    let id = ctx.database()?.store(capture)?;
    debug!(from = %p.capture, to = %id, at = %p.indices, "edited capture");
    Ok(CapturePath::new(id).command_at(p.indices.clone()))
}

/// The node a value path hangs off: the first ancestor that is not a field,
/// index, key or slice.
fn value_root(path: &Path) -> &Path {
    match path {
        Path::Field(p) => value_root(&p.parent),
        Path::ArrayIndex(p) => value_root(&p.parent),
        Path::MapIndex(p) => value_root(&p.parent),
        Path::Slice(p) => value_root(&p.parent),
        other => other,
    }
}

/// Sets the value at `path` and returns the path of the new value.
///
/// # Errors
/// - [`Error::Immutable`] for node kinds that cannot be edited
/// - [`Error::InvalidArgument`] when `value` has the wrong shape
/// - the accessor errors of [`crate::access`] for value nodes
pub fn set<'a>(ctx: &'a Context, path: &'a Path, value: wire::Value) -> BoxFuture<'a, Result<Path>> {
    async move {
        let root = value_root(path);
        if !matches!(root, Path::Command(_) | Path::Parameter(_) | Path::Result(_)) {
            return Err(Error::Immutable {
                kind: root.kind().to_string(),
            });
        }
        match path {
            Path::Command(p) => {
                let cmd = match value {
                    wire::Value::Command(cmd) => cmd,
                    other => {
                        return Err(Error::invalid(format!(
                            "expected a command, got {}",
                            other.kind()
                        )))
                    }
                };
                Ok(edit_command(ctx, p, |c| {
                    *c = cmd;
                    Ok(())
                })
                .await?
                .into())
            }
            Path::Parameter(p) => {
                let v = expect_val(value)?;
                let command = edit_command(ctx, &p.command, |c| {
                    *c.param_value_mut(&p.name)? = v;
                    Ok(())
                })
                .await?;
                Ok(ParameterPath {
                    command,
                    name: p.name.clone(),
                }
                .into())
            }
            Path::Result(p) => {
                let v = expect_val(value)?;
                let command = edit_command(ctx, &p.command, |c| {
                    c.result = Some(v);
                    Ok(())
                })
                .await?;
                Ok(command.result())
            }
            Path::Field(p) => {
                let mut parent = resolve_val(ctx, &p.parent).await?;
                access::set_field(&mut parent, &p.name, expect_val(value)?)?;
                let parent = set(ctx, &p.parent, wire::Value::Value(parent)).await?;
                Ok(parent.field(p.name.clone()))
            }
            Path::ArrayIndex(p) => {
                let mut parent = resolve_val(ctx, &p.parent).await?;
                access::set_index(&mut parent, p.index, expect_val(value)?)?;
                let parent = set(ctx, &p.parent, wire::Value::Value(parent)).await?;
                Ok(parent.index(p.index))
            }
            Path::MapIndex(p) => {
                let mut parent = resolve_val(ctx, &p.parent).await?;
                access::set_key(&mut parent, &p.key, expect_val(value)?)?;
                let parent = set(ctx, &p.parent, wire::Value::Value(parent)).await?;
                Ok(parent.key(p.key.clone()))
            }
            Path::Slice(p) => {
                let mut parent = resolve_val(ctx, &p.parent).await?;
                access::set_slice(&mut parent, p.start, p.end, expect_val(value)?)?;
                let parent = set(ctx, &p.parent, wire::Value::Value(parent)).await?;
                Ok(parent.slice(p.start, p.end))
            }
            other => Err(Error::Immutable {
                kind: other.kind().to_string(),
            }),
        }
    }
    .boxed()
}

/// Deletes the node at `path` and returns the path of the new parent.
///
/// Only top-level commands can be deleted.
///
/// # Errors
/// - [`Error::Immutable`] for node kinds other than commands
/// - [`Error::InvalidArgument`] for nested commands
/// - [`Error::OutOfBounds`] for a command past the end of the capture
pub async fn delete(ctx: &Context, path: &Path) -> Result<Path> {
    let Path::Command(p) = path else {
        return Err(Error::Immutable {
            kind: path.kind().to_string(),
        });
    };
    let Some(id) = p.indices.root().filter(|_| p.indices.depth() == 1) else {
        return Err(Error::invalid(format!(
            "only top-level commands can be deleted, not {}",
            p.indices
        )));
    };
    let capture = load_capture(ctx, &p.capture).await?.without_command(id)?;
    let new = ctx.database()?.store(capture)?;
    debug!(from = %p.capture, to = %new, command = id, "deleted command");
    Ok(CapturePath::new(new).into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use prism_capture::{ApiId, ApiRegistry, Capture, Key, Struct, SubCmdIdx};
    use prism_db::{Database, ErrorKind};

    use super::*;
    use crate::resolve::get;
    use crate::CommandFilter;

    fn setup(capture: Capture) -> (Context, CapturePath) {
        let db = Database::new();
        let id = db.store(capture).unwrap();
        let ctx = Context::new()
            .with_database(db)
            .with_extension(Arc::new(ApiRegistry::new()));
        (ctx, CapturePath::new(id))
    }

    fn sample() -> Capture {
        let attribs = Val::Map(
            [(Key::Uint(0), Val::Uint(3)), (Key::Uint(1), Val::Uint(4))]
                .into_iter()
                .collect(),
        );
        Capture::new("edit").with_commands([
            Command::new(ApiId::GLES, 0, "glViewport")
                .param("rect", Struct::new("Rect").with("w", 640u64).with("h", 480u64))
                .param("attribs", attribs),
            Command::new(ApiId::GLES, 0, "glFlush"),
        ])
    }

    #[tokio::test]
    async fn nested_sets_produce_a_new_capture() {
        let (ctx, c) = setup(sample());
        let w = c.command(0).parameter("rect").field("w");
        let new = set(&ctx, &w, wire::Value::Value(Val::Uint(1024))).await.unwrap();
        assert_ne!(new.capture(), Some(c));
        assert_eq!(get(&ctx, &new).await.unwrap(), wire::Value::Value(Val::Uint(1024)));
        assert_eq!(get(&ctx, &w).await.unwrap(), wire::Value::Value(Val::Uint(640)));

        let key = c.command(0).parameter("attribs").key(Key::Int(1));
        let new = set(&ctx, &key, wire::Value::Value(Val::Uint(9))).await.unwrap();
        assert_eq!(get(&ctx, &new).await.unwrap(), wire::Value::Value(Val::Uint(9)));
    }

    #[tokio::test]
    async fn derived_nodes_are_immutable() {
        let (ctx, c) = setup(sample());
        let state = c.command(0).global_state().field("x");
        let err = set(&ctx, &state, wire::Value::Value(Val::Nil)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Immutable);
        let err = set(&ctx, &c.commands(), wire::Value::Commands(vec![])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Immutable);

        // Rejected before the derived parent is built.
        let deep = c.report(None, CommandFilter::default()).field("items").index(0);
        let err = set(&ctx, &deep, wire::Value::Value(Val::Nil)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Immutable);
        let err = set(&ctx, &c.commands().index(7).field("x"), wire::Value::Value(Val::Nil))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Immutable);
    }

    #[tokio::test]
    async fn commands_need_command_values() {
        let (ctx, c) = setup(sample());
        let err = set(&ctx, &c.command(1).into(), wire::Value::Value(Val::Nil))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let finish = Command::new(ApiId::GLES, 0, "glFinish");
        let new = set(&ctx, &c.command(1).into(), wire::Value::Command(finish.clone()))
            .await
            .unwrap();
        assert_eq!(get(&ctx, &new).await.unwrap(), wire::Value::Command(finish));
    }

    #[tokio::test]
    async fn only_top_level_commands_delete() {
        let (ctx, c) = setup(sample());
        let nested = c.command_at(SubCmdIdx(vec![0, 1])).into();
        let err = delete(&ctx, &nested).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = delete(&ctx, &c.messages()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Immutable);
        let Path::Capture(new) = delete(&ctx, &c.command(0).into()).await.unwrap() else {
            unreachable!("expected a capture path")
        };
        let wire::Value::Commands(cmds) = get(&ctx, &new.commands()).await.unwrap() else {
            unreachable!("expected commands")
        };
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].name, "glFlush");
    }
}
