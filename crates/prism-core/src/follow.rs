// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Link navigation.
//!
//! Link values carry a destination relative to the command that holds them:
//!
//! | Link                 | Destination                               |
//! |----------------------|-------------------------------------------|
//! | `command:<i.j.k>`    | that command in the same capture          |
//! | `resource:<hex id>`  | the resource's data after the command     |
//! | `state:<a.b.c>`      | that member of the global state after it  |
//!
//! Identifier-valued parameters follow to the resource they name.

use prism_capture::{SubCmdIdx, Val};
use prism_db::{downcast, Context, Error, Id, Result};

use crate::access;
use crate::path::{CapturePath, Path};
use crate::resolve::resolve_val;
use crate::state_tree::StateTree;
use crate::tree::{CommandTree, CommandTreeResolvable};

fn not_followable(path: &Path) -> Error {
    Error::NotFollowable {
        path: path.to_string(),
    }
}

/// Destination of the link `link` held at `from`.
///
/// # Errors
/// [`Error::NotFollowable`] for an unknown scheme or a link whose anchor is
/// missing from `from`; [`Error::InvalidArgument`] for a malformed target.
pub fn parse_link(from: &Path, link: &str) -> Result<Path> {
    let Some((scheme, target)) = link.split_once(':') else {
        return Err(not_followable(from));
    };
    match scheme {
        "command" => {
            let capture = from.capture().ok_or_else(|| not_followable(from))?;
            let indices: SubCmdIdx = target.parse()?;
            Ok(capture.command_at(indices).into())
        }
        "resource" => {
            let cmd = from.command().ok_or_else(|| not_followable(from))?;
            let id: Id = target
                .parse()
                .map_err(|e| Error::invalid(format!("resource link {target:?}: {e}")))?;
            Ok(cmd.resource_data(id))
        }
        "state" => {
            let cmd = from.command().ok_or_else(|| not_followable(from))?;
            Ok(target
                .split('.')
                .filter(|s| !s.is_empty())
                .fold(cmd.global_state(), |p, name| p.field(name)))
        }
        _ => Err(not_followable(from)),
    }
}

/// The path `path` links to.
///
/// Command-tree nodes follow to their command, state-tree nodes to their
/// value and link values to their destination.
///
/// # Errors
/// [`Error::NotFollowable`] when the addressed value is not a link.
pub async fn follow(ctx: &Context, path: &Path) -> Result<Path> {
    match path {
        Path::StateTreeNode(p) => {
            let tree = ctx.database()?.resolve_as::<StateTree>(ctx, p.tree).await?;
            Ok(tree.node(&p.indices)?.value_path)
        }
        Path::CommandTreeNode(p) => {
            let db = ctx.database()?;
            let request = downcast::<CommandTreeResolvable>(db.object(&p.tree)?)?;
            let tree = db.resolve_as::<CommandTree>(ctx, p.tree).await?;
            let info = tree.node(&p.indices)?;
            let at = info.command.unwrap_or(info.representation);
            Ok(CapturePath::new(request.capture).command_at(at).into())
        }
        Path::Field(_)
        | Path::ArrayIndex(_)
        | Path::MapIndex(_)
        | Path::Slice(_)
        | Path::Parameter(_)
        | Path::Result(_) => {
            let v = resolve_val(ctx, path).await?;
            match access::deref(&v, "link")? {
                Val::Link(link) => parse_link(path, link),
                Val::Id(id) => match path.command() {
                    Some(cmd) => Ok(cmd.resource_data(*id)),
                    None => Err(not_followable(path)),
                },
                _ => Err(not_followable(path)),
            }
        }
        _ => Err(not_followable(path)),
    }
}
