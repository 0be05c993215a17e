// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Text search over command-tree and state-tree nodes.

use std::ops::ControlFlow;

use prism_capture::{Capture, SubCmdIdx};
use prism_db::{downcast, Context, Error, Id, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::path::{CommandTreeNodePath, Path, StateTreeNodePath};
use crate::services;
use crate::state_tree::StateTree;
use crate::tree::{CommandTree, CommandTreeResolvable, Node};

const CANCEL_CHECK_INTERVAL: usize = 256;

/// A search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindRequest {
    /// Node to start after; a command-tree or state-tree node.
    pub from: Path,
    /// Text or pattern to look for.
    pub text: String,
    /// Treat `text` as a regular expression.
    #[serde(default)]
    pub is_regex: bool,
    /// Match case exactly.
    #[serde(default)]
    pub is_case_sensitive: bool,
    /// Search towards the first node.
    #[serde(default)]
    pub backwards: bool,
    /// Continue from the other end after reaching the last node.
    #[serde(default)]
    pub wrap: bool,
    /// Result cap; zero uses the service default.
    #[serde(default)]
    pub max_items: u32,
}

/// One matching node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindResult {
    /// Node path.
    pub path: Path,
    /// The text that matched.
    pub label: String,
}

fn pattern(req: &FindRequest) -> Result<Regex> {
    let text = if req.is_regex {
        req.text.clone()
    } else {
        regex::escape(&req.text)
    };
    RegexBuilder::new(&text)
        .case_insensitive(!req.is_case_sensitive)
        .build()
        .map_err(|e| Error::invalid(format!("find pattern: {e}")))
}

fn command_label(capture: &Capture, at: &SubCmdIdx) -> String {
    capture
        .command_at(at)
        .map_or_else(|_| at.to_string(), ToString::to_string)
}

async fn command_tree_labels(ctx: &Context, tree: Id) -> Result<Vec<(Vec<u64>, String)>> {
    let db = ctx.database()?;
    let request = downcast::<CommandTreeResolvable>(db.object(&tree)?)?;
    let capture = db.resolve_as::<Capture>(ctx, request.capture).await?;
    let tree = db.resolve_as::<CommandTree>(ctx, tree).await?;
    let mut out = Vec::new();
    tree.root.walk(&mut |indices, node| {
        let label = match node {
            Node::Group { group, .. } => group.name.clone(),
            Node::Root(r) => command_label(&capture, &r.id),
            Node::Command(at) => command_label(&capture, &at),
        };
        out.push((indices.to_vec(), label));
    });
    Ok(out)
}

async fn state_tree_labels(ctx: &Context, tree: Id) -> Result<Vec<(Vec<u64>, String)>> {
    let tree = ctx.database()?.resolve_as::<StateTree>(ctx, tree).await?;
    let mut out = Vec::new();
    tree.walk(&mut |indices, info| {
        let label = match info.preview {
            Some(preview) => format!("{}: {preview}", info.name),
            None => info.name,
        };
        out.push((indices.to_vec(), label));
        ControlFlow::Continue(())
    });
    Ok(out)
}

/// Order in which to visit `n` pre-ordered nodes, starting after `start`.
fn visit_order(n: usize, start: Option<usize>, backwards: bool, wrap: bool) -> Vec<usize> {
    let order: Vec<usize> = if backwards {
        let end = start.unwrap_or(n);
        let wrapped = if wrap { end..n } else { n..n };
        (0..end).rev().chain(wrapped.rev()).collect()
    } else {
        let begin = start.map_or(0, |s| s + 1);
        let wrapped = if wrap { 0..begin } else { 0..0 };
        (begin..n).chain(wrapped).collect()
    };
    order.into_iter().filter(|&i| Some(i) != start).collect()
}

/// Streams the nodes matching `req` to `handler` until the handler breaks
/// or the result cap is reached. Returns the number of matches reported.
///
/// # Errors
/// - [`Error::InvalidArgument`] for a bad pattern or a `from` path that is not
///   a tree node
/// - [`Error::Cancelled`] if `ctx` is cancelled
pub async fn find<F>(ctx: &Context, req: &FindRequest, mut handler: F) -> Result<u64>
where
    F: FnMut(FindResult) -> ControlFlow<()> + Send,
{
    let re = pattern(req)?;
    let (tree, from, nodes) = match &req.from {
        Path::CommandTreeNode(p) => (p.tree, &p.indices, command_tree_labels(ctx, p.tree).await?),
        Path::StateTreeNode(p) => (p.tree, &p.indices, state_tree_labels(ctx, p.tree).await?),
        other => {
            return Err(Error::invalid(format!(
                "find starts at a tree node, not {}",
                other.kind()
            )))
        }
    };
    let node_path = |indices: Vec<u64>| -> Path {
        match &req.from {
            Path::StateTreeNode(_) => StateTreeNodePath { tree, indices }.into(),
            _ => CommandTreeNodePath { tree, indices }.into(),
        }
    };
    let max = match req.max_items {
        0 => services::config(ctx).find_max_items,
        n => u64::from(n),
    };

    let start = nodes.iter().position(|(indices, _)| indices == from);
    let mut found = 0u64;
    for (k, i) in visit_order(nodes.len(), start, req.backwards, req.wrap)
        .into_iter()
        .enumerate()
    {
        if k % CANCEL_CHECK_INTERVAL == 0 {
            ctx.check_cancelled()?;
        }
        let (indices, label) = &nodes[i];
        if !re.is_match(label) {
            continue;
        }
        found += 1;
        let result = FindResult {
            path: node_path(indices.clone()),
            label: label.clone(),
        };
        if handler(result).is_break() || (max > 0 && found >= max) {
            break;
        }
    }
    debug!(text = %req.text, found, "find finished");
    Ok(found)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use prism_capture::{ApiId, ApiRegistry, Command, Flag};
    use prism_db::{Database, ErrorKind};

    use super::*;
    use crate::filter::CommandFilter;
    use crate::path::CapturePath;
    use crate::resolve::{resolve, Resolved};
    use crate::tree::CommandTreeOptions;

    #[test]
    fn visit_order_skips_the_start() {
        assert_eq!(visit_order(5, Some(2), false, false), [3, 4]);
        assert_eq!(visit_order(5, Some(2), false, true), [3, 4, 0, 1]);
        assert_eq!(visit_order(5, Some(2), true, false), [1, 0]);
        assert_eq!(visit_order(5, Some(2), true, true), [1, 0, 4, 3]);
        assert_eq!(visit_order(3, None, false, false), [0, 1, 2]);
        assert_eq!(visit_order(3, None, true, true), [2, 1, 0]);
    }

    async fn tree_of(names: &[&str]) -> (Context, Id) {
        let db = Database::new();
        let capture = Capture::new("find").with_commands(
            names
                .iter()
                .map(|n| Command::new(ApiId::GLES, 0, *n).flag(Flag::DrawCall)),
        );
        let id = db.store(capture).unwrap();
        let ctx = Context::new()
            .with_database(db)
            .with_extension(Arc::new(ApiRegistry::new()));
        let options = CommandTreeOptions {
            group_by_frame: false,
            group_by_draw_call: false,
            ..CommandTreeOptions::default()
        };
        let path = CapturePath::new(id).command_tree(CommandFilter::default(), options);
        let Resolved::CommandTree { id, .. } = resolve(&ctx, &path).await.unwrap() else {
            unreachable!("expected a command tree")
        };
        (ctx, id)
    }

    fn request(tree: Id, text: &str) -> FindRequest {
        FindRequest {
            from: CommandTreeNodePath {
                tree,
                indices: vec![],
            }
            .into(),
            text: text.into(),
            is_regex: false,
            is_case_sensitive: false,
            backwards: false,
            wrap: false,
            max_items: 0,
        }
    }

    #[tokio::test]
    async fn matches_stream_in_tree_order() {
        let (ctx, tree) = tree_of(&["glClear", "glDrawArrays", "glDrawElements"]).await;
        let mut seen = Vec::new();
        let n = find(&ctx, &request(tree, "DRAW"), |r| {
            seen.push(r.label);
            ControlFlow::Continue(())
        })
        .await
        .unwrap();
        assert_eq!(n, 2);
        assert!(seen[0].starts_with("glDrawArrays"));
        assert!(seen[1].starts_with("glDrawElements"));

        let sensitive = FindRequest {
            is_case_sensitive: true,
            ..request(tree, "DRAW")
        };
        assert_eq!(find(&ctx, &sensitive, |_| ControlFlow::Continue(())).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn handlers_and_caps_stop_the_search() {
        let (ctx, tree) = tree_of(&["glDrawArrays", "glDrawArrays", "glDrawArrays"]).await;
        let capped = FindRequest {
            max_items: 2,
            ..request(tree, "draw")
        };
        assert_eq!(find(&ctx, &capped, |_| ControlFlow::Continue(())).await.unwrap(), 2);
        let n = find(&ctx, &request(tree, "draw"), |_| ControlFlow::Break(()))
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn bad_requests_are_rejected() {
        let (ctx, tree) = tree_of(&["glFlush"]).await;
        let bad = FindRequest {
            is_regex: true,
            ..request(tree, "(")
        };
        let err = find(&ctx, &bad, |_| ControlFlow::Continue(())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let elsewhere = FindRequest {
            from: CapturePath::new(tree).into(),
            ..request(tree, "x")
        };
        let err = find(&ctx, &elsewhere, |_| ControlFlow::Continue(())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
