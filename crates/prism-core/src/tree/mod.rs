// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Command trees: hierarchical views over a capture's commands.
//!
//! Building runs in phases over a root group covering every top-level
//! command:
//!
//! 1. run-style groupers (API, thread, debug markers) propose groups while
//!    the commands are mutated once;
//! 2. frames are grouped at end-of-frame commands;
//! 3. draw and transform-feedback groups grow leftwards from each event;
//! 4. submission groups cover the host work between submissions;
//! 5. accepted commands are inserted, with sub-command roots (and their
//!    marker groups) for commands that execute others;
//! 6. oversized groups are clustered into `"[i - j]"` sub-groups;
//! 7. every group picks a representative command.

mod build;
mod group;
mod groupers;

use prism_capture::{ApiRegistry, Capture, SubCmdIdx};
use prism_db::{async_trait, value, Context, Id, Resolvable, Result, Storable, Value};
use serde::{Deserialize, Serialize};

pub use build::build_tree;
pub use group::{Group, Node, Span, SubCmdRoot};
pub use groupers::{by_api, by_thread, Grouper, MarkerGrouper, Proposal, RunGrouper};

use crate::config::ServiceConfig;
use crate::filter::CommandFilter;
use crate::services;

/// Grouping options of a command-tree request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTreeOptions {
    /// Group runs of commands by API.
    pub group_by_api: bool,
    /// Group runs of commands by thread.
    pub group_by_thread: bool,
    /// Group push/pop debug-marker pairs.
    pub group_by_user_markers: bool,
    /// Group commands into frames.
    pub group_by_frame: bool,
    /// Group each draw with the commands leading up to it.
    pub group_by_draw_call: bool,
    /// Group each transform-feedback draw with its lead-up.
    pub group_by_transform_feedback: bool,
    /// Group the host commands between submissions.
    pub group_by_submission: bool,
    /// Group a trailing frame with no end-of-frame command.
    pub allow_incomplete_frame: Option<bool>,
    /// Cap on direct children per group; zero is unlimited.
    pub max_children: Option<u64>,
    /// Cap on consecutive commands beside sibling groups; zero is unlimited.
    pub max_neighbours: Option<u64>,
    /// Flatten marker groups inside submissions.
    pub suppress_submit_info_nodes: bool,
}

impl CommandTreeOptions {
    /// Copy with unset limits taken from `cfg`.
    #[must_use]
    pub fn with_defaults(&self, cfg: &ServiceConfig) -> Self {
        Self {
            allow_incomplete_frame: Some(
                self.allow_incomplete_frame
                    .unwrap_or(cfg.allow_incomplete_frame),
            ),
            max_children: Some(self.max_children.unwrap_or(cfg.max_children)),
            max_neighbours: Some(self.max_neighbours.unwrap_or(cfg.max_neighbours)),
            ..self.clone()
        }
    }
}

/// A built command tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTree {
    /// Root group covering every top-level command.
    pub root: Group,
}

impl Storable for CommandTree {}

/// Summary of one command-tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNodeInfo {
    /// Group or root name; `None` for leaf commands.
    pub group: Option<String>,
    /// Command shown for the node.
    pub representation: SubCmdIdx,
    /// First and last command covered.
    pub commands: (SubCmdIdx, SubCmdIdx),
    /// Number of children.
    pub num_children: u64,
    /// The command, for leaves and sub-command roots.
    pub command: Option<SubCmdIdx>,
}

impl CommandTree {
    /// Summary of the root node.
    pub fn root_info(&self) -> TreeNodeInfo {
        Node::Group {
            group: &self.root,
            prefix: SubCmdIdx::initial(),
        }
        .info()
    }

    /// Summary of the node at `indices`.
    ///
    /// # Errors
    /// See [`Group::index`].
    pub fn node(&self, indices: &[u64]) -> Result<TreeNodeInfo> {
        Ok(self.root.index(indices)?.info())
    }
}

impl Node<'_> {
    /// Summary of the node.
    pub fn info(&self) -> TreeNodeInfo {
        match self {
            Node::Group { group, prefix } => {
                let first = prefix.child(group.start);
                let last = prefix.child(group.end.saturating_sub(1).max(group.start));
                TreeNodeInfo {
                    group: Some(group.name.clone()),
                    representation: group.representation.clone().unwrap_or_else(|| last.clone()),
                    commands: (first, last),
                    num_children: group.count(),
                    command: None,
                }
            }
            Node::Root(r) => TreeNodeInfo {
                group: Some(r.group.name.clone()),
                representation: r.id.clone(),
                commands: (r.id.clone(), r.id.clone()),
                num_children: r.group.count(),
                command: Some(r.id.clone()),
            },
            Node::Command(idx) => TreeNodeInfo {
                group: None,
                representation: idx.clone(),
                commands: (idx.clone(), idx.clone()),
                num_children: 0,
                command: Some(idx.clone()),
            },
        }
    }
}

/// Resolvable description of a command tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandTreeResolvable {
    /// Capture identifier.
    pub capture: Id,
    /// Commands to include.
    pub filter: CommandFilter,
    /// Options with defaults filled in.
    pub options: CommandTreeOptions,
}

impl Storable for CommandTreeResolvable {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

#[async_trait]
impl Resolvable for CommandTreeResolvable {
    async fn resolve(&self, ctx: &Context) -> Result<Value> {
        let db = ctx.database()?;
        let capture = db.resolve_as::<Capture>(ctx, self.capture).await?;
        let apis: std::sync::Arc<ApiRegistry> = services::apis(ctx);
        let tree = build_tree(ctx, &capture, &apis, &self.filter, &self.options)?;
        Ok(value(tree))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn leaves(n: u64) -> Group {
        let mut g = Group::new("root", 0, n);
        for i in 0..n {
            g.add_command(i);
        }
        g
    }

    #[test]
    fn groups_nest_and_reject_partial_overlaps() {
        let mut g = leaves(10);
        g.add_group(0, 6, "outer", None).unwrap();
        g.add_group(2, 4, "inner", None).unwrap();
        let err = g.add_group(5, 8, "straddle", None).unwrap_err();
        assert_eq!(err.kind(), prism_db::ErrorKind::OverlappingGroup);
        assert_eq!(g.count(), 5);
        let Node::Group { group, .. } = g.index(&[0, 2]).unwrap() else {
            unreachable!("expected a group")
        };
        assert_eq!(group.name, "inner");
    }

    #[test]
    fn clustering_splits_wide_groups() {
        let mut g = leaves(25);
        g.cluster(10, 0);
        let names: Vec<String> = g
            .spans
            .iter()
            .map(|s| match s {
                Span::Group(g) => g.name.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(names, ["[0 - 9]", "[10 - 19]", "[20 - 24]"]);
    }

    #[test]
    fn clustering_chunks_by_max_children_past_the_square() {
        let mut g = leaves(105);
        g.cluster(10, 0);
        assert_eq!(g.count(), 11);
        let Node::Group { group, .. } = g.index(&[10]).unwrap() else {
            unreachable!("expected a group")
        };
        assert_eq!(group.name, "[100 - 104]");
        assert_eq!(group.count(), 5);
    }

    #[test]
    fn long_runs_beside_groups_are_wrapped() {
        let mut g = leaves(30);
        g.add_group(0, 2, "pass", None).unwrap();
        g.cluster(0, 20);
        assert_eq!(g.count(), 2);
        let Node::Group { group, .. } = g.index(&[1]).unwrap() else {
            unreachable!("expected a group")
        };
        assert_eq!(group.name, "[2 - 29]");
        assert_eq!(group.count(), 28);
    }

    #[test]
    fn representation_prefers_the_last_draw() {
        let mut g = leaves(6);
        g.add_group(0, 3, "a", None).unwrap();
        g.add_group(3, 6, "b", None).unwrap();
        let draws: BTreeSet<SubCmdIdx> = [SubCmdIdx::top(1)].into_iter().collect();
        g.represent(&SubCmdIdx::initial(), &draws);
        assert_eq!(g.index(&[0]).unwrap().info().representation, SubCmdIdx::top(1));
        assert_eq!(g.index(&[1]).unwrap().info().representation, SubCmdIdx::top(5));
    }

    #[test]
    fn gl_command_groups_represent_from_the_enclosing_range() {
        let mut g = leaves(6);
        g.add_group(0, 6, "Frame 1", None).unwrap();
        g.add_group(4, 6, "OpenGL ES Commands", None).unwrap();
        let draws: BTreeSet<SubCmdIdx> = [SubCmdIdx::top(2)].into_iter().collect();
        g.represent(&SubCmdIdx::initial(), &draws);
        assert_eq!(g.index(&[0, 4]).unwrap().info().representation, SubCmdIdx::top(2));
    }

    #[test]
    fn indices_invert_index() {
        let mut g = leaves(8);
        g.add_group(2, 6, "group", None).unwrap();
        let r = g.add_root(&SubCmdIdx::top(7), "submit", 3).unwrap();
        r.group.add_command(0);
        r.group.add_command(2);
        let target = SubCmdIdx(vec![7, 2]);
        let idx = g.indices(&target, false);
        assert_eq!(idx, [4, 1]);
        let Node::Command(found) = g.index(&idx).unwrap() else {
            unreachable!("expected a command")
        };
        assert_eq!(found, target);
        assert_eq!(g.indices(&SubCmdIdx::top(5), true), [2]);
        assert_eq!(g.indices(&SubCmdIdx::top(5), false), [2, 3]);
    }
}
