// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Plain-text rendering of analysis results.

use std::fmt::Write as _;

use prism_capture::{Capture, SubCmdIdx};
use prism_core::report::Report;
use prism_core::resources::ResourceList;
use prism_core::tree::{CommandTree, Node};

/// Dotted node indices, `root` for the empty list.
pub fn indices(indices: &[u64]) -> String {
    if indices.is_empty() {
        return "root".into();
    }
    indices
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

fn command(capture: &Capture, at: &SubCmdIdx) -> String {
    capture
        .command_at(at)
        .map_or_else(|err| format!("{at} <{err}>"), |c| format!("{at} {c}"))
}

fn opt_idx(at: Option<&SubCmdIdx>) -> String {
    at.map_or_else(|| "-".into(), ToString::to_string)
}

/// Indented outline of `tree`, down to `depth` levels (0 for all).
pub fn tree(tree: &CommandTree, capture: &Capture, depth: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({} children)", tree.root.name, tree.root.count());
    tree.root.walk(&mut |at, node| {
        if depth > 0 && at.len() > depth {
            return;
        }
        let pad = "  ".repeat(at.len());
        let _ = match node {
            Node::Group { group, .. } => {
                writeln!(out, "{pad}{} ({} children)", group.name, group.count())
            }
            Node::Root(r) => writeln!(out, "{pad}{}", command(capture, &r.id)),
            Node::Command(c) => writeln!(out, "{pad}{}", command(capture, &c)),
        };
    });
    out
}

/// One line per report item, grouped by message.
pub fn report(report: &Report) -> String {
    let mut out = String::new();
    for group in &report.groups {
        let _ = writeln!(out, "{} ({})", group.name, group.items.len());
        for item in group.items.iter().filter_map(|&i| report.items.get(i)) {
            let _ = writeln!(
                out,
                "  {:<8} {:<12} {}",
                item.severity,
                opt_idx(item.command.as_ref()),
                item.tags.join(" ")
            );
        }
    }
    out
}

/// Resources by kind with their lifetimes.
pub fn resources(list: &ResourceList) -> String {
    let mut out = String::new();
    for kind in &list.kinds {
        let _ = writeln!(out, "{} ({})", kind.kind, kind.resources.len());
        for r in &kind.resources {
            let _ = writeln!(
                out,
                "  {:<6} {:<24} created {:<8} deleted {:<8} accesses {}",
                r.handle,
                r.label,
                opt_idx(r.created_at.as_ref()),
                opt_idx(r.deleted_at.as_ref()),
                r.accesses.len()
            );
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_dotted() {
        assert_eq!(indices(&[]), "root");
        assert_eq!(indices(&[0, 12, 3]), "0.12.3");
    }
}
