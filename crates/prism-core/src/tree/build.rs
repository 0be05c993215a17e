// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Command-tree construction.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use prism_capture::{
    initial_state, mutate_commands, ApiRegistry, Capture, Command, CommandId, Flag, NoHooks,
    SubCmdIdx, SubMarker, SyncData,
};
use prism_db::{Context, Error, Result};
use tracing::{debug, warn};

use super::group::{Group, SubCmdRoot};
use super::groupers::{by_api, by_thread, Grouper, MarkerGrouper};
use super::{CommandTree, CommandTreeOptions};
use crate::filter::{CommandFilter, Filter};

/// Builds the command tree of `capture`.
///
/// `options` must have its defaults filled in.
///
/// # Errors
/// [`Error::Cancelled`] if `ctx` is cancelled; [`Error::NotFound`] if the
/// synchronization data is inconsistent with the commands.
pub fn build_tree(
    ctx: &Context,
    capture: &Capture,
    apis: &ApiRegistry,
    filter: &CommandFilter,
    options: &CommandTreeOptions,
) -> Result<CommandTree> {
    let sync = capture.sync_data();
    let filter = Filter::new(filter, &sync);
    let count = capture.len();
    let mut root = Group::new(capture.name.clone(), 0, count);

    // Groupers and per-command acceptance.
    let mut groupers: Vec<Box<dyn Grouper + '_>> = Vec::new();
    if options.group_by_api {
        groupers.push(by_api(apis));
    }
    if options.group_by_thread {
        groupers.push(by_thread());
    }
    if options.group_by_user_markers {
        groupers.push(Box::<MarkerGrouper>::default());
    }
    let mut accepted = vec![false; capture.commands.len()];
    let mut state = initial_state(ctx, capture, apis, &mut NoHooks)?;
    mutate_commands(ctx, capture, apis, &mut state, &mut NoHooks, |at, cmd, state| {
        if let (1, Some(id)) = (at.depth(), at.root()) {
            for g in &mut groupers {
                g.process(id, cmd, state);
            }
            if let Some(slot) = usize::try_from(id).ok().and_then(|i| accepted.get_mut(i)) {
                *slot = filter.accepts(at, cmd, state);
            }
        }
        ControlFlow::Continue(())
    })?;
    for mut g in groupers {
        g.flush(count);
        for p in g.build() {
            add_or_warn(&mut root, p.start, p.end, p.name, None);
        }
    }

    if options.group_by_frame {
        group_frames(&mut root, capture, options.allow_incomplete_frame.unwrap_or(true));
    }
    if options.group_by_transform_feedback {
        group_events(&mut root, capture, &accepted, Flag::TransformFeedback, "Transform Feedback");
    }
    if options.group_by_draw_call {
        group_events(&mut root, capture, &accepted, Flag::DrawCall, "Draw");
    }
    if options.group_by_submission {
        group_containing(&mut root, capture, &accepted, Flag::Submission, "Host Coordination");
    }

    let draws = emit_commands(ctx, capture, apis, &sync, &filter, &mut root)?;

    if options.suppress_submit_info_nodes {
        root.for_each_root_mut(&mut |r: &mut SubCmdRoot| {
            let submission = r
                .id
                .root()
                .and_then(|id| capture.command(id).ok())
                .is_some_and(|c| c.is(Flag::Submission));
            if submission && r.id.depth() == 1 {
                r.group.flatten();
            }
        });
    }

    root.cluster(
        options.max_children.unwrap_or(0),
        options.max_neighbours.unwrap_or(0),
    );
    root.represent(&SubCmdIdx::initial(), &draws);
    debug!(capture = %capture.name, children = root.count(), draws = draws.len(), "built command tree");
    Ok(CommandTree { root })
}

fn add_or_warn(
    group: &mut Group,
    start: u64,
    end: u64,
    name: String,
    representation: Option<SubCmdIdx>,
) {
    if start >= end {
        return;
    }
    if let Err(err) = group.add_group(start, end, name, representation) {
        warn!(error = %err, "skipping group");
    }
}

fn group_frames(root: &mut Group, capture: &Capture, allow_incomplete: bool) {
    let mut start = 0;
    let mut frame = 1u64;
    for (i, cmd) in capture.commands.iter().enumerate() {
        if !cmd.is(Flag::EndOfFrame) {
            continue;
        }
        let i = i as u64;
        add_or_warn(
            root,
            start,
            i + 1,
            format!("Frame {frame}"),
            Some(SubCmdIdx::top(i)),
        );
        start = i + 1;
        frame += 1;
    }
    if allow_incomplete && frame > 1 && start < capture.len() {
        add_or_warn(
            root,
            start,
            capture.len(),
            format!("[Incomplete] Frame {frame}"),
            None,
        );
    }
}

fn group_events(root: &mut Group, capture: &Capture, accepted: &[bool], flag: Flag, prefix: &str) {
    let mut n = 1u64;
    for (i, cmd) in capture.commands.iter().enumerate() {
        if cmd.is(Flag::EndOfFrame) {
            n = 1;
        }
        if !cmd.is(flag) || !accepted.get(i).copied().unwrap_or(false) {
            continue;
        }
        if let Err(err) = root.add_left_group(i as u64, format!("{prefix} {n}")) {
            warn!(error = %err, "skipping {prefix} group");
            continue;
        }
        n += 1;
    }
}

fn group_containing(root: &mut Group, capture: &Capture, accepted: &[bool], flag: Flag, prefix: &str) {
    let mut last_left = 0u64;
    let mut n = 1u64;
    for (i, cmd) in capture.commands.iter().enumerate() {
        if !cmd.is(flag) || !accepted.get(i).copied().unwrap_or(false) {
            continue;
        }
        let i = i as u64;
        // A leading run starting at command 0 is left ungrouped.
        if last_left != 0 && last_left < i {
            add_or_warn(root, last_left, i, format!("{prefix} {n}"), None);
            n += 1;
        }
        last_left = i + 1;
    }
}

fn install_markers(group: &mut Group, parent: &SubCmdIdx, markers: &[SubMarker]) {
    for m in markers.iter().filter(|m| &m.parent == parent) {
        add_or_warn(group, m.start, m.end, m.name.clone(), None);
    }
}

/// Walks the capture adding every accepted command; returns the accepted
/// draws and clears.
fn emit_commands(
    ctx: &Context,
    capture: &Capture,
    apis: &ApiRegistry,
    sync: &SyncData,
    filter: &Filter,
    root: &mut Group,
) -> Result<BTreeSet<SubCmdIdx>> {
    let mut draws = BTreeSet::new();
    let mut roots: BTreeSet<CommandId> = BTreeSet::new();
    let mut failure: Option<Error> = None;
    let mut state = initial_state(ctx, capture, apis, &mut NoHooks)?;
    mutate_commands(ctx, capture, apis, &mut state, &mut NoHooks, |at, cmd, state| {
        let Some(top) = at.root() else {
            return ControlFlow::Continue(());
        };
        if at.depth() > 1 && !roots.contains(&top) {
            return ControlFlow::Continue(());
        }
        if !filter.accepts(at, cmd, state) {
            return ControlFlow::Continue(());
        }
        if cmd.is_draw_or_clear() {
            draws.insert(at.clone());
        }
        let markers = sync.markers.get(&top).map_or(&[][..], Vec::as_slice);
        let res = if at.depth() == 1 {
            if sync.has_sub_commands(top) {
                roots.insert(top);
                root.add_root(at, &cmd.name, cmd.sub_commands.len() as u64)
                    .map(|r| install_markers(&mut r.group, at, markers))
            } else {
                root.add_command(top);
                Ok(())
            }
        } else {
            insert_sub_command(root, at, cmd, markers)
        };
        match res {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) if err.kind() == prism_db::ErrorKind::NotFound => {
                // The parent was filtered out.
                ControlFlow::Continue(())
            }
            Err(err) => {
                failure = Some(err);
                ControlFlow::Break(())
            }
        }
    })?;
    match failure {
        Some(err) => Err(err),
        None => Ok(draws),
    }
}

fn insert_sub_command(
    root: &mut Group,
    at: &SubCmdIdx,
    cmd: &Command,
    markers: &[SubMarker],
) -> Result<()> {
    let (parents, last) = at.0.split_at(at.depth() - 1);
    let mut r = root.root_mut(parents[0])?;
    for &p in &parents[1..] {
        r = r.group.root_mut(p)?;
    }
    if cmd.sub_commands.is_empty() {
        r.group.add_command(last[0]);
    } else {
        let nested = r.group.add_root(at, &cmd.name, cmd.sub_commands.len() as u64)?;
        install_markers(&mut nested.group, at, markers);
    }
    Ok(())
}
