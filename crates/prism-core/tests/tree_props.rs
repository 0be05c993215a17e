// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used, clippy::panic)]
//! Structural properties of command trees, framebuffer tracking and edits.

mod common;

use common::{bind_color, gl, import};
use prism_capture::{
    ApiRegistry, Attachment, Capture, Command, Effect, Flag, Struct, SubCmdIdx, Val,
};
use prism_core::framebuffer::track_framebuffers;
use prism_core::tree::{build_tree, Group, Node, Span};
use prism_core::wire;
use prism_core::{CommandFilter, CommandTreeOptions, ResolveConfig, Service, ServiceConfig};
use prism_db::Context;
use proptest::prelude::*;

fn flagged(flags: &[Flag]) -> Command {
    flags.iter().fold(gl("glCommand"), |c, f| c.flag(*f))
}

fn arb_flags() -> impl Strategy<Value = Vec<Flag>> {
    prop::collection::vec(
        prop_oneof![
            4 => Just(Flag::DrawCall),
            1 => Just(Flag::Clear),
            1 => Just(Flag::EndOfFrame),
            1 => Just(Flag::PushUserMarker),
            1 => Just(Flag::PopUserMarker),
            1 => Just(Flag::TransformFeedback),
        ],
        0..2,
    )
}

fn arb_capture(max: usize) -> impl Strategy<Value = Capture> {
    prop::collection::vec(arb_flags(), 0..max)
        .prop_map(|cmds| Capture::new("prop").with_commands(cmds.iter().map(|f| flagged(f))))
}

fn arb_options() -> impl Strategy<Value = CommandTreeOptions> {
    (any::<[bool; 5]>(), 0u64..12, 0u64..12).prop_map(|(g, children, neighbours)| {
        CommandTreeOptions {
            group_by_user_markers: g[0],
            group_by_frame: g[1],
            group_by_draw_call: g[2],
            group_by_transform_feedback: g[3],
            allow_incomplete_frame: Some(g[4]),
            max_children: Some(children),
            max_neighbours: Some(neighbours),
            ..CommandTreeOptions::default()
        }
        .with_defaults(&ServiceConfig::default())
    })
}

fn tree_of(capture: &Capture, options: &CommandTreeOptions) -> Group {
    build_tree(
        &Context::new(),
        capture,
        &ApiRegistry::new(),
        &CommandFilter::default(),
        options,
    )
    .unwrap()
    .root
}

fn leaves(root: &Group) -> Vec<SubCmdIdx> {
    let mut out = Vec::new();
    root.walk(&mut |_, node| match node {
        Node::Command(at) => out.push(at),
        Node::Root(r) => out.push(r.id.clone()),
        Node::Group { .. } => {}
    });
    out
}

fn check_nesting(g: &Group) -> Result<(), TestCaseError> {
    let mut prev_end = g.start;
    for span in &g.spans {
        let (start, end) = span.bounds();
        prop_assert!(start >= prev_end, "{} overlaps its left sibling in {}", start, g.name);
        prop_assert!(end <= g.end, "[{}, {}) leaves {} [{}, {})", start, end, g.name, g.start, g.end);
        prev_end = end;
        if let Span::Group(child) = span {
            check_nesting(child)?;
        }
    }
    Ok(())
}

/// Clustering names its groups `"[first - last]"`; marker names may also
/// start with a bracket.
fn is_artificial(name: &str) -> bool {
    name.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|range| range.split_once(" - "))
        .is_some_and(|(a, b)| a.parse::<u64>().is_ok() && b.parse::<u64>().is_ok())
}

fn artificial_groups(g: &Group) -> usize {
    g.spans
        .iter()
        .map(|s| match s {
            Span::Group(child) => usize::from(is_artificial(&child.name)) + artificial_groups(child),
            _ => 0,
        })
        .sum()
}

#[test]
fn only_range_names_count_as_clusters() {
    assert!(is_artificial("[0 - 9]"));
    assert!(is_artificial("[100 - 104]"));
    assert!(!is_artificial("[shadow pass]"));
    assert!(!is_artificial("[0-9]"));
    assert!(!is_artificial("Frame 1"));
    assert!(!is_artificial("[Incomplete] Frame 2"));

    let mut root = Group::new("root", 0, 4);
    root.add_group(0, 2, "[shadow pass]", None).unwrap();
    assert_eq!(artificial_groups(&root), 0);
}

proptest! {
    #[test]
    fn unfiltered_trees_hold_every_command_once(
        capture in arb_capture(80),
        options in arb_options(),
    ) {
        let root = tree_of(&capture, &options);
        let mut ids: Vec<u64> = leaves(&root).iter().filter_map(SubCmdIdx::root).collect();
        ids.sort_unstable();
        let expected: Vec<u64> = (0..capture.len()).collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn group_ranges_nest_and_never_overlap(
        capture in arb_capture(80),
        options in arb_options(),
    ) {
        check_nesting(&tree_of(&capture, &options))?;
    }

    #[test]
    fn small_levels_are_not_clustered(
        capture in arb_capture(10),
        frames in any::<bool>(),
        draws in any::<bool>(),
    ) {
        let options = CommandTreeOptions {
            group_by_frame: frames,
            group_by_draw_call: draws,
            allow_incomplete_frame: Some(true),
            max_children: Some(10),
            max_neighbours: Some(0),
            ..CommandTreeOptions::default()
        };
        prop_assert_eq!(artificial_groups(&tree_of(&capture, &options)), 0);
    }

    #[test]
    fn framebuffer_changes_are_ordered_and_distinct(
        binds in prop::collection::vec(prop::option::of(0u32..3), 0..60),
    ) {
        let commands = binds.iter().map(|b| match b {
            Some(0) => gl("glBindFramebuffer").effect(Effect::BindAttachment {
                attachment: Attachment::Color0,
                info: None,
            }),
            Some(k) => gl("glBindFramebuffer").effect(bind_color(64 * k, 32 * k)),
            None => gl("glDrawArrays").flag(Flag::DrawCall),
        });
        let capture = Capture::new("fb").with_commands(commands);
        let changes = track_framebuffers(&Context::new(), &capture, &ApiRegistry::new()).unwrap();
        for list in changes.attachments.values() {
            for pair in list.windows(2) {
                prop_assert!(pair[0].after <= pair[1].after);
                prop_assert!(pair[0].info != pair[1].info || pair[0].error != pair[1].error);
            }
        }
    }

    #[test]
    fn set_values_read_back(width in any::<u64>(), count in any::<i64>()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let svc = Service::default();
            let c = import(&svc, Capture::new("edit").with_commands([
                gl("glViewport")
                    .param("rect", Struct::new("Rect").with("w", 1u64).with("h", 1u64))
                    .param("count", 0i64),
            ]));
            let rc = ResolveConfig::default();
            let cmd = c.command(0);

            let w = cmd.parameter("rect").field("w");
            let at = svc.set(&w, wire::Value::Value(Val::Uint(width)), &rc).await.unwrap();
            prop_assert_eq!(svc.get(&at, &rc).await.unwrap(), wire::Value::Value(Val::Uint(width)));

            let n = cmd.parameter("count");
            let at = svc.set(&n, wire::Value::Value(Val::Int(count)), &rc).await.unwrap();
            prop_assert_eq!(svc.get(&at, &rc).await.unwrap(), wire::Value::Value(Val::Int(count)));
            Ok(())
        })?;
    }
}
