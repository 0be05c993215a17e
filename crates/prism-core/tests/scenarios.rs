// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used, clippy::panic)]
//! End-to-end behaviour of the service over small synthetic captures.

mod common;

use common::{bind_color, command_tree, draw, draws, flat_options, gl, import};
use pretty_assertions::assert_eq;
use prism_capture::{ApiRegistry, Attachment, Capture, Flag, SubCmdIdx};
use prism_core::framebuffer::track_framebuffers;
use prism_core::tree::{Node, Span};
use prism_core::wire;
use prism_core::{CommandTreeOptions, Path, ResolveConfig, Service};
use prism_db::Context;

#[tokio::test]
async fn deleted_commands_disappear_from_the_new_capture() {
    let svc = Service::default();
    let c = import(&svc, Capture::new("s4").with_commands([gl("c0"), gl("c1"), gl("c2")]));
    let rc = ResolveConfig::default();

    let Path::Capture(edited) = svc.delete(&c.command(0).into(), &rc).await.unwrap() else {
        panic!("delete should return a capture path");
    };
    assert_ne!(edited, c);
    let wire::Value::Commands(cmds) = svc.get(&edited.commands(), &rc).await.unwrap() else {
        panic!("expected a command list");
    };
    let names: Vec<&str> = cmds.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["c1", "c2"]);

    // The original is untouched.
    let wire::Value::Commands(cmds) = svc.get(&c.commands(), &rc).await.unwrap() else {
        panic!("expected a command list");
    };
    assert_eq!(cmds.len(), 3);
}

#[tokio::test]
async fn large_flat_levels_are_clustered() {
    let svc = Service::default();
    let c = import(&svc, draws(105));
    let options = CommandTreeOptions {
        max_children: Some(10),
        ..flat_options()
    };
    let tree = command_tree(&svc, c, options).await;

    let root = &tree.root;
    assert_eq!(root.count(), 11);
    for (i, span) in root.spans.iter().enumerate() {
        let Span::Group(g) = span else {
            panic!("child {i} should be a cluster");
        };
        let first = i as u64 * 10;
        if i < 10 {
            assert_eq!(g.name, format!("[{first} - {}]", first + 9));
            assert_eq!(g.count(), 10);
        } else {
            assert_eq!(g.name, "[100 - 104]");
            assert_eq!(g.count(), 5);
        }
        assert!(g.spans.iter().all(|s| matches!(s, Span::Command { .. })));
    }

    let mut walked = Vec::new();
    root.walk(&mut |_, node| {
        if let Node::Command(at) = node {
            walked.push(at);
        }
    });
    let expected: Vec<SubCmdIdx> = (0..105).map(SubCmdIdx::top).collect();
    assert_eq!(walked, expected);
}

#[tokio::test]
async fn transform_feedback_groups_enclose_draw_groups() {
    let svc = Service::default();
    let c = import(
        &svc,
        Capture::new("xfb").with_commands([
            gl("glBindBuffer"),
            draw().flag(Flag::TransformFeedback),
        ]),
    );
    let options = CommandTreeOptions {
        group_by_draw_call: true,
        group_by_transform_feedback: true,
        ..flat_options()
    };
    let tree = command_tree(&svc, c, options).await;

    let [Span::Group(outer)] = tree.root.spans.as_slice() else {
        panic!("expected one top-level group, got {:?}", tree.root.spans);
    };
    assert_eq!(outer.name, "Transform Feedback 1");
    let [Span::Group(inner)] = outer.spans.as_slice() else {
        panic!("expected one nested group, got {:?}", outer.spans);
    };
    assert_eq!(inner.name, "Draw 1");
    assert_eq!(inner.count(), 2);
}

#[tokio::test]
async fn identical_tree_requests_share_one_build() {
    let svc = Service::default();
    let c = import(&svc, draws(12));
    let first = command_tree(&svc, c, flat_options()).await;
    let builds = svc.database().build_count();
    let second = command_tree(&svc, c, flat_options()).await;
    assert_eq!(svc.database().build_count(), builds);
    assert_eq!(first.root.count(), second.root.count());
}

#[test]
fn unchanged_attachments_collapse_to_one_entry() {
    let mut commands = vec![draw().effect(bind_color(800, 600))];
    commands.extend((0..1000).map(|_| gl("glUniform1f").effect(bind_color(800, 600))));
    commands.push(draw().effect(bind_color(800, 600)));
    let capture = Capture::new("s6").with_commands(commands);

    let changes = track_framebuffers(&Context::new(), &capture, &ApiRegistry::new()).unwrap();
    let color = &changes.attachments[&Attachment::Color0];
    assert_eq!(color.len(), 1);
    let info = color[0].info.as_ref().unwrap();
    assert_eq!((info.width, info.height), (800, 600));
    assert_eq!(color[0].after, SubCmdIdx::top(0));
}
