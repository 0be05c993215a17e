// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::sync::Arc;

use prism_capture::{ApiId, Attachment, AttachmentInfo, Capture, Command, Effect, Flag};
use prism_core::path::CapturePath;
use prism_core::tree::CommandTree;
use prism_core::{CommandFilter, CommandTreeOptions, Path, ResolveConfig, Resolved, Service};

pub fn gl(name: &str) -> Command {
    Command::new(ApiId::GLES, 0, name)
}

pub fn draw() -> Command {
    gl("glDrawArrays").flag(Flag::DrawCall)
}

/// A capture of `n` draw calls.
pub fn draws(n: usize) -> Capture {
    Capture::new("draws").with_commands((0..n).map(|_| draw()))
}

pub fn bind_color(width: u32, height: u32) -> Effect {
    Effect::BindAttachment {
        attachment: Attachment::Color0,
        info: Some(AttachmentInfo {
            width,
            height,
            index: 0,
            format: "RGBA8".into(),
        }),
    }
}

/// Tree options with every grouping switched off.
pub fn flat_options() -> CommandTreeOptions {
    CommandTreeOptions::default()
}

pub fn import(svc: &Service, capture: Capture) -> CapturePath {
    svc.import_capture(capture).unwrap_or_else(|e| panic!("import failed: {e}"))
}

/// Resolves the command tree of `capture` under `options`.
pub async fn command_tree(
    svc: &Service,
    capture: CapturePath,
    options: CommandTreeOptions,
) -> Arc<CommandTree> {
    let ctx = svc
        .context(&ResolveConfig::default())
        .unwrap_or_else(|e| panic!("context: {e}"));
    let path: Path = capture.command_tree(CommandFilter::default(), options);
    match prism_core::resolve(&ctx, &path).await {
        Ok(Resolved::CommandTree { tree, .. }) => tree,
        Ok(other) => panic!("expected a command tree, got {other:?}"),
        Err(e) => panic!("command tree: {e}"),
    }
}
