// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! On-wire representation of resolved paths.

use prism_capture::{
    Attachment, AttachmentInfo, Command, ConstantSet, ContextInfo, FramebufferObservation, Header,
    Message, Val,
};
use prism_db::Id;
use serde::{Deserialize, Serialize};

use crate::events::Event;
use crate::path::Path;
use crate::report::Report;
use crate::resources::ResourceList;
use crate::resolve::Resolved;
use crate::services::DeviceInfo;
use crate::state_tree::StateTreeNodeInfo;
use crate::stats::Stats;
use crate::tree::TreeNodeInfo;

/// Summary of a capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureInfo {
    /// Capture name.
    pub name: String,
    /// File header.
    pub header: Header,
    /// Number of top-level commands.
    pub commands: u64,
    /// Number of initial-state commands.
    pub initial_commands: u64,
}

/// A built command tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTreeInfo {
    /// Tree identifier for node paths.
    pub id: Id,
    /// Root node.
    pub root: TreeNodeInfo,
}

/// A built state tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTreeInfo {
    /// Tree identifier for node paths.
    pub id: Id,
    /// Root node.
    pub root: StateTreeNodeInfo,
}

/// An attachment bound after a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundAttachment {
    /// Slot.
    pub attachment: Attachment,
    /// Bound image.
    pub info: AttachmentInfo,
}

/// A value returned by `get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Value {
    Value(Val),
    Capture(CaptureInfo),
    Commands(Vec<Command>),
    Command(Command),
    CommandTree(CommandTreeInfo),
    CommandTreeNode(TreeNodeInfo),
    Contexts(Vec<ContextInfo>),
    Context(ContextInfo),
    ConstantSet(ConstantSet),
    Device(DeviceInfo),
    Events(Vec<Event>),
    FramebufferAttachments(Vec<BoundAttachment>),
    ImageInfo(AttachmentInfo),
    FramebufferObservation(FramebufferObservation),
    Messages(Vec<Message>),
    Report(Report),
    Resources(ResourceList),
    StateTree(StateTreeInfo),
    StateTreeNode(StateTreeNodeInfo),
    Stats(Stats),
    Blob(Vec<u8>),
    Path(Path),
    /// Collaborator payloads with no fixed shape.
    Json(serde_json::Value),
}

impl Value {
    /// The serialized `type` tag, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Capture(_) => "capture",
            Self::Commands(_) => "commands",
            Self::Command(_) => "command",
            Self::CommandTree(_) => "command_tree",
            Self::CommandTreeNode(_) => "command_tree_node",
            Self::Contexts(_) => "contexts",
            Self::Context(_) => "context",
            Self::ConstantSet(_) => "constant_set",
            Self::Device(_) => "device",
            Self::Events(_) => "events",
            Self::FramebufferAttachments(_) => "framebuffer_attachments",
            Self::ImageInfo(_) => "image_info",
            Self::FramebufferObservation(_) => "framebuffer_observation",
            Self::Messages(_) => "messages",
            Self::Report(_) => "report",
            Self::Resources(_) => "resources",
            Self::StateTree(_) => "state_tree",
            Self::StateTreeNode(_) => "state_tree_node",
            Self::Stats(_) => "stats",
            Self::Blob(_) => "blob",
            Self::Path(_) => "path",
            Self::Json(_) => "json",
        }
    }
}

impl From<Resolved> for Value {
    fn from(r: Resolved) -> Self {
        match r {
            Resolved::Val(v) => Self::Value(v),
            Resolved::Capture(c) => Self::Capture(CaptureInfo {
                name: c.name.clone(),
                header: c.header.clone(),
                commands: c.len(),
                initial_commands: c.initial_commands.len() as u64,
            }),
            Resolved::Commands(cmds) => Self::Commands(cmds),
            Resolved::Command(cmd) => Self::Command(cmd),
            Resolved::CommandTree { id, tree } => Self::CommandTree(CommandTreeInfo {
                id,
                root: tree.root_info(),
            }),
            Resolved::CommandTreeNode(n) => Self::CommandTreeNode(n),
            Resolved::Contexts(c) => Self::Contexts(c),
            Resolved::Context(c) => Self::Context(c),
            Resolved::ConstantSet(s) => Self::ConstantSet(s),
            Resolved::Device(d) => Self::Device(d),
            Resolved::Events(e) => Self::Events(e.events.clone()),
            Resolved::FramebufferAttachments(list) => Self::FramebufferAttachments(
                list.into_iter()
                    .map(|(attachment, info)| BoundAttachment { attachment, info })
                    .collect(),
            ),
            Resolved::Image(i) => Self::ImageInfo(i),
            Resolved::FramebufferObservation(o) => Self::FramebufferObservation(o),
            Resolved::Messages(m) => Self::Messages(m),
            Resolved::Report(r) => Self::Report((*r).clone()),
            Resolved::Resources(r) => Self::Resources((*r).clone()),
            Resolved::StateTree { id, tree } => Self::StateTree(StateTreeInfo {
                id,
                root: tree.root_info(),
            }),
            Resolved::StateTreeNode(n) => Self::StateTreeNode(n),
            Resolved::Stats(s) => Self::Stats((*s).clone()),
            Resolved::Bytes(b) => Self::Blob(b),
            Resolved::Path(p) => Self::Path(p),
            Resolved::Wire(v) => v,
        }
    }
}
