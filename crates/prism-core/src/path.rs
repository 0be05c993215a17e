// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed paths addressing everything the service can serve.
//!
//! A path is a chain of nodes ending at a root (usually a capture). Each node
//! kind has a fixed parent type where the grammar allows only one, and a
//! boxed [`Path`] where any value-producing path may precede it (fields,
//! indices, slices, conversions).
//!
//! Paths are plain data: `Display` renders a stable string that differs for
//! any two distinct paths, so paths can key caches and logs.

use std::fmt;

use prism_capture::{ApiId, Attachment, Key, SubCmdIdx};
use prism_db::Id;
use serde::{Deserialize, Serialize};

use crate::events::EventKinds;
use crate::filter::CommandFilter;
use crate::tree::CommandTreeOptions;

/// A stored capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapturePath {
    /// Capture identifier.
    pub id: Id,
}

/// Top-level commands of a capture, optionally a sub-range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandsPath {
    /// Owning capture.
    pub capture: CapturePath,
    /// First command and end (exclusive); all commands when absent.
    #[serde(default)]
    pub range: Option<(u64, u64)>,
}

/// One command, possibly nested.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandPath {
    /// Owning capture.
    pub capture: CapturePath,
    /// Position of the command.
    pub indices: SubCmdIdx,
}

/// Request for a command tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandTreePath {
    /// Capture to build the tree for.
    pub capture: CapturePath,
    /// Commands to include.
    #[serde(default)]
    pub filter: CommandFilter,
    /// Grouping options.
    #[serde(default)]
    pub options: CommandTreeOptions,
}

/// A node of a built command tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandTreeNodePath {
    /// Identifier of the tree request.
    pub tree: Id,
    /// Child indices from the root.
    pub indices: Vec<u64>,
}

/// The tree node that represents a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandTreeNodeForCommandPath {
    /// Identifier of the tree request.
    pub tree: Id,
    /// Command to locate.
    pub command: CommandPath,
    /// Stop at a group whose last command is `command`.
    #[serde(default)]
    pub prefer_group: bool,
}

/// Contexts of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextsPath {
    /// Owning capture.
    pub capture: CapturePath,
}

/// One context of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextPath {
    /// Owning capture.
    pub capture: CapturePath,
    /// Context identifier.
    pub id: Id,
}

/// A constant set published by an API backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstantSetPath {
    /// Publishing API.
    pub api: ApiId,
    /// Index into the backend's constant sets.
    pub index: u32,
}

/// A replay device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevicePath {
    /// Device identifier.
    pub id: Id,
}

/// Events of a capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventsPath {
    /// Owning capture.
    pub capture: CapturePath,
    /// Commands to consider.
    #[serde(default)]
    pub filter: CommandFilter,
    /// Event kinds to report.
    #[serde(default)]
    pub kinds: EventKinds,
}

/// A named field of a record value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    /// Record-valued path.
    pub parent: Box<Path>,
    /// Field name.
    pub name: String,
}

/// One element of an array-like value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayIndexPath {
    /// Array-valued path.
    pub parent: Box<Path>,
    /// Element index.
    pub index: u64,
}

/// One entry of a map value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapIndexPath {
    /// Map-valued path.
    pub parent: Box<Path>,
    /// Entry key.
    pub key: Key,
}

/// Elements `[start, end)` of an array-like value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlicePath {
    /// Array-valued path.
    pub parent: Box<Path>,
    /// First element.
    pub start: u64,
    /// End element (exclusive).
    pub end: u64,
}

/// A value converted to another representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AsPath {
    /// Source value.
    pub parent: Box<Path>,
    /// Target representation name.
    pub to: String,
}

/// Framebuffer attachments bound after a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FramebufferAttachmentsPath {
    /// Command after which to look.
    pub after: CommandPath,
}

/// One framebuffer attachment after a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FramebufferAttachmentPath {
    /// Command after which to look.
    pub after: CommandPath,
    /// Attachment slot.
    pub attachment: Attachment,
}

/// A path parented only by a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfCommandPath {
    /// The command.
    pub command: CommandPath,
}

/// A path parented only by a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfCapturePath {
    /// The capture.
    pub capture: CapturePath,
}

/// A record stored directly in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredPath {
    /// Record identifier.
    pub id: Id,
}

/// Bytes of a memory pool after a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryPath {
    /// Command after which to read.
    pub after: CommandPath,
    /// Pool identifier.
    pub pool: u32,
    /// First byte.
    pub address: u64,
    /// Number of bytes.
    pub size: u64,
}

/// Memory decoded as an API type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryAsTypePath {
    /// The memory.
    pub memory: MemoryPath,
    /// Type name.
    pub type_name: String,
}

/// Geometry of a draw.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshPath {
    /// Command or tree node producing the mesh.
    pub parent: Box<Path>,
    /// Replace normals with face normals.
    #[serde(default)]
    pub faceted: bool,
}

/// A named parameter of a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterPath {
    /// The command.
    pub command: CommandPath,
    /// Parameter name.
    pub name: String,
}

/// Diagnostics report of a capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportPath {
    /// Owning capture.
    pub capture: CapturePath,
    /// Replay device the report targets.
    #[serde(default)]
    pub device: Option<Id>,
    /// Commands to report on.
    #[serde(default)]
    pub filter: CommandFilter,
}

/// Contents of a tracked resource after a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDataPath {
    /// Command after which to read.
    pub after: CommandPath,
    /// Tracked resource identifier.
    pub id: Id,
}

/// The state of one API after a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatePath {
    /// Command after which to read.
    pub after: CommandPath,
    /// API.
    pub api: ApiId,
}

/// Request for a state tree over a state value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateTreePath {
    /// State (or any value) to expose as a tree.
    pub state: Box<Path>,
    /// Array chunk size; `None` uses the service default.
    #[serde(default)]
    pub array_group_size: Option<u64>,
}

/// A node of a built state tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateTreeNodePath {
    /// Identifier of the tree request.
    pub tree: Id,
    /// Child indices from the root.
    pub indices: Vec<u64>,
}

/// The state tree node showing a value path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateTreeNodeForPathPath {
    /// Identifier of the tree request.
    pub tree: Id,
    /// Value path to locate.
    pub member: Box<Path>,
}

/// Summary statistics of a capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatsPath {
    /// Owning capture.
    pub capture: CapturePath,
    /// Commands to count.
    #[serde(default)]
    pub filter: CommandFilter,
}

/// A thumbnail image of a command, tree node or attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbnailPath {
    /// Thumbnailed path.
    pub parent: Box<Path>,
    /// Desired width in pixels.
    pub width: u32,
    /// Desired height in pixels.
    pub height: u32,
}

/// An API type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypePath {
    /// API.
    pub api: ApiId,
    /// Type index.
    pub type_index: u64,
}

/// Any addressable node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum Path {
    /// [`CapturePath`].
    Capture(CapturePath),
    /// [`CommandsPath`].
    Commands(CommandsPath),
    /// [`CommandPath`].
    Command(CommandPath),
    /// [`CommandTreePath`].
    CommandTree(CommandTreePath),
    /// [`CommandTreeNodePath`].
    CommandTreeNode(CommandTreeNodePath),
    /// [`CommandTreeNodeForCommandPath`].
    CommandTreeNodeForCommand(CommandTreeNodeForCommandPath),
    /// [`ContextsPath`].
    Contexts(ContextsPath),
    /// [`ContextPath`].
    Context(ContextPath),
    /// [`ConstantSetPath`].
    ConstantSet(ConstantSetPath),
    /// [`DevicePath`].
    Device(DevicePath),
    /// [`EventsPath`].
    Events(EventsPath),
    /// [`FieldPath`].
    Field(FieldPath),
    /// [`ArrayIndexPath`].
    ArrayIndex(ArrayIndexPath),
    /// [`MapIndexPath`].
    MapIndex(MapIndexPath),
    /// [`SlicePath`].
    Slice(SlicePath),
    /// [`AsPath`].
    As(AsPath),
    /// [`FramebufferAttachmentsPath`].
    FramebufferAttachments(FramebufferAttachmentsPath),
    /// [`FramebufferAttachmentPath`].
    FramebufferAttachment(FramebufferAttachmentPath),
    /// Framebuffer content recorded after a command.
    FramebufferObservation(OfCommandPath),
    /// Render-pass dependency graph of a capture.
    Framegraph(OfCapturePath),
    /// Global state after a command.
    GlobalState(OfCommandPath),
    /// Stored image descriptor.
    ImageInfo(StoredPath),
    /// Stored byte blob.
    Blob(StoredPath),
    /// [`MemoryPath`].
    Memory(MemoryPath),
    /// [`MemoryAsTypePath`].
    MemoryAsType(MemoryAsTypePath),
    /// [`MeshPath`].
    Mesh(MeshPath),
    /// Decoder messages of a capture.
    Messages(OfCapturePath),
    /// Performance counters of a command.
    Metrics(OfCommandPath),
    /// [`ParameterPath`].
    Parameter(ParameterPath),
    /// System profile of a capture.
    Perfetto(OfCapturePath),
    /// Pipelines bound at a command.
    Pipelines(OfCommandPath),
    /// [`ReportPath`].
    Report(ReportPath),
    /// [`ResourceDataPath`].
    ResourceData(ResourceDataPath),
    /// Resources created in a capture.
    Resources(OfCapturePath),
    /// Return value of a command.
    Result(OfCommandPath),
    /// [`StatePath`].
    State(StatePath),
    /// [`StateTreePath`].
    StateTree(StateTreePath),
    /// [`StateTreeNodePath`].
    StateTreeNode(StateTreeNodePath),
    /// [`StateTreeNodeForPathPath`].
    StateTreeNodeForPath(StateTreeNodeForPathPath),
    /// [`StatsPath`].
    Stats(StatsPath),
    /// [`ThumbnailPath`].
    Thumbnail(ThumbnailPath),
    /// [`TypePath`].
    Type(TypePath),
}

/// Node kind of a [`Path`], used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum PathKind {
    Capture,
    Commands,
    Command,
    CommandTree,
    CommandTreeNode,
    CommandTreeNodeForCommand,
    Contexts,
    Context,
    ConstantSet,
    Device,
    Events,
    Field,
    ArrayIndex,
    MapIndex,
    Slice,
    As,
    FramebufferAttachments,
    FramebufferAttachment,
    FramebufferObservation,
    Framegraph,
    GlobalState,
    ImageInfo,
    Blob,
    Memory,
    MemoryAsType,
    Mesh,
    Messages,
    Metrics,
    Parameter,
    Perfetto,
    Pipelines,
    Report,
    ResourceData,
    Resources,
    Result,
    State,
    StateTree,
    StateTreeNode,
    StateTreeNodeForPath,
    Stats,
    Thumbnail,
    Type,
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Path {
    /// Node kind.
    pub fn kind(&self) -> PathKind {
        match self {
            Self::Capture(_) => PathKind::Capture,
            Self::Commands(_) => PathKind::Commands,
            Self::Command(_) => PathKind::Command,
            Self::CommandTree(_) => PathKind::CommandTree,
            Self::CommandTreeNode(_) => PathKind::CommandTreeNode,
            Self::CommandTreeNodeForCommand(_) => PathKind::CommandTreeNodeForCommand,
            Self::Contexts(_) => PathKind::Contexts,
            Self::Context(_) => PathKind::Context,
            Self::ConstantSet(_) => PathKind::ConstantSet,
            Self::Device(_) => PathKind::Device,
            Self::Events(_) => PathKind::Events,
            Self::Field(_) => PathKind::Field,
            Self::ArrayIndex(_) => PathKind::ArrayIndex,
            Self::MapIndex(_) => PathKind::MapIndex,
            Self::Slice(_) => PathKind::Slice,
            Self::As(_) => PathKind::As,
            Self::FramebufferAttachments(_) => PathKind::FramebufferAttachments,
            Self::FramebufferAttachment(_) => PathKind::FramebufferAttachment,
            Self::FramebufferObservation(_) => PathKind::FramebufferObservation,
            Self::Framegraph(_) => PathKind::Framegraph,
            Self::GlobalState(_) => PathKind::GlobalState,
            Self::ImageInfo(_) => PathKind::ImageInfo,
            Self::Blob(_) => PathKind::Blob,
            Self::Memory(_) => PathKind::Memory,
            Self::MemoryAsType(_) => PathKind::MemoryAsType,
            Self::Mesh(_) => PathKind::Mesh,
            Self::Messages(_) => PathKind::Messages,
            Self::Metrics(_) => PathKind::Metrics,
            Self::Parameter(_) => PathKind::Parameter,
            Self::Perfetto(_) => PathKind::Perfetto,
            Self::Pipelines(_) => PathKind::Pipelines,
            Self::Report(_) => PathKind::Report,
            Self::ResourceData(_) => PathKind::ResourceData,
            Self::Resources(_) => PathKind::Resources,
            Self::Result(_) => PathKind::Result,
            Self::State(_) => PathKind::State,
            Self::StateTree(_) => PathKind::StateTree,
            Self::StateTreeNode(_) => PathKind::StateTreeNode,
            Self::StateTreeNodeForPath(_) => PathKind::StateTreeNodeForPath,
            Self::Stats(_) => PathKind::Stats,
            Self::Thumbnail(_) => PathKind::Thumbnail,
            Self::Type(_) => PathKind::Type,
        }
    }

    /// The enclosing node, or `None` at a root.
    pub fn parent(&self) -> Option<Path> {
        match self {
            Self::Capture(_)
            | Self::CommandTreeNode(_)
            | Self::CommandTreeNodeForCommand(_)
            | Self::ConstantSet(_)
            | Self::Device(_)
            | Self::ImageInfo(_)
            | Self::Blob(_)
            | Self::StateTreeNode(_)
            | Self::StateTreeNodeForPath(_)
            | Self::Type(_) => None,
            Self::Commands(p) => Some(p.capture.into()),
            Self::Command(p) => Some(p.capture.into()),
            Self::CommandTree(p) => Some(p.capture.into()),
            Self::Contexts(p) => Some(p.capture.into()),
            Self::Context(p) => Some(p.capture.into()),
            Self::Events(p) => Some(p.capture.into()),
            Self::Report(p) => Some(p.capture.into()),
            Self::Stats(p) => Some(p.capture.into()),
            Self::Framegraph(p) | Self::Messages(p) | Self::Perfetto(p) | Self::Resources(p) => {
                Some(p.capture.into())
            }
            Self::Field(p) => Some((*p.parent).clone()),
            Self::ArrayIndex(p) => Some((*p.parent).clone()),
            Self::MapIndex(p) => Some((*p.parent).clone()),
            Self::Slice(p) => Some((*p.parent).clone()),
            Self::As(p) => Some((*p.parent).clone()),
            Self::Mesh(p) => Some((*p.parent).clone()),
            Self::Thumbnail(p) => Some((*p.parent).clone()),
            Self::StateTree(p) => Some((*p.state).clone()),
            Self::FramebufferAttachments(p) => Some(p.after.clone().into()),
            Self::FramebufferAttachment(p) => Some(p.after.clone().into()),
            Self::Memory(p) => Some(p.after.clone().into()),
            Self::MemoryAsType(p) => Some(p.memory.after.clone().into()),
            Self::ResourceData(p) => Some(p.after.clone().into()),
            Self::State(p) => Some(p.after.clone().into()),
            Self::Parameter(p) => Some(p.command.clone().into()),
            Self::FramebufferObservation(p)
            | Self::GlobalState(p)
            | Self::Metrics(p)
            | Self::Pipelines(p)
            | Self::Result(p) => Some(p.command.clone().into()),
        }
    }

    /// The capture this path belongs to, found by walking parents.
    pub fn capture(&self) -> Option<CapturePath> {
        let mut p = self.clone();
        loop {
            if let Self::Capture(c) = p {
                return Some(c);
            }
            p = p.parent()?;
        }
    }

    /// The nearest command on the parent chain, including `self`.
    pub fn command(&self) -> Option<CommandPath> {
        let mut p = self.clone();
        loop {
            if let Self::Command(c) = p {
                return Some(c);
            }
            p = p.parent()?;
        }
    }

    /// Field `name` of this value.
    #[must_use]
    pub fn field(self, name: impl Into<String>) -> Path {
        Self::Field(FieldPath {
            parent: Box::new(self),
            name: name.into(),
        })
    }

    /// Element `index` of this value.
    #[must_use]
    pub fn index(self, index: u64) -> Path {
        Self::ArrayIndex(ArrayIndexPath {
            parent: Box::new(self),
            index,
        })
    }

    /// Entry `key` of this value.
    #[must_use]
    pub fn key(self, key: impl Into<Key>) -> Path {
        Self::MapIndex(MapIndexPath {
            parent: Box::new(self),
            key: key.into(),
        })
    }

    /// Elements `[start, end)` of this value.
    #[must_use]
    pub fn slice(self, start: u64, end: u64) -> Path {
        Self::Slice(SlicePath {
            parent: Box::new(self),
            start,
            end,
        })
    }

    /// A state tree over this value.
    #[must_use]
    pub fn state_tree(self, array_group_size: Option<u64>) -> Path {
        Self::StateTree(StateTreePath {
            state: Box::new(self),
            array_group_size,
        })
    }

    /// This value converted to the representation `to`.
    #[must_use]
    pub fn as_type(self, to: impl Into<String>) -> Path {
        Self::As(AsPath {
            parent: Box::new(self),
            to: to.into(),
        })
    }
}

impl CapturePath {
    /// Path of the capture stored under `id`.
    pub fn new(id: Id) -> Self {
        Self { id }
    }

    /// All top-level commands.
    pub fn commands(self) -> Path {
        Path::Commands(CommandsPath {
            capture: self,
            range: None,
        })
    }

    /// Top-level command `id`.
    pub fn command(self, id: u64) -> CommandPath {
        CommandPath {
            capture: self,
            indices: SubCmdIdx::top(id),
        }
    }

    /// The command at `indices`.
    pub fn command_at(self, indices: SubCmdIdx) -> CommandPath {
        CommandPath {
            capture: self,
            indices,
        }
    }

    /// Command-tree request.
    pub fn command_tree(self, filter: CommandFilter, options: CommandTreeOptions) -> Path {
        Path::CommandTree(CommandTreePath {
            capture: self,
            filter,
            options,
        })
    }

    /// Contexts.
    pub fn contexts(self) -> Path {
        Path::Contexts(ContextsPath { capture: self })
    }

    /// Events request.
    pub fn events(self, filter: CommandFilter, kinds: EventKinds) -> Path {
        Path::Events(EventsPath {
            capture: self,
            filter,
            kinds,
        })
    }

    /// Decoder messages.
    pub fn messages(self) -> Path {
        Path::Messages(OfCapturePath { capture: self })
    }

    /// Diagnostics report.
    pub fn report(self, device: Option<Id>, filter: CommandFilter) -> Path {
        Path::Report(ReportPath {
            capture: self,
            device,
            filter,
        })
    }

    /// Tracked resources.
    pub fn resources(self) -> Path {
        Path::Resources(OfCapturePath { capture: self })
    }

    /// Summary statistics.
    pub fn stats(self, filter: CommandFilter) -> Path {
        Path::Stats(StatsPath {
            capture: self,
            filter,
        })
    }
}

impl CommandPath {
    /// Parameter `name`.
    pub fn parameter(&self, name: impl Into<String>) -> Path {
        Path::Parameter(ParameterPath {
            command: self.clone(),
            name: name.into(),
        })
    }

    /// Return value.
    pub fn result(&self) -> Path {
        Path::Result(OfCommandPath {
            command: self.clone(),
        })
    }

    /// Global state after the command.
    pub fn global_state(&self) -> Path {
        Path::GlobalState(OfCommandPath {
            command: self.clone(),
        })
    }

    /// State of `api` after the command.
    pub fn state(&self, api: ApiId) -> Path {
        Path::State(StatePath {
            after: self.clone(),
            api,
        })
    }

    /// Bound attachments after the command.
    pub fn framebuffer_attachments(&self) -> Path {
        Path::FramebufferAttachments(FramebufferAttachmentsPath {
            after: self.clone(),
        })
    }

    /// One attachment after the command.
    pub fn framebuffer_attachment(&self, attachment: Attachment) -> Path {
        Path::FramebufferAttachment(FramebufferAttachmentPath {
            after: self.clone(),
            attachment,
        })
    }

    /// Bytes of `pool` after the command.
    pub fn memory(&self, pool: u32, address: u64, size: u64) -> Path {
        Path::Memory(MemoryPath {
            after: self.clone(),
            pool,
            address,
            size,
        })
    }

    /// Contents of resource `id` after the command.
    pub fn resource_data(&self, id: Id) -> Path {
        Path::ResourceData(ResourceDataPath {
            after: self.clone(),
            id,
        })
    }
}

macro_rules! into_path {
    ($($t:ty => $v:ident),* $(,)?) => {
        $(impl From<$t> for Path {
            fn from(p: $t) -> Self {
                Self::$v(p)
            }
        })*
    };
}

into_path!(
    CapturePath => Capture,
    CommandsPath => Commands,
    CommandPath => Command,
    CommandTreePath => CommandTree,
    CommandTreeNodePath => CommandTreeNode,
    CommandTreeNodeForCommandPath => CommandTreeNodeForCommand,
    ContextPath => Context,
    ConstantSetPath => ConstantSet,
    DevicePath => Device,
    FieldPath => Field,
    ArrayIndexPath => ArrayIndex,
    MapIndexPath => MapIndex,
    SlicePath => Slice,
    MemoryPath => Memory,
    ParameterPath => Parameter,
    StateTreePath => StateTree,
    StateTreeNodePath => StateTreeNode,
    StateTreeNodeForPathPath => StateTreeNodeForPath,
);

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_json<T: Serialize>(f: &mut fmt::Formatter<'_>, value: &T) -> fmt::Result {
    let s = serde_json::to_string(value).map_err(|_| fmt::Error)?;
    f.write_str(&s)
}

fn write_key(f: &mut fmt::Formatter<'_>, key: &Key) -> fmt::Result {
    match key {
        Key::Bool(b) => write!(f, "{{{b}}}"),
        Key::Int(i) => write!(f, "{{{i}i}}"),
        Key::Uint(u) => write!(f, "{{{u}}}"),
        Key::Str(s) => write!(f, "{{{s:?}}}"),
        Key::Id(id) => write!(f, "{{id:{id}}}"),
    }
}

fn write_indices(f: &mut fmt::Formatter<'_>, indices: &[u64]) -> fmt::Result {
    for (i, v) in indices.iter().enumerate() {
        if i > 0 {
            f.write_str(".")?;
        }
        write!(f, "{v}")?;
    }
    Ok(())
}

impl fmt::Display for CapturePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capture<{}>", self.id)
    }
}

impl fmt::Display for CommandPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.command({})", self.capture, self.indices)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture(p) => write!(f, "{p}"),
            Self::Commands(p) => match p.range {
                Some((s, e)) => write!(f, "{}.commands({s}..{e})", p.capture),
                None => write!(f, "{}.commands()", p.capture),
            },
            Self::Command(p) => write!(f, "{p}"),
            Self::CommandTree(p) => {
                write!(f, "{}.command_tree(", p.capture)?;
                write_json(f, &(&p.filter, &p.options))?;
                f.write_str(")")
            }
            Self::CommandTreeNode(p) => {
                write!(f, "command_tree<{}>.node(", p.tree)?;
                write_indices(f, &p.indices)?;
                f.write_str(")")
            }
            Self::CommandTreeNodeForCommand(p) => write!(
                f,
                "command_tree<{}>.node_for({}, prefer_group={})",
                p.tree, p.command, p.prefer_group
            ),
            Self::Contexts(p) => write!(f, "{}.contexts()", p.capture),
            Self::Context(p) => write!(f, "{}.context({})", p.capture, p.id),
            Self::ConstantSet(p) => write!(f, "constant_set(api={}, index={})", p.api.0, p.index),
            Self::Device(p) => write!(f, "device<{}>", p.id),
            Self::Events(p) => {
                write!(f, "{}.events(", p.capture)?;
                write_json(f, &(&p.filter, &p.kinds))?;
                f.write_str(")")
            }
            Self::Field(p) => {
                if is_ident(&p.name) {
                    write!(f, "{}.{}", p.parent, p.name)
                } else {
                    write!(f, "{}.{:?}", p.parent, p.name)
                }
            }
            Self::ArrayIndex(p) => write!(f, "{}[{}]", p.parent, p.index),
            Self::MapIndex(p) => {
                write!(f, "{}", p.parent)?;
                write_key(f, &p.key)
            }
            Self::Slice(p) => write!(f, "{}[{}:{}]", p.parent, p.start, p.end),
            Self::As(p) => write!(f, "{}.as({:?})", p.parent, p.to),
            Self::FramebufferAttachments(p) => write!(f, "{}.framebuffer_attachments()", p.after),
            Self::FramebufferAttachment(p) => {
                write!(f, "{}.framebuffer_attachment({})", p.after, p.attachment)
            }
            Self::FramebufferObservation(p) => {
                write!(f, "{}.framebuffer_observation()", p.command)
            }
            Self::Framegraph(p) => write!(f, "{}.framegraph()", p.capture),
            Self::GlobalState(p) => write!(f, "{}.global_state()", p.command),
            Self::ImageInfo(p) => write!(f, "image_info<{}>", p.id),
            Self::Blob(p) => write!(f, "blob<{}>", p.id),
            Self::Memory(p) => write!(
                f,
                "{}.memory(pool={}, address={:#x}, size={})",
                p.after, p.pool, p.address, p.size
            ),
            Self::MemoryAsType(p) => write!(
                f,
                "{}.memory_as_type(pool={}, address={:#x}, size={}, type={:?})",
                p.memory.after, p.memory.pool, p.memory.address, p.memory.size, p.type_name
            ),
            Self::Mesh(p) => write!(f, "{}.mesh(faceted={})", p.parent, p.faceted),
            Self::Messages(p) => write!(f, "{}.messages()", p.capture),
            Self::Metrics(p) => write!(f, "{}.metrics()", p.command),
            Self::Parameter(p) => write!(f, "{}.parameter({:?})", p.command, p.name),
            Self::Perfetto(p) => write!(f, "{}.perfetto()", p.capture),
            Self::Pipelines(p) => write!(f, "{}.pipelines()", p.command),
            Self::Report(p) => {
                write!(f, "{}.report(", p.capture)?;
                write_json(f, &(&p.device, &p.filter))?;
                f.write_str(")")
            }
            Self::ResourceData(p) => write!(f, "{}.resource_data({})", p.after, p.id),
            Self::Resources(p) => write!(f, "{}.resources()", p.capture),
            Self::Result(p) => write!(f, "{}.result()", p.command),
            Self::State(p) => write!(f, "{}.state(api={})", p.after, p.api.0),
            Self::StateTree(p) => match p.array_group_size {
                Some(n) => write!(f, "{}.state_tree(group={n})", p.state),
                None => write!(f, "{}.state_tree()", p.state),
            },
            Self::StateTreeNode(p) => {
                write!(f, "state_tree<{}>.node(", p.tree)?;
                write_indices(f, &p.indices)?;
                f.write_str(")")
            }
            Self::StateTreeNodeForPath(p) => {
                write!(f, "state_tree<{}>.node_for({})", p.tree, p.member)
            }
            Self::Stats(p) => {
                write!(f, "{}.stats(", p.capture)?;
                write_json(f, &p.filter)?;
                f.write_str(")")
            }
            Self::Thumbnail(p) => {
                write!(f, "{}.thumbnail({}x{})", p.parent, p.width, p.height)
            }
            Self::Type(p) => write!(f, "type(api={}, index={})", p.api.0, p.type_index),
        }
    }
}
