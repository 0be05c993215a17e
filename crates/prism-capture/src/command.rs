// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Captured commands and their addressing.

use std::fmt;

use prism_db::{Error, Result, Storable};
use serde::{Deserialize, Serialize};

use crate::api::ApiId;
use crate::effect::Effect;
use crate::val::Val;

/// Index of a top-level command in a capture.
pub type CommandId = u64;

/// Address of a command, descending into nested command buffers.
///
/// `[7]` is top-level command 7; `[7, 2]` is the third command executed by
/// command 7. The empty index addresses the initial-state reconstruction
/// phase, which precedes every command.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubCmdIdx(pub Vec<u64>);

impl SubCmdIdx {
    /// Index of top-level command `id`.
    pub fn top(id: CommandId) -> Self {
        Self(vec![id])
    }

    /// The initial-state position.
    pub fn initial() -> Self {
        Self(Vec::new())
    }

    /// Returns `true` for the initial-state position.
    pub fn is_initial(&self) -> bool {
        self.0.is_empty()
    }

    /// The top-level command this index descends from.
    pub fn root(&self) -> Option<CommandId> {
        self.0.first().copied()
    }

    /// Index of child `i` of this command.
    #[must_use]
    pub fn child(&self, i: u64) -> Self {
        let mut v = self.0.clone();
        v.push(i);
        Self(v)
    }

    /// The enclosing command, or `None` at the top level.
    pub fn parent(&self) -> Option<Self> {
        match self.0.len() {
            0 | 1 => None,
            n => Some(Self(self.0[..n - 1].to_vec())),
        }
    }

    /// Last component.
    pub fn last(&self) -> Option<u64> {
        self.0.last().copied()
    }

    /// Number of components.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if `self` addresses `other` or one of its descendants.
    pub fn starts_with(&self, other: &Self) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl From<Vec<u64>> for SubCmdIdx {
    fn from(v: Vec<u64>) -> Self {
        Self(v)
    }
}

impl fmt::Display for SubCmdIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("initial");
        }
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for SubCmdIdx {
    type Err = Error;

    /// Parses the dotted form produced by `Display`.
    fn from_str(s: &str) -> Result<Self> {
        if s == "initial" {
            return Ok(Self::initial());
        }
        s.split('.')
            .map(|c| {
                c.trim()
                    .parse::<u64>()
                    .map_err(|_| Error::invalid(format!("bad command index {s:?}")))
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

/// A single command property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Flag {
    /// Issues a draw.
    DrawCall,
    /// Clears an attachment.
    Clear,
    /// Submits work to a queue.
    Submission,
    /// Ends a frame (present / swap).
    EndOfFrame,
    /// A draw executed on the device.
    ExecutedDraw,
    /// A dispatch executed on the device.
    ExecutedDispatch,
    /// A command buffer executed on the device.
    ExecutedCommandBuffer,
    /// Participates in transform feedback.
    TransformFeedback,
    /// Any debug marker.
    UserMarker,
    /// Opens a debug marker group.
    PushUserMarker,
    /// Closes a debug marker group.
    PopUserMarker,
    /// Device-side synchronization (barriers, events, waits).
    SyncCommand,
    /// Begins a render pass.
    BeginRenderPass,
    /// Ends a render pass.
    EndRenderPass,
    /// Begins transform feedback.
    BeginTransformFeedback,
    /// Ends transform feedback.
    EndTransformFeedback,
}

/// Set of [`Flag`]s, serialized as a list of names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<Flag>", into = "Vec<Flag>")]
pub struct CommandFlags(u32);

const ALL_FLAGS: [Flag; 16] = [
    Flag::DrawCall,
    Flag::Clear,
    Flag::Submission,
    Flag::EndOfFrame,
    Flag::ExecutedDraw,
    Flag::ExecutedDispatch,
    Flag::ExecutedCommandBuffer,
    Flag::TransformFeedback,
    Flag::UserMarker,
    Flag::PushUserMarker,
    Flag::PopUserMarker,
    Flag::SyncCommand,
    Flag::BeginRenderPass,
    Flag::EndRenderPass,
    Flag::BeginTransformFeedback,
    Flag::EndTransformFeedback,
];

impl CommandFlags {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    const fn bit(flag: Flag) -> u32 {
        1 << flag as u8
    }

    /// Returns `true` if `flag` is set.
    pub fn contains(self, flag: Flag) -> bool {
        self.0 & Self::bit(flag) != 0
    }

    /// Sets `flag`.
    pub fn insert(&mut self, flag: Flag) {
        self.0 |= Self::bit(flag);
    }

    /// Builder form of [`CommandFlags::insert`].
    #[must_use]
    pub fn with(mut self, flag: Flag) -> Self {
        self.insert(flag);
        self
    }

    /// Set flags in declaration order.
    pub fn iter(self) -> impl Iterator<Item = Flag> {
        ALL_FLAGS.into_iter().filter(move |f| self.contains(*f))
    }
}

impl From<Vec<Flag>> for CommandFlags {
    fn from(v: Vec<Flag>) -> Self {
        v.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl From<CommandFlags> for Vec<Flag> {
    fn from(f: CommandFlags) -> Self {
        f.iter().collect()
    }
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Verbose detail.
    Debug,
    /// Informational.
    Info,
    /// Suspicious usage.
    Warning,
    /// Invalid usage.
    Error,
    /// The command could not complete.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        })
    }
}

/// A named command parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: Val,
}

/// A memory range the command read or wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryObservation {
    /// Memory pool identifier.
    pub pool: u32,
    /// First byte.
    pub base: u64,
    /// Observed bytes.
    pub data: Vec<u8>,
}

/// A framebuffer snapshot recorded at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramebufferObservation {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format name.
    pub format: String,
    /// Pixel data.
    #[serde(default)]
    pub data: Vec<u8>,
}

impl Storable for FramebufferObservation {}

/// Auxiliary record attached to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Extra {
    /// Memory reads and writes observed while the command executed.
    Observations {
        /// Ranges read.
        #[serde(default)]
        reads: Vec<MemoryObservation>,
        /// Ranges written.
        #[serde(default)]
        writes: Vec<MemoryObservation>,
    },
    /// Host timing.
    Timing {
        /// Start timestamp in nanoseconds.
        begin_ns: u64,
        /// End timestamp in nanoseconds.
        end_ns: u64,
    },
    /// The command was aborted during capture.
    Aborted {
        /// Why the command aborted.
        reason: String,
    },
    /// Framebuffer content after the command.
    FramebufferObservation(FramebufferObservation),
}

/// One captured graphics API call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// API the command belongs to.
    pub api: ApiId,
    /// Thread that issued the command.
    #[serde(default)]
    pub thread: u64,
    /// Function name.
    pub name: String,
    /// Command properties.
    #[serde(default)]
    pub flags: CommandFlags,
    /// Named parameters in call order.
    #[serde(default)]
    pub params: Vec<Param>,
    /// Return value, if any.
    #[serde(default)]
    pub result: Option<Val>,
    /// Auxiliary records.
    #[serde(default)]
    pub extras: Vec<Extra>,
    /// Commands executed on behalf of this one (recorded command buffers).
    #[serde(default)]
    pub sub_commands: Vec<Command>,
    /// Recorded effect on the global state.
    #[serde(default)]
    pub effects: Vec<Effect>,
}

impl Storable for Command {}

impl Command {
    /// A command with no parameters, flags or effects.
    pub fn new(api: ApiId, thread: u64, name: impl Into<String>) -> Self {
        Self {
            api,
            thread,
            name: name.into(),
            flags: CommandFlags::EMPTY,
            params: Vec::new(),
            result: None,
            extras: Vec::new(),
            sub_commands: Vec::new(),
            effects: Vec::new(),
        }
    }

    /// Adds a flag.
    #[must_use]
    pub fn flag(mut self, flag: Flag) -> Self {
        self.flags.insert(flag);
        self
    }

    /// Appends a parameter.
    #[must_use]
    pub fn param(mut self, name: &str, value: impl Into<Val>) -> Self {
        self.params.push(Param {
            name: name.to_owned(),
            value: value.into(),
        });
        self
    }

    /// Sets the result.
    #[must_use]
    pub fn returns(mut self, value: impl Into<Val>) -> Self {
        self.result = Some(value.into());
        self
    }

    /// Appends an extra.
    #[must_use]
    pub fn extra(mut self, extra: Extra) -> Self {
        self.extras.push(extra);
        self
    }

    /// Appends an effect.
    #[must_use]
    pub fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Sets the nested commands.
    #[must_use]
    pub fn executes(mut self, commands: Vec<Command>) -> Self {
        self.sub_commands = commands;
        self
    }

    /// Returns `true` if `flag` is set.
    pub fn is(&self, flag: Flag) -> bool {
        self.flags.contains(flag)
    }

    /// Returns `true` for draws and clears.
    pub fn is_draw_or_clear(&self) -> bool {
        self.is(Flag::DrawCall) || self.is(Flag::Clear)
    }

    /// Looks up a parameter by name.
    ///
    /// # Errors
    /// [`Error::ParameterNotFound`] if the command has no such parameter.
    pub fn param_value(&self, name: &str) -> Result<&Val> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
            .ok_or_else(|| Error::ParameterNotFound {
                name: name.to_owned(),
                command: self.name.clone(),
            })
    }

    /// Mutable parameter lookup.
    ///
    /// # Errors
    /// [`Error::ParameterNotFound`] if the command has no such parameter.
    pub fn param_value_mut(&mut self, name: &str) -> Result<&mut Val> {
        let command = self.name.clone();
        self.params
            .iter_mut()
            .find(|p| p.name == name)
            .map(|p| &mut p.value)
            .ok_or_else(|| Error::ParameterNotFound {
                name: name.to_owned(),
                command,
            })
    }

    /// The command's result.
    ///
    /// # Errors
    /// [`Error::ResultNotFound`] if the command returns nothing.
    pub fn result_value(&self) -> Result<&Val> {
        self.result.as_ref().ok_or_else(|| Error::ResultNotFound {
            command: self.name.clone(),
        })
    }

    /// Mutable result lookup.
    ///
    /// # Errors
    /// [`Error::ResultNotFound`] if the command returns nothing.
    pub fn result_value_mut(&mut self) -> Result<&mut Val> {
        let command = self.name.clone();
        self.result
            .as_mut()
            .ok_or(Error::ResultNotFound { command })
    }

    /// Label of a debug-marker command: its `name`, `label` or `marker`
    /// string parameter, else the command name.
    pub fn marker_label(&self) -> &str {
        ["name", "label", "marker"]
            .iter()
            .find_map(|p| self.param_value(p).ok().and_then(Val::as_str))
            .unwrap_or(&self.name)
    }

    /// Reason recorded by an [`Extra::Aborted`], if any.
    pub fn aborted(&self) -> Option<&str> {
        self.extras.iter().find_map(|e| match e {
            Extra::Aborted { reason } => Some(reason.as_str()),
            _ => None,
        })
    }

    /// The recorded framebuffer observation, if any.
    pub fn framebuffer_observation(&self) -> Option<&FramebufferObservation> {
        self.extras.iter().find_map(|e| match e {
            Extra::FramebufferObservation(o) => Some(o),
            _ => None,
        })
    }

    /// Descends through nested commands along `path`.
    pub fn descendant(&self, path: &[u64]) -> Option<&Command> {
        let mut cmd = self;
        for i in path {
            cmd = cmd.sub_commands.get(usize::try_from(*i).ok()?)?;
        }
        Some(cmd)
    }

    /// Mutable form of [`Command::descendant`].
    pub fn descendant_mut(&mut self, path: &[u64]) -> Option<&mut Command> {
        let mut cmd = self;
        for i in path {
            cmd = cmd.sub_commands.get_mut(usize::try_from(*i).ok()?)?;
        }
        Some(cmd)
    }

    /// The command as a navigable record.
    pub fn to_val(&self) -> Val {
        let params = self
            .params
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()));
        let mut fields = vec![
            ("name".to_owned(), Val::from(self.name.as_str())),
            ("thread".to_owned(), Val::Uint(self.thread)),
            ("api".to_owned(), Val::Uint(u64::from(self.api.0))),
        ];
        fields.push((
            "parameters".to_owned(),
            Val::record("Parameters", params),
        ));
        if let Some(r) = &self.result {
            fields.push(("result".to_owned(), r.clone()));
        }
        Val::record("Command", fields)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", p.name, p.value)?;
        }
        f.write_str(")")?;
        if let Some(r) = &self.result {
            write!(f, " → {r}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flags_serialize_as_names() {
        let f = CommandFlags::EMPTY.with(Flag::DrawCall).with(Flag::EndOfFrame);
        let text = serde_json::to_string(&f).unwrap();
        assert_eq!(text, r#"["draw_call","end_of_frame"]"#);
        let back: CommandFlags = serde_json::from_str(&text).unwrap();
        assert_eq!(back, f);
        assert!(!back.contains(Flag::Clear));
    }

    #[test]
    fn sub_command_indices_order_parents_first() {
        let a = SubCmdIdx::top(3);
        let b = a.child(0);
        assert!(a < b);
        assert!(b < SubCmdIdx::top(4));
        assert!(SubCmdIdx::initial() < a);
        assert_eq!(b.parent(), Some(a.clone()));
        assert_eq!(b.to_string(), "3.0");
        assert_eq!("3.0".parse::<SubCmdIdx>().unwrap(), b);
        assert!("initial".parse::<SubCmdIdx>().unwrap().is_initial());
        assert!("3.x".parse::<SubCmdIdx>().is_err());
    }

    #[test]
    fn missing_parameter_is_typed() {
        let cmd = Command::new(ApiId(1), 0, "glClear").param("mask", 0x4000u64);
        assert_eq!(cmd.param_value("mask").unwrap(), &Val::Uint(0x4000));
        let err = cmd.param_value("color").unwrap_err();
        assert_eq!(err.kind(), prism_db::ErrorKind::ParameterNotFound);
        assert_eq!(cmd.result_value().unwrap_err().kind(), prism_db::ErrorKind::ResultNotFound);
        assert_eq!(cmd.to_string(), "glClear(mask: 16384)");
    }
}
