// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Decoded captures.

use std::borrow::Cow;
use std::collections::BTreeMap;

use prism_db::{Error, Id, Result, Storable};
use serde::{Deserialize, Serialize};

use crate::api::{ApiId, ApiRegistry};
use crate::command::{Command, CommandId, Severity, SubCmdIdx};
use crate::state::GlobalState;
use crate::sync::SyncData;

/// Capture file header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Capture format version.
    #[serde(default)]
    pub version: u32,
    /// Device the capture was taken on.
    #[serde(default)]
    pub device: String,
    /// Application binary interface.
    #[serde(default)]
    pub abi: String,
    /// Capture start time, nanoseconds since the Unix epoch.
    #[serde(default)]
    pub start_time: u64,
}

/// A message emitted by the capture decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Severity.
    pub severity: Severity,
    /// Message text.
    pub text: String,
    /// Timestamp in nanoseconds since capture start.
    #[serde(default)]
    pub timestamp: u64,
}

/// A rendering context: the commands one API issued from one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    /// Stable identifier.
    pub id: Id,
    /// API.
    pub api: ApiId,
    /// Issuing thread.
    pub thread: u64,
    /// Display name.
    pub name: String,
    /// Number of top-level commands in the context.
    pub commands: u64,
}

impl Storable for ContextInfo {}

/// A recording of one application run.
///
/// Captures are values: editing one produces a new capture with a new
/// identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    /// Display name.
    pub name: String,
    /// File header.
    #[serde(default)]
    pub header: Header,
    /// Commands in capture order.
    #[serde(default)]
    pub commands: Vec<Command>,
    /// Commands that rebuild the state that existed before capture began.
    #[serde(default)]
    pub initial_commands: Vec<Command>,
    /// State before the initial commands run.
    #[serde(default)]
    pub initial_state: GlobalState,
    /// Decoder-supplied synchronization data; derived when absent.
    #[serde(default)]
    pub sync: Option<SyncData>,
    /// Decoder messages.
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Storable for Capture {}

/// Context identifier for commands of `api` issued from `thread`.
pub fn context_id(api: ApiId, thread: u64) -> Id {
    let mut key = Vec::with_capacity(12);
    key.extend_from_slice(&api.0.to_le_bytes());
    key.extend_from_slice(&thread.to_le_bytes());
    Id::derive("context:", &Id::of_bytes(&key))
}

impl Capture {
    /// An empty capture.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: appends commands.
    #[must_use]
    pub fn with_commands(mut self, commands: impl IntoIterator<Item = Command>) -> Self {
        self.commands.extend(commands);
        self
    }

    /// Number of top-level commands.
    pub fn len(&self) -> u64 {
        self.commands.len() as u64
    }

    /// Returns `true` if the capture has no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Top-level command `id`.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if `id` is past the last command.
    pub fn command(&self, id: CommandId) -> Result<&Command> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.commands.get(i))
            .ok_or_else(|| Error::out_of_bounds(id, self.len()))
    }

    /// Command addressed by `idx`, descending into nested commands.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] for an unknown top-level index,
    /// [`Error::NotFound`] for an unknown sub-command index.
    pub fn command_at(&self, idx: &SubCmdIdx) -> Result<&Command> {
        let Some((first, rest)) = idx.0.split_first() else {
            return Err(Error::invalid("the initial-state position is not a command"));
        };
        self.command(*first)?
            .descendant(rest)
            .ok_or_else(|| Error::not_found(format!("sub-command {idx}")))
    }

    /// Mutable form of [`Capture::command_at`].
    ///
    /// # Errors
    /// See [`Capture::command_at`].
    pub fn command_at_mut(&mut self, idx: &SubCmdIdx) -> Result<&mut Command> {
        let Some((first, rest)) = idx.0.split_first() else {
            return Err(Error::invalid("the initial-state position is not a command"));
        };
        let len = self.len();
        usize::try_from(*first)
            .ok()
            .and_then(|i| self.commands.get_mut(i))
            .ok_or_else(|| Error::out_of_bounds(*first, len))?
            .descendant_mut(rest)
            .ok_or_else(|| Error::not_found(format!("sub-command {idx}")))
    }

    /// Synchronization data, derived from nested commands if the decoder did
    /// not supply any.
    pub fn sync_data(&self) -> Cow<'_, SyncData> {
        match &self.sync {
            Some(s) => Cow::Borrowed(s),
            None => Cow::Owned(SyncData::from_commands(&self.commands)),
        }
    }

    /// A copy of the capture without top-level command `id`.
    ///
    /// Synchronization data is re-derived so sub-command indices stay valid.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] if `id` is past the last command.
    pub fn without_command(&self, id: CommandId) -> Result<Self> {
        self.command(id)?;
        let mut out = self.clone();
        out.commands.remove(usize::try_from(id).map_err(|_| Error::out_of_bounds(id, self.len()))?);
        if out.sync.is_some() {
            out.sync = Some(SyncData::from_commands(&out.commands));
        }
        Ok(out)
    }

    /// Distinct contexts in order of first appearance.
    pub fn contexts(&self, apis: &ApiRegistry) -> Vec<ContextInfo> {
        let mut order: Vec<(ApiId, u64)> = Vec::new();
        let mut counts: BTreeMap<(ApiId, u64), u64> = BTreeMap::new();
        for cmd in &self.commands {
            let key = (cmd.api, cmd.thread);
            let n = counts.entry(key).or_insert(0);
            if *n == 0 {
                order.push(key);
            }
            *n += 1;
        }
        order
            .into_iter()
            .map(|(api, thread)| ContextInfo {
                id: context_id(api, thread),
                api,
                thread,
                name: format!("{} context (thread {thread})", apis.name(api)),
                commands: counts.get(&(api, thread)).copied().unwrap_or(0),
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::command::Flag;

    fn capture() -> Capture {
        Capture::new("c").with_commands([
            Command::new(ApiId::GLES, 1, "glClear").flag(Flag::Clear),
            Command::new(ApiId::VULKAN, 2, "vkQueueSubmit")
                .executes(vec![Command::new(ApiId::VULKAN, 2, "vkCmdDraw")]),
            Command::new(ApiId::GLES, 1, "eglSwapBuffers").flag(Flag::EndOfFrame),
        ])
    }

    #[test]
    fn command_at_descends() {
        let c = capture();
        assert_eq!(c.command_at(&SubCmdIdx(vec![1, 0])).unwrap().name, "vkCmdDraw");
        assert_eq!(
            c.command_at(&SubCmdIdx(vec![1, 5])).unwrap_err().kind(),
            prism_db::ErrorKind::NotFound
        );
        assert_eq!(
            c.command(7).unwrap_err(),
            Error::OutOfBounds {
                index: 7,
                min: 0,
                max: 2
            }
        );
    }

    #[test]
    fn removing_a_command_shifts_the_rest() {
        let c = capture().without_command(0).unwrap();
        let names: Vec<_> = c.commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["vkQueueSubmit", "eglSwapBuffers"]);
        assert!(c.sync_data().has_sub_commands(0));
    }

    #[test]
    fn contexts_are_per_api_and_thread() {
        let ctxs = capture().contexts(&ApiRegistry::new());
        assert_eq!(ctxs.len(), 2);
        assert_eq!(ctxs[0].commands, 2);
        assert_eq!(ctxs[0].id, context_id(ApiId::GLES, 1));
        assert_ne!(ctxs[0].id, ctxs[1].id);
    }
}
