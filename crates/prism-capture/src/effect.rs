// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Recorded state effects of a command.
//!
//! A decoded capture describes what each command did to the global state as a
//! list of [`Effect`]s. [`RecordedApi`](crate::RecordedApi) replays them;
//! backends with real semantics may ignore them entirely.

use prism_db::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::api::ApiId;
use crate::command::{Severity, SubCmdIdx};
use crate::state::{Attachment, AttachmentInfo, GlobalState, ResourceEvent, ResourceState, StateHooks};
use crate::val::Val;

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    /// Writes `value` at a field path inside the issuing API's state.
    SetState {
        /// Field names from the API state root.
        #[serde(default)]
        path: Vec<String>,
        /// New value.
        value: Val,
    },
    /// Writes bytes into a memory pool.
    WriteMemory {
        /// Pool identifier.
        pool: u32,
        /// First byte.
        base: u64,
        /// Written bytes.
        data: Vec<u8>,
    },
    /// Creates a resource.
    CreateResource {
        /// API-level handle.
        handle: u64,
        /// Resource kind.
        resource_kind: String,
        /// Human-readable label.
        #[serde(default)]
        label: String,
        /// Initial contents.
        #[serde(default)]
        data: Val,
    },
    /// Reads or writes a resource, optionally replacing its contents.
    AccessResource {
        /// API-level handle.
        handle: u64,
        /// New contents, for writes.
        #[serde(default)]
        data: Option<Val>,
    },
    /// Destroys a resource.
    DestroyResource {
        /// API-level handle.
        handle: u64,
    },
    /// Binds (or unbinds, with `info: None`) a framebuffer attachment.
    BindAttachment {
        /// Attachment slot.
        attachment: Attachment,
        /// Bound image descriptor.
        #[serde(default)]
        info: Option<AttachmentInfo>,
    },
    /// Emits a diagnostic.
    Message {
        /// Severity.
        severity: Severity,
        /// Message text.
        text: String,
        /// Tags attached after the message.
        #[serde(default)]
        tags: Vec<String>,
    },
}

impl Effect {
    /// Applies the effect to `state` on behalf of the command at `at`.
    ///
    /// # Errors
    /// Fails if a state path runs through a scalar, a memory write leaves the
    /// host address range, or a resource handle is unknown.
    pub fn apply(
        &self,
        api: ApiId,
        at: &SubCmdIdx,
        state: &mut GlobalState,
        hooks: &mut dyn StateHooks,
    ) -> Result<()> {
        match self {
            Self::SetState { path, value } => state.set_api_value(api, path, value.clone()),
            Self::WriteMemory { pool, base, data } => state.write_memory(*pool, *base, data),
            Self::CreateResource {
                handle,
                resource_kind,
                label,
                data,
            } => {
                state.resources.insert(
                    *handle,
                    ResourceState {
                        kind: resource_kind.clone(),
                        label: label.clone(),
                        data: data.clone(),
                    },
                );
                hooks.on_create(
                    at,
                    ResourceEvent {
                        handle: *handle,
                        kind: resource_kind,
                        label,
                    },
                );
                Ok(())
            }
            Self::AccessResource { handle, data } => {
                let res = state
                    .resources
                    .get_mut(handle)
                    .ok_or_else(|| Error::not_found(format!("resource {handle:#x}")))?;
                if let Some(d) = data {
                    res.data = d.clone();
                }
                hooks.on_access(
                    at,
                    ResourceEvent {
                        handle: *handle,
                        kind: &res.kind,
                        label: &res.label,
                    },
                );
                Ok(())
            }
            Self::DestroyResource { handle } => {
                let res = state
                    .resources
                    .remove(handle)
                    .ok_or_else(|| Error::not_found(format!("resource {handle:#x}")))?;
                hooks.on_destroy(
                    at,
                    ResourceEvent {
                        handle: *handle,
                        kind: &res.kind,
                        label: &res.label,
                    },
                );
                Ok(())
            }
            Self::BindAttachment { attachment, info } => {
                match info {
                    Some(info) => {
                        state.attachments.insert(*attachment, info.clone());
                    }
                    None => {
                        state.attachments.remove(attachment);
                    }
                }
                Ok(())
            }
            Self::Message {
                severity,
                text,
                tags,
            } => {
                if let Some(token) = hooks.new_message(at, *severity, text) {
                    for tag in tags {
                        hooks.add_tag(token, tag);
                    }
                }
                Ok(())
            }
        }
    }
}
