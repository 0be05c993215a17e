// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Decoded capture model for Prism.
//!
//! A [`Capture`] is an ordered list of [`Command`]s plus the state that
//! existed before the first one. Analyses walk the commands with
//! [`mutate_commands`], which asks each command's [`Api`] backend to apply it
//! to a locally owned [`GlobalState`] and reports every step, including the
//! sub-commands listed in the capture's [`SyncData`].
//!
//! Captured state is modelled as a tagged [`Val`] tree rather than concrete
//! per-API types, so analyses can navigate any backend's state uniformly.
#![forbid(unsafe_code)]

mod api;
mod capture;
mod command;
mod effect;
mod mutate;
mod state;
mod sync;
mod val;

pub use api::{Api, ApiId, ApiRegistry, Constant, ConstantSet, RecordedApi, ReplayIssue};
pub use capture::{context_id, Capture, ContextInfo, Header, Message};
pub use command::{
    Command, CommandFlags, CommandId, Extra, Flag, FramebufferObservation, MemoryObservation,
    Param, Severity, SubCmdIdx,
};
pub use effect::Effect;
pub use mutate::{initial_state, mutate_commands, state_after};
pub use state::{
    Attachment, AttachmentInfo, GlobalState, NoHooks, Pool, ResourceEvent, ResourceState,
    StateHooks,
};
pub use sync::{SubMarker, SyncData};
pub use val::{Field, Key, MemoryRange, Struct, Val};
