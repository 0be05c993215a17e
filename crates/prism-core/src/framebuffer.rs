// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Framebuffer-change tracking.
//!
//! One walk over the capture records, per attachment slot, every point where
//! the bound image changed. Queries for "the attachment after command X"
//! then binary-search those lists instead of re-walking the capture.

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use prism_capture::{
    initial_state, mutate_commands, ApiId, ApiRegistry, Attachment, AttachmentInfo, Capture,
    GlobalState, NoHooks, SubCmdIdx,
};
use prism_db::{async_trait, value, Context, Error, Id, Resolvable, Result, Storable, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::services;

/// An attachment slot's descriptor from `after` onwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentChange {
    /// First command at which the descriptor holds.
    pub after: SubCmdIdx,
    /// Bound image, or `None` when the query failed.
    pub info: Option<AttachmentInfo>,
    /// Why the query failed.
    pub error: Option<String>,
}

impl AttachmentChange {
    fn same_as(&self, other: &Self) -> bool {
        self.info == other.info && self.error == other.error
    }
}

/// Per-slot change lists, each ordered by command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramebufferChanges {
    /// Changes keyed by slot.
    pub attachments: BTreeMap<Attachment, Vec<AttachmentChange>>,
}

impl Storable for FramebufferChanges {}

impl FramebufferChanges {
    /// Records the slots' state at `at`.
    pub fn observe(&mut self, apis: &ApiRegistry, at: &SubCmdIdx, api: ApiId, state: &GlobalState) {
        let backend = apis.get(api);
        for slot in Attachment::ALL {
            let change = match backend.attachment(state, slot) {
                Ok(info) => AttachmentChange {
                    after: at.clone(),
                    info: Some(info),
                    error: None,
                },
                Err(err) => AttachmentChange {
                    after: at.clone(),
                    info: None,
                    error: Some(err.to_string()),
                },
            };
            let list = self.attachments.entry(slot).or_default();
            match list.last() {
                Some(last) if last.same_as(&change) => {}
                // Slots are unbound until first bound.
                None if change.info.is_none() => {}
                _ => list.push(change),
            }
        }
    }

    /// The descriptor of `slot` after the command at `at`.
    ///
    /// # Errors
    /// [`Error::DataUnavailable`] when nothing is bound to the slot there.
    pub fn attachment_after(&self, slot: Attachment, at: &SubCmdIdx) -> Result<AttachmentInfo> {
        let unbound = || Error::unavailable(format!("no {slot} attachment bound after {at}"));
        let list = self.attachments.get(&slot).ok_or_else(unbound)?;
        let n = list.partition_point(|c| c.after <= *at);
        let change = n.checked_sub(1).and_then(|i| list.get(i)).ok_or_else(unbound)?;
        match (&change.info, &change.error) {
            (Some(info), _) => Ok(info.clone()),
            (None, Some(reason)) => Err(Error::unavailable(reason.clone())),
            (None, None) => Err(unbound()),
        }
    }

    /// Slots bound after the command at `at`, with their descriptors.
    pub fn bound_after(&self, at: &SubCmdIdx) -> Vec<(Attachment, AttachmentInfo)> {
        Attachment::ALL
            .into_iter()
            .filter_map(|slot| self.attachment_after(slot, at).ok().map(|i| (slot, i)))
            .collect()
    }
}

/// Walks `capture` recording every framebuffer change.
///
/// # Errors
/// [`Error::Cancelled`] if `ctx` is cancelled.
pub fn track_framebuffers(
    ctx: &Context,
    capture: &Capture,
    apis: &ApiRegistry,
) -> Result<FramebufferChanges> {
    let mut changes = FramebufferChanges::default();
    let mut state = initial_state(ctx, capture, apis, &mut NoHooks)?;
    if let Some(first) = capture.commands.first() {
        changes.observe(apis, &SubCmdIdx::initial(), first.api, &state);
    }
    mutate_commands(ctx, capture, apis, &mut state, &mut NoHooks, |at, cmd, state| {
        changes.observe(apis, at, cmd.api, state);
        ControlFlow::Continue(())
    })?;
    debug!(
        capture = %capture.name,
        changes = changes.attachments.values().map(Vec::len).sum::<usize>(),
        "tracked framebuffer changes"
    );
    Ok(changes)
}

/// Resolvable description of a capture's framebuffer changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramebufferChangesResolvable {
    /// Capture identifier.
    pub capture: Id,
}

impl Storable for FramebufferChangesResolvable {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

#[async_trait]
impl Resolvable for FramebufferChangesResolvable {
    async fn resolve(&self, ctx: &Context) -> Result<Value> {
        let capture = ctx.database()?.resolve_as::<Capture>(ctx, self.capture).await?;
        Ok(value(track_framebuffers(ctx, &capture, &services::apis(ctx))?))
    }
}
