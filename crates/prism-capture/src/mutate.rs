// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The command mutator loop.

use std::ops::ControlFlow;
use std::sync::Arc;

use prism_db::{Context, Error, Result};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::api::{Api, ApiId, ApiRegistry};
use crate::capture::Capture;
use crate::command::{Command, SubCmdIdx};
use crate::state::{GlobalState, NoHooks, StateHooks};

/// Commands between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 64;

/// Per-walk cache of backends.
struct Backends<'a> {
    registry: &'a ApiRegistry,
    cache: FxHashMap<ApiId, Arc<dyn Api>>,
}

impl<'a> Backends<'a> {
    fn new(registry: &'a ApiRegistry) -> Self {
        Self {
            registry,
            cache: FxHashMap::default(),
        }
    }

    fn apply(
        &mut self,
        cmd: &Command,
        at: &SubCmdIdx,
        state: &mut GlobalState,
        hooks: &mut dyn StateHooks,
    ) {
        let registry = self.registry;
        let api = self
            .cache
            .entry(cmd.api)
            .or_insert_with(|| registry.get(cmd.api));
        if let Err(err) = api.mutate(cmd, at, state, hooks) {
            debug!(%at, command = %cmd.name, error = %err, "mutate failed");
            hooks.on_error(at, &err);
        }
    }
}

/// Builds the state at the start of the capture: the recorded initial state
/// followed by the initial-state commands, all reported at
/// [`SubCmdIdx::initial`].
///
/// # Errors
/// [`Error::Cancelled`] if `ctx` is cancelled.
pub fn initial_state(
    ctx: &Context,
    capture: &Capture,
    apis: &ApiRegistry,
    hooks: &mut dyn StateHooks,
) -> Result<GlobalState> {
    let mut state = capture.initial_state.clone();
    let mut backends = Backends::new(apis);
    let at = SubCmdIdx::initial();
    for (i, cmd) in capture.initial_commands.iter().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 {
            ctx.check_cancelled()?;
        }
        backends.apply(cmd, &at, &mut state, hooks);
    }
    Ok(state)
}

/// Walks every command of `capture` in order, mutating `state`.
///
/// Each top-level command is mutated and reported to `step`; then the
/// sub-commands the synchronization data lists for it are mutated and
/// reported in order. Positions therefore reach `step` in increasing
/// [`SubCmdIdx`] order. Mutation failures go to [`StateHooks::on_error`] and
/// the walk continues. Returning [`ControlFlow::Break`] from `step` ends the
/// walk early.
///
/// # Errors
/// [`Error::Cancelled`] if `ctx` is cancelled; [`Error::NotFound`] if the
/// synchronization data names a sub-command that does not exist.
pub fn mutate_commands<F>(
    ctx: &Context,
    capture: &Capture,
    apis: &ApiRegistry,
    state: &mut GlobalState,
    hooks: &mut dyn StateHooks,
    mut step: F,
) -> Result<()>
where
    F: FnMut(&SubCmdIdx, &Command, &GlobalState) -> ControlFlow<()>,
{
    let sync = capture.sync_data();
    let mut backends = Backends::new(apis);
    for (i, cmd) in capture.commands.iter().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 {
            ctx.check_cancelled()?;
        }
        let id = i as u64;
        let at = SubCmdIdx::top(id);
        backends.apply(cmd, &at, state, hooks);
        if step(&at, cmd, state).is_break() {
            trace!(%at, "walk stopped");
            return Ok(());
        }
        let Some(subs) = sync.sub_commands.get(&id) else {
            continue;
        };
        for idx in subs {
            let sub = capture.command_at(idx)?;
            backends.apply(sub, idx, state, hooks);
            if step(idx, sub, state).is_break() {
                trace!(at = %idx, "walk stopped");
                return Ok(());
            }
        }
    }
    Ok(())
}

/// The global state immediately after the command at `at` has executed.
///
/// The initial-state position yields the state before the first command.
///
/// # Errors
/// [`Error::NotFound`] if the walk never reaches `at`;
/// [`Error::Cancelled`] if `ctx` is cancelled.
pub fn state_after(
    ctx: &Context,
    capture: &Capture,
    apis: &ApiRegistry,
    at: &SubCmdIdx,
) -> Result<GlobalState> {
    let mut state = initial_state(ctx, capture, apis, &mut NoHooks)?;
    if at.is_initial() {
        return Ok(state);
    }
    let mut reached = false;
    mutate_commands(ctx, capture, apis, &mut state, &mut NoHooks, |idx, _, _| {
        if idx == at {
            reached = true;
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    if reached {
        Ok(state)
    } else {
        Err(Error::not_found(format!("command {at}")))
    }
}
