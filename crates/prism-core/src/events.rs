// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Capture events: draws, clears, frame boundaries, submissions and markers.

use std::ops::ControlFlow;

use prism_capture::{
    initial_state, mutate_commands, ApiRegistry, Capture, Flag, NoHooks, SubCmdIdx,
};
use prism_db::{async_trait, value, Context, Id, Resolvable, Result, Storable, Value};
use serde::{Deserialize, Serialize};

use crate::filter::{CommandFilter, Filter};
use crate::services;

/// Event kinds a request asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct EventKinds {
    /// Draw calls.
    pub draw_calls: bool,
    /// Clears.
    pub clears: bool,
    /// First command of each frame.
    pub first_in_frame: bool,
    /// End-of-frame commands.
    pub last_in_frame: bool,
    /// Submissions.
    pub submissions: bool,
    /// Debug-marker pushes.
    pub push_user_markers: bool,
    /// Debug-marker pops.
    pub pop_user_markers: bool,
    /// Commands with a recorded framebuffer.
    pub framebuffer_observations: bool,
    /// Transform-feedback draws.
    pub transform_feedback: bool,
    /// Every accepted command.
    pub all_commands: bool,
}

/// Kind of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A draw call.
    DrawCall,
    /// A clear.
    Clear,
    /// The first command of a frame.
    FirstInFrame,
    /// The last command of a frame.
    LastInFrame,
    /// A submission.
    Submission,
    /// A debug-marker push.
    PushUserMarker,
    /// A debug-marker pop.
    PopUserMarker,
    /// A recorded framebuffer.
    FramebufferObservation,
    /// A transform-feedback draw.
    TransformFeedback,
    /// Any accepted command.
    AllCommands,
}

/// One event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind.
    pub kind: EventKind,
    /// Command the event belongs to.
    pub command: SubCmdIdx,
}

/// Events of a capture in command order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventList {
    /// Events; several may share a command.
    pub events: Vec<Event>,
}

impl Storable for EventList {}

/// Lists the events of `capture` selected by `kinds` among the commands
/// `filter` accepts.
///
/// # Errors
/// [`prism_db::Error::Cancelled`] if `ctx` is cancelled.
pub fn events(
    ctx: &Context,
    capture: &Capture,
    apis: &ApiRegistry,
    filter: &CommandFilter,
    kinds: &EventKinds,
) -> Result<EventList> {
    let sync = capture.sync_data();
    let filter = Filter::new(filter, &sync);
    let mut out = Vec::new();
    let mut frame_open = false;
    let mut state = initial_state(ctx, capture, apis, &mut NoHooks)?;
    mutate_commands(ctx, capture, apis, &mut state, &mut NoHooks, |at, cmd, state| {
        if !filter.accepts(at, cmd, state) {
            return ControlFlow::Continue(());
        }
        let mut push = |wanted: bool, kind: EventKind| {
            if wanted {
                out.push(Event {
                    kind,
                    command: at.clone(),
                });
            }
        };
        let top = at.depth() == 1;
        push(kinds.first_in_frame && top && !frame_open, EventKind::FirstInFrame);
        if top {
            frame_open = true;
        }
        push(kinds.draw_calls && cmd.is(Flag::DrawCall), EventKind::DrawCall);
        push(kinds.clears && cmd.is(Flag::Clear), EventKind::Clear);
        push(kinds.submissions && cmd.is(Flag::Submission), EventKind::Submission);
        push(kinds.push_user_markers && cmd.is(Flag::PushUserMarker), EventKind::PushUserMarker);
        push(kinds.pop_user_markers && cmd.is(Flag::PopUserMarker), EventKind::PopUserMarker);
        push(
            kinds.transform_feedback && cmd.is(Flag::TransformFeedback),
            EventKind::TransformFeedback,
        );
        push(
            kinds.framebuffer_observations && cmd.framebuffer_observation().is_some(),
            EventKind::FramebufferObservation,
        );
        push(kinds.all_commands, EventKind::AllCommands);
        if top && cmd.is(Flag::EndOfFrame) {
            push(kinds.last_in_frame, EventKind::LastInFrame);
            frame_open = false;
        }
        ControlFlow::Continue(())
    })?;
    Ok(EventList { events: out })
}

/// Resolvable description of an event list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsResolvable {
    /// Capture identifier.
    pub capture: Id,
    /// Commands to consider.
    pub filter: CommandFilter,
    /// Kinds to report.
    pub kinds: EventKinds,
}

impl Storable for EventsResolvable {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

#[async_trait]
impl Resolvable for EventsResolvable {
    async fn resolve(&self, ctx: &Context) -> Result<Value> {
        let capture = ctx.database()?.resolve_as::<Capture>(ctx, self.capture).await?;
        let list = events(ctx, &capture, &services::apis(ctx), &self.filter, &self.kinds)?;
        Ok(value(list))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use prism_capture::{ApiId, Command};

    use super::*;

    #[test]
    fn frames_bracket_their_commands() {
        let gl = |name: &str| Command::new(ApiId::GLES, 0, name);
        let capture = Capture::new("e").with_commands([
            gl("glClear").flag(Flag::Clear),
            gl("glDrawArrays").flag(Flag::DrawCall),
            gl("eglSwapBuffers").flag(Flag::EndOfFrame),
            gl("glDrawArrays").flag(Flag::DrawCall),
        ]);
        let kinds = EventKinds {
            draw_calls: true,
            first_in_frame: true,
            last_in_frame: true,
            ..EventKinds::default()
        };
        let list = events(
            &Context::new(),
            &capture,
            &ApiRegistry::new(),
            &CommandFilter::default(),
            &kinds,
        )
        .unwrap();
        let got: Vec<(EventKind, String)> = list
            .events
            .iter()
            .map(|e| (e.kind, e.command.to_string()))
            .collect();
        assert_eq!(
            got,
            [
                (EventKind::FirstInFrame, "0".to_owned()),
                (EventKind::DrawCall, "1".to_owned()),
                (EventKind::LastInFrame, "2".to_owned()),
                (EventKind::FirstInFrame, "3".to_owned()),
                (EventKind::DrawCall, "3".to_owned()),
            ]
        );
    }
}
