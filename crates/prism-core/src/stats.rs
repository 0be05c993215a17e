// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Capture summary statistics.

use std::ops::ControlFlow;

use prism_capture::{initial_state, mutate_commands, ApiRegistry, Capture, Flag, NoHooks};
use prism_db::{async_trait, value, Context, Id, Resolvable, Result, Storable, Value};
use serde::{Deserialize, Serialize};

use crate::filter::{CommandFilter, Filter};
use crate::services;

/// Counts over the commands a filter accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Top-level commands.
    pub commands: u64,
    /// Sub-commands.
    pub sub_commands: u64,
    /// Complete frames.
    pub frames: u64,
    /// Draw calls per frame, including a trailing incomplete frame.
    pub draw_calls: Vec<u64>,
}

impl Storable for Stats {}

/// Counts the commands of `capture` accepted by `filter`.
///
/// # Errors
/// [`prism_db::Error::Cancelled`] if `ctx` is cancelled.
pub fn stats(
    ctx: &Context,
    capture: &Capture,
    apis: &ApiRegistry,
    filter: &CommandFilter,
) -> Result<Stats> {
    let sync = capture.sync_data();
    let filter = Filter::new(filter, &sync);
    let mut out = Stats::default();
    let mut draws = 0u64;
    let mut state = initial_state(ctx, capture, apis, &mut NoHooks)?;
    mutate_commands(ctx, capture, apis, &mut state, &mut NoHooks, |at, cmd, state| {
        let top = at.depth() == 1;
        if filter.accepts(at, cmd, state) {
            if top {
                out.commands += 1;
            } else {
                out.sub_commands += 1;
            }
            if cmd.is(Flag::DrawCall) {
                draws += 1;
            }
        }
        if top && cmd.is(Flag::EndOfFrame) {
            out.frames += 1;
            out.draw_calls.push(std::mem::take(&mut draws));
        }
        ControlFlow::Continue(())
    })?;
    if draws > 0 {
        out.draw_calls.push(draws);
    }
    Ok(out)
}

/// Resolvable description of capture statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResolvable {
    /// Capture identifier.
    pub capture: Id,
    /// Commands to count.
    pub filter: CommandFilter,
}

impl Storable for StatsResolvable {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

#[async_trait]
impl Resolvable for StatsResolvable {
    async fn resolve(&self, ctx: &Context) -> Result<Value> {
        let capture = ctx.database()?.resolve_as::<Capture>(ctx, self.capture).await?;
        Ok(value(stats(ctx, &capture, &services::apis(ctx), &self.filter)?))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use prism_capture::{ApiId, Command};

    use super::*;

    #[test]
    fn draws_are_counted_per_frame() {
        let gl = |name: &str| Command::new(ApiId::GLES, 0, name);
        let draw = || gl("glDrawArrays").flag(Flag::DrawCall);
        let capture = Capture::new("s").with_commands([
            draw(),
            draw(),
            gl("eglSwapBuffers").flag(Flag::EndOfFrame),
            gl("eglSwapBuffers").flag(Flag::EndOfFrame),
            draw(),
        ]);
        let s = stats(&Context::new(), &capture, &ApiRegistry::new(), &CommandFilter::default())
            .unwrap();
        assert_eq!(
            s,
            Stats {
                commands: 5,
                sub_commands: 0,
                frames: 2,
                draw_calls: vec![2, 0, 1],
            }
        );
    }
}
