// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Command filters.
//!
//! A [`CommandFilter`] is the serializable request; [`Filter`] is the
//! compiled predicate. Every clause must accept a command for the filter to
//! accept it. Commands the synchronization data hides are always rejected.

use std::collections::BTreeSet;

use prism_capture::{context_id, Command, CommandId, Flag, GlobalState, SubCmdIdx, SyncData};
use prism_db::Id;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Which commands an analysis should consider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandFilter {
    /// Keep only commands issued from these threads; empty keeps all.
    pub threads: Vec<u64>,
    /// Keep only commands of this context.
    pub context: Option<Id>,
    /// Keep executed draws and the commands that execute them.
    pub only_executed_draws: bool,
    /// Drop host commands that submit no device work.
    pub suppress_host_commands: bool,
    /// Drop push/pop debug-marker commands.
    pub suppress_begin_end_markers: bool,
    /// Drop device-side synchronization commands.
    pub suppress_device_side_sync_commands: bool,
}

#[derive(Debug, Clone)]
enum Clause {
    HiddenBySync(BTreeSet<CommandId>),
    Threads(FxHashSet<u64>),
    Context(Id),
    OnlyExecutedDraws(FxHashSet<CommandId>),
    SuppressHost(FxHashSet<CommandId>),
    SuppressMarkers,
    SuppressSync,
}

impl Clause {
    fn accepts(&self, at: &SubCmdIdx, cmd: &Command) -> bool {
        let top_level = at.depth() == 1;
        match self {
            Self::HiddenBySync(hidden) => !(top_level && at.root().is_some_and(|r| hidden.contains(&r))),
            Self::Threads(threads) => threads.contains(&cmd.thread),
            Self::Context(id) => context_id(cmd.api, cmd.thread) == *id,
            Self::OnlyExecutedDraws(parents) => {
                cmd.is(Flag::ExecutedDraw)
                    || !cmd.sub_commands.is_empty()
                    || (top_level && at.root().is_some_and(|r| parents.contains(&r)))
            }
            Self::SuppressHost(parents) => {
                !top_level
                    || cmd.is(Flag::Submission)
                    || at.root().is_some_and(|r| parents.contains(&r))
            }
            Self::SuppressMarkers => !(cmd.is(Flag::PushUserMarker) || cmd.is(Flag::PopUserMarker)),
            Self::SuppressSync => !cmd.is(Flag::SyncCommand),
        }
    }
}

/// Compiled conjunction of filter clauses.
#[derive(Debug, Clone)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    /// Compiles `request` against the capture's synchronization data.
    pub fn new(request: &CommandFilter, sync: &SyncData) -> Self {
        let mut clauses = vec![Clause::HiddenBySync(sync.hidden.clone())];
        let parents = || -> FxHashSet<CommandId> {
            sync.sub_commands
                .iter()
                .filter(|(_, subs)| !subs.is_empty())
                .map(|(id, _)| *id)
                .collect()
        };
        if !request.threads.is_empty() {
            clauses.push(Clause::Threads(request.threads.iter().copied().collect()));
        }
        if let Some(ctx) = request.context {
            clauses.push(Clause::Context(ctx));
        }
        if request.only_executed_draws {
            clauses.push(Clause::OnlyExecutedDraws(parents()));
        }
        if request.suppress_host_commands {
            clauses.push(Clause::SuppressHost(parents()));
        }
        if request.suppress_begin_end_markers {
            clauses.push(Clause::SuppressMarkers);
        }
        if request.suppress_device_side_sync_commands {
            clauses.push(Clause::SuppressSync);
        }
        Self { clauses }
    }

    /// A filter that only applies the synchronization-data clause.
    pub fn unfiltered(sync: &SyncData) -> Self {
        Self::new(&CommandFilter::default(), sync)
    }

    /// Returns `true` if every clause accepts the command at `at`.
    pub fn accepts(&self, at: &SubCmdIdx, cmd: &Command, _state: &GlobalState) -> bool {
        self.clauses.iter().all(|c| c.accepts(at, cmd))
    }
}

#[cfg(test)]
mod tests {
    use prism_capture::{ApiId, Capture};

    use super::*;

    fn capture() -> Capture {
        Capture::new("f").with_commands([
            Command::new(ApiId::VULKAN, 1, "vkCmdBeginDebugUtilsLabelEXT").flag(Flag::PushUserMarker),
            Command::new(ApiId::VULKAN, 1, "vkQueueSubmit")
                .flag(Flag::Submission)
                .executes(vec![
                    Command::new(ApiId::VULKAN, 1, "vkCmdDraw").flag(Flag::ExecutedDraw),
                    Command::new(ApiId::VULKAN, 1, "vkCmdPipelineBarrier").flag(Flag::SyncCommand),
                ]),
            Command::new(ApiId::VULKAN, 2, "vkAllocateMemory"),
        ])
    }

    fn accepted(filter: &CommandFilter, capture: &Capture) -> Vec<String> {
        let sync = capture.sync_data();
        let f = Filter::new(filter, &sync);
        let state = GlobalState::default();
        let mut out = Vec::new();
        for (i, cmd) in capture.commands.iter().enumerate() {
            let at = SubCmdIdx::top(i as u64);
            if f.accepts(&at, cmd, &state) {
                out.push(at.to_string());
            }
            for idx in sync.sub_commands.get(&(i as u64)).into_iter().flatten() {
                if let Ok(sub) = capture.command_at(idx) {
                    if f.accepts(idx, sub, &state) {
                        out.push(idx.to_string());
                    }
                }
            }
        }
        out
    }

    #[test]
    fn empty_filter_accepts_everything() {
        assert_eq!(
            accepted(&CommandFilter::default(), &capture()),
            ["0", "1", "1.0", "1.1", "2"]
        );
    }

    #[test]
    fn clauses_combine_conjunctively() {
        let filter = CommandFilter {
            threads: vec![1],
            suppress_begin_end_markers: true,
            suppress_device_side_sync_commands: true,
            ..CommandFilter::default()
        };
        assert_eq!(accepted(&filter, &capture()), ["1", "1.0"]);
    }

    #[test]
    fn host_commands_can_be_suppressed() {
        let filter = CommandFilter {
            suppress_host_commands: true,
            ..CommandFilter::default()
        };
        assert_eq!(accepted(&filter, &capture()), ["1", "1.0", "1.1"]);
    }

    #[test]
    fn only_executed_draws_keeps_their_submissions() {
        let filter = CommandFilter {
            only_executed_draws: true,
            ..CommandFilter::default()
        };
        assert_eq!(accepted(&filter, &capture()), ["1", "1.0"]);
    }

    #[test]
    fn hidden_commands_are_always_rejected() {
        let mut c = capture();
        let mut sync = c.sync_data().into_owned();
        sync.hidden.insert(2);
        c.sync = Some(sync);
        assert_eq!(
            accepted(&CommandFilter::default(), &c),
            ["0", "1", "1.0", "1.1"]
        );
    }

    #[test]
    fn context_clause_matches_api_and_thread() {
        let filter = CommandFilter {
            context: Some(context_id(ApiId::VULKAN, 2)),
            ..CommandFilter::default()
        };
        assert_eq!(accepted(&filter, &capture()), ["2"]);
    }
}
