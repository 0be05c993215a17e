// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Synchronization data: which commands expand into sub-commands.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandId, Flag, SubCmdIdx};

/// A debug-marker group recorded inside a command buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubMarker {
    /// Command whose children the marker spans.
    pub parent: SubCmdIdx,
    /// First child index.
    pub start: u64,
    /// End child index (exclusive).
    pub end: u64,
    /// Marker label.
    pub name: String,
}

/// How top-level commands relate to the work they execute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncData {
    /// Sub-command indices executed by each top-level command, in execution
    /// order (parents before their children).
    #[serde(default)]
    pub sub_commands: BTreeMap<CommandId, Vec<SubCmdIdx>>,
    /// Commands represented by their caller instead of themselves.
    #[serde(default)]
    pub hidden: BTreeSet<CommandId>,
    /// Marker groups inside command buffers, keyed by top-level command.
    #[serde(default)]
    pub markers: BTreeMap<CommandId, Vec<SubMarker>>,
}

impl SyncData {
    /// Derives synchronization data from the nested commands of `commands`.
    pub fn from_commands(commands: &[Command]) -> Self {
        let mut out = Self::default();
        for (i, cmd) in commands.iter().enumerate() {
            if cmd.sub_commands.is_empty() {
                continue;
            }
            let root = SubCmdIdx::top(i as u64);
            let mut subs = Vec::new();
            let mut markers = Vec::new();
            collect(cmd, &root, &mut subs, &mut markers);
            out.sub_commands.insert(i as u64, subs);
            if !markers.is_empty() {
                out.markers.insert(i as u64, markers);
            }
        }
        out
    }

    /// Returns `true` if `id` expands into sub-commands.
    pub fn has_sub_commands(&self, id: CommandId) -> bool {
        self.sub_commands.get(&id).is_some_and(|s| !s.is_empty())
    }
}

fn collect(cmd: &Command, at: &SubCmdIdx, subs: &mut Vec<SubCmdIdx>, markers: &mut Vec<SubMarker>) {
    let mut open: Vec<(u64, String)> = Vec::new();
    let count = cmd.sub_commands.len() as u64;
    for (j, child) in cmd.sub_commands.iter().enumerate() {
        let j = j as u64;
        let idx = at.child(j);
        subs.push(idx.clone());
        if child.is(Flag::PushUserMarker) {
            open.push((j, child.marker_label().to_owned()));
        } else if child.is(Flag::PopUserMarker) {
            if let Some((start, name)) = open.pop() {
                markers.push(SubMarker {
                    parent: at.clone(),
                    start,
                    end: j + 1,
                    name,
                });
            }
        }
        if !child.sub_commands.is_empty() {
            collect(child, &idx, subs, markers);
        }
    }
    // Unbalanced pushes close at the end of the buffer.
    while let Some((start, name)) = open.pop() {
        markers.push(SubMarker {
            parent: at.clone(),
            start,
            end: count,
            name,
        });
    }
}
