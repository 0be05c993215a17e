// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Hierarchical command groups.
//!
//! A [`Group`] covers the half-open range `[start, end)` of command indices
//! at one nesting level and holds an ordered list of non-overlapping
//! [`Span`]s: nested groups, individual commands, and sub-command roots that
//! open the next nesting level.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use prism_capture::SubCmdIdx;
use prism_db::{Error, Result};
use serde::{Deserialize, Serialize};

/// One child of a [`Group`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "span", rename_all = "snake_case")]
pub enum Span {
    /// A nested group at the same level.
    Group(Group),
    /// A single command, by index within the level.
    Command {
        /// Command index within the level.
        id: u64,
    },
    /// A command whose sub-commands form the next level.
    Root(SubCmdRoot),
}

impl Span {
    /// Half-open index range covered by the span.
    pub fn bounds(&self) -> (u64, u64) {
        match self {
            Self::Group(g) => (g.start, g.end),
            Self::Command { id } => (*id, *id + 1),
            Self::Root(r) => {
                let id = r.id.last().unwrap_or(0);
                (id, id + 1)
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Group(g) => g.name.clone(),
            Self::Command { id } => format!("command {id}"),
            Self::Root(r) => format!("sub-commands of {}", r.id),
        }
    }
}

/// A command that executes sub-commands, with the group of its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCmdRoot {
    /// Absolute index of the command.
    pub id: SubCmdIdx,
    /// Children, indexed relative to `id`.
    pub group: Group,
}

/// A named range of commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Display name.
    pub name: String,
    /// First covered index.
    pub start: u64,
    /// End index (exclusive).
    pub end: u64,
    /// Command shown for the group, once chosen.
    #[serde(default)]
    pub representation: Option<SubCmdIdx>,
    /// Children in index order.
    #[serde(default)]
    pub spans: Vec<Span>,
}

/// Names whose representative is drawn from the grandparent range.
fn uses_grandparent_range(name: &str) -> bool {
    name == "OpenGL ES Commands"
        || name.starts_with("glDraw")
        || name.starts_with("glMultiDraw")
        || name.starts_with("glClear(")
}

impl Group {
    /// An empty group covering `[start, end)`.
    pub fn new(name: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            representation: None,
            spans: Vec::new(),
        }
    }

    /// Number of direct children.
    pub fn count(&self) -> u64 {
        self.spans.len() as u64
    }

    /// `Ok(i)` if span `i` covers `id`, else `Err(i)` with the insertion
    /// position.
    fn locate(&self, id: u64) -> std::result::Result<usize, usize> {
        self.spans.binary_search_by(|s| {
            let (a, b) = s.bounds();
            if b <= id {
                Ordering::Less
            } else if a > id {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        })
    }

    /// First span overlapping `[start, end)` and the number of overlapping
    /// spans.
    fn intersect(&self, start: u64, end: u64) -> (usize, usize) {
        let first = self.spans.partition_point(|s| s.bounds().1 <= start);
        let count = self.spans[first..]
            .iter()
            .take_while(|s| s.bounds().0 < end)
            .count();
        (first, count)
    }

    /// Adds a group covering `[start, end)`.
    ///
    /// A range inside a single existing group is delegated to that group.
    /// Existing spans wholly inside the range become children of the new
    /// group.
    ///
    /// # Errors
    /// [`Error::OverlappingGroup`] if the range partially overlaps a span.
    pub fn add_group(
        &mut self,
        start: u64,
        end: u64,
        name: impl Into<String>,
        representation: Option<SubCmdIdx>,
    ) -> Result<()> {
        let (s, c) = self.intersect(start, end);
        if c == 1 {
            let (a, b) = self.spans[s].bounds();
            if a <= start && b >= end {
                if let Span::Group(g) = &mut self.spans[s] {
                    return g.add_group(start, end, name, representation);
                }
            }
        }
        if let Some(span) = self.spans[s..s + c].iter().find(|span| {
            let (a, b) = span.bounds();
            a < start || b > end
        }) {
            return Err(Error::OverlappingGroup {
                start,
                end,
                existing: span.describe(),
            });
        }
        let mut group = Group::new(name, start, end);
        group.representation = representation;
        group.spans = self.spans.drain(s..s + c).collect();
        self.spans.insert(s, Span::Group(group));
        Ok(())
    }

    /// Adds a group ending at `id` (inclusive) inside the innermost group
    /// containing `id`, extending leftwards up to the previous sibling.
    ///
    /// # Errors
    /// [`Error::OverlappingGroup`] if `id` is already covered by a non-group
    /// span.
    pub fn add_left_group(&mut self, id: u64, name: impl Into<String>) -> Result<()> {
        match self.locate(id) {
            Ok(i) => match &mut self.spans[i] {
                Span::Group(g) => g.add_left_group(id, name),
                other => Err(Error::OverlappingGroup {
                    start: id,
                    end: id + 1,
                    existing: other.describe(),
                }),
            },
            Err(i) => {
                let left = if i == 0 {
                    self.start
                } else {
                    self.spans[i - 1].bounds().1
                };
                self.add_group(left, id + 1, name, None)
            }
        }
    }

    /// Adds command `id` to the innermost group containing it.
    pub fn add_command(&mut self, id: u64) {
        match self.locate(id) {
            Ok(i) => {
                if let Span::Group(g) = &mut self.spans[i] {
                    g.add_command(id);
                }
            }
            Err(i) => self.spans.insert(i, Span::Command { id }),
        }
    }

    /// Adds (or finds) the sub-command root for command `full`, whose index
    /// within this level is its last component and which has `children`
    /// sub-commands.
    ///
    /// # Errors
    /// [`Error::Internal`] if `full` is the initial-state position.
    pub fn add_root(
        &mut self,
        full: &SubCmdIdx,
        name: &str,
        children: u64,
    ) -> Result<&mut SubCmdRoot> {
        let id = full
            .last()
            .ok_or_else(|| Error::Internal("sub-command root without an index".into()))?;
        let i = match self.locate(id) {
            Ok(i) => i,
            Err(i) => {
                self.spans.insert(i, Span::Command { id });
                i
            }
        };
        if let Span::Command { .. } = self.spans[i] {
            self.spans[i] = Span::Root(SubCmdRoot {
                id: full.clone(),
                group: Group::new(name, 0, children),
            });
        }
        match &mut self.spans[i] {
            Span::Group(g) => g.add_root(full, name, children),
            Span::Root(r) => Ok(r),
            Span::Command { .. } => Err(Error::Internal("sub-command root vanished".into())),
        }
    }

    /// The sub-command root for index `id` of this level.
    ///
    /// # Errors
    /// [`Error::NotFound`] if no root covers `id`.
    pub fn root_mut(&mut self, id: u64) -> Result<&mut SubCmdRoot> {
        let Ok(i) = self.locate(id) else {
            return Err(Error::not_found(format!("sub-command root {id}")));
        };
        match &mut self.spans[i] {
            Span::Group(g) => g.root_mut(id),
            Span::Root(r) => Ok(r),
            Span::Command { .. } => Err(Error::not_found(format!("sub-command root {id}"))),
        }
    }

    /// Visits every sub-command root of this level.
    pub fn for_each_root_mut(&mut self, f: &mut dyn FnMut(&mut SubCmdRoot)) {
        for span in &mut self.spans {
            match span {
                Span::Group(g) => g.for_each_root_mut(f),
                Span::Root(r) => f(r),
                Span::Command { .. } => {}
            }
        }
    }

    /// Replaces nested groups with their contents, down to the next level.
    pub fn flatten(&mut self) {
        let spans = std::mem::take(&mut self.spans);
        for span in spans {
            match span {
                Span::Group(mut g) => {
                    g.flatten();
                    self.spans.append(&mut g.spans);
                }
                other => self.spans.push(other),
            }
        }
    }

    /// Inserts artificial `"[i - j]"` groups so that no group has more than
    /// `max_children` children and no run of more than `max_neighbours`
    /// commands sits beside sibling groups unwrapped. Zero disables a limit.
    pub fn cluster(&mut self, max_children: u64, max_neighbours: u64) {
        if max_neighbours > 0 && self.spans.iter().any(|s| !matches!(s, Span::Command { .. })) {
            self.wrap_runs(max_neighbours);
        }
        for span in &mut self.spans {
            match span {
                Span::Group(g) => g.cluster(max_children, max_neighbours),
                Span::Root(r) => r.group.cluster(max_children, max_neighbours),
                Span::Command { .. } => {}
            }
        }
        if max_children > 0 {
            self.split(max_children);
        }
    }

    fn wrap_runs(&mut self, max: u64) {
        let spans = std::mem::take(&mut self.spans);
        let mut run: Vec<Span> = Vec::new();
        let flush = |run: &mut Vec<Span>, out: &mut Vec<Span>| {
            if run.len() as u64 > max {
                out.push(Span::Group(artificial(std::mem::take(run))));
            } else {
                out.append(run);
            }
        };
        for span in spans {
            if matches!(span, Span::Command { .. }) {
                run.push(span);
            } else {
                flush(&mut run, &mut self.spans);
                self.spans.push(span);
            }
        }
        flush(&mut run, &mut self.spans);
    }

    fn split(&mut self, max: u64) {
        let max = max.max(2);
        let n = self.count();
        if n <= max {
            return;
        }
        let per = usize::try_from(max).unwrap_or(usize::MAX);
        let mut spans = std::mem::take(&mut self.spans);
        while !spans.is_empty() {
            let rest = spans.split_off(per.min(spans.len()));
            self.spans.push(Span::Group(artificial(spans)));
            spans = rest;
        }
    }

    /// Chooses a representative command for this group and every group below
    /// it. `prefix` is the absolute index of the enclosing sub-command root
    /// (empty at the top level) and `draws` lists the draws and clears the
    /// tree contains.
    pub fn represent(&mut self, prefix: &SubCmdIdx, draws: &BTreeSet<SubCmdIdx>) {
        self.represent_within(prefix, draws, None, None);
    }

    fn represent_within(
        &mut self,
        prefix: &SubCmdIdx,
        draws: &BTreeSet<SubCmdIdx>,
        parent: Option<(u64, u64)>,
        grandparent: Option<(u64, u64)>,
    ) {
        let range = (self.start, self.end);
        if self.representation.is_none() && self.end > self.start {
            let (start, end) = if uses_grandparent_range(&self.name) {
                grandparent.or(parent).unwrap_or(range)
            } else {
                range
            };
            let depth = prefix.depth() + 1;
            let last_draw = draws
                .range(prefix.child(start)..prefix.child(end))
                .rev()
                .find(|d| d.depth() == depth)
                .cloned();
            self.representation = Some(last_draw.unwrap_or_else(|| prefix.child(end - 1)));
        }
        for span in &mut self.spans {
            match span {
                Span::Group(g) => g.represent_within(prefix, draws, Some(range), parent),
                Span::Root(r) => r.group.represent_within(&r.id, draws, None, None),
                Span::Command { .. } => {}
            }
        }
    }

    /// Resolves child `indices` from this group.
    ///
    /// # Errors
    /// [`Error::OutOfBounds`] for an index past a node's children;
    /// [`Error::NotFound`] when indices continue below a command.
    pub fn index(&self, indices: &[u64]) -> Result<Node<'_>> {
        let mut group = self;
        let mut prefix = SubCmdIdx::initial();
        let mut node = Node::Group {
            group: self,
            prefix: prefix.clone(),
        };
        for (depth, &i) in indices.iter().enumerate() {
            let span = usize::try_from(i)
                .ok()
                .and_then(|i| group.spans.get(i))
                .ok_or_else(|| Error::out_of_bounds(i, group.count()))?;
            match span {
                Span::Group(g) => {
                    group = g;
                    node = Node::Group {
                        group: g,
                        prefix: prefix.clone(),
                    };
                }
                Span::Root(r) => {
                    prefix = r.id.clone();
                    group = &r.group;
                    node = Node::Root(r);
                }
                Span::Command { id } => {
                    if depth + 1 != indices.len() {
                        return Err(Error::not_found(format!(
                            "children of command {}",
                            prefix.child(*id)
                        )));
                    }
                    node = Node::Command(prefix.child(*id));
                }
            }
        }
        Ok(node)
    }

    /// Child indices of the node for `cmd`. Stops at a group whose last
    /// command is `cmd` when `prefer_group` is set, and at the closest
    /// enclosing node when `cmd` is not in the tree.
    pub fn indices(&self, cmd: &SubCmdIdx, prefer_group: bool) -> Vec<u64> {
        let mut out = Vec::new();
        let mut group = self;
        let mut level = 0;
        while let Some(&rel) = cmd.0.get(level) {
            let Ok(i) = group.locate(rel) else {
                break;
            };
            out.push(i as u64);
            let at_target = level + 1 == cmd.depth();
            match &group.spans[i] {
                Span::Command { .. } => break,
                Span::Group(g) => {
                    if prefer_group && at_target && g.end.checked_sub(1) == Some(rel) {
                        break;
                    }
                    group = g;
                }
                Span::Root(r) => {
                    if at_target {
                        break;
                    }
                    level += 1;
                    group = &r.group;
                }
            }
        }
        out
    }

    /// Visits every node below this group in pre-order with its child
    /// indices.
    pub fn walk(&self, f: &mut dyn FnMut(&[u64], Node<'_>)) {
        let mut indices = Vec::new();
        self.walk_within(&SubCmdIdx::initial(), &mut indices, f);
    }

    fn walk_within(&self, prefix: &SubCmdIdx, indices: &mut Vec<u64>, f: &mut dyn FnMut(&[u64], Node<'_>)) {
        for (i, span) in self.spans.iter().enumerate() {
            indices.push(i as u64);
            match span {
                Span::Group(g) => {
                    f(
                        indices,
                        Node::Group {
                            group: g,
                            prefix: prefix.clone(),
                        },
                    );
                    g.walk_within(prefix, indices, f);
                }
                Span::Root(r) => {
                    f(indices, Node::Root(r));
                    r.group.walk_within(&r.id, indices, f);
                }
                Span::Command { id } => f(indices, Node::Command(prefix.child(*id))),
            }
            indices.pop();
        }
    }
}

fn artificial(spans: Vec<Span>) -> Group {
    let start = spans.first().map_or(0, |s| s.bounds().0);
    let end = spans.last().map_or(start, |s| s.bounds().1);
    let mut g = Group::new(format!("[{start} - {}]", end.saturating_sub(1)), start, end);
    g.spans = spans;
    g
}

/// A resolved tree node.
#[derive(Debug, Clone)]
pub enum Node<'a> {
    /// A group, with the absolute index of its level.
    Group {
        /// The group.
        group: &'a Group,
        /// Absolute index of the enclosing sub-command root.
        prefix: SubCmdIdx,
    },
    /// A sub-command root.
    Root(&'a SubCmdRoot),
    /// A leaf command.
    Command(SubCmdIdx),
}
