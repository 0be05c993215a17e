// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Groupers: passes that propose top-level command groups.

use prism_capture::{ApiRegistry, Command, CommandId, Flag, GlobalState};

/// A proposed group over top-level commands `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// First command.
    pub start: CommandId,
    /// End command (exclusive).
    pub end: CommandId,
    /// Group name.
    pub name: String,
}

/// Observes top-level commands in order and proposes groups.
pub trait Grouper {
    /// Observes command `id` with the state after it executed.
    fn process(&mut self, id: CommandId, cmd: &Command, state: &GlobalState);
    /// Closes open groups at `count`, the number of commands.
    fn flush(&mut self, count: u64);
    /// The proposed groups.
    fn build(self: Box<Self>) -> Vec<Proposal>;
}

/// Groups maximal runs of consecutive commands that share a key.
///
/// The key function returns `(key, name)`, or `None` to break the run.
pub struct RunGrouper<F> {
    key: F,
    open: Option<(String, String, CommandId)>,
    out: Vec<Proposal>,
}

impl<F> RunGrouper<F>
where
    F: FnMut(&Command, &GlobalState) -> Option<(String, String)>,
{
    /// A grouper keyed by `key`.
    pub fn new(key: F) -> Self {
        Self {
            key,
            open: None,
            out: Vec::new(),
        }
    }

    fn close(&mut self, end: CommandId) {
        if let Some((_, name, start)) = self.open.take() {
            self.out.push(Proposal { start, end, name });
        }
    }
}

impl<F> Grouper for RunGrouper<F>
where
    F: FnMut(&Command, &GlobalState) -> Option<(String, String)>,
{
    fn process(&mut self, id: CommandId, cmd: &Command, state: &GlobalState) {
        let next = (self.key)(cmd, state);
        let same = match (&self.open, &next) {
            (Some((open, _, _)), Some((key, _))) => open == key,
            _ => false,
        };
        if same {
            return;
        }
        self.close(id);
        self.open = next.map(|(key, name)| (key, name, id));
    }

    fn flush(&mut self, count: u64) {
        self.close(count);
    }

    fn build(self: Box<Self>) -> Vec<Proposal> {
        self.out
    }
}

/// Runs of commands issued through the same API.
pub fn by_api(apis: &ApiRegistry) -> Box<dyn Grouper + '_> {
    Box::new(RunGrouper::new(move |cmd: &Command, _: &GlobalState| {
        Some((
            cmd.api.0.to_string(),
            format!("{} Commands", apis.name(cmd.api)),
        ))
    }))
}

/// Runs of commands issued from the same thread.
pub fn by_thread() -> Box<dyn Grouper> {
    Box::new(RunGrouper::new(|cmd: &Command, _: &GlobalState| {
        Some((cmd.thread.to_string(), format!("Thread: {:#x}", cmd.thread)))
    }))
}

/// Push/pop debug-marker pairs on top-level commands.
#[derive(Debug, Default)]
pub struct MarkerGrouper {
    open: Vec<(CommandId, String)>,
    out: Vec<Proposal>,
}

impl Grouper for MarkerGrouper {
    fn process(&mut self, id: CommandId, cmd: &Command, _state: &GlobalState) {
        if cmd.is(Flag::PushUserMarker) {
            self.open.push((id, cmd.marker_label().to_owned()));
        } else if cmd.is(Flag::PopUserMarker) {
            if let Some((start, name)) = self.open.pop() {
                self.out.push(Proposal {
                    start,
                    end: id + 1,
                    name,
                });
            }
        }
    }

    fn flush(&mut self, count: u64) {
        while let Some((start, name)) = self.open.pop() {
            self.out.push(Proposal {
                start,
                end: count,
                name,
            });
        }
    }

    fn build(mut self: Box<Self>) -> Vec<Proposal> {
        // Outer markers first so nested ones land inside them.
        self.out
            .sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        self.out
    }
}

#[cfg(test)]
mod tests {
    use prism_capture::ApiId;

    use super::*;

    fn run(mut g: Box<dyn Grouper + '_>, cmds: &[Command]) -> Vec<(u64, u64, String)> {
        let state = GlobalState::default();
        for (i, c) in cmds.iter().enumerate() {
            g.process(i as u64, c, &state);
        }
        g.flush(cmds.len() as u64);
        g.build()
            .into_iter()
            .map(|p| (p.start, p.end, p.name))
            .collect()
    }

    #[test]
    fn runs_split_on_key_changes() {
        let cmds = [
            Command::new(ApiId::GLES, 1, "a"),
            Command::new(ApiId::GLES, 1, "b"),
            Command::new(ApiId::VULKAN, 1, "c"),
            Command::new(ApiId::GLES, 2, "d"),
        ];
        let apis = ApiRegistry::new();
        assert_eq!(
            run(by_api(&apis), &cmds),
            [
                (0, 2, "OpenGL ES Commands".to_owned()),
                (2, 3, "Vulkan Commands".to_owned()),
                (3, 4, "OpenGL ES Commands".to_owned()),
            ]
        );
        assert_eq!(
            run(by_thread(), &cmds),
            [(0, 3, "Thread: 0x1".to_owned()), (3, 4, "Thread: 0x2".to_owned())]
        );
    }

    #[test]
    fn markers_nest_and_close_at_the_end() {
        let push = |label: &str| {
            Command::new(ApiId::GLES, 1, "glPushDebugGroup")
                .flag(Flag::PushUserMarker)
                .param("label", label)
        };
        let pop = || Command::new(ApiId::GLES, 1, "glPopDebugGroup").flag(Flag::PopUserMarker);
        let cmds = [
            push("frame"),
            push("shadows"),
            Command::new(ApiId::GLES, 1, "glDrawArrays"),
            pop(),
            push("unclosed"),
        ];
        assert_eq!(
            run(Box::<MarkerGrouper>::default(), &cmds),
            [
                (0, 5, "frame".to_owned()),
                (1, 4, "shadows".to_owned()),
                (4, 5, "unclosed".to_owned()),
            ]
        );
    }
}
