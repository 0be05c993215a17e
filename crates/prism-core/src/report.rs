// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Diagnostics reports.
//!
//! Building a report mutates every command with collecting hooks installed,
//! merges the issues of backends that can enumerate replay issues, then emits
//! the items of each command the filter accepts in walk order. Items raised
//! while building the initial state come first.

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use prism_capture::{
    initial_state, mutate_commands, ApiRegistry, Capture, Severity, StateHooks, SubCmdIdx,
};
use prism_db::{async_trait, value, Context, Id, Resolvable, Result, Storable, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::filter::{CommandFilter, Filter};
use crate::services;

/// One diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportItem {
    /// Severity.
    pub severity: Severity,
    /// Message text.
    pub message: String,
    /// Command the item applies to; `None` for the initial state.
    pub command: Option<SubCmdIdx>,
    /// Tags, ending with the command name.
    pub tags: Vec<String>,
}

/// Items sharing a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportGroup {
    /// Shared message text.
    pub name: String,
    /// Indices into [`Report::items`].
    pub items: Vec<usize>,
}

/// A diagnostics report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Items in command order.
    pub items: Vec<ReportItem>,
    /// Items grouped by message, in order of first appearance.
    pub groups: Vec<ReportGroup>,
}

impl Storable for Report {}

impl Report {
    fn push(&mut self, item: ReportItem) {
        let index = self.items.len();
        match self.groups.iter_mut().find(|g| g.name == item.message) {
            Some(g) => g.items.push(index),
            None => self.groups.push(ReportGroup {
                name: item.message.clone(),
                items: vec![index],
            }),
        }
        self.items.push(item);
    }
}

#[derive(Debug)]
struct RawItem {
    at: SubCmdIdx,
    severity: Severity,
    message: String,
    tags: Vec<String>,
}

/// [`StateHooks`] that collect diagnostics.
#[derive(Debug, Default)]
struct Collector {
    items: Vec<RawItem>,
}

impl StateHooks for Collector {
    fn new_message(&mut self, at: &SubCmdIdx, severity: Severity, text: &str) -> Option<usize> {
        self.items.push(RawItem {
            at: at.clone(),
            severity,
            message: text.to_owned(),
            tags: Vec::new(),
        });
        Some(self.items.len() - 1)
    }

    fn add_tag(&mut self, token: usize, tag: &str) {
        if let Some(item) = self.items.get_mut(token) {
            item.tags.push(tag.to_owned());
        }
    }

    fn on_error(&mut self, at: &SubCmdIdx, err: &prism_db::Error) {
        self.items.push(RawItem {
            at: at.clone(),
            severity: Severity::Error,
            message: err.to_string(),
            tags: Vec::new(),
        });
    }
}

/// Builds the diagnostics report of `capture`.
///
/// # Errors
/// [`prism_db::Error::Cancelled`] if `ctx` is cancelled.
pub fn build_report(
    ctx: &Context,
    capture: &Capture,
    apis: &ApiRegistry,
    filter: &CommandFilter,
) -> Result<Report> {
    let sync = capture.sync_data();
    let filter = Filter::new(filter, &sync);
    let mut hooks = Collector::default();
    let mut state = initial_state(ctx, capture, apis, &mut hooks)?;
    let mut accepted = Vec::new();
    mutate_commands(ctx, capture, apis, &mut state, &mut hooks, |at, cmd, state| {
        if filter.accepts(at, cmd, state) {
            accepted.push(at.clone());
        }
        ControlFlow::Continue(())
    })?;

    let mut by_command: BTreeMap<SubCmdIdx, Vec<RawItem>> = BTreeMap::new();
    for item in hooks.items {
        by_command.entry(item.at.clone()).or_default().push(item);
    }
    for api in apis.registered() {
        let issues = match api.replay_issues(capture) {
            None => continue,
            Some(Ok(issues)) => issues,
            Some(Err(err)) => {
                warn!(api = api.name(), error = %err, "replay issue query failed");
                by_command.entry(SubCmdIdx::initial()).or_default().push(RawItem {
                    at: SubCmdIdx::initial(),
                    severity: Severity::Error,
                    message: format!("replay issues unavailable from {}: {err}", api.name()),
                    tags: vec!["replay".into()],
                });
                continue;
            }
        };
        for issue in issues {
            by_command.entry(issue.command.clone()).or_default().push(RawItem {
                at: issue.command,
                severity: issue.severity,
                message: issue.text,
                tags: Vec::new(),
            });
        }
    }

    let mut report = Report::default();
    for item in by_command.remove(&SubCmdIdx::initial()).unwrap_or_default() {
        report.push(ReportItem {
            severity: item.severity,
            message: item.message,
            command: None,
            tags: item.tags,
        });
    }
    for at in accepted {
        let Ok(cmd) = capture.command_at(&at) else {
            continue;
        };
        let items = by_command.remove(&at).unwrap_or_default();
        let aborted = cmd.aborted().map(|reason| RawItem {
            at: at.clone(),
            severity: Severity::Fatal,
            message: reason.to_owned(),
            tags: Vec::new(),
        });
        for item in items.into_iter().chain(aborted) {
            let mut tags = item.tags;
            tags.push(cmd.name.clone());
            report.push(ReportItem {
                severity: item.severity,
                message: item.message,
                command: Some(at.clone()),
                tags,
            });
        }
    }
    debug!(capture = %capture.name, items = report.items.len(), "built report");
    Ok(report)
}

/// Resolvable description of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportResolvable {
    /// Capture identifier.
    pub capture: Id,
    /// Replay device the report targets.
    pub device: Option<Id>,
    /// Commands to report on.
    pub filter: CommandFilter,
}

impl Storable for ReportResolvable {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

#[async_trait]
impl Resolvable for ReportResolvable {
    async fn resolve(&self, ctx: &Context) -> Result<Value> {
        if let Some(device) = &self.device {
            services::devices(ctx).get(device)?;
        }
        let capture = ctx.database()?.resolve_as::<Capture>(ctx, self.capture).await?;
        let report = build_report(ctx, &capture, &services::apis(ctx), &self.filter)?;
        Ok(value(report))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use prism_capture::{ApiId, Command, Effect, Extra, RecordedApi, ReplayIssue};

    use super::*;

    fn warn(text: &str) -> Effect {
        Effect::Message {
            severity: Severity::Warning,
            text: text.into(),
            tags: vec!["state".into()],
        }
    }

    fn summary(report: &Report) -> Vec<(String, Severity, String, Vec<String>)> {
        report
            .items
            .iter()
            .map(|i| {
                (
                    i.command.as_ref().map(ToString::to_string).unwrap_or_default(),
                    i.severity,
                    i.message.clone(),
                    i.tags.clone(),
                )
            })
            .collect()
    }

    #[test]
    fn items_follow_walk_order_with_command_tags() {
        let gl = |name: &str| Command::new(ApiId::GLES, 0, name);
        let mut capture = Capture::new("rep").with_commands([
            gl("glEnable").effect(warn("unknown cap")),
            gl("glDrawArrays").extra(Extra::Aborted {
                reason: "device lost".into(),
            }),
            gl("glFlush").effect(Effect::DestroyResource { handle: 9 }),
        ]);
        capture.initial_commands = vec![gl("init").effect(warn("stale context"))];
        let apis = ApiRegistry::new().with(RecordedApi::new(ApiId::GLES).with_replay_issues(vec![
            ReplayIssue {
                command: SubCmdIdx::top(0),
                severity: Severity::Info,
                text: "replayed slowly".into(),
            },
        ]));
        let report =
            build_report(&Context::new(), &capture, &apis, &CommandFilter::default()).unwrap();
        let tags = |t: &[&str]| t.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>();
        let got = summary(&report);
        assert_eq!(got[0], (String::new(), Severity::Warning, "stale context".into(), tags(&["state"])));
        assert_eq!(
            got[1],
            ("0".into(), Severity::Warning, "unknown cap".into(), tags(&["state", "glEnable"]))
        );
        assert_eq!(
            got[2],
            ("0".into(), Severity::Info, "replayed slowly".into(), tags(&["glEnable"]))
        );
        assert_eq!(
            got[3],
            ("1".into(), Severity::Fatal, "device lost".into(), tags(&["glDrawArrays"]))
        );
        assert_eq!(got[4].0, "2");
        assert_eq!(got[4].1, Severity::Error);
        assert_eq!(got.len(), 5);
    }

    #[derive(Debug)]
    struct LostDevice;

    impl prism_capture::Api for LostDevice {
        fn id(&self) -> ApiId {
            ApiId::VULKAN
        }

        fn name(&self) -> &str {
            "Vulkan"
        }

        fn mutate(
            &self,
            _cmd: &Command,
            _at: &SubCmdIdx,
            _state: &mut prism_capture::GlobalState,
            _hooks: &mut dyn StateHooks,
        ) -> Result<()> {
            Ok(())
        }

        fn replay_issues(&self, _capture: &Capture) -> Option<Result<Vec<ReplayIssue>>> {
            Some(Err(prism_db::Error::unavailable("device lost")))
        }
    }

    #[test]
    fn failed_replay_queries_are_reported() {
        let capture = Capture::new("rep")
            .with_commands([Command::new(ApiId::GLES, 0, "glFlush")]);
        let apis = ApiRegistry::new().with(LostDevice);
        let report =
            build_report(&Context::new(), &capture, &apis, &CommandFilter::default()).unwrap();
        assert_eq!(report.items.len(), 1);
        let item = &report.items[0];
        assert_eq!(item.command, None);
        assert_eq!(item.severity, Severity::Error);
        assert!(item.message.starts_with("replay issues unavailable from Vulkan"));
        assert!(item.message.contains("device lost"));
    }

    #[test]
    fn filtered_commands_are_left_out() {
        let capture = Capture::new("rep").with_commands([
            Command::new(ApiId::GLES, 1, "a").effect(warn("x")),
            Command::new(ApiId::GLES, 2, "b").effect(warn("x")),
        ]);
        let filter = CommandFilter {
            threads: vec![2],
            ..CommandFilter::default()
        };
        let report = build_report(&Context::new(), &capture, &ApiRegistry::new(), &filter).unwrap();
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].command, Some(SubCmdIdx::top(1)));
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].items, [0]);
    }
}
