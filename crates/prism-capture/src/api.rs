// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graphics API backends.
//!
//! An [`Api`] knows how its commands mutate the global state and how to read
//! framebuffer attachments out of it. [`RecordedApi`] is the built-in backend:
//! it replays each command's recorded [`Effect`](crate::Effect)s and serves
//! replay issues supplied by an earlier replay run.

use std::fmt;
use std::sync::Arc;

use prism_db::{Error, Result, Storable};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::capture::Capture;
use crate::command::{Command, Severity, SubCmdIdx};
use crate::state::{Attachment, AttachmentInfo, GlobalState, StateHooks};

/// Numeric API identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiId(pub u32);

impl ApiId {
    /// OpenGL ES.
    pub const GLES: ApiId = ApiId(1);
    /// Vulkan.
    pub const VULKAN: ApiId = ApiId(2);
}

impl fmt::Display for ApiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::GLES => f.write_str("OpenGL ES"),
            Self::VULKAN => f.write_str("Vulkan"),
            ApiId(n) => write!(f, "api{n}"),
        }
    }
}

/// An issue found by replaying the capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayIssue {
    /// Command the issue applies to.
    pub command: SubCmdIdx,
    /// Issue severity.
    pub severity: Severity,
    /// Description.
    pub text: String,
}

/// One named constant of a [`ConstantSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constant {
    /// Symbolic name.
    pub name: String,
    /// Numeric value.
    pub value: u64,
}

/// A named enumeration used to render parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantSet {
    /// Set name.
    pub name: String,
    /// Values combine as bit flags.
    #[serde(default)]
    pub is_bitfield: bool,
    /// Members.
    pub entries: Vec<Constant>,
}

impl Storable for ConstantSet {}

/// Capability set of a graphics API backend.
pub trait Api: Send + Sync + fmt::Debug {
    /// Numeric identifier.
    fn id(&self) -> ApiId;

    /// Display name.
    fn name(&self) -> &str;

    /// Applies `cmd` (at position `at`) to `state`.
    ///
    /// # Errors
    /// Backend-specific; the walk reports the error and continues.
    fn mutate(
        &self,
        cmd: &Command,
        at: &SubCmdIdx,
        state: &mut GlobalState,
        hooks: &mut dyn StateHooks,
    ) -> Result<()>;

    /// Attachment slots currently bound.
    fn attachments(&self, state: &GlobalState) -> Vec<Attachment> {
        state.attachments.keys().copied().collect()
    }

    /// Descriptor of the image bound to `attachment`.
    ///
    /// # Errors
    /// [`Error::DataUnavailable`] when nothing is bound to the slot.
    fn attachment(&self, state: &GlobalState, attachment: Attachment) -> Result<AttachmentInfo> {
        state
            .attachments
            .get(&attachment)
            .cloned()
            .ok_or_else(|| Error::unavailable(format!("no {attachment} attachment bound")))
    }

    /// Issues found by replaying `capture`, or `None` if the backend cannot
    /// enumerate replay issues.
    ///
    /// # Errors
    /// `Some(Err(_))` when the backend supports the query but it failed.
    fn replay_issues(&self, _capture: &Capture) -> Option<Result<Vec<ReplayIssue>>> {
        None
    }

    /// Constant sets used to render parameters.
    fn constant_sets(&self) -> &[ConstantSet] {
        &[]
    }
}

/// Backend that replays recorded effects.
#[derive(Debug, Clone)]
pub struct RecordedApi {
    id: ApiId,
    name: String,
    issues: Option<Vec<ReplayIssue>>,
    constants: Vec<ConstantSet>,
}

impl RecordedApi {
    /// A backend without replay issues or constants.
    pub fn new(id: ApiId) -> Self {
        Self {
            id,
            name: id.to_string(),
            issues: None,
            constants: Vec::new(),
        }
    }

    /// Overrides the display name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Serves `issues` from [`Api::replay_issues`].
    #[must_use]
    pub fn with_replay_issues(mut self, issues: Vec<ReplayIssue>) -> Self {
        self.issues = Some(issues);
        self
    }

    /// Adds a constant set.
    #[must_use]
    pub fn with_constant_set(mut self, set: ConstantSet) -> Self {
        self.constants.push(set);
        self
    }
}

impl Api for RecordedApi {
    fn id(&self) -> ApiId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mutate(
        &self,
        cmd: &Command,
        at: &SubCmdIdx,
        state: &mut GlobalState,
        hooks: &mut dyn StateHooks,
    ) -> Result<()> {
        for effect in &cmd.effects {
            effect.apply(cmd.api, at, state, hooks)?;
        }
        Ok(())
    }

    fn replay_issues(&self, _capture: &Capture) -> Option<Result<Vec<ReplayIssue>>> {
        self.issues.clone().map(Ok)
    }

    fn constant_sets(&self) -> &[ConstantSet] {
        &self.constants
    }
}

/// Registered API backends. Unregistered APIs fall back to [`RecordedApi`].
#[derive(Debug, Clone, Default)]
pub struct ApiRegistry {
    apis: FxHashMap<ApiId, Arc<dyn Api>>,
}

impl ApiRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `api`, replacing any backend with the same identifier.
    pub fn register(&mut self, api: Arc<dyn Api>) {
        self.apis.insert(api.id(), api);
    }

    /// Builder form of [`ApiRegistry::register`].
    #[must_use]
    pub fn with(mut self, api: impl Api + 'static) -> Self {
        self.register(Arc::new(api));
        self
    }

    /// Backend for `id`.
    pub fn get(&self, id: ApiId) -> Arc<dyn Api> {
        match self.apis.get(&id) {
            Some(api) => Arc::clone(api),
            None => Arc::new(RecordedApi::new(id)),
        }
    }

    /// Explicitly registered backends, ordered by identifier.
    pub fn registered(&self) -> Vec<Arc<dyn Api>> {
        let mut apis: Vec<_> = self.apis.values().cloned().collect();
        apis.sort_by_key(|a| a.id());
        apis
    }

    /// Display name of `id`.
    pub fn name(&self, id: ApiId) -> String {
        self.apis
            .get(&id)
            .map_or_else(|| id.to_string(), |a| a.name().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_apis_fall_back_to_recorded() {
        let reg = ApiRegistry::new().with(RecordedApi::new(ApiId::VULKAN).named("Vulkan 1.3"));
        assert_eq!(reg.name(ApiId::VULKAN), "Vulkan 1.3");
        assert_eq!(reg.name(ApiId::GLES), "OpenGL ES");
        assert_eq!(reg.get(ApiId(9)).id(), ApiId(9));
        assert_eq!(reg.registered().len(), 1);
    }

    #[test]
    fn attachment_query_reports_unbound_slots() {
        let api = RecordedApi::new(ApiId::GLES);
        let err = api
            .attachment(&GlobalState::default(), Attachment::Depth)
            .unwrap_err();
        assert_eq!(err.kind(), prism_db::ErrorKind::DataUnavailable);
    }
}
