// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Resource tracking over a command walk.

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use prism_capture::{
    context_id, initial_state, mutate_commands, ApiRegistry, Capture, ResourceEvent, StateHooks,
    SubCmdIdx,
};
use prism_db::{async_trait, value, Context, Error, Id, Resolvable, Result, Storable, Value};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::services;

/// A resource observed during a walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedResource {
    /// Stable identifier minted at creation.
    pub id: Id,
    /// API-level handle.
    pub handle: u64,
    /// Resource kind.
    pub kind: String,
    /// Human-readable label.
    pub label: String,
    /// Context of the creating command; `None` for initial state.
    pub context: Option<Id>,
    /// Creating command; `None` for resources of the initial state.
    pub created_at: Option<SubCmdIdx>,
    /// Destroying command.
    pub deleted_at: Option<SubCmdIdx>,
    /// Commands that read or wrote the resource, without consecutive
    /// duplicates.
    pub accesses: Vec<SubCmdIdx>,
}

/// Resources of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesByKind {
    /// Resource kind.
    pub kind: String,
    /// Resources in creation order.
    pub resources: Vec<TrackedResource>,
}

/// Tracked resources of a capture, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceList {
    /// Groups in kind order.
    pub kinds: Vec<ResourcesByKind>,
}

impl Storable for ResourceList {}

impl ResourceList {
    /// The resource with identifier `id`.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown identifier.
    pub fn get(&self, id: &Id) -> Result<&TrackedResource> {
        self.kinds
            .iter()
            .flat_map(|k| &k.resources)
            .find(|r| r.id == *id)
            .ok_or_else(|| Error::not_found(format!("resource {id}")))
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.kinds.iter().map(|k| k.resources.len()).sum()
    }

    /// Returns `true` if no resource was tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`StateHooks`] that records resource lifetimes.
pub struct ResourceTracker<'a> {
    capture: &'a Capture,
    resources: Vec<TrackedResource>,
    seen: FxHashMap<u64, usize>,
    minted: Option<(SubCmdIdx, u64)>,
}

impl<'a> ResourceTracker<'a> {
    /// A tracker for a walk over `capture`.
    pub fn new(capture: &'a Capture) -> Self {
        Self {
            capture,
            resources: Vec::new(),
            seen: FxHashMap::default(),
            minted: None,
        }
    }

    fn mint(&mut self, at: &SubCmdIdx) -> Id {
        let counter = match &self.minted {
            Some((last, n)) if last == at => n + 1,
            _ => 0,
        };
        self.minted = Some((at.clone(), counter));
        Id::of_str(&format!("resource:{at}:{counter}"))
    }

    /// The tracked resources, hiding those that lived and died within the
    /// initial state.
    pub fn finish(self) -> ResourceList {
        let mut by_kind: BTreeMap<String, Vec<TrackedResource>> = BTreeMap::new();
        for r in self.resources {
            let transient = r.created_at.is_none()
                && r.deleted_at.as_ref().is_some_and(SubCmdIdx::is_initial);
            if !transient {
                by_kind.entry(r.kind.clone()).or_default().push(r);
            }
        }
        ResourceList {
            kinds: by_kind
                .into_iter()
                .map(|(kind, resources)| ResourcesByKind { kind, resources })
                .collect(),
        }
    }
}

impl StateHooks for ResourceTracker<'_> {
    fn on_create(&mut self, at: &SubCmdIdx, resource: ResourceEvent<'_>) {
        let id = self.mint(at);
        let (created_at, context) = if at.is_initial() {
            (None, None)
        } else {
            let context = self
                .capture
                .command_at(at)
                .ok()
                .map(|c| context_id(c.api, c.thread));
            (Some(at.clone()), context)
        };
        self.seen.insert(resource.handle, self.resources.len());
        self.resources.push(TrackedResource {
            id,
            handle: resource.handle,
            kind: resource.kind.to_owned(),
            label: resource.label.to_owned(),
            context,
            created_at,
            deleted_at: None,
            accesses: Vec::new(),
        });
    }

    fn on_access(&mut self, at: &SubCmdIdx, resource: ResourceEvent<'_>) {
        let Some(&i) = self.seen.get(&resource.handle) else {
            return;
        };
        let accesses = &mut self.resources[i].accesses;
        if accesses.last() != Some(at) {
            accesses.push(at.clone());
        }
    }

    fn on_destroy(&mut self, at: &SubCmdIdx, resource: ResourceEvent<'_>) {
        if let Some(i) = self.seen.remove(&resource.handle) {
            self.resources[i].deleted_at = Some(at.clone());
        }
    }
}

/// Walks `capture` tracking every resource.
///
/// # Errors
/// [`Error::Cancelled`] if `ctx` is cancelled.
pub fn track_resources(
    ctx: &Context,
    capture: &Capture,
    apis: &ApiRegistry,
) -> Result<ResourceList> {
    let mut tracker = ResourceTracker::new(capture);
    let mut state = initial_state(ctx, capture, apis, &mut tracker)?;
    mutate_commands(ctx, capture, apis, &mut state, &mut tracker, |_, _, _| {
        ControlFlow::Continue(())
    })?;
    let list = tracker.finish();
    debug!(capture = %capture.name, resources = list.len(), "tracked resources");
    Ok(list)
}

/// Resolvable description of a capture's resource list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesResolvable {
    /// Capture identifier.
    pub capture: Id,
}

impl Storable for ResourcesResolvable {
    fn as_resolvable(&self) -> Option<&dyn Resolvable> {
        Some(self)
    }
}

#[async_trait]
impl Resolvable for ResourcesResolvable {
    async fn resolve(&self, ctx: &Context) -> Result<Value> {
        let capture = ctx.database()?.resolve_as::<Capture>(ctx, self.capture).await?;
        Ok(value(track_resources(ctx, &capture, &services::apis(ctx))?))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use prism_capture::{ApiId, Command, Effect, Val};

    use super::*;

    fn create(handle: u64, kind: &str) -> Effect {
        Effect::CreateResource {
            handle,
            resource_kind: kind.into(),
            label: format!("{kind} {handle}"),
            data: Val::Nil,
        }
    }

    fn gl(name: &str) -> Command {
        Command::new(ApiId::GLES, 3, name)
    }

    #[test]
    fn lifetimes_and_accesses_are_recorded() {
        let capture = Capture::new("r").with_commands([
            gl("glGenTextures").effect(create(1, "texture")).effect(create(2, "texture")),
            gl("glTexImage2D").effect(Effect::AccessResource {
                handle: 1,
                data: Some(Val::Uint(7)),
            }),
            gl("glDrawArrays")
                .effect(Effect::AccessResource { handle: 1, data: None })
                .effect(Effect::AccessResource { handle: 1, data: None }),
            gl("glDeleteTextures").effect(Effect::DestroyResource { handle: 1 }),
        ]);
        let list = track_resources(&Context::new(), &capture, &ApiRegistry::new()).unwrap();
        assert_eq!(list.len(), 2);
        let textures = &list.kinds[0].resources;
        let first = &textures[0];
        assert_eq!(first.created_at, Some(SubCmdIdx::top(0)));
        assert_eq!(first.deleted_at, Some(SubCmdIdx::top(3)));
        assert_eq!(first.accesses, [SubCmdIdx::top(1), SubCmdIdx::top(2)]);
        assert_eq!(first.context, Some(context_id(ApiId::GLES, 3)));
        assert_ne!(first.id, textures[1].id);
        assert_eq!(list.get(&first.id).unwrap().handle, 1);
    }

    #[test]
    fn transient_initial_resources_are_hidden() {
        let mut capture = Capture::new("r").with_commands([gl("glFlush")]);
        capture.initial_commands = vec![
            gl("init").effect(create(1, "buffer")),
            gl("init").effect(create(2, "buffer")),
            gl("init").effect(Effect::DestroyResource { handle: 1 }),
        ];
        let list = track_resources(&Context::new(), &capture, &ApiRegistry::new()).unwrap();
        assert_eq!(list.len(), 1);
        let kept = &list.kinds[0].resources[0];
        assert_eq!(kept.handle, 2);
        assert_eq!(kept.created_at, None);
    }
}
