// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request-scoped services carried on the [`Context`].
//!
//! Stored resolvables must stay plain data, so the API registry, service
//! configuration, device list and external collaborator travel as context
//! extensions instead.

use std::sync::Arc;

use prism_capture::ApiRegistry;
use prism_db::{async_trait, Context, Error, Id, Result};
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::path::Path;
use crate::wire;

/// The API registry of the request, or an empty one.
pub fn apis(ctx: &Context) -> Arc<ApiRegistry> {
    ctx.extension::<ApiRegistry>().unwrap_or_default()
}

/// The service configuration of the request, or the defaults.
pub fn config(ctx: &Context) -> Arc<ServiceConfig> {
    ctx.extension::<ServiceConfig>().unwrap_or_default()
}

/// A replay device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Identifier.
    pub id: Id,
    /// Display name.
    pub name: String,
    /// Application binary interface.
    #[serde(default)]
    pub abi: String,
    /// GPU vendor.
    #[serde(default)]
    pub vendor: String,
}

/// Devices available for replay.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceInfo>,
}

impl DeviceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device, replacing any with the same identifier.
    pub fn register(&mut self, device: DeviceInfo) {
        self.devices.retain(|d| d.id != device.id);
        self.devices.push(device);
    }

    /// The device `id`.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown device.
    pub fn get(&self, id: &Id) -> Result<&DeviceInfo> {
        self.devices
            .iter()
            .find(|d| d.id == *id)
            .ok_or_else(|| Error::not_found(format!("device {id}")))
    }

    /// Every registered device.
    pub fn list(&self) -> &[DeviceInfo] {
        &self.devices
    }
}

/// The device registry of the request, or an empty one.
pub fn devices(ctx: &Context) -> Arc<DeviceRegistry> {
    ctx.extension::<DeviceRegistry>().unwrap_or_default()
}

/// External resolver for paths that need a replay or a renderer: meshes,
/// thumbnails, metrics, pipelines, framegraphs, system profiles, type
/// descriptors and typed memory views.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Resolves `path`.
    async fn resolve(&self, ctx: &Context, path: &Path) -> Result<wire::Value>;
}

/// Context extension holding the [`Collaborator`].
#[derive(Clone)]
pub struct Collaborators(pub Arc<dyn Collaborator>);

/// Delegates `path` to the collaborator.
///
/// # Errors
/// [`Error::Unsupported`] when no collaborator is installed.
pub async fn delegate(ctx: &Context, path: &Path) -> Result<wire::Value> {
    match ctx.extension::<Collaborators>() {
        Some(c) => c.0.resolve(ctx, path).await,
        None => Err(Error::Unsupported {
            kind: path.kind().to_string(),
        }),
    }
}
