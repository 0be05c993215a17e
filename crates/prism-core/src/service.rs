// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The analysis service facade.

use std::ops::ControlFlow;
use std::sync::Arc;

use prism_capture::{ApiRegistry, Capture};
use prism_db::{Context, Database, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::change;
use crate::config::ServiceConfig;
use crate::find::{self, FindRequest, FindResult};
use crate::follow;
use crate::path::{CapturePath, DevicePath, Path};
use crate::resolve;
use crate::services::{Collaborator, Collaborators, DeviceInfo, DeviceRegistry};
use crate::wire;

/// Ambient settings of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveConfig {
    /// Device to replay on, for paths that depend on one.
    #[serde(default)]
    pub replay_device: Option<DevicePath>,
}

/// Owns the database and the services requests run against.
#[derive(Clone)]
pub struct Service {
    db: Database,
    apis: Arc<ApiRegistry>,
    devices: Arc<DeviceRegistry>,
    config: Arc<ServiceConfig>,
    collaborator: Option<Collaborators>,
}

impl Default for Service {
    fn default() -> Self {
        Self::new(ServiceConfig::default())
    }
}

impl Service {
    /// A service with an empty database and no API backends.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            db: Database::new(),
            apis: Arc::new(ApiRegistry::new()),
            devices: Arc::new(DeviceRegistry::new()),
            config: Arc::new(config),
            collaborator: None,
        }
    }

    /// Replaces the API backends.
    #[must_use]
    pub fn with_apis(mut self, apis: ApiRegistry) -> Self {
        self.apis = Arc::new(apis);
        self
    }

    /// Registers a replay device.
    #[must_use]
    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        Arc::make_mut(&mut self.devices).register(device);
        self
    }

    /// Installs the resolver for replay- and renderer-backed paths.
    #[must_use]
    pub fn with_collaborator(mut self, collaborator: impl Collaborator + 'static) -> Self {
        self.collaborator = Some(Collaborators(Arc::new(collaborator)));
        self
    }

    /// The database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// A request scope carrying the database and services.
    ///
    /// # Errors
    /// [`prism_db::Error::NotFound`] if `rc` names an unknown device.
    pub fn context(&self, rc: &ResolveConfig) -> Result<Context> {
        let device = match &rc.replay_device {
            Some(d) => Some(self.devices.get(&d.id)?.id),
            None => None,
        };
        let mut ctx = Context::new()
            .with_database(self.db.clone())
            .with_device(device)
            .with_extension(Arc::clone(&self.apis))
            .with_extension(Arc::clone(&self.devices))
            .with_extension(Arc::clone(&self.config));
        if let Some(c) = &self.collaborator {
            ctx = ctx.with_extension(Arc::new(c.clone()));
        }
        Ok(ctx)
    }

    /// Stores a decoded capture.
    ///
    /// # Errors
    /// [`prism_db::Error::EncodingFailed`] if the capture cannot be hashed.
    #[instrument(skip(self, capture), fields(name = %capture.name, commands = capture.commands.len()))]
    pub fn import_capture(&self, capture: Capture) -> Result<CapturePath> {
        let id = self.db.store(capture)?;
        debug!(%id, "imported capture");
        Ok(CapturePath::new(id))
    }

    /// Resolves `path` to its wire form.
    ///
    /// # Errors
    /// See [`resolve::resolve`].
    #[instrument(skip(self, rc), fields(path = %path))]
    pub async fn get(&self, path: &Path, rc: &ResolveConfig) -> Result<wire::Value> {
        resolve::get(&self.context(rc)?, path).await
    }

    /// Sets the value at `path`, returning its path in the edited capture.
    ///
    /// # Errors
    /// See [`change::set`].
    #[instrument(skip(self, value, rc), fields(path = %path))]
    pub async fn set(&self, path: &Path, value: wire::Value, rc: &ResolveConfig) -> Result<Path> {
        change::set(&self.context(rc)?, path, value).await
    }

    /// Deletes the command at `path`, returning the edited capture's path.
    ///
    /// # Errors
    /// See [`change::delete`].
    #[instrument(skip(self, rc), fields(path = %path))]
    pub async fn delete(&self, path: &Path, rc: &ResolveConfig) -> Result<Path> {
        change::delete(&self.context(rc)?, path).await
    }

    /// The destination of the link at `path`.
    ///
    /// # Errors
    /// See [`follow::follow`].
    #[instrument(skip(self, rc), fields(path = %path))]
    pub async fn follow(&self, path: &Path, rc: &ResolveConfig) -> Result<Path> {
        follow::follow(&self.context(rc)?, path).await
    }

    /// Streams matches of `req` to `handler`; returns the number reported.
    ///
    /// # Errors
    /// See [`find::find`].
    #[instrument(skip(self, req, rc, handler), fields(from = %req.from, text = %req.text))]
    pub async fn find<F>(&self, req: &FindRequest, rc: &ResolveConfig, handler: F) -> Result<u64>
    where
        F: FnMut(FindResult) -> ControlFlow<()> + Send,
    {
        find::find(&self.context(rc)?, req, handler).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use prism_capture::{ApiId, Command};
    use prism_db::{async_trait, ErrorKind, Id};

    use super::*;
    use crate::services::Collaborator;

    struct Thumbnails;

    #[async_trait]
    impl Collaborator for Thumbnails {
        async fn resolve(&self, _ctx: &Context, path: &Path) -> Result<wire::Value> {
            Ok(wire::Value::Json(serde_json::json!({ "for": path.to_string() })))
        }
    }

    fn capture() -> Capture {
        Capture::new("svc").with_commands([Command::new(ApiId::GLES, 0, "glFlush")])
    }

    #[tokio::test]
    async fn imported_captures_resolve() {
        let svc = Service::default();
        let c = svc.import_capture(capture()).unwrap();
        let rc = ResolveConfig::default();
        let wire::Value::Capture(info) = svc.get(&c.into(), &rc).await.unwrap() else {
            unreachable!("expected a capture")
        };
        assert_eq!((info.name.as_str(), info.commands), ("svc", 1));
    }

    #[tokio::test]
    async fn unknown_devices_are_rejected() {
        let device = DeviceInfo {
            id: Id::of_str("pixel"),
            name: "Pixel".into(),
            abi: "arm64-v8a".into(),
            vendor: String::new(),
        };
        let svc = Service::default().with_device(device.clone());
        let c = svc.import_capture(capture()).unwrap();
        let known = ResolveConfig {
            replay_device: Some(DevicePath { id: device.id }),
        };
        assert!(svc.get(&c.into(), &known).await.is_ok());
        let unknown = ResolveConfig {
            replay_device: Some(DevicePath {
                id: Id::of_str("other"),
            }),
        };
        let err = svc.get(&c.into(), &unknown).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn collaborator_kinds_are_delegated() {
        let plain = Service::default();
        let c = plain.import_capture(capture()).unwrap();
        let path = Path::Perfetto(crate::path::OfCapturePath { capture: c });
        let rc = ResolveConfig::default();
        let err = plain.get(&path, &rc).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        let svc = Service::default().with_collaborator(Thumbnails);
        let c = svc.import_capture(capture()).unwrap();
        let path = Path::Perfetto(crate::path::OfCapturePath { capture: c });
        let wire::Value::Json(json) = svc.get(&path, &rc).await.unwrap() else {
            unreachable!("expected a collaborator payload")
        };
        assert_eq!(json["for"], path.to_string());
    }
}
