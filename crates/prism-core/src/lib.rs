// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Prism analysis core.
//!
//! Everything the service can answer is addressed by a [`Path`]. Resolving a
//! path either walks a value (fields, indices, slices, map entries) or stores
//! a description of an analysis in the [`prism_db::Database`] and resolves
//! it, so identical requests share one computation:
//!
//! - command trees ([`tree`]): the capture grouped into frames, passes,
//!   draws, markers and submissions;
//! - framebuffer changes ([`framebuffer`]): attachment dimensions and formats
//!   over time;
//! - resources ([`resources`]): every resource the capture creates, accesses
//!   or destroys;
//! - reports ([`report`]): diagnostics raised while replaying state;
//! - events, statistics and state trees.
//!
//! Captures are values. [`change::set`] and [`change::delete`] produce edited
//! captures under new identifiers and leave the original untouched.
//!
//! [`Service`] bundles the database with the API backends, devices,
//! configuration and collaborator a request needs.
#![forbid(unsafe_code)]

pub mod access;
pub mod change;
pub mod config;
pub mod events;
pub mod filter;
pub mod find;
pub mod follow;
pub mod framebuffer;
pub mod path;
pub mod report;
pub mod resolve;
pub mod resources;
pub mod service;
pub mod services;
pub mod state_tree;
pub mod stats;
pub mod tree;
pub mod wire;

pub use config::{ConfigError, ConfigService, ConfigStore, ServiceConfig, SERVICE_CONFIG_KEY};
pub use filter::CommandFilter;
pub use find::{FindRequest, FindResult};
pub use path::{CapturePath, CommandPath, Path, PathKind};
pub use resolve::{get, resolve, resolve_val, Resolved};
pub use service::{ResolveConfig, Service};
pub use services::{Collaborator, DeviceInfo, DeviceRegistry};
pub use tree::{CommandTree, CommandTreeOptions, TreeNodeInfo};
