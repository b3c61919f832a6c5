//! # warden-core
//!
//! Ownership and policy core of the Warden gateway.
//!
//! Warden sits between an untrusted engine API client and a container
//! engine. Every resource created through it is recorded in the
//! [`Registry`]; every request is checked by [`Policy`] against that
//! registry and the sandbox rules before it reaches the [`Engine`].
//!
//! ## Modules
//!
//! - [`registry`]: owned identifiers per kind, with short-id resolution
//! - [`policy`]: authorization and request rewriting per operation
//! - [`engine`]: the backend trait the HTTP client implements
//! - [`lifecycle`]: engine version check and coordinated shutdown
//! - [`identity`]: the gateway's own cgroup and hostname
//! - [`config`]: figment-based configuration
//! - [`jsonstream`]: progress and event stream helpers
//! - [`trace`]: task-local request trace ID

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod jsonstream;
pub mod lifecycle;
pub mod policy;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod trace;
pub mod types;

pub use config::{Config, Endpoint};
pub use engine::{ByteStream, DynEngine, Engine, Hijacked, RawStream};
pub use error::{CoreError, EngineError, EngineResult, Result};
pub use identity::Identity;
pub use lifecycle::{ApiVersion, Lifecycle, ShutdownReport};
pub use policy::{ExecSession, Policy};
pub use registry::{Registry, RegistryError, ResourceKind};
