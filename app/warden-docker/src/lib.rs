//! # warden-docker
//!
//! Engine-compatible HTTP surface for the Warden gateway.
//!
//! Existing engine clients talk to this server as if it were the engine.
//! Only a restricted subset of the API is served; every request passes
//! through [`warden_core::Policy`] before anything reaches the real engine.
//!
//! ## Compatibility
//!
//! Routes are served unversioned and under `/v1.24` through `/v1.45`:
//!
//! - System: ping, version, info (reduced), events (owned resources only)
//! - Containers: list, inspect, create, start, stop, kill, resize, attach,
//!   delete
//! - Exec: create, start, resize, inspect
//! - Images: list, inspect, pull, tag, push, build
//! - Volumes: list, create, delete
//!
//! Anything else answers 404.
//!
//! ## Architecture
//!
//! ```text
//! client ──► warden-docker ──► warden-core::Policy ──► HttpEngine ──► engine
//!                 │                                        │
//!                 └──────── hijack (attach / exec) ◄───────┘
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod hijack;
pub mod params;
pub mod server;
pub mod trace;

pub use api::{AppState, create_router};
pub use engine::HttpEngine;
pub use error::{DockerError, Result};
pub use server::DockerApiServer;
