//! Error vocabulary shared by the Warden crates.
//!
//! `CommonError` covers the failure shapes that are not specific to any one
//! layer: local I/O, configuration and engine incompatibility. Each crate
//! wraps it in its own error enum with `#[from]`:
//!
//! ```rust,ignore
//! use thiserror::Error;
//! use warden_error::CommonError;
//!
//! #[derive(Debug, Error)]
//! pub enum GatewayError {
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//!
//!     #[error("denied: {0}")]
//!     Denied(String),
//! }
//! ```

mod common;

pub use common::CommonError;
