//! Startup compatibility check and coordinated shutdown.

use crate::engine::DynEngine;
use crate::error::{CoreError, Result};
use crate::registry::{Registry, ResourceKind};
use futures::future::join_all;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use warden_error::CommonError;

/// Extra time granted to the engine beyond the stop timeout, so it can kill
/// a container that ignored its stop signal before we give up waiting.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Engine API version (`major.minor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl FromStr for ApiVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CoreError::config(format!("invalid API version: {s}"));
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Result of stopping owned containers at shutdown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Stopped cleanly.
    pub stopped: Vec<String>,
    /// Stop call failed.
    pub failed: Vec<String>,
    /// Gave up waiting.
    pub timed_out: Vec<String>,
}

enum StopOutcome {
    Stopped,
    Failed,
    TimedOut,
}

/// Startup and shutdown coordination.
pub struct Lifecycle {
    engine: DynEngine,
    registry: Arc<Registry>,
    stop_timeout: Duration,
}

impl Lifecycle {
    #[must_use]
    pub const fn new(engine: DynEngine, registry: Arc<Registry>, stop_timeout: Duration) -> Self {
        Self {
            engine,
            registry,
            stop_timeout,
        }
    }

    /// Compares the engine's API version with `required`.
    ///
    /// An older or unreachable engine is fatal when `strict` is set and a
    /// warning otherwise. Returns the engine version when it could be read.
    ///
    /// # Errors
    ///
    /// Returns an error if `required` is malformed, or in strict mode if the
    /// engine is unreachable or too old.
    pub async fn check_compatibility(
        &self,
        required: &str,
        strict: bool,
    ) -> Result<Option<ApiVersion>> {
        let required: ApiVersion = required.parse()?;

        let reported = match self.engine.version().await {
            Ok(version) => version["ApiVersion"]
                .as_str()
                .map(str::parse::<ApiVersion>)
                .transpose(),
            Err(err) => Err(err.into()),
        };
        let engine_version = match reported {
            Ok(Some(version)) => version,
            Ok(None) => {
                return self.mismatch(strict, "engine did not report an API version".to_string(), None);
            }
            Err(err) => {
                return self.mismatch(strict, format!("engine version check failed: {err}"), None);
            }
        };

        if engine_version < required {
            return self.mismatch(
                strict,
                format!("engine API {engine_version} is older than required {required}"),
                Some(engine_version),
            );
        }
        tracing::info!(engine_api = %engine_version, required = %required, "engine is compatible");
        Ok(Some(engine_version))
    }

    fn mismatch(
        &self,
        strict: bool,
        reason: String,
        version: Option<ApiVersion>,
    ) -> Result<Option<ApiVersion>> {
        if strict {
            return Err(CommonError::incompatible(reason).into());
        }
        tracing::warn!("{reason}; continuing");
        Ok(version)
    }

    /// Stops every owned container concurrently and waits for each stop to
    /// finish or time out. Containers the gateway does not own are never
    /// touched.
    pub async fn shutdown(&self) -> ShutdownReport {
        let ids = self.registry.ids(ResourceKind::Container);
        if ids.is_empty() {
            return ShutdownReport::default();
        }
        tracing::info!(count = ids.len(), "stopping owned containers");

        let timeout_secs = self.stop_timeout.as_secs();
        let bound = self.stop_timeout + STOP_GRACE;
        let stops = ids.iter().map(|id| async move {
            let outcome = match tokio::time::timeout(
                bound,
                self.engine.container_stop(id, Some(timeout_secs)),
            )
            .await
            {
                Ok(Ok(())) => StopOutcome::Stopped,
                Ok(Err(err)) => {
                    tracing::warn!(id = %id, "failed to stop container: {err}");
                    StopOutcome::Failed
                }
                Err(_) => {
                    tracing::warn!(id = %id, "timed out stopping container after {bound:?}");
                    StopOutcome::TimedOut
                }
            };
            (id.clone(), outcome)
        });

        let mut report = ShutdownReport::default();
        for (id, outcome) in join_all(stops).await {
            match outcome {
                StopOutcome::Stopped => report.stopped.push(id),
                StopOutcome::Failed => report.failed.push(id),
                StopOutcome::TimedOut => report.timed_out.push(id),
            }
        }
        tracing::info!(
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            "shutdown stops finished"
        );
        report
    }
}
