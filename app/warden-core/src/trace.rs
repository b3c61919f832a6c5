//! Task-local trace ID for cross-layer propagation.
//!
//! The HTTP middleware sets the trace ID via [`CURRENT_TRACE_ID`], and the
//! engine client reads it so every engine request carries the originating
//! caller request's trace ID.

tokio::task_local! {
    /// Task-local trace ID.  Set by the HTTP middleware, read by the engine client.
    pub static CURRENT_TRACE_ID: String;
}

/// Returns the current trace ID from task-local storage, or an empty string
/// if none is set (e.g. during startup or shutdown).
pub fn current_trace_id() -> String {
    CURRENT_TRACE_ID
        .try_with(|id| id.clone())
        .unwrap_or_default()
}
