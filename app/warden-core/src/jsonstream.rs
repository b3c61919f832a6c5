//! Helpers for the engine's newline-delimited JSON streams.
//!
//! Pull, push and build report progress as one JSON object per line and
//! signal failure in-band (`{"error": "..."}`) after a 200 status. Events use
//! the same framing. Chunks from the engine do not align with lines, so the
//! helpers here reassemble lines before looking at them.

use crate::engine::ByteStream;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const RELAY_BUFFER: usize = 32;

/// Reassembles newline-terminated lines from arbitrary chunks.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Appends `chunk` and returns every line it completed, without the
    /// terminating newline.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    /// Returns the unterminated tail, if any.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.pending.iter().all(u8::is_ascii_whitespace) {
            self.pending.clear();
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }
}

/// What a progress stream said about the operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    /// First error reported, in-band or by the transport.
    pub error: Option<String>,
    /// Image ID announced by a build (`aux.ID` or "Successfully built").
    pub image_id: Option<String>,
}

impl ProgressReport {
    /// True when the stream completed without any error.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Records a failure unless one is already recorded.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(reason.into());
        }
    }

    /// Inspects one line of the stream. Non-JSON lines are ignored.
    pub fn observe(&mut self, line: &[u8]) {
        let Ok(message) = serde_json::from_slice::<Value>(line.trim_ascii()) else {
            return;
        };

        if let Some(error) = message.get("error").filter(|e| !e.is_null()) {
            let reason = message
                .pointer("/errorDetail/message")
                .and_then(Value::as_str)
                .or_else(|| error.as_str())
                .map_or_else(|| error.to_string(), str::to_owned);
            self.fail(reason);
            return;
        }

        if let Some(id) = message.pointer("/aux/ID").and_then(Value::as_str) {
            self.image_id = Some(id.to_string());
        } else if self.image_id.is_none() {
            if let Some(id) = message
                .get("stream")
                .and_then(Value::as_str)
                .and_then(|s| s.trim().strip_prefix("Successfully built "))
            {
                self.image_id = Some(id.trim().to_string());
            }
        }
    }
}

/// Forwards `upstream` unchanged while watching it for progress messages.
///
/// `on_finish` runs once the engine stream ends and before the returned
/// stream ends, so anything it records is in place by the time the caller
/// sees the end of the body. If the caller goes away first the report is
/// marked as failed.
pub fn relay_progress<F, Fut>(mut upstream: ByteStream, on_finish: F) -> ByteStream
where
    F: FnOnce(ProgressReport) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);

    tokio::spawn(async move {
        let mut lines = LineSplitter::default();
        let mut report = ProgressReport::default();

        loop {
            let item = tokio::select! {
                () = tx.closed() => {
                    report.fail("client disconnected");
                    break;
                }
                item = upstream.next() => item,
            };
            let Some(item) = item else { break };
            match item {
                Ok(chunk) => {
                    for line in lines.push(&chunk) {
                        report.observe(&line);
                    }
                    if tx.send(Ok(chunk)).await.is_err() {
                        report.fail("client disconnected");
                        break;
                    }
                }
                Err(err) => {
                    report.fail(err.to_string());
                    let _ = tx.send(Err(err)).await;
                    break;
                }
            }
        }
        if let Some(rest) = lines.finish() {
            report.observe(&rest);
        }

        on_finish(report).await;
        drop(tx);
    });

    ReceiverStream::new(rx).boxed()
}

/// Consumes a progress stream entirely and returns its report.
pub async fn collect_progress(mut upstream: ByteStream) -> ProgressReport {
    let mut lines = LineSplitter::default();
    let mut report = ProgressReport::default();
    while let Some(item) = upstream.next().await {
        match item {
            Ok(chunk) => {
                for line in lines.push(&chunk) {
                    report.observe(&line);
                }
            }
            Err(err) => {
                report.fail(err.to_string());
                break;
            }
        }
    }
    if let Some(rest) = lines.finish() {
        report.observe(&rest);
    }
    report
}

/// Forwards only the JSON lines for which `keep` returns true.
///
/// Each forwarded line is re-terminated with a newline. Lines that are not
/// JSON are dropped. Stops, dropping `upstream`, as soon as the caller
/// disconnects.
pub fn filter_lines<F>(mut upstream: ByteStream, keep: F) -> ByteStream
where
    F: Fn(&Value) -> bool + Send + 'static,
{
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);

    tokio::spawn(async move {
        let mut lines = LineSplitter::default();
        loop {
            // Owned events may never come, so watch the caller as well.
            let item = tokio::select! {
                () = tx.closed() => {
                    tracing::debug!("caller left, closing engine stream");
                    return;
                }
                item = upstream.next() => item,
            };
            let Some(item) = item else { break };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    tracing::debug!("engine stream ended with error: {err}");
                    break;
                }
            };
            for mut line in lines.push(&chunk) {
                let keep_line = serde_json::from_slice::<Value>(&line).is_ok_and(|v| keep(&v));
                if !keep_line {
                    continue;
                }
                line.push(b'\n');
                if tx.send(Ok(Bytes::from(line))).await.is_err() {
                    return;
                }
            }
        }
    });

    ReceiverStream::new(rx).boxed()
}
