//! Stream hijack proxy for attach and exec start.
//!
//! A session owns four half-connections: the caller's reader and writer and
//! the engine's reader and writer. Two tasks copy bytes, one per direction:
//!
//! - engine -> caller: when it ends the caller's write side is shut down and
//!   the session is over.
//! - caller -> engine: on EOF the engine's write side is shut down (stdin
//!   closed) and output keeps flowing until the engine is done. On an error
//!   the session is over.
//!
//! I/O errors end their loop only. They are logged at debug level and
//! never reported to the caller, who at this point no longer speaks HTTP.
//!
//! [`hijack_response`] adapts a session to HTTP: with `Upgrade` it answers
//! `101` and relays over the upgraded connection, otherwise it answers
//! `200` and relays between the request and response bodies.

use crate::error::{DockerError, Result};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header};
use futures::TryStreamExt;
use hyper_util::rt::TokioIo;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::{ReaderStream, StreamReader};
use warden_core::Hijacked;

/// Default content type for relayed streams.
pub const RAW_STREAM_CONTENT_TYPE: &str = "application/vnd.docker.raw-stream";

const BODY_PIPE_CAPACITY: usize = 64 * 1024;

/// Bytes moved by a finished session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Engine -> caller.
    pub to_caller: u64,
    /// Caller -> engine.
    pub to_engine: u64,
}

/// Relays between two duplex connections until the session ends.
pub async fn relay<C, E>(caller: C, engine: E) -> SessionStats
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    E: AsyncRead + AsyncWrite + Send + 'static,
{
    let (caller_reader, caller_writer) = tokio::io::split(caller);
    let (engine_reader, engine_writer) = tokio::io::split(engine);
    relay_halves(caller_reader, caller_writer, engine_reader, engine_writer).await
}

/// Relays between separately owned halves. See the module docs for when
/// each direction stops.
pub async fn relay_halves<CR, CW, ER, EW>(
    mut caller_reader: CR,
    mut caller_writer: CW,
    mut engine_reader: ER,
    mut engine_writer: EW,
) -> SessionStats
where
    CR: AsyncRead + Unpin + Send + 'static,
    CW: AsyncWrite + Unpin + Send + 'static,
    ER: AsyncRead + Unpin + Send + 'static,
    EW: AsyncWrite + Unpin + Send + 'static,
{
    let mut outbound = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut engine_reader, &mut caller_writer).await;
        let _ = caller_writer.shutdown().await;
        copied
    });
    let mut inbound = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut caller_reader, &mut engine_writer).await;
        let _ = engine_writer.shutdown().await;
        copied
    });

    let mut stats = SessionStats::default();
    tokio::select! {
        out = &mut outbound => {
            inbound.abort();
            stats.to_caller = bytes_copied(out, "engine -> caller");
        }
        inb = &mut inbound => {
            let caller_closed = matches!(inb, Ok(Ok(_)));
            stats.to_engine = bytes_copied(inb, "caller -> engine");
            if caller_closed {
                stats.to_caller = bytes_copied(outbound.await, "engine -> caller");
            } else {
                outbound.abort();
            }
        }
    }
    tracing::debug!(
        to_caller = stats.to_caller,
        to_engine = stats.to_engine,
        "hijacked session ended"
    );
    stats
}

fn bytes_copied(
    result: std::result::Result<io::Result<u64>, tokio::task::JoinError>,
    direction: &str,
) -> u64 {
    match result {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            let msg = e.to_string().to_lowercase();
            if !msg.contains("broken pipe") && !msg.contains("connection reset") {
                tracing::debug!("{direction} copy failed: {e}");
            }
            0
        }
        Err(e) => {
            tracing::debug!("{direction} copy task ended: {e}");
            0
        }
    }
}

/// Returns true when the caller asked for a protocol upgrade.
#[must_use]
pub fn wants_upgrade(headers: &HeaderMap) -> bool {
    headers.get(header::UPGRADE).is_some()
        || headers
            .get(header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"))
}

/// Takes over the caller's connection and relays it to `session`.
///
/// The engine session is already open, so anything that could still fail
/// has been reported as an HTTP error before this point.
///
/// # Errors
///
/// Returns an error only if the response cannot be built.
pub fn hijack_response(mut request: Request<Body>, session: Hijacked) -> Result<Response<Body>> {
    let content_type = session
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static(RAW_STREAM_CONTENT_TYPE));

    if wants_upgrade(request.headers()) {
        let on_upgrade = hyper::upgrade::on(&mut request);
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    relay(TokioIo::new(upgraded), session.stream).await;
                }
                Err(e) => tracing::debug!("caller upgrade failed: {e}"),
            }
        });

        return Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "tcp")
            .body(Body::empty())
            .map_err(|e| DockerError::Server(format!("failed to build upgrade response: {e}")));
    }

    let caller_reader = StreamReader::new(
        TryStreamExt::map_err(request.into_body().into_data_stream(), io::Error::other),
    );
    let (pipe_writer, pipe_reader) = tokio::io::duplex(BODY_PIPE_CAPACITY);
    let (engine_reader, engine_writer) = tokio::io::split(session.stream);
    tokio::spawn(relay_halves(
        caller_reader,
        pipe_writer,
        engine_reader,
        engine_writer,
    ));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from_stream(ReaderStream::new(pipe_reader)))
        .map_err(|e| DockerError::Server(format!("failed to build stream response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn bytes_flow_both_ways_until_engine_closes() {
        let (caller, mut caller_peer) = tokio::io::duplex(1024);
        let (engine, mut engine_peer) = tokio::io::duplex(1024);
        let session = tokio::spawn(relay(caller, engine));

        caller_peer.write_all(b"ls\n").await.unwrap();
        let mut buf = [0u8; 3];
        engine_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ls\n");

        engine_peer.write_all(b"bin etc\n").await.unwrap();
        drop(engine_peer);

        let mut output = Vec::new();
        caller_peer.read_to_end(&mut output).await.unwrap();
        assert_eq!(output, b"bin etc\n");

        let stats = session.await.unwrap();
        assert_eq!(stats.to_caller, 8);
    }

    #[tokio::test]
    async fn caller_eof_half_closes_engine_and_drains_output() {
        let (caller, mut caller_peer) = tokio::io::duplex(1024);
        let (engine, mut engine_peer) = tokio::io::duplex(1024);
        let session = tokio::spawn(relay(caller, engine));

        caller_peer.write_all(b"hello").await.unwrap();
        caller_peer.shutdown().await.unwrap();

        // Engine sees stdin end, then answers.
        let mut input = Vec::new();
        engine_peer.read_to_end(&mut input).await.unwrap();
        assert_eq!(input, b"hello");
        engine_peer.write_all(b"HELLO").await.unwrap();
        drop(engine_peer);

        let mut output = Vec::new();
        caller_peer.read_to_end(&mut output).await.unwrap();
        assert_eq!(output, b"HELLO");

        let stats = session.await.unwrap();
        assert_eq!(stats, SessionStats { to_caller: 5, to_engine: 5 });
    }

    #[test]
    fn upgrade_detection() {
        let mut headers = HeaderMap::new();
        assert!(!wants_upgrade(&headers));
        headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        assert!(wants_upgrade(&headers));
    }
}
