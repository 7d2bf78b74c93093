//! # Provider
//!
//! Provider defines external data interfaces for the crate: a single-shot
//! request/response transport used for bootstrap and polling, and a
//! persistent, frame-oriented push transport used by the live channel.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

/// The `HttpRequest` trait defines the behavior for fetching data from a source.
///
/// Implementations perform exactly one attempt per call. Retries and
/// timeouts are the caller's concern.
pub trait HttpRequest: Send + Sync {
    /// Make outbound HTTP request.
    fn fetch(
        &self, request: Request<Vec<u8>>,
    ) -> impl Future<Output = Result<Response<Bytes>>> + Send;
}

/// Opens persistent push connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Reader: FrameReader;
    type Writer: FrameWriter;

    /// Perform the connection handshake, returning the two halves of the
    /// connection once it is usable.
    async fn connect(&self) -> Result<(Self::Writer, Self::Reader)>;
}

/// Inbound half of a push connection.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Wait for the next text frame. `None` signals an orderly remote close.
    async fn next_frame(&mut self) -> Option<Result<String>>;
}

/// Outbound half of a push connection.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    /// Send a single text frame.
    async fn send_frame(&mut self, frame: String) -> Result<()>;

    /// Close the connection. Must tolerate an already-closed peer.
    async fn close(&mut self) -> Result<()>;
}
