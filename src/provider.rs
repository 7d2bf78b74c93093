//! Concrete transports: `reqwest` for the request/response API and
//! `tokio-tungstenite` for the push channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use http::{Request, Response};
use realtime::{Connector, FrameReader, FrameWriter, HttpRequest};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build().context("building HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpRequest for HttpClient {
    async fn fetch(&self, request: Request<Vec<u8>>) -> Result<Response<Bytes>> {
        let request = reqwest::Request::try_from(request).context("converting request")?;
        let response = self.client.execute(request).await.context("sending request")?;

        let mut builder = Response::builder().status(response.status());
        for (name, value) in response.headers() {
            builder = builder.header(name, value);
        }
        let body = response.bytes().await.context("reading response body")?;
        builder.body(body).context("building response")
    }
}

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub const fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Reader = WsReader;
    type Writer = WsWriter;

    async fn connect(&self) -> Result<(WsWriter, WsReader)> {
        let (socket, response) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("connecting to {}", self.url))?;
        debug!(status = %response.status(), url = %self.url, "websocket handshake complete");

        let (sink, stream) = socket.split();
        Ok((WsWriter { sink }, WsReader { stream }))
    }
}

pub struct WsReader {
    stream: SplitStream<Socket>,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) | Err(WsError::ConnectionClosed) => return None,
                // ping/pong are answered by tungstenite; binary frames are not part of the protocol
                Ok(_) => {}
                Err(err) => {
                    return Some(Err(anyhow::Error::new(err).context("reading websocket frame")));
                }
            }
        }
    }
}

pub struct WsWriter {
    sink: SplitSink<Socket, Message>,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send_frame(&mut self, frame: String) -> Result<()> {
        self.sink.send(Message::Text(frame)).await.context("sending websocket frame")
    }

    async fn close(&mut self) -> Result<()> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(anyhow::Error::new(err).context("closing websocket")),
        }
    }
}
