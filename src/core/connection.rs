/// Backend connections
///
/// A [`Connection`] is one open link to one endpoint that can send a batch of
/// commands and read the same number of replies (a pipeline). The pool only
/// sees the trait; [`TcpConnector`] produces the real RESP-over-TCP links.
use crate::core::command::Command;
use crate::core::reply;
use crate::core::resp::{FrameScanner, RespEncoder, RespParser, RespValue};
use crate::core::Endpoint;
use crate::error::{TejidoError, TejidoResult};
use async_trait::async_trait;
use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// An exclusive link to a single backend.
#[async_trait]
pub trait Connection: Send {
    /// The endpoint this connection talks to
    fn endpoint(&self) -> &Endpoint;

    /// True once an I/O, timeout or framing failure left the link unusable
    fn is_broken(&self) -> bool;

    /// Send every command, then read one reply per command.
    ///
    /// Error replies are returned as [`RespValue::Error`] in place so callers
    /// can decide per command.
    async fn pipeline(&mut self, commands: &[Command]) -> TejidoResult<Vec<RespValue>>;

    /// Send one command; an error reply becomes an operation error.
    async fn execute(&mut self, command: &Command) -> TejidoResult<RespValue> {
        let mut replies = self.pipeline(std::slice::from_ref(command)).await?;
        match replies.pop() {
            Some(value) => reply::check(value),
            None => Err(TejidoError::protocol(self.endpoint(), "missing reply")),
        }
    }

    /// `PING`, true when the backend answered `PONG`
    async fn ping(&mut self) -> TejidoResult<bool> {
        let value = self.execute(&Command::ping()).await?;
        Ok(reply::status(value)? == "PONG")
    }
}

/// Opens connections to endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> TejidoResult<Box<dyn Connection>>;
}

/// Settings shared by every TCP connection a client opens
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Connect and per-call socket timeout; zero disables it
    timeout: Duration,
    password: Option<String>,
    database: u32,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            password: None,
            database: 0,
        }
    }

    pub fn with_password<S: Into<String>>(mut self, password: Option<S>) -> Self {
        self.password = password.map(Into::into);
        self
    }

    pub fn with_database(mut self, database: u32) -> Self {
        self.database = database;
        self
    }

    fn configure_stream(stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)?;
        socket2::SockRef::from(stream).set_keepalive(true)?;
        Ok(())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> TejidoResult<Box<dyn Connection>> {
        debug!("Connecting to backend {}", endpoint);

        let stream = bounded(
            endpoint,
            self.timeout,
            "connect",
            TcpStream::connect((endpoint.host(), endpoint.port())),
        )
        .await?;

        if let Err(e) = Self::configure_stream(&stream) {
            warn!("Failed to configure backend stream {}: {}", endpoint, e);
        }

        let mut connection = RedisConnection::new(endpoint.clone(), stream, self.timeout);

        if let Some(password) = &self.password {
            let value = connection.execute(&Command::auth(password)).await?;
            reply::status(value)?;
        }
        if self.database != 0 {
            let value = connection.execute(&Command::select(self.database)).await?;
            reply::status(value)?;
        }

        debug!("Connected to backend {}", endpoint);
        Ok(Box::new(connection))
    }
}

/// RESP2 connection over a TCP stream
pub struct RedisConnection {
    endpoint: Endpoint,
    stream: TcpStream,
    read_buf: BytesMut,
    scanner: FrameScanner,
    timeout: Duration,
    broken: bool,
}

impl RedisConnection {
    pub fn new(endpoint: Endpoint, stream: TcpStream, timeout: Duration) -> Self {
        Self {
            endpoint,
            stream,
            read_buf: BytesMut::with_capacity(8192),
            scanner: FrameScanner::new(),
            timeout,
            broken: false,
        }
    }

    async fn round_trip(&mut self, commands: &[Command]) -> TejidoResult<Vec<RespValue>> {
        let mut out = BytesMut::new();
        for command in commands {
            RespEncoder::encode_request(&mut out, command.args());
        }
        bounded(
            &self.endpoint,
            self.timeout,
            "write",
            self.stream.write_all(&out),
        )
        .await?;

        let mut replies = Vec::with_capacity(commands.len());
        while replies.len() < commands.len() {
            let complete = self
                .scanner
                .scan(&self.read_buf)
                .map_err(|e| TejidoError::protocol(&self.endpoint, e.to_string()))?;
            if complete.is_some() {
                match RespParser::parse(&mut self.read_buf) {
                    Ok(Some(value)) => {
                        replies.push(value);
                        continue;
                    }
                    Ok(None) => {
                        return Err(TejidoError::protocol(&self.endpoint, "truncated reply"))
                    }
                    Err(e) => return Err(TejidoError::protocol(&self.endpoint, e.to_string())),
                }
            }

            let read = bounded(
                &self.endpoint,
                self.timeout,
                "read",
                self.stream.read_buf(&mut self.read_buf),
            )
            .await?;
            if read == 0 {
                return Err(TejidoError::connection(
                    &self.endpoint,
                    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by backend"),
                ));
            }
        }
        Ok(replies)
    }
}

#[async_trait]
impl Connection for RedisConnection {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    async fn pipeline(&mut self, commands: &[Command]) -> TejidoResult<Vec<RespValue>> {
        if self.broken {
            return Err(TejidoError::connection(
                &self.endpoint,
                io::Error::new(io::ErrorKind::NotConnected, "connection is broken"),
            ));
        }
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        // stays set if the call is dropped with replies still in flight
        self.broken = true;
        let result = self.round_trip(commands).await;
        self.broken = matches!(&result, Err(e) if e.is_connection_error());
        result
    }
}

/// Run an I/O future under the socket timeout, mapping failures onto the endpoint.
async fn bounded<F, T>(
    endpoint: &Endpoint,
    limit: Duration,
    operation: &str,
    fut: F,
) -> TejidoResult<T>
where
    F: Future<Output = io::Result<T>>,
{
    let result = if limit.is_zero() {
        fut.await
    } else {
        match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => return Err(TejidoError::timeout(endpoint, operation)),
        }
    };
    result.map_err(|e| TejidoError::connection(endpoint, e))
}
