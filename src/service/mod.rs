//! Transports for the adapter.
//!
//! A [`Connection`] yields one platform event per frame and carries outbound
//! events back. Frames are processed sequentially: any notifications an
//! operation emits are sent before its reply. Two connections exist: NDJSON
//! lines over any reader/writer pair (stdio, a local TCP listener), and the
//! platform's WebSocket endpoint in [`websocket`].

use std::io::{BufRead, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

use crate::protocol::{Element, render_event};
use crate::runtime::error::TransportError;
use crate::runtime::{Adapter, EventSink};

pub mod websocket;

/// A bidirectional event connection.
pub trait Connection: EventSink {
    /// Next inbound frame, or `None` once the peer has closed the connection.
    fn next_frame(&mut self) -> Result<Option<String>, TransportError>;

    /// Events sent so far.
    fn sent(&self) -> usize;
}

/// Service entry point: drives an [`Adapter`] from a connection.
pub struct Service {
    adapter: Adapter,
}

impl Service {
    /// Create a new service wrapper around the provided adapter.
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Adapter being driven.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Mutable access to the adapter, e.g. to register callbacks.
    pub fn adapter_mut(&mut self) -> &mut Adapter {
        &mut self.adapter
    }

    /// Process an NDJSON connection by consuming events from the reader and
    /// writing outbound events to the writer.
    pub fn handle<R: BufRead, W: Write>(
        &mut self,
        reader: R,
        writer: W,
    ) -> Result<(), TransportError> {
        self.serve(LineConnection::new(reader, writer))
    }

    /// Process events until the connection closes.
    pub fn serve<C: Connection>(&mut self, connection: C) -> Result<(), TransportError> {
        let mut session = Session::new(&mut self.adapter, connection);
        session.run()
    }
}

/// Writes one rendered event per line.
pub struct LineSink<W: Write> {
    writer: W,
    sent: usize,
}

impl<W: Write> LineSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer, sent: 0 }
    }

    /// Events written so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for LineSink<W> {
    fn send(&mut self, event: &Element) -> Result<(), TransportError> {
        let line = render_event(event)?;
        debug!(line = %line, "sending event");
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.sent += 1;
        Ok(())
    }
}

/// NDJSON connection: one event per line in each direction.
pub struct LineConnection<R: BufRead, W: Write> {
    reader: R,
    sink: LineSink<W>,
}

impl<R: BufRead, W: Write> LineConnection<R, W> {
    /// Pair a reader with a writer.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            sink: LineSink::new(writer),
        }
    }
}

impl<R: BufRead, W: Write> EventSink for LineConnection<R, W> {
    fn send(&mut self, event: &Element) -> Result<(), TransportError> {
        self.sink.send(event)
    }
}

impl<R: BufRead, W: Write> Connection for LineConnection<R, W> {
    fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    fn sent(&self) -> usize {
        self.sink.sent()
    }
}

struct Session<'a, C: Connection> {
    adapter: &'a mut Adapter,
    connection: C,
    id: Uuid,
}

impl<'a, C: Connection> Session<'a, C> {
    fn new(adapter: &'a mut Adapter, connection: C) -> Self {
        Self {
            adapter,
            connection,
            id: Uuid::new_v4(),
        }
    }

    fn run(&mut self) -> Result<(), TransportError> {
        let span = info_span!("session", id = %self.id);
        let _guard = span.enter();
        info!("connection open");

        let mut received = 0usize;
        loop {
            let frame = match self.connection.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    error!(%err, "connection error");
                    return Err(err);
                }
            };
            if frame.trim().is_empty() {
                continue;
            }
            received += 1;

            if let Some(reply) = self.adapter.handle_message(frame.trim_end(), &mut self.connection) {
                if let Err(err) = self.connection.send(&reply) {
                    error!(%err, "connection error");
                    return Err(err);
                }
            }
        }

        info!(received, sent = self.connection.sent(), "connection closed");
        Ok(())
    }
}

/// Invalid container arguments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    /// A required positional argument is absent
    #[error("missing argument '{0}'")]
    Missing(&'static str),

    /// Port is not a number
    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// Platform WebSocket endpoint the adapter connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Platform host.
    pub host: String,
    /// Platform port.
    pub port: u16,
    /// Pending process id issued by the platform.
    pub process_id: String,
    /// Path prefix of the connect URL.
    pub url_stub: String,
    /// Use a secure scheme.
    pub secure: bool,
}

impl Endpoint {
    /// Connect URL for this endpoint.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!(
            "{scheme}://{}:{}/{}_ws/connect?pending={}&encoding=json",
            self.host, self.port, self.url_stub, self.process_id
        )
    }
}

/// Positional arguments a container launch passes to the adapter:
/// `host port process_id url_stub [secure [env_root]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerArgs {
    /// Where to connect.
    pub endpoint: Endpoint,
    /// Work area root, when given.
    pub env_root: Option<PathBuf>,
}

impl ContainerArgs {
    /// Parse positional arguments (program name excluded).
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, ArgumentError> {
        let arg = |index: usize, name: &'static str| {
            args.get(index)
                .map(|value| value.as_ref().to_string())
                .ok_or(ArgumentError::Missing(name))
        };

        let host = arg(0, "host")?;
        let port_text = arg(1, "port")?;
        let port = port_text
            .parse()
            .map_err(|_| ArgumentError::InvalidPort(port_text.clone()))?;
        let process_id = arg(2, "process_id")?;
        let url_stub = arg(3, "url_stub")?;
        let secure = args.get(4).is_some_and(|value| value.as_ref() == "true");
        let env_root = args.get(5).map(|value| PathBuf::from(value.as_ref()));

        Ok(Self {
            endpoint: Endpoint {
                host,
                port,
                process_id,
                url_stub,
                secure,
            },
            env_root,
        })
    }
}
