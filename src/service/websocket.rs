//! WebSocket connection to the platform.
//!
//! Each text message carries one event. Control frames are answered by the
//! socket itself; a close from the peer ends the session normally.

use std::io::{Read, Write};
use std::net::TcpStream;

use tracing::{debug, info};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::{Connection, Endpoint};
use crate::protocol::{Element, render_event};
use crate::runtime::EventSink;
use crate::runtime::error::TransportError;

/// Event connection over an established WebSocket.
pub struct SocketConnection<S: Read + Write> {
    socket: WebSocket<S>,
    sent: usize,
}

impl<S: Read + Write> SocketConnection<S> {
    /// Wrap a socket whose handshake has completed.
    pub fn new(socket: WebSocket<S>) -> Self {
        Self { socket, sent: 0 }
    }

    /// Underlying socket.
    pub fn socket(&self) -> &WebSocket<S> {
        &self.socket
    }
}

impl<S: Read + Write> EventSink for SocketConnection<S> {
    fn send(&mut self, event: &Element) -> Result<(), TransportError> {
        let text = render_event(event)?;
        debug!(frame = %text, "sending event");
        self.socket.send(Message::Text(text))?;
        self.sent += 1;
        Ok(())
    }
}

impl<S: Read + Write> Connection for SocketConnection<S> {
    fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.socket.read() {
                Ok(Message::Text(text)) => return Ok(Some(text)),
                Ok(Message::Binary(bytes)) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Message::Close(frame)) => debug!(?frame, "peer closing connection"),
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Ok(None);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn sent(&self) -> usize {
        self.sent
    }
}

/// Open the platform's connect URL for `endpoint`.
pub fn connect(
    endpoint: &Endpoint,
) -> Result<SocketConnection<MaybeTlsStream<TcpStream>>, TransportError> {
    let url = endpoint.url();
    info!(%url, "connecting to platform");
    let (socket, response) = tungstenite::connect(url.as_str())?;
    debug!(status = %response.status(), "handshake complete");
    Ok(SocketConnection::new(socket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};
    use tungstenite::protocol::Role;

    /// In-memory stream: reads from `input`, collects writes in `output`.
    #[derive(Default)]
    struct Pipe {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn client_bytes(messages: Vec<Message>) -> Vec<u8> {
        let mut client = WebSocket::from_raw_socket(Pipe::default(), Role::Client, None);
        for message in messages {
            client.send(message).unwrap();
        }
        client.get_ref().output.clone()
    }

    #[test]
    fn text_and_binary_messages_are_frames_until_close() {
        let bytes = client_bytes(vec![
            Message::Text("first".into()),
            Message::Ping(vec![1]),
            Message::Binary(b"second".to_vec()),
            Message::Close(None),
        ]);
        let pipe = Pipe {
            input: Cursor::new(bytes),
            output: Vec::new(),
        };
        let mut connection =
            SocketConnection::new(WebSocket::from_raw_socket(pipe, Role::Server, None));

        assert_eq!(connection.next_frame().unwrap().as_deref(), Some("first"));
        assert_eq!(connection.next_frame().unwrap().as_deref(), Some("second"));
        assert_eq!(connection.next_frame().unwrap(), None);
    }

    #[test]
    fn events_are_sent_as_text_messages() {
        let socket = WebSocket::from_raw_socket(Pipe::default(), Role::Server, None);
        let mut connection = SocketConnection::new(socket);
        connection
            .send(&Element::new("data_event").with_attr("ref", "E1"))
            .unwrap();
        assert_eq!(connection.sent(), 1);

        let written = connection.socket().get_ref().output.clone();
        let pipe = Pipe {
            input: Cursor::new(written),
            output: Vec::new(),
        };
        let mut reader = WebSocket::from_raw_socket(pipe, Role::Client, None);
        match reader.read().unwrap() {
            Message::Text(text) => {
                assert_eq!(text, r#"{"tag":"data_event","attr":{"ref":"E1"},"content":[]}"#)
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
