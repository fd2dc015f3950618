use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

use log::debug;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::error::ConnectError;

/// One open telemetry connection.
pub trait TelemetryLink {
    fn send(&mut self, payload: &[u8]) -> Result<(), ConnectError>;

    /// Waits up to `wait` for the next telemetry frame. `Ok(None)` means the
    /// wait elapsed without one; control frames stay inside the link.
    fn recv(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, ConnectError>;

    fn close(&mut self);
}

/// Opens telemetry connections. This is the seam that decouples the session
/// manager from the websocket implementation, the same way `MqttWrapper`
/// decouples the publisher from the MQTT client.
pub trait LinkConnector {
    type Link: TelemetryLink;

    fn connect(&mut self, url: &str) -> Result<Self::Link, ConnectError>;
}

pub struct WsLink {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl WsLink {
    fn set_read_timeout(&mut self, wait: Duration) {
        if let MaybeTlsStream::Plain(stream) = self.socket.get_mut() {
            // a zero duration would mean "block forever" to the OS
            let wait = wait.max(Duration::from_millis(1));
            let _ = stream.set_read_timeout(Some(wait));
        }
    }
}

impl TelemetryLink for WsLink {
    fn send(&mut self, payload: &[u8]) -> Result<(), ConnectError> {
        let text = String::from_utf8_lossy(payload).into_owned();
        self.socket
            .send(Message::Text(text))
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    ConnectError::Closed
                }
                other => ConnectError::Io(other.to_string()),
            })
    }

    fn recv(&mut self, wait: Duration) -> Result<Option<Vec<u8>>, ConnectError> {
        self.set_read_timeout(wait);
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text.into_bytes())),
            Ok(Message::Binary(bytes)) => Ok(Some(bytes)),
            Ok(Message::Close(_)) => Err(ConnectError::Closed),
            // ping/pong are answered by tungstenite itself on the next read
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(e))
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Err(ConnectError::Closed)
            }
            Err(e) => Err(ConnectError::Io(e.to_string())),
        }
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}

pub struct WsConnector;

impl LinkConnector for WsConnector {
    type Link = WsLink;

    fn connect(&mut self, url: &str) -> Result<WsLink, ConnectError> {
        // not logging the url itself: it carries the session token
        debug!("opening telemetry websocket");
        let (socket, _response) =
            tungstenite::connect(url).map_err(|e| ConnectError::Handshake(e.to_string()))?;
        Ok(WsLink { socket })
    }
}
