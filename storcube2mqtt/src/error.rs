use thiserror::Error;

/// Login against the vendor auth endpoint failed. Never fatal; the session
/// manager retries the whole cycle after the reconnect delay.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login request failed: {0}")]
    Request(String),
    #[error("login rejected with HTTP status {0}")]
    Status(u16),
    #[error("vendor refused login (code {code}): {message}")]
    Vendor { code: i64, message: String },
    #[error("login response carries no token")]
    MissingToken,
    #[error("malformed login response: {0}")]
    Malformed(String),
}

/// A single inbound frame could not be decoded. The frame is dropped and
/// the read loop continues.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(String),
    #[error("frame carries no equipId")]
    MissingEquipId,
    #[error("report list is empty")]
    EmptyReport,
    #[error("unexpected frame shape: {0}")]
    UnexpectedShape(String),
    #[error("unrecognized command payload")]
    UnknownCommand,
}

/// Websocket handshake or socket failure. Recovered through the same
/// fixed-delay retry cycle as auth failures.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("connection closed by peer")]
    Closed,
    #[error("socket error: {0}")]
    Io(String),
}

/// A vendor control call (set power / set threshold) failed. The command is
/// dropped with a warning; telemetry ingestion is unaffected.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("command request failed: {0}")]
    Request(String),
    #[error("command rejected with HTTP status {0}")]
    Status(u16),
    #[error("vendor refused command (code {code}): {message}")]
    Vendor { code: i64, message: String },
}
