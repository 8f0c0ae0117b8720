use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;

use crate::signature::SignatureError;

/// Result alias using an [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Error {
        Self { kind }
    }

    /// Test if the error was caused by the remote side replying with an
    /// `ERROR` message, and if so return the error name and description.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use minibus::{Connection, Message};
    ///
    /// # #[tokio::main(flavor = "current_thread")] async fn main() -> minibus::Result<()> {
    /// let c = Connection::session_bus().await?;
    ///
    /// let m = Message::method_call("/does/not/exist", "Nothing")
    ///     .with_destination("org.freedesktop.DBus");
    ///
    /// if let Err(error) = c.call(m).await {
    ///     if let Some((name, message)) = error.bus_error() {
    ///         println!("{name}: {message}");
    ///     }
    /// }
    /// # Ok(()) }
    /// ```
    pub fn bus_error(&self) -> Option<(&str, &str)> {
        match &self.kind {
            ErrorKind::BusError(name, message) => Some((name, message)),
            _ => None,
        }
    }

    /// Test if the error indicates that the connection has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::ConnectionClosed)
    }

    #[cfg(test)]
    pub(crate) fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl From<SignatureError> for Error {
    #[inline]
    fn from(error: SignatureError) -> Self {
        Self::new(ErrorKind::Signature(error))
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        Self::new(ErrorKind::Io(error))
    }
}

impl From<Utf8Error> for Error {
    #[inline]
    fn from(error: Utf8Error) -> Self {
        Self::new(ErrorKind::Utf8Error(error))
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            ErrorKind::Io(error) => error.fmt(f),
            ErrorKind::Signature(error) => error.fmt(f),
            ErrorKind::Utf8Error(error) => error.fmt(f),
            ErrorKind::MissingBus => write!(f, "Missing session bus"),
            ErrorKind::InvalidAddress => write!(f, "Invalid d-bus address"),
            ErrorKind::InvalidSasl => write!(f, "Invalid SASL message"),
            ErrorKind::AuthenticationFailed => write!(f, "Authentication failed"),
            ErrorKind::InvalidProtocol => write!(f, "Invalid protocol"),
            ErrorKind::TruncatedMessage => write!(f, "Truncated message"),
            ErrorKind::BadAlignment => write!(f, "Alignment origin beyond cursor"),
            ErrorKind::BufferExhausted => write!(f, "Buffer exhausted and growth refused"),
            ErrorKind::InvalidBoolean(value) => {
                write!(f, "Invalid boolean value {value} (must be 0 or 1)")
            }
            ErrorKind::InvalidHeaderField(code) => {
                write!(f, "Invalid header field code {code}")
            }
            ErrorKind::UnknownType(what) => {
                write!(f, "Cannot derive a D-Bus type: {what}")
            }
            ErrorKind::UnsupportedVariant(signature) => {
                write!(f, "Unsupported variant {signature:?}")
            }
            ErrorKind::NotNullTerminated => {
                write!(f, "String is not null terminated")
            }
            ErrorKind::ZeroSerial => write!(f, "Zero in header serial"),
            ErrorKind::ArrayTooLong(length) => {
                write!(f, "Array of length {length} is too long (max is 67108864)")
            }
            ErrorKind::BodyTooLong(length) => {
                write!(f, "Body of length {length} is too long (max is 134217728)")
            }
            ErrorKind::ConnectionClosed => write!(f, "Connection closed"),
            ErrorKind::MissingMessage => write!(f, "No message"),
            ErrorKind::BusError(error_name, message) => {
                write!(f, "Bus error: {error_name}: {message}")
            }
            ErrorKind::InvalidXml(what) => {
                write!(f, "Invalid introspection XML: {what}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(error) => Some(error),
            ErrorKind::Signature(error) => Some(error),
            ErrorKind::Utf8Error(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Io(io::Error),
    Signature(SignatureError),
    Utf8Error(Utf8Error),
    MissingBus,
    InvalidAddress,
    InvalidSasl,
    AuthenticationFailed,
    InvalidProtocol,
    TruncatedMessage,
    BadAlignment,
    BufferExhausted,
    InvalidBoolean(u32),
    InvalidHeaderField(u8),
    UnknownType(Box<str>),
    UnsupportedVariant(Box<str>),
    NotNullTerminated,
    ZeroSerial,
    ArrayTooLong(u32),
    BodyTooLong(u32),
    ConnectionClosed,
    MissingMessage,
    BusError(Box<str>, Box<str>),
    InvalidXml(Box<str>),
}
