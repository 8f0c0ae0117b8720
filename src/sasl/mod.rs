//! Types related to SASL authentication which D-Bus performs.


use std::fmt;

use crate::error::{Error, ErrorKind, Result};

/// A GUID reported by the server in an `OK` response.
#[derive(Clone, PartialEq, Eq)]
pub struct Guid(Box<str>);

impl Guid {
    #[inline]
    pub(crate) fn new(guid: &str) -> Self {
        Self(guid.into())
    }

    /// The hex form of the GUID as sent by the server.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Guid {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Guid").field(&self.0).finish()
    }
}

impl fmt::Display for Guid {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A command the client sends during the handshake.
///
/// The whole sequence is pipelined; the server tolerates queued commands as
/// long as they appear in the expected order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaslCommand {
    /// The EXTERNAL mechanism with no initial response.
    AuthExternal,
    /// An empty data field, deferring to the peer credential on the socket.
    Data,
    /// Ask the server to pass unix file descriptors.
    NegotiateUnixFd,
    /// End the SASL conversation and switch to the binary protocol.
    Begin,
}

impl SaslCommand {
    pub(crate) fn line(self) -> &'static [u8] {
        match self {
            SaslCommand::AuthExternal => b"AUTH EXTERNAL\r\n",
            SaslCommand::Data => b"DATA\r\n",
            SaslCommand::NegotiateUnixFd => b"NEGOTIATE_UNIX_FD\r\n",
            SaslCommand::Begin => b"BEGIN\r\n",
        }
    }
}

/// A response line from the server.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SaslResponse<'a> {
    /// Authentication succeeded; carries the hex server GUID.
    Ok(&'a [u8]),
    /// Authentication was rejected; carries the mechanisms the server offers.
    Rejected(&'a [u8]),
    /// A data exchange from the server.
    Data(&'a [u8]),
    /// The server agrees to pass unix file descriptors.
    AgreeUnixFd,
    /// The server did not understand or refuses the preceding command.
    Error(&'a [u8]),
}

/// Parse a single CRLF-terminated response line.
pub(crate) fn parse_response(line: &[u8]) -> Result<SaslResponse<'_>> {
    let mut line = line;

    while let [rest @ .., last] = line {
        if !last.is_ascii_whitespace() {
            break;
        }

        line = rest;
    }

    let (command, rest) = match line.iter().position(|&b| b == b' ') {
        Some(at) => (&line[..at], &line[at + 1..]),
        None => (line, &[][..]),
    };

    match command {
        b"OK" => Ok(SaslResponse::Ok(rest)),
        b"REJECTED" => Ok(SaslResponse::Rejected(rest)),
        b"DATA" => Ok(SaslResponse::Data(rest)),
        b"AGREE_UNIX_FD" => Ok(SaslResponse::AgreeUnixFd),
        b"ERROR" => Ok(SaslResponse::Error(rest)),
        _ => Err(Error::new(ErrorKind::InvalidSasl)),
    }
}
