use std::env;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::trace;

use crate::error::{Error, ErrorKind, Result};
use crate::sasl::{self, Guid, SaslCommand, SaslResponse};

const ENV_SESSION_BUS: &str = "DBUS_SESSION_BUS_ADDRESS";
const ENV_SYSTEM_BUS: &str = "DBUS_SYSTEM_BUS_ADDRESS";
const DEFAULT_SYSTEM_BUS: &str = "unix:path=/run/dbus/system_bus_socket";

/// An authenticated stream to a message bus.
pub(crate) struct Transport {
    pub(crate) stream: UnixStream,
    pub(crate) guid: Guid,
    pub(crate) unix_fd: bool,
    /// Bytes received past the end of the SASL conversation. These belong to
    /// the binary stream and must be preserved.
    pub(crate) leftover: Vec<u8>,
}

impl Transport {
    /// Open and authenticate a connection to the session bus.
    ///
    /// This uses the `DBUS_SESSION_BUS_ADDRESS` environment variable to
    /// determine its address.
    pub(crate) async fn session_bus() -> Result<Self> {
        Self::from_env(ENV_SESSION_BUS, None).await
    }

    /// Open and authenticate a connection to the system bus.
    ///
    /// This uses the `DBUS_SYSTEM_BUS_ADDRESS` environment variable to
    /// determine its address or falls back to the well-known address
    /// `unix:path=/run/dbus/system_bus_socket`.
    pub(crate) async fn system_bus() -> Result<Self> {
        Self::from_env(ENV_SYSTEM_BUS, Some(DEFAULT_SYSTEM_BUS)).await
    }

    async fn from_env(env: &str, default: Option<&str>) -> Result<Self> {
        let address = match env::var_os(env) {
            Some(address) => address,
            None => match default {
                Some(default) => default.into(),
                None => return Err(Error::new(ErrorKind::MissingBus)),
            },
        };

        let path = unix_socket_path(address.as_bytes())?;
        let stream = UnixStream::connect(&path).await?;
        Self::from_stream(stream).await
    }

    /// Authenticate over an already connected stream.
    pub(crate) async fn from_stream(mut stream: UnixStream) -> Result<Self> {
        let Handshake {
            guid,
            unix_fd,
            leftover,
        } = handshake(&mut stream).await?;

        Ok(Self {
            stream,
            guid,
            unix_fd,
            leftover,
        })
    }
}

/// The result of a completed SASL conversation.
#[derive(Debug)]
pub(crate) struct Handshake {
    pub(crate) guid: Guid,
    pub(crate) unix_fd: bool,
    pub(crate) leftover: Vec<u8>,
}

/// Drive the EXTERNAL handshake over the given stream.
///
/// All client commands are pipelined up front for latency: the initial nul
/// byte, `AUTH EXTERNAL`, an empty `DATA`, `NEGOTIATE_UNIX_FD` and `BEGIN`.
/// Server lines are then consumed until authentication has produced an `OK`
/// and the file descriptor negotiation has been answered.
pub(crate) async fn handshake<S>(stream: &mut S) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut out = Vec::with_capacity(64);
    out.push(0);

    for command in [
        SaslCommand::AuthExternal,
        SaslCommand::Data,
        SaslCommand::NegotiateUnixFd,
        SaslCommand::Begin,
    ] {
        out.extend_from_slice(command.line());
    }

    stream.write_all(&out).await?;
    trace!("sasl commands pipelined");

    let mut buf = Vec::with_capacity(256);
    let mut at = 0;
    let mut guid = None;
    let mut unix_fd = false;
    let mut fd_answered = false;
    let mut rejected = false;

    loop {
        if let Some(n) = buf[at..].iter().position(|&b| b == b'\n') {
            let line = &buf[at..at + n + 1];

            match sasl::parse_response(line)? {
                SaslResponse::Ok(hex) => {
                    let hex = std::str::from_utf8(hex)?;
                    trace!(guid = hex, "authenticated");
                    guid = Some(Guid::new(hex));
                }
                SaslResponse::Data(..) => {}
                SaslResponse::Rejected(..) => {
                    rejected = true;
                }
                SaslResponse::AgreeUnixFd => {
                    unix_fd = true;
                    fd_answered = true;
                }
                SaslResponse::Error(..) => {
                    // After OK this is the answer to NEGOTIATE_UNIX_FD; the
                    // client continues without fd passing. Before OK it is
                    // fatal.
                    if guid.is_none() {
                        return Err(Error::new(ErrorKind::AuthenticationFailed));
                    }

                    fd_answered = true;
                }
            }

            at += n + 1;

            if let (Some(guid), true) = (guid.clone(), fd_answered) {
                return Ok(Handshake {
                    guid,
                    unix_fd,
                    leftover: buf.split_off(at),
                });
            }

            continue;
        }

        let mut chunk = [0u8; 256];
        let n = stream.read(&mut chunk).await?;

        if n == 0 {
            return Err(if rejected {
                Error::new(ErrorKind::InvalidProtocol)
            } else {
                Error::new(ErrorKind::AuthenticationFailed)
            });
        }

        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Extract the filesystem path from a bus address of the form
/// `unix:path=<fs-path>`. No other transport is supported.
fn unix_socket_path(address: &[u8]) -> Result<PathBuf> {
    let mut parts = address.splitn(2, |&b| b == b'=');

    match (parts.next(), parts.next()) {
        (Some(b"unix:path"), Some(path)) if !path.is_empty() => {
            Ok(Path::new(OsStr::from_bytes(path)).to_path_buf())
        }
        _ => Err(Error::new(ErrorKind::InvalidAddress)),
    }
}
