//! The connection to a message bus.

pub(crate) use self::transport::Transport;
mod transport;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::buf::Buffer;
use crate::error::{Error, ErrorKind, Result};
use crate::message::{self, Message};
use crate::org_freedesktop_dbus::{self, NameFlag, NameReply};
use crate::protocol::{Flags, MessageType};
use crate::sasl::Guid;
use crate::value::Value;

/// Handler invoked on the read loop with every message that arrives,
/// including replies that have also been routed to their reply slot.
///
/// The handler runs inline on the reader, so it must not block on the same
/// connection; doing so would deadlock reply delivery. Forward work to your
/// own queue instead.
type Handler = Box<dyn FnMut(&Message) + Send>;

/// Outstanding reply slots keyed by serial, or the terminal state once the
/// read loop has died.
enum Slots {
    Open(HashMap<u32, oneshot::Sender<Message>>),
    Closed,
}

struct Writer {
    stream: tokio::net::unix::OwnedWriteHalf,
    buf: Buffer,
}

struct Shared {
    /// Write half and marshalling buffer. The lock spans serial allocation,
    /// marshalling and the flush so that serials appear on the wire in
    /// increasing order.
    writer: tokio::sync::Mutex<Writer>,
    /// Serial for the next outbound message. Never zero.
    serial: AtomicU32,
    /// Reply slots. Inserted by senders, removed by the read loop.
    slots: Mutex<Slots>,
    /// The error that terminated the read loop.
    terminal: Mutex<Option<Error>>,
    /// The unique bus name assigned by `Hello`.
    name: OnceLock<Box<str>>,
}

/// An asynchronous connection to a D-Bus message bus.
///
/// A connection owns a background read loop which correlates method replies
/// with their calls by serial number and forwards every incoming message to
/// the handler installed through [`ConnectionBuilder::with_handler`].
///
/// # Examples
///
/// ```no_run
/// use minibus::{Connection, Message};
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() -> minibus::Result<()> {
/// let c = Connection::session_bus().await?;
/// println!("we are {:?}", c.unique_name());
///
/// let m = Message::method_call("/org/freedesktop/DBus", "GetId")
///     .with_destination("org.freedesktop.DBus")
///     .with_interface("org.freedesktop.DBus");
///
/// let reply = c.call(m).await?;
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    guid: Guid,
    unix_fd: bool,
}

impl Connection {
    /// Shorthand for connecting to the session bus with the default
    /// configuration.
    #[inline]
    pub async fn session_bus() -> Result<Self> {
        ConnectionBuilder::new().session_bus().connect().await
    }

    /// Shorthand for connecting to the system bus with the default
    /// configuration.
    #[inline]
    pub async fn system_bus() -> Result<Self> {
        ConnectionBuilder::new().system_bus().connect().await
    }

    /// The unique name assigned by the bus, such as `:1.42`.
    ///
    /// Present once the connection has been established.
    pub fn unique_name(&self) -> Option<&str> {
        self.shared.name.get().map(|name| &**name)
    }

    /// The GUID the server reported during authentication.
    pub fn server_guid(&self) -> &Guid {
        &self.guid
    }

    /// Whether the server agreed to pass unix file descriptors.
    ///
    /// Negotiation is always attempted; actual descriptor exchange is not
    /// implemented.
    pub fn unix_fd(&self) -> bool {
        self.unix_fd
    }

    /// Whether the read loop has terminated.
    pub fn is_closed(&self) -> bool {
        matches!(&*self.shared.slots.lock(), Slots::Closed)
    }

    /// Take the error that terminated the read loop, if it has terminated.
    pub fn take_error(&self) -> Option<Error> {
        self.shared.terminal.lock().take()
    }

    /// Send a message, returning a [`Reply`] future which resolves once the
    /// matching reply arrives.
    ///
    /// The message's serial is assigned here. A reply slot is only installed
    /// for method calls that expect a reply; for everything else the returned
    /// future resolves immediately with no message.
    ///
    /// Marshalling problems surface from this method; a peer replying with an
    /// `ERROR` message resolves the future normally. Use [`call()`] to have
    /// error replies converted.
    ///
    /// [`call()`]: Self::call
    pub async fn send(&self, mut message: Message) -> Result<Reply> {
        let mut writer = self.shared.writer.lock().await;

        if self.is_closed() {
            return Err(Error::new(ErrorKind::ConnectionClosed));
        }

        let serial = self.next_serial();
        message.serial = serial;

        let wants_reply = message.message_type == MessageType::METHOD_CALL
            && !(message.flags & Flags::NO_REPLY_EXPECTED);

        let Writer { stream, buf } = &mut *writer;

        buf.clear();
        message::write_message(buf, &message)?;
        buf.flip();

        let rx = if wants_reply {
            let (tx, rx) = oneshot::channel();

            match &mut *self.shared.slots.lock() {
                Slots::Open(slots) => {
                    slots.insert(serial, tx);
                }
                Slots::Closed => return Err(Error::new(ErrorKind::ConnectionClosed)),
            }

            Some(rx)
        } else {
            None
        };

        // Partial writes are retried internally by write_all.
        if let Err(error) = stream.write_all(buf.get()).await {
            if let Slots::Open(slots) = &mut *self.shared.slots.lock() {
                slots.remove(&serial);
            }

            return Err(error.into());
        }

        trace!(serial, "message sent");
        Ok(Reply { rx })
    }

    /// Send a method call and await its reply, converting an `ERROR` reply
    /// into an [`Error`] carrying the error name and description.
    pub async fn call(&self, message: Message) -> Result<Message> {
        let reply = self.send(message).await?;

        let Some(message) = reply.await? else {
            return Err(Error::new(ErrorKind::MissingMessage));
        };

        if message.message_type == MessageType::ERROR {
            let name = message
                .error_name()
                .unwrap_or("org.freedesktop.DBus.Error.Failed");

            let description = message
                .body()
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default();

            return Err(Error::new(ErrorKind::BusError(
                name.into(),
                description.into(),
            )));
        }

        Ok(message)
    }

    /// Request the given well-known name on the bus.
    pub async fn request_name(&self, name: &str, flags: NameFlag) -> Result<NameReply> {
        let m = Message::method_call(org_freedesktop_dbus::PATH, "RequestName")
            .with_destination(org_freedesktop_dbus::DESTINATION)
            .with_interface(org_freedesktop_dbus::INTERFACE)
            .with_body(vec![Value::String(name.into()), Value::UInt32(flags.0)]);

        let reply = self.call(m).await?;

        let Some(reply) = reply.body().first().and_then(Value::as_u32) else {
            return Err(Error::new(ErrorKind::InvalidProtocol));
        };

        Ok(NameReply(reply))
    }

    fn next_serial(&self) -> u32 {
        loop {
            let serial = self.shared.serial.fetch_add(1, Ordering::Relaxed);

            if serial != 0 {
                break serial;
            }
        }
    }

    pub(crate) async fn new(transport: Transport, handler: Option<Handler>) -> Result<Self> {
        let Transport {
            stream,
            guid,
            unix_fd,
            leftover,
        } = transport;

        let (read, write) = stream.into_split();

        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Writer {
                stream: write,
                buf: Buffer::new(),
            }),
            serial: AtomicU32::new(1),
            slots: Mutex::new(Slots::Open(HashMap::new())),
            terminal: Mutex::new(None),
            name: OnceLock::new(),
        });

        tokio::spawn(read_loop(read, leftover, Arc::clone(&shared), handler));

        let connection = Connection {
            shared,
            guid,
            unix_fd,
        };

        connection.hello().await?;
        Ok(connection)
    }

    /// Send the `Hello` call which every connection must complete before any
    /// other traffic, and store the unique name the bus assigns.
    async fn hello(&self) -> Result<()> {
        let m = Message::method_call(org_freedesktop_dbus::PATH, "Hello")
            .with_destination(org_freedesktop_dbus::DESTINATION)
            .with_interface(org_freedesktop_dbus::INTERFACE);

        let reply = self.call(m).await?;

        let Some(name) = reply.body().first().and_then(Value::as_str) else {
            return Err(Error::new(ErrorKind::InvalidProtocol));
        };

        debug!(name, "connected to bus");
        let _ = self.shared.name.set(name.into());
        Ok(())
    }
}

/// A builder for a [`Connection`].
pub struct ConnectionBuilder {
    bus: Bus,
    handler: Option<Handler>,
}

enum Bus {
    Session,
    System,
    Stream(UnixStream),
}

impl ConnectionBuilder {
    /// Construct a new builder targeting the session bus.
    pub fn new() -> Self {
        Self {
            bus: Bus::Session,
            handler: None,
        }
    }

    /// Target the session bus.
    pub fn session_bus(mut self) -> Self {
        self.bus = Bus::Session;
        self
    }

    /// Target the system bus.
    pub fn system_bus(mut self) -> Self {
        self.bus = Bus::System;
        self
    }

    /// Use an already connected stream instead of resolving a bus address.
    pub fn unix_stream(mut self, stream: UnixStream) -> Self {
        self.bus = Bus::Stream(stream);
        self
    }

    /// Install a handler invoked with every incoming message.
    ///
    /// The handler receives everything the read loop sees, including method
    /// replies and signals. It runs inline on the read loop, so it must not
    /// block on this connection.
    pub fn with_handler(mut self, handler: impl FnMut(&Message) + Send + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Open the connection, authenticate and perform the `Hello` exchange.
    pub async fn connect(self) -> Result<Connection> {
        let transport = match self.bus {
            Bus::Session => Transport::session_bus().await?,
            Bus::System => Transport::system_bus().await?,
            Bus::Stream(stream) => Transport::from_stream(stream).await?,
        };

        Connection::new(transport, self.handler).await
    }
}

impl Default for ConnectionBuilder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// The future of a reply to a message sent with [`Connection::send`].
///
/// Resolves with the reply message, or with `None` when the message did not
/// expect a reply. Dropping a `Reply` does not affect the connection; the
/// discarded slot is cleaned up when the reply arrives.
#[derive(Debug)]
pub struct Reply {
    rx: Option<oneshot::Receiver<Message>>,
}

impl Future for Reply {
    type Output = Result<Option<Message>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match &mut this.rx {
            None => Poll::Ready(Ok(None)),
            Some(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(message)) => Poll::Ready(Ok(Some(message))),
                Poll::Ready(Err(..)) => {
                    Poll::Ready(Err(Error::new(ErrorKind::ConnectionClosed)))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Socket reads for the read loop. Bytes the handshake buffered past `BEGIN`
/// are consumed before the socket is touched.
struct LoopReader {
    stream: OwnedReadHalf,
    carry: Vec<u8>,
}

impl LoopReader {
    /// Receive exactly `n` more bytes into the buffer.
    async fn fill(&mut self, buf: &mut Buffer, n: usize) -> Result<()> {
        let window = buf.window_mut(n)?;
        let mut at = 0;

        if !self.carry.is_empty() {
            let take = self.carry.len().min(n);
            window[..take].copy_from_slice(&self.carry[..take]);
            self.carry.drain(..take);
            at = take;
        }

        while at < n {
            let count = self.stream.read(&mut window[at..]).await?;

            if count == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }

            at += count;
        }

        buf.add_filled(n);
        Ok(())
    }
}

/// Receive a single complete message.
///
/// The fixed 16 bytes are read first to learn the header-field and body
/// lengths, then the remainder of the message is read before the whole
/// buffer is unmarshalled. The buffer grows to fit and is only cleared once
/// the previous message has been consumed.
async fn read_one(reader: &mut LoopReader, buf: &mut Buffer) -> Result<Message> {
    buf.clear();
    reader.fill(buf, 16).await?;
    let total = message::preview(buf)?;
    reader.fill(buf, total - 16).await?;
    message::read_message(buf)
}

async fn read_loop(
    stream: OwnedReadHalf,
    leftover: Vec<u8>,
    shared: Arc<Shared>,
    mut handler: Option<Handler>,
) {
    let mut reader = LoopReader {
        stream,
        carry: leftover,
    };

    let mut buf = Buffer::new();

    let error = loop {
        let message = match read_one(&mut reader, &mut buf).await {
            Ok(message) => message,
            Err(error) => break error,
        };

        if let Some(reply_serial) = message.reply_serial {
            let slot = match &mut *shared.slots.lock() {
                Slots::Open(slots) => slots.remove(&reply_serial),
                Slots::Closed => None,
            };

            if let Some(tx) = slot {
                // The slot owner may have lost interest, in which case the
                // send fails and the message is dropped here.
                let _ = tx.send(message.clone());
            }
        }

        if let Some(handler) = &mut handler {
            handler(&message);
        }
    };

    debug!(error = %error, "read loop terminated");

    let slots = {
        let mut slots = shared.slots.lock();
        std::mem::replace(&mut *slots, Slots::Closed)
    };

    // Dropping the senders completes every outstanding reply future with
    // ConnectionClosed.
    drop(slots);

    *shared.terminal.lock() = Some(error);
}
