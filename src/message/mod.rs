//! D-Bus messages and the whole-message codec.

pub(crate) use self::codec::{preview, read_message, read_message_header, write_message};
mod codec;


use crate::protocol::{Endianness, Flags, MessageType};
use crate::value::Value;

/// A D-Bus message.
///
/// A message combines a type, a serial number, a set of header fields and a
/// body of zero or more [`Value`]s. The body signature is derived from the
/// body values when the message is marshalled.
///
/// Messages are constructed with [`Message::method_call`] and
/// [`Message::signal`], or derived from a received message with
/// [`method_return()`] and [`error()`]. The serial of an outbound message is
/// assigned by the connection when the message is sent.
///
/// [`method_return()`]: Self::method_return
/// [`error()`]: Self::error
///
/// # Examples
///
/// ```
/// use minibus::{Message, Value};
///
/// let m = Message::method_call("/org/freedesktop/DBus", "RequestName")
///     .with_destination("org.freedesktop.DBus")
///     .with_interface("org.freedesktop.DBus")
///     .with_body(vec![Value::from("se.tedro.Example"), Value::from(0u32)]);
///
/// assert_eq!(m.signature(), "su");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub(crate) endianness: Endianness,
    pub(crate) message_type: MessageType,
    pub(crate) flags: Flags,
    pub(crate) serial: u32,
    pub(crate) path: Option<String>,
    pub(crate) interface: Option<String>,
    pub(crate) member: Option<String>,
    pub(crate) error_name: Option<String>,
    pub(crate) reply_serial: Option<u32>,
    pub(crate) destination: Option<String>,
    pub(crate) sender: Option<String>,
    pub(crate) unix_fds: Option<u32>,
    pub(crate) body: Vec<Value>,
}

impl Message {
    fn empty(message_type: MessageType) -> Self {
        Self {
            endianness: Endianness::LITTLE,
            message_type,
            flags: Flags::EMPTY,
            serial: 0,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            reply_serial: None,
            destination: None,
            sender: None,
            unix_fds: None,
            body: Vec::new(),
        }
    }

    /// Construct a method call addressed to the given path and member.
    pub fn method_call(path: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            member: Some(member.into()),
            ..Self::empty(MessageType::METHOD_CALL)
        }
    }

    /// Construct a signal emitted from the given path, interface and member.
    pub fn signal(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            path: Some(path.into()),
            interface: Some(interface.into()),
            member: Some(member.into()),
            ..Self::empty(MessageType::SIGNAL)
        }
    }

    /// Construct a method return replying to this message.
    ///
    /// The reply serial is taken from this message's serial and the sender
    /// and destination are flipped.
    pub fn method_return(&self) -> Self {
        Self {
            reply_serial: Some(self.serial),
            destination: self.sender.clone(),
            sender: self.destination.clone(),
            ..Self::empty(MessageType::METHOD_RETURN)
        }
    }

    /// Construct an error replying to this message.
    pub fn error(&self, error_name: impl Into<String>) -> Self {
        Self {
            error_name: Some(error_name.into()),
            reply_serial: Some(self.serial),
            destination: self.sender.clone(),
            sender: self.destination.clone(),
            ..Self::empty(MessageType::ERROR)
        }
    }

    /// The type of the message.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The serial of the message. Zero until assigned by a connection.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// The flags of the message.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// The endianness the message is or will be marshalled with.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// The object path of the message, if any.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// The interface of the message, if any.
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// The member of the message, if any.
    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    /// The error name of the message. Only present on `ERROR` messages.
    pub fn error_name(&self) -> Option<&str> {
        self.error_name.as_deref()
    }

    /// The serial of the method call this message replies to, if any.
    pub fn reply_serial(&self) -> Option<u32> {
        self.reply_serial
    }

    /// The destination of the message, if any.
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// The sender of the message, if any.
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// The number of unix file descriptors accompanying the message, if the
    /// header was present.
    pub fn unix_fds(&self) -> Option<u32> {
        self.unix_fds
    }

    /// The body of the message.
    pub fn body(&self) -> &[Value] {
        &self.body
    }

    /// Consume the message and return its body.
    pub fn into_body(self) -> Vec<Value> {
        self.body
    }

    /// The signature of the body, derived from the body values.
    pub fn signature(&self) -> String {
        let mut out = String::new();

        for value in &self.body {
            value.ty().render_into(&mut out);
        }

        out
    }

    /// Modify the flags of the message.
    pub fn with_flags(self, flags: Flags) -> Self {
        Self { flags, ..self }
    }

    /// Modify the serial of the message.
    ///
    /// A connection overwrites the serial when the message is sent; setting
    /// one explicitly is only meaningful when marshalling by hand.
    pub fn with_serial(self, serial: u32) -> Self {
        Self { serial, ..self }
    }

    /// Modify the interface of the message.
    pub fn with_interface(self, interface: impl Into<String>) -> Self {
        Self {
            interface: Some(interface.into()),
            ..self
        }
    }

    /// Modify the destination of the message.
    pub fn with_destination(self, destination: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..self
        }
    }

    /// Modify the sender of the message.
    pub fn with_sender(self, sender: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            ..self
        }
    }

    /// Modify the body of the message.
    pub fn with_body(self, body: Vec<Value>) -> Self {
        Self { body, ..self }
    }

    /// Modify the endianness the message will be marshalled with.
    pub fn with_endianness(self, endianness: Endianness) -> Self {
        Self { endianness, ..self }
    }
}
