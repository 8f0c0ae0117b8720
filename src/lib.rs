//! An asynchronous client implementation of the D-Bus protocol.
//!
//! This crate provides the two building blocks a D-Bus client needs: a codec
//! for the D-Bus wire format over dynamically typed [`Value`]s, and a
//! [`Connection`] which authenticates against a message bus, correlates
//! method replies by serial number, and hands every other incoming message to
//! a caller-supplied handler.
//!
//! ```no_run
//! use minibus::{Connection, Message, Value};
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> minibus::Result<()> {
//! let c = Connection::session_bus().await?;
//!
//! let m = Message::method_call("/org/freedesktop/DBus", "ListNames")
//!     .with_destination("org.freedesktop.DBus")
//!     .with_interface("org.freedesktop.DBus");
//!
//! let reply = c.call(m).await?;
//!
//! if let Some(Value::Array(_, names)) = reply.body().first() {
//!     println!("{} names on the bus", names.len());
//! }
//! # Ok(()) }
//! ```

#[macro_use]
mod macros;

#[doc(inline)]
pub use self::error::{Error, Result};
mod error;

#[doc(inline)]
pub use self::protocol::{Endianness, Flags, MessageType};
pub mod protocol;

#[doc(inline)]
pub use self::buf::Buffer;
pub mod buf;

#[doc(inline)]
pub use self::signature::{SignatureError, Type};
mod signature;

#[doc(inline)]
pub use self::value::Value;
mod value;

#[doc(inline)]
pub use self::message::Message;
mod message;

pub mod sasl;

#[doc(inline)]
pub use self::connection::{Connection, ConnectionBuilder, Reply};
mod connection;

pub mod org_freedesktop_dbus;

pub mod introspect;
