use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;

use crate::buf::Buffer;
use crate::error::ErrorKind;
use crate::message::{self, Message};
use crate::org_freedesktop_dbus::{NameFlag, NameReply};
use crate::protocol::{Flags, MessageType};
use crate::value::Value;

use super::transport::handshake;
use super::{read_one, ConnectionBuilder, LoopReader};

async fn read_until_begin(stream: &mut (impl AsyncRead + Unpin)) -> Vec<u8> {
    let mut received = Vec::new();
    let mut chunk = [0u8; 256];

    while !received.ends_with(b"BEGIN\r\n") {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "eof before BEGIN");
        received.extend_from_slice(&chunk[..n]);
    }

    received
}

#[tokio::test]
async fn handshake_transcript() {
    let (mut client, mut server) = tokio::io::duplex(4096);

    let server = tokio::spawn(async move {
        let received = read_until_begin(&mut server).await;

        server
            .write_all(b"OK 1234deadbeef\r\nAGREE_UNIX_FD\r\n")
            .await
            .unwrap();

        (received, server)
    });

    let hs = handshake(&mut client).await.unwrap();
    assert_eq!(hs.guid.as_str(), "1234deadbeef");
    assert!(hs.unix_fd);
    assert!(hs.leftover.is_empty());

    let (received, _server) = server.await.unwrap();

    assert_eq!(
        received,
        b"\0AUTH EXTERNAL\r\nDATA\r\nNEGOTIATE_UNIX_FD\r\nBEGIN\r\n"
    );
}

#[tokio::test]
async fn handshake_without_fd_support() {
    let (mut client, mut server) = tokio::io::duplex(4096);

    tokio::spawn(async move {
        read_until_begin(&mut server).await;

        // The answer to NEGOTIATE_UNIX_FD is an error, followed by the first
        // bytes of the binary stream.
        server
            .write_all(b"OK 00ff\r\nERROR Unsupported\r\n\x01\x02\x03")
            .await
            .unwrap();
    });

    let hs = handshake(&mut client).await.unwrap();
    assert_eq!(hs.guid.as_str(), "00ff");
    assert!(!hs.unix_fd);
    assert_eq!(hs.leftover, [1, 2, 3]);
}

#[tokio::test]
async fn handshake_rejected() {
    let (mut client, mut server) = tokio::io::duplex(4096);

    tokio::spawn(async move {
        read_until_begin(&mut server).await;
        server.write_all(b"REJECTED EXTERNAL\r\n").await.unwrap();
    });

    let error = handshake(&mut client).await.unwrap_err();
    assert!(matches!(error.kind(), ErrorKind::InvalidProtocol));
}

#[tokio::test]
async fn handshake_error_before_ok() {
    let (mut client, mut server) = tokio::io::duplex(4096);

    tokio::spawn(async move {
        read_until_begin(&mut server).await;
        server.write_all(b"ERROR not today\r\n").await.unwrap();
    });

    let error = handshake(&mut client).await.unwrap_err();
    assert!(matches!(error.kind(), ErrorKind::AuthenticationFailed));
}

/// The bus side of a connection, answering over one half of a socket pair.
struct FakeBus {
    reader: LoopReader,
    write: OwnedWriteHalf,
    buf: Buffer,
    out: Buffer,
}

impl FakeBus {
    async fn accept(stream: UnixStream) -> Self {
        let (mut read, mut write) = stream.into_split();

        let received = read_until_begin(&mut read).await;
        assert!(received.starts_with(b"\0AUTH EXTERNAL\r\n"));

        write
            .write_all(b"OK 1234deadbeef\r\nAGREE_UNIX_FD\r\n")
            .await
            .unwrap();

        Self {
            reader: LoopReader {
                stream: read,
                carry: Vec::new(),
            },
            write,
            buf: Buffer::new(),
            out: Buffer::new(),
        }
    }

    async fn recv(&mut self) -> Message {
        read_one(&mut self.reader, &mut self.buf).await.unwrap()
    }

    async fn send(&mut self, message: &Message) {
        self.out.clear();
        message::write_message(&mut self.out, message).unwrap();
        self.out.flip();
        self.write.write_all(self.out.get()).await.unwrap();
    }
}

#[tokio::test]
async fn connect_call_and_signals() {
    let (client, server) = UnixStream::pair().unwrap();

    let signals = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&signals);

    let bus = tokio::spawn(async move {
        let mut bus = FakeBus::accept(server).await;

        let hello = bus.recv().await;
        assert_eq!(hello.member(), Some("Hello"));
        assert_eq!(hello.destination(), Some("org.freedesktop.DBus"));
        assert_eq!(hello.serial(), 1);

        let reply = hello
            .method_return()
            .with_serial(1)
            .with_sender("org.freedesktop.DBus")
            .with_body(vec![Value::from(":1.0")]);

        bus.send(&reply).await;

        let ping = bus.recv().await;
        assert_eq!(ping.member(), Some("Ping"));

        let reply = ping
            .method_return()
            .with_serial(2)
            .with_body(vec![Value::UInt32(7)]);

        bus.send(&reply).await;

        let signal =
            Message::signal("/org/freedesktop/DBus", "org.freedesktop.DBus", "NameAcquired")
                .with_serial(3)
                .with_body(vec![Value::from(":1.0")]);

        bus.send(&signal).await;

        let boom = bus.recv().await;
        assert_eq!(boom.member(), Some("Boom"));

        let reply = boom
            .error("org.freedesktop.DBus.Error.UnknownMethod")
            .with_serial(4)
            .with_body(vec![Value::from("no such method")]);

        bus.send(&reply).await;

        let request_name = bus.recv().await;
        assert_eq!(request_name.member(), Some("RequestName"));
        assert_eq!(
            request_name.body(),
            &[Value::from("se.tedro.Example"), Value::UInt32(4)]
        );

        let reply = request_name
            .method_return()
            .with_serial(5)
            .with_body(vec![Value::UInt32(1)]);

        bus.send(&reply).await;
        bus
    });

    let c = ConnectionBuilder::new()
        .unix_stream(client)
        .with_handler(move |message| {
            if message.message_type() == MessageType::SIGNAL {
                let member = message.member().unwrap_or_default().to_string();
                seen.lock().unwrap().push(member);
            }
        })
        .connect()
        .await
        .unwrap();

    assert_eq!(c.unique_name(), Some(":1.0"));
    assert_eq!(c.server_guid().as_str(), "1234deadbeef");
    assert!(c.unix_fd());
    assert!(!c.is_closed());

    let m = Message::method_call("/org/freedesktop/DBus", "Ping")
        .with_destination("org.freedesktop.DBus");

    let reply = c.call(m).await.unwrap();
    assert_eq!(reply.message_type(), MessageType::METHOD_RETURN);
    assert_eq!(reply.body(), &[Value::UInt32(7)]);

    let m = Message::method_call("/org/freedesktop/DBus", "Boom")
        .with_destination("org.freedesktop.DBus");

    let error = c.call(m).await.unwrap_err();
    let (name, description) = error.bus_error().unwrap();
    assert_eq!(name, "org.freedesktop.DBus.Error.UnknownMethod");
    assert_eq!(description, "no such method");

    let reply = c
        .request_name("se.tedro.Example", NameFlag::DO_NOT_QUEUE)
        .await
        .unwrap();
    assert_eq!(reply, NameReply::PRIMARY_OWNER);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

    loop {
        if signals.lock().unwrap().iter().any(|m| m == "NameAcquired") {
            break;
        }

        assert!(
            tokio::time::Instant::now() < deadline,
            "signal never reached the handler"
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let _bus = bus.await.unwrap();
}

#[tokio::test]
async fn no_reply_expected_resolves_immediately() {
    let (client, server) = UnixStream::pair().unwrap();

    let bus = tokio::spawn(async move {
        let mut bus = FakeBus::accept(server).await;

        let hello = bus.recv().await;
        let reply = hello
            .method_return()
            .with_serial(1)
            .with_body(vec![Value::from(":1.1")]);
        bus.send(&reply).await;

        let notify = bus.recv().await;
        assert!(notify.flags() & Flags::NO_REPLY_EXPECTED);
        bus
    });

    let c = ConnectionBuilder::new()
        .unix_stream(client)
        .connect()
        .await
        .unwrap();

    let m = Message::method_call("/se/tedro/Example", "Notify")
        .with_destination("se.tedro.Example")
        .with_flags(Flags::NO_REPLY_EXPECTED);

    let reply = c.send(m).await.unwrap().await.unwrap();
    assert!(reply.is_none());

    let _bus = bus.await.unwrap();
}

#[tokio::test]
async fn closed_connection_rejects_outstanding_replies() {
    let (client, server) = UnixStream::pair().unwrap();

    let bus = tokio::spawn(async move {
        let mut bus = FakeBus::accept(server).await;

        let hello = bus.recv().await;
        let reply = hello
            .method_return()
            .with_serial(1)
            .with_body(vec![Value::from(":1.2")]);
        bus.send(&reply).await;

        // Receive a call and hang up without answering.
        bus.recv().await;
    });

    let c = ConnectionBuilder::new()
        .unix_stream(client)
        .connect()
        .await
        .unwrap();

    let m = Message::method_call("/se/tedro/Example", "Hang")
        .with_destination("se.tedro.Example");

    let reply = c.send(m).await.unwrap();
    bus.await.unwrap();

    let error = reply.await.unwrap_err();
    assert!(error.is_closed());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

    let terminal = loop {
        if let Some(terminal) = c.take_error() {
            break terminal;
        }

        assert!(tokio::time::Instant::now() < deadline, "loop never died");
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    // The loop died on end of file.
    assert!(matches!(terminal.kind(), ErrorKind::Io(..)));
    assert!(c.is_closed());

    let m = Message::method_call("/se/tedro/Example", "Late")
        .with_destination("se.tedro.Example");

    let error = c.send(m).await.unwrap_err();
    assert!(error.is_closed());
}

#[tokio::test]
async fn serials_increase_monotonically() {
    let (client, server) = UnixStream::pair().unwrap();

    let bus = tokio::spawn(async move {
        let mut bus = FakeBus::accept(server).await;

        let hello = bus.recv().await;
        let reply = hello
            .method_return()
            .with_serial(1)
            .with_body(vec![Value::from(":1.3")]);
        bus.send(&reply).await;

        let mut serials = Vec::new();

        for serial in 2..6u32 {
            let m = bus.recv().await;
            serials.push(m.serial());

            let reply = m.method_return().with_serial(serial);
            bus.send(&reply).await;
        }

        serials
    });

    let c = ConnectionBuilder::new()
        .unix_stream(client)
        .connect()
        .await
        .unwrap();

    for _ in 0..4 {
        let m = Message::method_call("/se/tedro/Example", "Step")
            .with_destination("se.tedro.Example");
        c.call(m).await.unwrap();
    }

    let serials = bus.await.unwrap();
    assert_eq!(serials, [2, 3, 4, 5]);
}
