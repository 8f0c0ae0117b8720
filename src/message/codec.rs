use crate::buf::{padding_to, Buffer, MAX_ARRAY_LENGTH, MAX_BODY_LENGTH};
use crate::error::{Error, ErrorKind, Result};
use crate::protocol::{self, Endianness, Flags, HeaderField, MessageType};
use crate::signature::Type;
use crate::value::Value;

use super::Message;

/// The header of a message that has been read short of its body.
pub(crate) struct MessageHeader {
    /// The message with all header fields populated and an empty body.
    pub(crate) message: Message,
    /// Length of the body in bytes.
    pub(crate) body_length: u32,
    /// The body signature, if the header carried one.
    pub(crate) signature: Option<String>,
}

/// Compute the total size in bytes of the message starting at the cursor.
///
/// Requires the 16-byte fixed part (preamble plus header-field array length)
/// to be available. The cursor and endianness are left untouched.
pub(crate) fn preview(buf: &mut Buffer) -> Result<usize> {
    let origin = buf.cursor();
    let previous = buf.endianness();

    let result = (|| {
        let endianness = Endianness::from_u8(buf.load_u8()?)?;
        buf.set_endianness(endianness);

        buf.set_cursor(origin + 4);
        let body_length = buf.load_u32()?;

        if body_length > MAX_BODY_LENGTH {
            return Err(Error::new(ErrorKind::BodyTooLong(body_length)));
        }

        buf.set_cursor(origin + 12);
        let fields_length = buf.load_u32()?;

        if fields_length > MAX_ARRAY_LENGTH {
            return Err(Error::new(ErrorKind::ArrayTooLong(fields_length)));
        }

        let headers = 16 + fields_length as usize;
        Ok(headers + padding_to(headers, 8) + body_length as usize)
    })();

    buf.set_cursor(origin);
    buf.set_endianness(previous);
    result
}

/// Marshal a complete message at the buffer cursor.
///
/// The cursor position on entry is the message origin all alignment is
/// measured from. The body length is back-patched once the body has been
/// written.
pub(crate) fn write_message(buf: &mut Buffer, message: &Message) -> Result<()> {
    let origin = buf.cursor();
    buf.set_endianness(message.endianness);

    buf.store_u8(message.endianness.0)?;
    buf.store_u8(message.message_type.0)?;
    buf.store_u8(message.flags.0)?;
    buf.store_u8(protocol::VERSION)?;

    let body_length_at = buf.cursor();
    buf.store_u32(0)?;
    buf.store_u32(message.serial)?;

    let fields_length_at = buf.cursor();
    buf.store_u32(0)?;
    buf.align_store(origin, 8)?;
    let first = buf.cursor();

    if let Some(path) = &message.path {
        write_field(buf, origin, HeaderField::PATH, Value::ObjectPath(path.clone()))?;
    }

    if let Some(interface) = &message.interface {
        write_field(buf, origin, HeaderField::INTERFACE, Value::String(interface.clone()))?;
    }

    if let Some(member) = &message.member {
        write_field(buf, origin, HeaderField::MEMBER, Value::String(member.clone()))?;
    }

    if let Some(error_name) = &message.error_name {
        write_field(buf, origin, HeaderField::ERROR_NAME, Value::String(error_name.clone()))?;
    }

    if let Some(reply_serial) = message.reply_serial {
        write_field(buf, origin, HeaderField::REPLY_SERIAL, Value::UInt32(reply_serial))?;
    }

    if let Some(destination) = &message.destination {
        write_field(buf, origin, HeaderField::DESTINATION, Value::String(destination.clone()))?;
    }

    if let Some(sender) = &message.sender {
        write_field(buf, origin, HeaderField::SENDER, Value::String(sender.clone()))?;
    }

    let signature = message.signature();

    if !signature.is_empty() {
        write_field(buf, origin, HeaderField::SIGNATURE, Value::Signature(signature))?;
    }

    if let Some(unix_fds) = message.unix_fds {
        write_field(buf, origin, HeaderField::UNIX_FDS, Value::UInt32(unix_fds))?;
    }

    let fields_length = buf.cursor() - first;

    if fields_length > MAX_ARRAY_LENGTH as usize {
        return Err(Error::new(ErrorKind::ArrayTooLong(u32::MAX)));
    }

    buf.store_u32_at(fields_length_at, fields_length as u32)?;

    buf.align_store(origin, 8)?;
    let body_start = buf.cursor();

    for value in &message.body {
        value.write(buf, origin)?;
    }

    let body_length = buf.cursor() - body_start;

    if body_length > MAX_BODY_LENGTH as usize {
        return Err(Error::new(ErrorKind::BodyTooLong(u32::MAX)));
    }

    buf.store_u32_at(body_length_at, body_length as u32)
}

/// Each header field is a `(byte, variant)` struct inside the header-field
/// array, so it 8-aligns and wraps its value in a variant.
fn write_field(buf: &mut Buffer, origin: usize, field: HeaderField, value: Value) -> Result<()> {
    buf.align_store(origin, 8)?;
    buf.store_u8(field.0)?;
    Value::Variant(Box::new(value)).write(buf, origin)
}

/// Unmarshal the fixed header and the header-field array at the buffer
/// cursor, leaving the cursor at the start of the body.
///
/// The buffer endianness is switched to the endianness tagged in the message.
pub(crate) fn read_message_header(buf: &mut Buffer) -> Result<MessageHeader> {
    let origin = buf.cursor();

    let endianness = Endianness::from_u8(buf.load_u8()?)?;
    buf.set_endianness(endianness);

    let message_type = MessageType::from_u8(buf.load_u8()?)?;
    let flags = Flags(buf.load_u8()?);

    if buf.load_u8()? != protocol::VERSION {
        return Err(Error::new(ErrorKind::InvalidProtocol));
    }

    let body_length = buf.load_u32()?;

    if body_length > MAX_BODY_LENGTH {
        return Err(Error::new(ErrorKind::BodyTooLong(body_length)));
    }

    let serial = buf.load_u32()?;

    if serial == 0 {
        return Err(Error::new(ErrorKind::ZeroSerial));
    }

    let mut message = Message {
        endianness,
        flags,
        serial,
        ..Message::empty(message_type)
    };

    let fields_length = buf.load_u32()?;

    if fields_length > MAX_ARRAY_LENGTH {
        return Err(Error::new(ErrorKind::ArrayTooLong(fields_length)));
    }

    buf.align_load(origin, 8)?;
    let end = buf.cursor() + fields_length as usize;

    if end > buf.limit() {
        return Err(Error::new(ErrorKind::TruncatedMessage));
    }

    let mut signature = None;

    while buf.cursor() < end {
        buf.align_load(origin, 8)?;
        let code = buf.load_u8()?;
        let Value::Variant(value) = Value::read(buf, origin, &Type::Variant)? else {
            return Err(Error::new(ErrorKind::InvalidHeaderField(code)));
        };

        // The variant's embedded signature is trusted; the code only decides
        // which field the value lands in.
        match (HeaderField(code), *value) {
            (HeaderField::PATH, Value::ObjectPath(value)) => message.path = Some(value),
            (HeaderField::INTERFACE, Value::String(value)) => message.interface = Some(value),
            (HeaderField::MEMBER, Value::String(value)) => message.member = Some(value),
            (HeaderField::ERROR_NAME, Value::String(value)) => message.error_name = Some(value),
            (HeaderField::REPLY_SERIAL, Value::UInt32(value)) => {
                message.reply_serial = Some(value)
            }
            (HeaderField::DESTINATION, Value::String(value)) => message.destination = Some(value),
            (HeaderField::SENDER, Value::String(value)) => message.sender = Some(value),
            (HeaderField::SIGNATURE, Value::Signature(value)) => signature = Some(value),
            (HeaderField::UNIX_FDS, Value::UInt32(value)) => message.unix_fds = Some(value),
            _ => return Err(Error::new(ErrorKind::InvalidHeaderField(code))),
        }
    }

    if buf.cursor() != end {
        return Err(Error::new(ErrorKind::TruncatedMessage));
    }

    buf.align_load(origin, 8)?;

    Ok(MessageHeader {
        message,
        body_length,
        signature,
    })
}

/// Unmarshal a complete message at the buffer cursor.
pub(crate) fn read_message(buf: &mut Buffer) -> Result<Message> {
    let origin = buf.cursor();

    let MessageHeader {
        mut message,
        body_length,
        signature,
    } = read_message_header(buf)?;

    if let Some(signature) = signature {
        if body_length > 0 {
            let body_start = buf.cursor();
            let ty = Type::parse(&signature)?;
            message.body = Value::read_many(buf, origin, &ty)?;

            if buf.cursor() - body_start != body_length as usize {
                return Err(Error::new(ErrorKind::TruncatedMessage));
            }
        }
    }

    Ok(message)
}
