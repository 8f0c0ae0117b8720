//! Dynamically typed D-Bus values and their wire codec.

#[cfg(test)]
mod proptests;

use crate::buf::{Buffer, MAX_ARRAY_LENGTH};
use crate::error::{Error, ErrorKind, Result};
use crate::signature::{SignatureError, SignatureErrorKind, Type, MAX_SIGNATURE};

/// A dynamically typed D-Bus value.
///
/// Every value knows its own [`Type`], so writing derives the wire signature
/// from the value while reading is driven by a type parsed from a signature.
///
/// # Examples
///
/// ```
/// use minibus::{Buffer, Type, Value};
///
/// let mut buf = Buffer::new();
/// let value = Value::Struct(vec![Value::Byte(1), Value::UInt32(2)]);
///
/// value.write(&mut buf, 0)?;
/// buf.flip();
///
/// assert_eq!(Value::read(&mut buf, 0, &value.ty())?, value);
/// # Ok::<_, minibus::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 8-bit unsigned integer.
    Byte(u8),
    /// Boolean. Marshalled as a `u32` of 0 or 1.
    Boolean(bool),
    /// 16-bit signed integer.
    Int16(i16),
    /// 16-bit unsigned integer.
    UInt16(u16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit unsigned integer.
    UInt32(u32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// IEEE 754 double.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Slash-delimited object path.
    ObjectPath(String),
    /// A type signature string.
    Signature(String),
    /// Homogeneous sequence. Carries the element type so that empty arrays
    /// still marshal with a signature.
    Array(Type, Vec<Value>),
    /// Key-value mapping, marshalled as an array of dict entries. Carries the
    /// key and value types.
    Dict(Type, Type, Vec<(Value, Value)>),
    /// Heterogeneous fixed tuple with one or more fields.
    Struct(Vec<Value>),
    /// A value tagged with its own type at runtime.
    Variant(Box<Value>),
}

impl Value {
    /// Derive the D-Bus type of this value.
    pub fn ty(&self) -> Type {
        match self {
            Value::Byte(..) => Type::Byte,
            Value::Boolean(..) => Type::Boolean,
            Value::Int16(..) => Type::Int16,
            Value::UInt16(..) => Type::UInt16,
            Value::Int32(..) => Type::Int32,
            Value::UInt32(..) => Type::UInt32,
            Value::Int64(..) => Type::Int64,
            Value::UInt64(..) => Type::UInt64,
            Value::Double(..) => Type::Double,
            Value::String(..) => Type::String,
            Value::ObjectPath(..) => Type::ObjectPath,
            Value::Signature(..) => Type::Signature,
            Value::Array(element, ..) => Type::Array(Box::new(element.clone())),
            Value::Dict(key, value, ..) => Type::Array(Box::new(Type::DictEntry(
                Box::new(key.clone()),
                Box::new(value.clone()),
            ))),
            Value::Struct(fields) => Type::Struct(fields.iter().map(Value::ty).collect()),
            Value::Variant(..) => Type::Variant,
        }
    }

    /// Coerce into a string slice for the string-like values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::ObjectPath(s) | Value::Signature(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce into a `u32`.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    /// Read a value of the given type from the buffer.
    ///
    /// Alignment is measured from `origin`, the offset at which the message
    /// containing this value begins.
    pub fn read(buf: &mut Buffer, origin: usize, ty: &Type) -> Result<Self> {
        match ty {
            Type::Byte => Ok(Value::Byte(buf.load_u8()?)),
            Type::Boolean => {
                buf.align_load(origin, 4)?;

                match buf.load_u32()? {
                    0 => Ok(Value::Boolean(false)),
                    1 => Ok(Value::Boolean(true)),
                    value => Err(Error::new(ErrorKind::InvalidBoolean(value))),
                }
            }
            Type::Int16 => {
                buf.align_load(origin, 2)?;
                Ok(Value::Int16(buf.load_i16()?))
            }
            Type::UInt16 => {
                buf.align_load(origin, 2)?;
                Ok(Value::UInt16(buf.load_u16()?))
            }
            Type::Int32 => {
                buf.align_load(origin, 4)?;
                Ok(Value::Int32(buf.load_i32()?))
            }
            Type::UInt32 => {
                buf.align_load(origin, 4)?;
                Ok(Value::UInt32(buf.load_u32()?))
            }
            Type::Int64 => {
                buf.align_load(origin, 8)?;
                Ok(Value::Int64(buf.load_i64()?))
            }
            Type::UInt64 => {
                buf.align_load(origin, 8)?;
                Ok(Value::UInt64(buf.load_u64()?))
            }
            Type::Double => {
                buf.align_load(origin, 8)?;
                Ok(Value::Double(buf.load_f64()?))
            }
            Type::String => Ok(Value::String(read_string(buf, origin)?)),
            Type::ObjectPath => Ok(Value::ObjectPath(read_string(buf, origin)?)),
            Type::Signature => Ok(Value::Signature(read_signature(buf)?)),
            Type::Variant => {
                let signature = read_signature(buf)?;
                let ty = Type::parse(&signature)?;

                if matches!(ty, Type::Tuple(..)) {
                    return Err(Error::new(ErrorKind::UnsupportedVariant(signature.into())));
                }

                Ok(Value::Variant(Box::new(Self::read(buf, origin, &ty)?)))
            }
            Type::Array(element) => {
                buf.align_load(origin, 4)?;
                let length = buf.load_u32()?;

                if length > MAX_ARRAY_LENGTH {
                    return Err(Error::new(ErrorKind::ArrayTooLong(length)));
                }

                // The length field does not imply alignment of the elements;
                // padding to the element boundary precedes the first element
                // and is present even when the array is empty.
                buf.align_load(origin, element.alignment())?;
                let end = buf.cursor() + length as usize;

                if end > buf.limit() {
                    return Err(Error::new(ErrorKind::TruncatedMessage));
                }

                let value = match &**element {
                    Type::DictEntry(key, value) => {
                        let mut entries = Vec::new();

                        while buf.cursor() < end {
                            buf.align_load(origin, 8)?;
                            let k = Self::read(buf, origin, key)?;
                            let v = Self::read(buf, origin, value)?;
                            entries.push((k, v));
                        }

                        Value::Dict((**key).clone(), (**value).clone(), entries)
                    }
                    _ => {
                        let mut values = Vec::new();

                        while buf.cursor() < end {
                            values.push(Self::read(buf, origin, element)?);
                        }

                        Value::Array((**element).clone(), values)
                    }
                };

                if buf.cursor() != end {
                    return Err(Error::new(ErrorKind::TruncatedMessage));
                }

                Ok(value)
            }
            Type::Struct(fields) => {
                buf.align_load(origin, 8)?;
                let mut values = Vec::with_capacity(fields.len());

                for field in fields {
                    values.push(Self::read(buf, origin, field)?);
                }

                Ok(Value::Struct(values))
            }
            Type::DictEntry(..) => Err(Error::from(SignatureError::new(
                SignatureErrorKind::DictEntryNotInsideArray,
            ))),
            Type::Tuple(..) => Err(Error::new(ErrorKind::UnknownType(
                "tuple is not a marshallable value type".into(),
            ))),
        }
    }

    /// Read a body sequence of the given type from the buffer.
    ///
    /// A tuple type reads each of its members in order with no leading
    /// alignment; any other type reads a single value. The unit type reads
    /// nothing.
    pub fn read_many(buf: &mut Buffer, origin: usize, ty: &Type) -> Result<Vec<Self>> {
        match ty {
            Type::Tuple(types) => types
                .iter()
                .map(|ty| Self::read(buf, origin, ty))
                .collect(),
            _ => Ok(vec![Self::read(buf, origin, ty)?]),
        }
    }

    /// Write this value to the buffer.
    ///
    /// Alignment is measured from `origin` and padding is zero-filled. Arrays
    /// are written with a placeholder length which is back-patched once the
    /// last element has been written.
    pub fn write(&self, buf: &mut Buffer, origin: usize) -> Result<()> {
        match self {
            Value::Byte(value) => buf.store_u8(*value),
            Value::Boolean(value) => {
                buf.align_store(origin, 4)?;
                buf.store_u32(*value as u32)
            }
            Value::Int16(value) => {
                buf.align_store(origin, 2)?;
                buf.store_i16(*value)
            }
            Value::UInt16(value) => {
                buf.align_store(origin, 2)?;
                buf.store_u16(*value)
            }
            Value::Int32(value) => {
                buf.align_store(origin, 4)?;
                buf.store_i32(*value)
            }
            Value::UInt32(value) => {
                buf.align_store(origin, 4)?;
                buf.store_u32(*value)
            }
            Value::Int64(value) => {
                buf.align_store(origin, 8)?;
                buf.store_i64(*value)
            }
            Value::UInt64(value) => {
                buf.align_store(origin, 8)?;
                buf.store_u64(*value)
            }
            Value::Double(value) => {
                buf.align_store(origin, 8)?;
                buf.store_f64(*value)
            }
            Value::String(s) | Value::ObjectPath(s) => write_string(buf, origin, s),
            Value::Signature(s) => write_signature(buf, s),
            Value::Variant(inner) => {
                write_signature(buf, &inner.ty().render())?;
                inner.write(buf, origin)
            }
            Value::Array(element, values) => {
                buf.align_store(origin, 4)?;
                let length_at = buf.cursor();
                buf.store_u32(0)?;
                buf.align_store(origin, element.alignment())?;
                let first = buf.cursor();

                for value in values {
                    if value.ty() != *element {
                        return Err(element_mismatch(element, value));
                    }

                    value.write(buf, origin)?;
                }

                patch_length(buf, length_at, first)
            }
            Value::Dict(key_ty, value_ty, entries) => {
                buf.align_store(origin, 4)?;
                let length_at = buf.cursor();
                buf.store_u32(0)?;
                buf.align_store(origin, 8)?;
                let first = buf.cursor();

                for (key, value) in entries {
                    if key.ty() != *key_ty {
                        return Err(element_mismatch(key_ty, key));
                    }

                    if value.ty() != *value_ty {
                        return Err(element_mismatch(value_ty, value));
                    }

                    buf.align_store(origin, 8)?;
                    key.write(buf, origin)?;
                    value.write(buf, origin)?;
                }

                patch_length(buf, length_at, first)
            }
            Value::Struct(fields) => {
                buf.align_store(origin, 8)?;

                for field in fields {
                    field.write(buf, origin)?;
                }

                Ok(())
            }
        }
    }
}

/// Back-patch an array length field with the span between the first element
/// and the current cursor. The length field and the padding preceding the
/// first element are excluded.
fn patch_length(buf: &mut Buffer, length_at: usize, first: usize) -> Result<()> {
    let length = buf.cursor() - first;

    if length > MAX_ARRAY_LENGTH as usize {
        return Err(Error::new(ErrorKind::ArrayTooLong(u32::MAX)));
    }

    buf.store_u32_at(length_at, length as u32)
}

fn element_mismatch(expected: &Type, value: &Value) -> Error {
    Error::new(ErrorKind::UnknownType(
        format!("array element {} does not match element type {}", value.ty(), expected).into(),
    ))
}

fn read_string(buf: &mut Buffer, origin: usize) -> Result<String> {
    buf.align_load(origin, 4)?;
    let length = buf.load_u32()? as usize;
    let bytes = buf.load_slice(length)?.to_vec();

    if buf.load_u8()? != 0 {
        return Err(Error::new(ErrorKind::NotNullTerminated));
    }

    Ok(String::from_utf8(bytes).map_err(|e| e.utf8_error())?)
}

fn write_string(buf: &mut Buffer, origin: usize, s: &str) -> Result<()> {
    let Ok(length) = u32::try_from(s.len()) else {
        return Err(Error::new(ErrorKind::BufferExhausted));
    };

    buf.align_store(origin, 4)?;
    buf.store_u32(length)?;
    buf.extend_from_slice(s.as_bytes())?;
    buf.store_u8(0)
}

fn read_signature(buf: &mut Buffer) -> Result<String> {
    let length = buf.load_u8()? as usize;
    let bytes = buf.load_slice(length)?.to_vec();

    if buf.load_u8()? != 0 {
        return Err(Error::new(ErrorKind::NotNullTerminated));
    }

    Ok(String::from_utf8(bytes).map_err(|e| e.utf8_error())?)
}

fn write_signature(buf: &mut Buffer, s: &str) -> Result<()> {
    if s.len() > MAX_SIGNATURE {
        return Err(Error::from(SignatureError::new(
            SignatureErrorKind::SignatureTooLong,
        )));
    }

    buf.store_u8(s.len() as u8)?;
    buf.extend_from_slice(s.as_bytes())?;
    buf.store_u8(0)
}

impl From<u8> for Value {
    #[inline]
    fn from(value: u8) -> Self {
        Value::Byte(value)
    }
}

impl From<bool> for Value {
    #[inline]
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i16> for Value {
    #[inline]
    fn from(value: i16) -> Self {
        Value::Int16(value)
    }
}

impl From<u16> for Value {
    #[inline]
    fn from(value: u16) -> Self {
        Value::UInt16(value)
    }
}

impl From<i32> for Value {
    #[inline]
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<u32> for Value {
    #[inline]
    fn from(value: u32) -> Self {
        Value::UInt32(value)
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<u64> for Value {
    #[inline]
    fn from(value: u64) -> Self {
        Value::UInt64(value)
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(value: String) -> Self {
        Value::String(value)
    }
}
