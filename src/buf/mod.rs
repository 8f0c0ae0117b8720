//! The byte buffer the marshalling codec operates on.

#[cfg(test)]
mod tests;

use crate::error::{ErrorKind, Result};
use crate::protocol::Endianness;

/// The maximum length of an array on the wire (64 MiB).
pub(crate) const MAX_ARRAY_LENGTH: u32 = 1 << 26;
/// The maximum length of a message body on the wire (128 MiB).
pub(crate) const MAX_BODY_LENGTH: u32 = 1 << 27;
/// The largest capacity a buffer is allowed to grow to.
const MAX_CAPACITY: usize = 1 << 28;

/// Calculate padding to the given alignment for an offset.
pub(crate) fn padding_to(offset: usize, alignment: usize) -> usize {
    offset.wrapping_neg() & (alignment - 1)
}

macro_rules! store_number {
    ($(#[$($meta:meta)*])* $name:ident, $ty:ty) => {
        $(#[$($meta)*])*
        pub fn $name(&mut self, value: $ty) -> Result<()> {
            if self.endianness == Endianness::BIG {
                self.store_raw(&value.to_be_bytes())
            } else {
                self.store_raw(&value.to_le_bytes())
            }
        }
    }
}

macro_rules! load_number {
    ($(#[$($meta:meta)*])* $name:ident, $ty:ty) => {
        $(#[$($meta)*])*
        pub fn $name(&mut self) -> Result<$ty> {
            let bytes = self.load_array::<{ std::mem::size_of::<$ty>() }>()?;

            if self.endianness == Endianness::BIG {
                Ok(<$ty>::from_be_bytes(bytes))
            } else {
                Ok(<$ty>::from_le_bytes(bytes))
            }
        }
    }
}

/// A growable byte buffer with cursor and limit semantics.
///
/// The `cursor` is where the next store or load happens; the `limit` is the
/// end of valid data. [`flip()`] transitions a buffer that has been written
/// to into one that can be read back from the start, [`clear()`] resets it
/// for reuse.
///
/// All multi-byte accessors honor the buffer's [`Endianness`]. Alignment is
/// measured from an explicit `origin` (the start of the message being
/// encoded), never from the buffer's own start.
///
/// [`flip()`]: Self::flip
/// [`clear()`]: Self::clear
///
/// # Examples
///
/// ```
/// use minibus::Buffer;
///
/// let mut buf = Buffer::new();
/// buf.store_u32(12345)?;
/// buf.store_i32(-42)?;
///
/// buf.flip();
/// assert_eq!(buf.load_u32()?, 12345);
/// assert_eq!(buf.load_i32()?, -42);
/// # Ok::<_, minibus::Error>(())
/// ```
pub struct Buffer {
    /// Backing storage. The length is the allocated capacity; bytes beyond
    /// `limit` are zero.
    data: Vec<u8>,
    /// Position of the next store or load.
    cursor: usize,
    /// End of valid data.
    limit: usize,
    /// Dynamic endianness of the buffer.
    endianness: Endianness,
}

impl Buffer {
    /// Construct a new empty buffer in native endian.
    pub fn new() -> Self {
        Self::with_endianness(Endianness::NATIVE)
    }

    /// Construct a new buffer with the specified endianness.
    ///
    /// # Examples
    ///
    /// ```
    /// use minibus::{Buffer, Endianness};
    ///
    /// let buf = Buffer::with_endianness(Endianness::LITTLE);
    /// assert_eq!(buf.endianness(), Endianness::LITTLE);
    /// ```
    pub fn with_endianness(endianness: Endianness) -> Self {
        Self {
            data: Vec::new(),
            cursor: 0,
            limit: 0,
            endianness,
        }
    }

    /// Get the endianness of the buffer.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Set the endianness of the buffer.
    pub fn set_endianness(&mut self, endianness: Endianness) {
        self.endianness = endianness;
    }

    /// The position of the next store or load.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move the cursor to an absolute position within the valid region.
    #[inline]
    pub fn set_cursor(&mut self, cursor: usize) {
        debug_assert!(cursor <= self.limit);
        self.cursor = cursor;
    }

    /// The end of valid data.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Remaining bytes between cursor and limit.
    #[inline]
    pub fn len(&self) -> usize {
        self.limit - self.cursor
    }

    /// Test if no bytes remain between cursor and limit.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cursor == self.limit
    }

    /// Reset the buffer for writing: cursor and limit back to zero.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.limit = 0;
    }

    /// Flip the buffer from writing to reading: the limit becomes the current
    /// cursor and the cursor moves back to zero.
    pub fn flip(&mut self) {
        self.limit = self.cursor;
        self.cursor = 0;
    }

    /// Get the valid region between cursor and limit.
    pub fn get(&self) -> &[u8] {
        &self.data[self.cursor..self.limit]
    }

    store_number! {
        /// Store a single byte at the cursor.
        store_u8, u8
    }
    store_number!(store_i16, i16);
    store_number!(store_u16, u16);
    store_number!(store_i32, i32);
    store_number! {
        /// Store a `u32` at the cursor honoring the buffer endianness.
        store_u32, u32
    }
    store_number!(store_i64, i64);
    store_number!(store_u64, u64);
    store_number!(store_f64, f64);

    load_number! {
        /// Load a single byte from the cursor.
        load_u8, u8
    }
    load_number!(load_i16, i16);
    load_number!(load_u16, u16);
    load_number!(load_i32, i32);
    load_number! {
        /// Load a `u32` from the cursor honoring the buffer endianness.
        load_u32, u32
    }
    load_number!(load_i64, i64);
    load_number!(load_u64, u64);
    load_number!(load_f64, f64);

    /// Store a `u32` at an absolute position without moving the cursor.
    ///
    /// This is how array and body lengths are back-patched once their end is
    /// known. The position must already have been written to.
    pub fn store_u32_at(&mut self, at: usize, value: u32) -> Result<()> {
        if at + 4 > self.limit {
            return Err(ErrorKind::TruncatedMessage.into());
        }

        let bytes = if self.endianness == Endianness::BIG {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };

        self.data[at..at + 4].copy_from_slice(&bytes);
        Ok(())
    }

    /// Extend the buffer with a slice.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.store_raw(bytes)
    }

    /// Load `n` bytes from the cursor.
    pub fn load_slice(&mut self, n: usize) -> Result<&[u8]> {
        if self.cursor + n > self.limit {
            return Err(ErrorKind::TruncatedMessage.into());
        }

        let at = self.cursor;
        self.cursor += n;
        Ok(&self.data[at..at + n])
    }

    /// Write zero padding until the distance from `origin` is a multiple of
    /// `alignment`.
    pub fn align_store(&mut self, origin: usize, alignment: usize) -> Result<()> {
        if origin > self.cursor {
            return Err(ErrorKind::BadAlignment.into());
        }

        let padding = padding_to(self.cursor - origin, alignment);
        self.ensure_capacity(self.cursor + padding)?;
        self.data[self.cursor..self.cursor + padding].fill(0);
        self.cursor += padding;
        self.limit = self.limit.max(self.cursor);
        Ok(())
    }

    /// Skip padding until the distance from `origin` is a multiple of
    /// `alignment`.
    ///
    /// Padding content is not inspected.
    pub fn align_load(&mut self, origin: usize, alignment: usize) -> Result<()> {
        if origin > self.cursor {
            return Err(ErrorKind::BadAlignment.into());
        }

        let padding = padding_to(self.cursor - origin, alignment);

        if self.cursor + padding > self.limit {
            return Err(ErrorKind::TruncatedMessage.into());
        }

        self.cursor += padding;
        Ok(())
    }

    /// Get a mutable window of exactly `n` bytes past the limit, growing the
    /// buffer as needed. Used to receive from a socket; follow up with
    /// [`add_filled()`].
    ///
    /// [`add_filled()`]: Self::add_filled
    pub(crate) fn window_mut(&mut self, n: usize) -> Result<&mut [u8]> {
        self.ensure_capacity(self.limit + n)?;
        Ok(&mut self.data[self.limit..self.limit + n])
    }

    /// Mark `n` more bytes past the limit as valid.
    pub(crate) fn add_filled(&mut self, n: usize) {
        self.limit += n;
        debug_assert!(self.limit <= self.data.len());
    }

    fn store_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_capacity(self.cursor + bytes.len())?;
        self.data[self.cursor..self.cursor + bytes.len()].copy_from_slice(bytes);
        self.cursor += bytes.len();
        self.limit = self.limit.max(self.cursor);
        Ok(())
    }

    fn load_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.cursor + N > self.limit {
            return Err(ErrorKind::TruncatedMessage.into());
        }

        let mut bytes = [0; N];
        bytes.copy_from_slice(&self.data[self.cursor..self.cursor + N]);
        self.cursor += N;
        Ok(bytes)
    }

    /// Ensure that the backing storage holds at least `requested` bytes,
    /// doubling until sufficient.
    fn ensure_capacity(&mut self, requested: usize) -> Result<()> {
        if requested <= self.data.len() {
            return Ok(());
        }

        if requested > MAX_CAPACITY {
            return Err(ErrorKind::BufferExhausted.into());
        }

        let capacity = 16usize.max(requested.next_power_of_two());
        self.data.resize(capacity, 0);
        Ok(())
    }
}

impl Default for Buffer {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
