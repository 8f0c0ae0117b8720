use crate::buf::{padding_to, Buffer};
use crate::error::ErrorKind;
use crate::protocol::Endianness;

#[test]
fn padding() {
    assert_eq!(padding_to(0, 8), 0);
    assert_eq!(padding_to(1, 8), 7);
    assert_eq!(padding_to(8, 8), 0);
    assert_eq!(padding_to(5, 4), 3);
    assert_eq!(padding_to(3, 1), 0);
    assert_eq!(padding_to(7, 2), 1);
}

#[test]
fn primitives_round_trip() -> crate::Result<()> {
    let mut buf = Buffer::new();

    buf.store_u8(0xff)?;
    buf.store_i16(-2)?;
    buf.store_u16(3)?;
    buf.store_i32(-4)?;
    buf.store_u32(5)?;
    buf.store_i64(-6)?;
    buf.store_u64(7)?;
    buf.store_f64(8.5)?;

    buf.flip();

    assert_eq!(buf.load_u8()?, 0xff);
    assert_eq!(buf.load_i16()?, -2);
    assert_eq!(buf.load_u16()?, 3);
    assert_eq!(buf.load_i32()?, -4);
    assert_eq!(buf.load_u32()?, 5);
    assert_eq!(buf.load_i64()?, -6);
    assert_eq!(buf.load_u64()?, 7);
    assert_eq!(buf.load_f64()?, 8.5);
    assert!(buf.is_empty());
    Ok(())
}

#[test]
fn little_endian_layout() -> crate::Result<()> {
    let mut buf = Buffer::with_endianness(Endianness::LITTLE);
    buf.store_u32(12345)?;
    buf.store_i32(-42)?;

    buf.flip();
    assert_eq!(buf.get(), &[0x39, 0x30, 0, 0, 0xd6, 0xff, 0xff, 0xff]);
    Ok(())
}

#[test]
fn big_endian_layout() -> crate::Result<()> {
    let mut buf = Buffer::with_endianness(Endianness::BIG);
    buf.store_u32(0x01020304)?;

    buf.flip();
    assert_eq!(buf.get(), &[1, 2, 3, 4]);
    assert_eq!(buf.load_u32()?, 0x01020304);
    Ok(())
}

#[test]
fn align_from_origin() -> crate::Result<()> {
    let mut buf = Buffer::new();
    buf.store_u8(1)?;
    buf.align_store(0, 4)?;
    assert_eq!(buf.cursor(), 4);
    buf.store_u32(2)?;

    // With the origin moved to 4 the store above is already aligned.
    buf.align_store(4, 8)?;
    assert_eq!(buf.cursor(), 8);

    buf.flip();
    assert_eq!(buf.get(), &[1, 0, 0, 0, 2, 0, 0, 0]);

    buf.load_u8()?;
    buf.align_load(0, 4)?;
    assert_eq!(buf.load_u32()?, 2);
    Ok(())
}

#[test]
fn align_origin_past_cursor() {
    let mut buf = Buffer::new();

    let error = buf.align_store(8, 4).unwrap_err();
    assert!(matches!(error.kind(), ErrorKind::BadAlignment));
}

#[test]
fn load_underflow() -> crate::Result<()> {
    let mut buf = Buffer::new();
    buf.store_u16(1)?;
    buf.flip();

    let error = buf.load_u32().unwrap_err();
    assert!(matches!(error.kind(), ErrorKind::TruncatedMessage));
    Ok(())
}

#[test]
fn growth_preserves_contents() -> crate::Result<()> {
    let mut buf = Buffer::new();

    for n in 0..1000u32 {
        buf.store_u32(n)?;
    }

    buf.flip();

    for n in 0..1000u32 {
        assert_eq!(buf.load_u32()?, n);
    }

    Ok(())
}

#[test]
fn store_at_back_patch() -> crate::Result<()> {
    let mut buf = Buffer::new();
    let at = buf.cursor();
    buf.store_u32(0)?;
    buf.extend_from_slice(b"abcd")?;
    buf.store_u32_at(at, 4)?;

    buf.flip();
    assert_eq!(buf.load_u32()?, 4);
    assert_eq!(buf.load_slice(4)?, b"abcd");
    Ok(())
}

#[test]
fn clear_resets() -> crate::Result<()> {
    let mut buf = Buffer::new();
    buf.store_u64(1)?;
    buf.flip();
    assert_eq!(buf.len(), 8);

    buf.clear();
    assert_eq!(buf.len(), 0);
    buf.store_u8(2)?;
    buf.flip();
    assert_eq!(buf.get(), &[2]);
    Ok(())
}

#[test]
fn window_fill() -> crate::Result<()> {
    let mut buf = Buffer::new();

    let window = buf.window_mut(4)?;
    window.copy_from_slice(&[1, 2, 3, 4]);
    buf.add_filled(4);

    assert_eq!(buf.get(), &[1, 2, 3, 4]);
    Ok(())
}
