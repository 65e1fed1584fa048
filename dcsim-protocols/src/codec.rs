// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Helpers shared by the header codecs.

use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder};

/// Reader used by all `decode` functions.
///
/// Use with [`byteorder::ReadBytesExt`]; running off the end maps to
/// [`CodecError::Truncated`](crate::error::CodecError::Truncated).
pub type Reader<'a> = Cursor<&'a [u8]>;

pub fn put_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub fn put_u16(out: &mut Vec<u8>, value: u16) {
    let mut buf = [0; 2];
    BigEndian::write_u16(&mut buf, value);
    out.extend_from_slice(&buf);
}

pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    let mut buf = [0; 4];
    BigEndian::write_u32(&mut buf, value);
    out.extend_from_slice(&buf);
}

pub fn put_u64(out: &mut Vec<u8>, value: u64) {
    let mut buf = [0; 8];
    BigEndian::write_u64(&mut buf, value);
    out.extend_from_slice(&buf);
}

/// Number of bytes consumed so far by a [`Reader`].
#[must_use]
pub fn consumed(reader: &Reader) -> usize {
    // The position can never exceed the slice length which is a usize
    usize::try_from(reader.position()).unwrap_or(usize::MAX)
}
