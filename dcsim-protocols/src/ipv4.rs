// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The IPv4 header, including the ECN codepoint.

use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};

use crate::codec::{Reader, put_u8, put_u16, put_u32};
use crate::error::{CodecError, CodecResult};

/// The two ECN bits held in the bottom of the TOS byte.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Ecn {
    #[default]
    NotEct = 0b00,
    Ect1 = 0b01,
    Ect0 = 0b10,
    Ce = 0b11,
}

impl From<u8> for Ecn {
    fn from(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Ecn::NotEct,
            0b01 => Ecn::Ect1,
            0b10 => Ecn::Ect0,
            _ => Ecn::Ce,
        }
    }
}

/// A 20-byte IPv4 header (no options).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
    pub tos: u8,
    /// Bytes following the IP header.
    pub payload_len: u16,
    pub identification: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    pub const BYTES: usize = 20;

    #[must_use]
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8) -> Self {
        Self {
            tos: 0,
            payload_len: 0,
            identification: 0,
            ttl: 64,
            protocol,
            src,
            dst,
        }
    }

    #[must_use]
    pub fn ecn(&self) -> Ecn {
        Ecn::from(self.tos)
    }

    pub fn set_ecn(&mut self, ecn: Ecn) {
        self.tos = (self.tos & !0b11) | ecn as u8;
    }

    fn checksum(words: &[u8]) -> u16 {
        let mut sum: u32 = words
            .chunks_exact(2)
            .map(|w| u32::from(BigEndian::read_u16(w)))
            .sum();
        while sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        // Folded above so this cannot truncate
        !(sum as u16)
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        let start = out.len();
        put_u8(out, 0x45);
        put_u8(out, self.tos);
        put_u16(out, self.payload_len.saturating_add(Self::BYTES as u16));
        put_u16(out, self.identification);
        put_u16(out, 0);
        put_u8(out, self.ttl);
        put_u8(out, self.protocol);
        put_u16(out, 0);
        put_u32(out, self.src.into());
        put_u32(out, self.dst.into());
        let checksum = Self::checksum(&out[start..]);
        BigEndian::write_u16(&mut out[start + 10..start + 12], checksum);
    }

    pub fn read_from(reader: &mut Reader) -> CodecResult<Self> {
        let version_ihl = reader.read_u8()?;
        if version_ihl != 0x45 {
            return Err(CodecError::InvalidField("version/ihl"));
        }
        let tos = reader.read_u8()?;
        let total_len = reader.read_u16::<BigEndian>()?;
        let identification = reader.read_u16::<BigEndian>()?;
        let _flags_fragment = reader.read_u16::<BigEndian>()?;
        let ttl = reader.read_u8()?;
        let protocol = reader.read_u8()?;
        let _checksum = reader.read_u16::<BigEndian>()?;
        let src = Ipv4Addr::from(reader.read_u32::<BigEndian>()?);
        let dst = Ipv4Addr::from(reader.read_u32::<BigEndian>()?);
        let payload_len = total_len
            .checked_sub(Self::BYTES as u16)
            .ok_or(CodecError::InvalidField("total length"))?;
        Ok(Self {
            tos,
            payload_len,
            identification,
            ttl,
            protocol,
            src,
            dst,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn ecn_rewrite_keeps_dscp() {
        let mut header = Ipv4Header::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            crate::protocol::UDP,
        );
        header.tos = 0b1010_1010;
        assert_eq!(header.ecn(), Ecn::Ect0);
        header.set_ecn(Ecn::Ce);
        assert_eq!(header.tos, 0b1010_1011);
        assert_eq!(header.ecn(), Ecn::Ce);
    }

    #[test]
    fn checksum_verifies() {
        let mut header = Ipv4Header::new(
            Ipv4Addr::new(192, 168, 0, 1),
            Ipv4Addr::new(192, 168, 0, 199),
            crate::protocol::TCP,
        );
        header.payload_len = 40;
        let mut out = Vec::new();
        header.write_to(&mut out);
        assert_eq!(out.len(), Ipv4Header::BYTES);
        // Summing a header including its checksum gives all ones
        assert_eq!(Ipv4Header::checksum(&out), 0);

        let decoded = Ipv4Header::read_from(&mut Cursor::new(out.as_slice())).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn short_input() {
        let out = [0x45, 0, 0];
        assert_eq!(
            Ipv4Header::read_from(&mut Cursor::new(&out[..])),
            Err(CodecError::Truncated)
        );
    }
}
