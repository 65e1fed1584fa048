// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Flow identification.

use std::fmt;
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ReadBytesExt};

use crate::codec::{Reader, put_u8, put_u16, put_u32};
use crate::error::CodecResult;

/// The 5-tuple plus priority group identifying a flow.
///
/// This is the key of every per-flow table in the switch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub sport: u16,
    pub dport: u16,
    pub protocol: u8,
    pub pg: u8,
}

impl FlowKey {
    /// Number of bytes used on the wire.
    pub const WIRE_BYTES: usize = 14;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        put_u32(out, self.src.into());
        put_u32(out, self.dst.into());
        put_u16(out, self.sport);
        put_u16(out, self.dport);
        put_u8(out, self.protocol);
        put_u8(out, self.pg);
    }

    pub fn read_from(reader: &mut Reader) -> CodecResult<Self> {
        Ok(Self {
            src: Ipv4Addr::from(reader.read_u32::<BigEndian>()?),
            dst: Ipv4Addr::from(reader.read_u32::<BigEndian>()?),
            sport: reader.read_u16::<BigEndian>()?,
            dport: reader.read_u16::<BigEndian>()?,
            protocol: reader.read_u8()?,
            pg: reader.read_u8()?,
        })
    }

    /// The key without the priority group.
    #[must_use]
    pub fn legacy(&self) -> LegacyFlowKey {
        LegacyFlowKey {
            src: self.src,
            dst: self.dst,
            sport: self.sport,
            dport: self.dport,
            protocol: self.protocol,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}:{}/{}/pg{}",
            self.src, self.sport, self.dst, self.dport, self.protocol, self.pg
        )
    }
}

/// An older flow key that does not carry the priority group.
///
/// Two flows that differ only in their priority group map to the same legacy
/// key, so it is never used to index flow state. It only exists so that old
/// captures can be interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LegacyFlowKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub sport: u16,
    pub dport: u16,
    pub protocol: u8,
}

impl LegacyFlowKey {
    /// Promote to a canonical key once the priority group is known.
    #[must_use]
    pub fn with_pg(&self, pg: u8) -> FlowKey {
        FlowKey {
            src: self.src,
            dst: self.dst,
            sport: self.sport,
            dport: self.dport,
            protocol: self.protocol,
            pg,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn key(pg: u8) -> FlowKey {
        FlowKey {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 1, 1),
            sport: 1000,
            dport: 4791,
            protocol: crate::protocol::UDP,
            pg,
        }
    }

    #[test]
    fn layout() {
        let mut out = Vec::new();
        key(3).write_to(&mut out);
        assert_eq!(
            out,
            vec![10, 0, 0, 1, 10, 0, 1, 1, 0x03, 0xe8, 0x12, 0xb7, 0x11, 3]
        );
        let decoded = FlowKey::read_from(&mut Cursor::new(out.as_slice())).unwrap();
        assert_eq!(decoded, key(3));
    }

    #[test]
    fn priority_group_separates_flows() {
        assert_ne!(key(3), key(4));
        assert_eq!(key(3).legacy(), key(4).legacy());
        assert_eq!(key(3).legacy().with_pg(3), key(3));
    }
}
