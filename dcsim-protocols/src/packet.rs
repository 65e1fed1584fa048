// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The packet passed between switch ports.
//!
//! Only headers are modelled byte-accurately; the payload is a length.

use std::fmt;
use std::io::Cursor;
use std::net::Ipv4Addr;
use std::rc::Rc;

use dcsim_engine::traits::TotalBytes;
use dcsim_track::entity::Entity;
use dcsim_track::{Id, Unique, create, create_id};

use crate::error::{CodecError, CodecResult};
use crate::flow_key::FlowKey;
use crate::ipv4::{Ecn, Ipv4Header};
use crate::l4::{L4Header, TcpHeader, UdpHeader};
use crate::rdma::RdmaHeader;
use crate::telemetry::{TelemetryHeader, TelemetryMode};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// The unique id used for tracking this packet.
    pub id: Id,

    pub ip: Ipv4Header,
    pub l4: L4Header,

    payload_bytes: usize,

    /// Port on which the packet entered the current switch. Set on admission
    /// and used to return ingress credit when the packet leaves.
    pub ingress_port: Option<usize>,
}

impl Packet {
    /// Create a new packet, tracking its creation by `created_by`.
    pub fn new(
        created_by: &Rc<Entity>,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        l4: L4Header,
        payload_bytes: usize,
    ) -> Self {
        let pkt = Self::with_id(create_id!(created_by), src, dst, l4, payload_bytes);
        create!(created_by ; pkt, pkt.total_bytes());
        pkt
    }

    /// Create a packet with a known id (for example one that was decoded).
    #[must_use]
    pub fn with_id(id: Id, src: Ipv4Addr, dst: Ipv4Addr, l4: L4Header, payload_bytes: usize) -> Self {
        let mut ip = Ipv4Header::new(src, dst, l4.protocol());
        ip.payload_len = u16::try_from(l4.size() + payload_bytes).unwrap_or(u16::MAX);
        Self {
            id,
            ip,
            l4,
            payload_bytes,
            ingress_port: None,
        }
    }

    /// Build an RDMA-over-UDP data packet of `size` bytes in total.
    ///
    /// Sizes smaller than the headers produce a header-only packet.
    #[allow(clippy::too_many_arguments)]
    pub fn rdma(
        created_by: &Rc<Entity>,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        sport: u16,
        dport: u16,
        pg: u16,
        seq: u32,
        mode: TelemetryMode,
        size: usize,
    ) -> Self {
        let l4 = L4Header::Udp(UdpHeader {
            sport,
            dport,
            rdma: RdmaHeader::new(seq, pg, mode),
        });
        let payload_bytes = size.saturating_sub(Ipv4Header::BYTES + l4.size());
        Self::new(created_by, src, dst, l4, payload_bytes)
    }

    /// Build a TCP packet of `size` bytes in total.
    pub fn tcp(
        created_by: &Rc<Entity>,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        header: TcpHeader,
        size: usize,
    ) -> Self {
        let l4 = L4Header::Tcp(header);
        let payload_bytes = size.saturating_sub(Ipv4Header::BYTES + l4.size());
        Self::new(created_by, src, dst, l4, payload_bytes)
    }

    #[must_use]
    pub fn protocol(&self) -> u8 {
        self.ip.protocol
    }

    #[must_use]
    pub fn payload_bytes(&self) -> usize {
        self.payload_bytes
    }

    /// Total bytes on the wire.
    #[must_use]
    pub fn size(&self) -> usize {
        Ipv4Header::BYTES + self.l4.size() + self.payload_bytes
    }

    /// The priority group carried in the header, if this protocol has one.
    #[must_use]
    pub fn priority_group(&self) -> Option<u16> {
        match &self.l4 {
            L4Header::Udp(udp) => Some(udp.rdma.pg),
            L4Header::Ack(ack) | L4Header::Nack(ack) => Some(ack.pg),
            _ => None,
        }
    }

    /// Source and destination ports, if this protocol has them.
    #[must_use]
    pub fn ports(&self) -> Option<(u16, u16)> {
        match &self.l4 {
            L4Header::Tcp(tcp) => Some((tcp.sport, tcp.dport)),
            L4Header::Udp(udp) => Some((udp.sport, udp.dport)),
            L4Header::Ack(ack) | L4Header::Nack(ack) => Some((ack.sport, ack.dport)),
            _ => None,
        }
    }

    /// The canonical key of the flow this packet belongs to.
    #[must_use]
    pub fn flow_key(&self) -> Option<FlowKey> {
        let (sport, dport) = self.ports()?;
        let pg = self.priority_group().unwrap_or(0);
        Some(FlowKey {
            src: self.ip.src,
            dst: self.ip.dst,
            sport,
            dport,
            protocol: self.ip.protocol,
            pg: u8::try_from(pg).unwrap_or(u8::MAX),
        })
    }

    pub fn set_ecn(&mut self, ecn: Ecn) {
        self.ip.set_ecn(ecn);
    }

    /// The telemetry sub-header of an RDMA packet.
    pub fn telemetry_mut(&mut self) -> Option<&mut TelemetryHeader> {
        match &mut self.l4 {
            L4Header::Udp(udp) => Some(&mut udp.rdma.telemetry),
            _ => None,
        }
    }

    #[must_use]
    pub fn telemetry(&self) -> Option<&TelemetryHeader> {
        match &self.l4 {
            L4Header::Udp(udp) => Some(&udp.rdma.telemetry),
            _ => None,
        }
    }

    /// Serialise the packet. The payload is zero-filled.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.ip.write_to(&mut out);
        self.l4.write_to(&mut out, self.payload_bytes);
        out.resize(self.size(), 0);
        out
    }

    /// Parse a packet. `mode` selects the telemetry layout of UDP packets.
    pub fn decode(id: Id, bytes: &[u8], mode: TelemetryMode) -> CodecResult<Self> {
        let mut reader = Cursor::new(bytes);
        let ip = Ipv4Header::read_from(&mut reader)?;
        let l4 = L4Header::read_from(&mut reader, ip.protocol, mode)?;
        let payload_bytes = usize::from(ip.payload_len)
            .checked_sub(l4.size())
            .ok_or(CodecError::InvalidField("total length"))?;
        if bytes.len() < Ipv4Header::BYTES + l4.size() + payload_bytes {
            return Err(CodecError::Truncated);
        }
        Ok(Self {
            id,
            ip,
            l4,
            payload_bytes,
            ingress_port: None,
        })
    }
}

impl TotalBytes for Packet {
    fn total_bytes(&self) -> usize {
        self.size()
    }
}

impl Unique for Packet {
    fn id(&self) -> Id {
        self.id
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
