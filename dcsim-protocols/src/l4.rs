// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Headers carried after the IPv4 header, one variant per protocol number.

use byteorder::{BigEndian, ReadBytesExt};

use crate::cncp::CncpControlHeader;
use crate::codec::{Reader, put_u8, put_u16, put_u32};
use crate::error::{CodecError, CodecResult};
use crate::protocol;
use crate::rdma::RdmaHeader;
use crate::telemetry::TelemetryMode;

/// `sport:16 dport:16 seq:32 ack:32`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TcpHeader {
    pub sport: u16,
    pub dport: u16,
    pub seq: u32,
    pub ack: u32,
}

/// `sport:16 dport:16 len:16 csum:16` followed by the [`RdmaHeader`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UdpHeader {
    pub sport: u16,
    pub dport: u16,
    pub rdma: RdmaHeader,
}

/// `sport:16 dport:16 flags:16 pg:16 seq:32`, used for both ACK and NACK.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AckHeader {
    pub sport: u16,
    pub dport: u16,
    pub flags: u16,
    pub pg: u16,
    pub seq: u32,
}

/// `time:32 qlen:32 lane:8`
///
/// A pause time of zero resumes the lane.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PfcHeader {
    pub time: u32,
    pub qlen: u32,
    pub lane: u8,
}

impl PfcHeader {
    /// Default pause quanta sent when a lane is paused.
    pub const PAUSE_TIME: u32 = 0xffff;

    #[must_use]
    pub fn pause(lane: u8, qlen: u32) -> Self {
        Self {
            time: Self::PAUSE_TIME,
            qlen,
            lane,
        }
    }

    #[must_use]
    pub fn resume(lane: u8, qlen: u32) -> Self {
        Self { time: 0, qlen, lane }
    }

    #[must_use]
    pub fn is_resume(&self) -> bool {
        self.time == 0
    }
}

/// `flow_id:16 lane:8 ecn:8`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CnpHeader {
    pub flow_id: u16,
    pub lane: u8,
    pub ecn: u8,
}

/// The transport part of a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum L4Header {
    Tcp(TcpHeader),
    Udp(UdpHeader),
    Ack(AckHeader),
    Nack(AckHeader),
    Pfc(PfcHeader),
    Cnp(CnpHeader),
    CncpReport(CncpControlHeader),
}

impl L4Header {
    #[must_use]
    pub fn protocol(&self) -> u8 {
        match self {
            L4Header::Tcp(_) => protocol::TCP,
            L4Header::Udp(_) => protocol::UDP,
            L4Header::Ack(_) => protocol::ACK,
            L4Header::Nack(_) => protocol::NACK,
            L4Header::Pfc(_) => protocol::PFC,
            L4Header::Cnp(_) => protocol::CNP,
            L4Header::CncpReport(_) => protocol::CNCP_REPORT,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            L4Header::Tcp(_) | L4Header::Ack(_) | L4Header::Nack(_) => 12,
            L4Header::Udp(udp) => 8 + udp.rdma.size(),
            L4Header::Pfc(_) => 9,
            L4Header::Cnp(_) => 4,
            L4Header::CncpReport(_) => CncpControlHeader::BYTES,
        }
    }

    /// Append the header. `payload_bytes` is only needed for the UDP length.
    pub fn write_to(&self, out: &mut Vec<u8>, payload_bytes: usize) {
        match self {
            L4Header::Tcp(tcp) => {
                put_u16(out, tcp.sport);
                put_u16(out, tcp.dport);
                put_u32(out, tcp.seq);
                put_u32(out, tcp.ack);
            }
            L4Header::Udp(udp) => {
                let len = u16::try_from(self.size() + payload_bytes).unwrap_or(u16::MAX);
                put_u16(out, udp.sport);
                put_u16(out, udp.dport);
                put_u16(out, len);
                put_u16(out, 0);
                udp.rdma.write_to(out);
            }
            L4Header::Ack(ack) | L4Header::Nack(ack) => {
                put_u16(out, ack.sport);
                put_u16(out, ack.dport);
                put_u16(out, ack.flags);
                put_u16(out, ack.pg);
                put_u32(out, ack.seq);
            }
            L4Header::Pfc(pfc) => {
                put_u32(out, pfc.time);
                put_u32(out, pfc.qlen);
                put_u8(out, pfc.lane);
            }
            L4Header::Cnp(cnp) => {
                put_u16(out, cnp.flow_id);
                put_u8(out, cnp.lane);
                put_u8(out, cnp.ecn);
            }
            L4Header::CncpReport(report) => report.write_to(out),
        }
    }

    /// Decode the header for `protocol_number`. The telemetry `mode` is only used
    /// for UDP.
    pub fn read_from(
        reader: &mut Reader,
        protocol_number: u8,
        mode: TelemetryMode,
    ) -> CodecResult<Self> {
        let header = match protocol_number {
            protocol::TCP => L4Header::Tcp(TcpHeader {
                sport: reader.read_u16::<BigEndian>()?,
                dport: reader.read_u16::<BigEndian>()?,
                seq: reader.read_u32::<BigEndian>()?,
                ack: reader.read_u32::<BigEndian>()?,
            }),
            protocol::UDP => {
                let sport = reader.read_u16::<BigEndian>()?;
                let dport = reader.read_u16::<BigEndian>()?;
                let _len = reader.read_u16::<BigEndian>()?;
                let _csum = reader.read_u16::<BigEndian>()?;
                L4Header::Udp(UdpHeader {
                    sport,
                    dport,
                    rdma: RdmaHeader::read_from(reader, mode)?,
                })
            }
            protocol::ACK | protocol::NACK => {
                let ack = AckHeader {
                    sport: reader.read_u16::<BigEndian>()?,
                    dport: reader.read_u16::<BigEndian>()?,
                    flags: reader.read_u16::<BigEndian>()?,
                    pg: reader.read_u16::<BigEndian>()?,
                    seq: reader.read_u32::<BigEndian>()?,
                };
                if protocol_number == protocol::ACK {
                    L4Header::Ack(ack)
                } else {
                    L4Header::Nack(ack)
                }
            }
            protocol::PFC => L4Header::Pfc(PfcHeader {
                time: reader.read_u32::<BigEndian>()?,
                qlen: reader.read_u32::<BigEndian>()?,
                lane: reader.read_u8()?,
            }),
            protocol::CNP => L4Header::Cnp(CnpHeader {
                flow_id: reader.read_u16::<BigEndian>()?,
                lane: reader.read_u8()?,
                ecn: reader.read_u8()?,
            }),
            protocol::CNCP_REPORT => L4Header::CncpReport(CncpControlHeader::read_from(reader)?),
            other => return Err(CodecError::UnknownProtocol(other)),
        };
        Ok(header)
    }
}
