// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! CNCP control headers.
//!
//! A switch periodically reports the number of bytes a flow holds on the node
//! (`q_u`) to the previous hop using a control header. Two layouts exist:
//!
//! | Layout    | Bytes | Fields |
//! |-----------|-------|--------|
//! | canonical | 22    | `src:32 dst:32 sport:16 dport:16 protocol:8 pg:8 flow_info:64` |
//! | legacy    | 12    | `flow_id:32 flow_info:64` |
//!
//! The legacy layout cannot name a flow unambiguously so it is only ever
//! decoded. When the two have to be carried over the same channel they are
//! framed as a [`ControlMessage`], which starts with a type byte.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};

use crate::codec::{Reader, consumed, put_u8, put_u64};
use crate::error::{CodecError, CodecResult};
use crate::flow_key::FlowKey;

/// The canonical CNCP control header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CncpControlHeader {
    pub key: FlowKey,
    pub flow_info: u64,
}

impl CncpControlHeader {
    pub const BYTES: usize = FlowKey::WIRE_BYTES + 8;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        self.key.write_to(out);
        put_u64(out, self.flow_info);
    }

    pub fn read_from(reader: &mut Reader) -> CodecResult<Self> {
        Ok(Self {
            key: FlowKey::read_from(reader)?,
            flow_info: reader.read_u64::<BigEndian>()?,
        })
    }
}

/// The deprecated 12-byte control header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LegacyCncpHeader {
    pub flow_id: u32,
    pub flow_info: u64,
}

impl LegacyCncpHeader {
    pub const BYTES: usize = 12;

    pub fn read_from(reader: &mut Reader) -> CodecResult<Self> {
        Ok(Self {
            flow_id: reader.read_u32::<BigEndian>()?,
            flow_info: reader.read_u64::<BigEndian>()?,
        })
    }
}

const REPORT: u8 = 1;
const LEGACY_REPORT: u8 = 2;

/// A control header framed with a leading type byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    Report(CncpControlHeader),
    LegacyReport(LegacyCncpHeader),
}

impl ControlMessage {
    #[must_use]
    pub fn type_byte(&self) -> u8 {
        match self {
            ControlMessage::Report(_) => REPORT,
            ControlMessage::LegacyReport(_) => LEGACY_REPORT,
        }
    }

    /// Encode the message. Only the canonical layout can be produced.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        match self {
            ControlMessage::Report(header) => {
                let mut out = Vec::with_capacity(1 + CncpControlHeader::BYTES);
                put_u8(&mut out, self.type_byte());
                header.write_to(&mut out);
                Ok(out)
            }
            ControlMessage::LegacyReport(_) => {
                Err(CodecError::Deprecated("12-byte CNCP control header"))
            }
        }
    }

    /// Decode a framed message, returning it and the number of bytes used.
    pub fn decode(bytes: &[u8]) -> CodecResult<(Self, usize)> {
        let mut reader = Cursor::new(bytes);
        let message = match reader.read_u8()? {
            REPORT => ControlMessage::Report(CncpControlHeader::read_from(&mut reader)?),
            LEGACY_REPORT => ControlMessage::LegacyReport(LegacyCncpHeader::read_from(&mut reader)?),
            other => return Err(CodecError::UnknownMessageType(other)),
        };
        Ok((message, consumed(&reader)))
    }

    #[must_use]
    pub fn flow_info(&self) -> u64 {
        match self {
            ControlMessage::Report(header) => header.flow_info,
            ControlMessage::LegacyReport(header) => header.flow_info,
        }
    }
}
