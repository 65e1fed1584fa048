// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The RDMA sequence header that follows the UDP header.

use byteorder::{BigEndian, ReadBytesExt};

use crate::codec::{Reader, put_u16, put_u32};
use crate::error::CodecResult;
use crate::telemetry::{TelemetryHeader, TelemetryMode};

/// `seq:32 pg:16` followed by the telemetry sub-header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RdmaHeader {
    pub seq: u32,
    pub pg: u16,
    pub telemetry: TelemetryHeader,
}

impl RdmaHeader {
    const FIXED_BYTES: usize = 6;

    #[must_use]
    pub fn new(seq: u32, pg: u16, mode: TelemetryMode) -> Self {
        Self {
            seq,
            pg,
            telemetry: TelemetryHeader::empty(mode),
        }
    }

    /// Size of a header carrying telemetry of the given mode.
    #[must_use]
    pub fn static_size(mode: TelemetryMode) -> usize {
        Self::FIXED_BYTES + mode.static_size()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        Self::static_size(self.telemetry.mode())
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        put_u32(out, self.seq);
        put_u16(out, self.pg);
        self.telemetry.write_to(out);
    }

    pub fn read_from(reader: &mut Reader, mode: TelemetryMode) -> CodecResult<Self> {
        Ok(Self {
            seq: reader.read_u32::<BigEndian>()?,
            pg: reader.read_u16::<BigEndian>()?,
            telemetry: TelemetryHeader::read_from(reader, mode)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::error::CodecError;

    #[test]
    fn sizes_follow_mode() {
        assert_eq!(RdmaHeader::static_size(TelemetryMode::None), 6);
        assert_eq!(RdmaHeader::static_size(TelemetryMode::IntHops), 48);
        assert_eq!(RdmaHeader::new(1, 3, TelemetryMode::Timestamp).size(), 14);
    }

    #[test]
    fn layout() {
        let header = RdmaHeader::new(0x01020304, 3, TelemetryMode::Pint { bytes: 1 });
        let mut out = Vec::new();
        header.write_to(&mut out);
        assert_eq!(out, vec![1, 2, 3, 4, 0, 3, 0]);
    }

    #[test]
    fn truncated_telemetry() {
        let out = [0, 0, 0, 1, 0, 3, 0, 0];
        assert_eq!(
            RdmaHeader::read_from(&mut Cursor::new(&out[..]), TelemetryMode::Timestamp),
            Err(CodecError::Truncated)
        );
    }
}
