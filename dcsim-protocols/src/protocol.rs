// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! IP protocol numbers seen by the switch.

pub const TCP: u8 = 0x06;
pub const UDP: u8 = 0x11;
pub const CNCP_REPORT: u8 = 0xFB;
pub const ACK: u8 = 0xFC;
pub const NACK: u8 = 0xFD;
pub const PFC: u8 = 0xFE;
pub const CNP: u8 = 0xFF;

/// PFC and congestion notification frames always travel in the control lane.
#[must_use]
pub fn is_flow_control(protocol: u8) -> bool {
    matches!(protocol, PFC | CNP)
}

#[must_use]
pub fn is_ack(protocol: u8) -> bool {
    matches!(protocol, ACK | NACK)
}
