// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Wire formats used by the dcsim switch models.
//!
//! All multi-byte fields are in network byte order. Every header type has a
//! fixed layout and provides `write_to` (append to a byte vector) and
//! `decode` (parse from the start of a slice) functions. Decoding never
//! panics; short or malformed input is reported as a
//! [`CodecError`](crate::error::CodecError).
//!
//! The packet model is in [`packet`](crate::packet): an IPv4 header, a tagged
//! [`L4Header`](crate::l4::L4Header) and a payload length.

pub mod cncp;
pub mod codec;
pub mod error;
pub mod flow_key;
pub mod ipv4;
pub mod l4;
pub mod packet;
pub mod protocol;
pub mod rdma;
pub mod telemetry;
