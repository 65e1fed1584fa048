// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Errors reported when decoding or encoding headers.

use std::error::Error;
use std::fmt;
use std::io;

/// The error type for all the codecs in this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended before the header was complete.
    Truncated,

    /// The IP protocol number is not one the switch understands.
    UnknownProtocol(u8),

    /// The framing type byte of a control message is not known.
    UnknownMessageType(u8),

    /// The link rate cannot be expressed in an INT hop record.
    UnsupportedLineRate(u64),

    /// A header field holds a value that is not valid for this format.
    InvalidField(&'static str),

    /// The format may be decoded but must not be produced any more.
    Deprecated(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodecError::Truncated => write!(f, "truncated header"),
            CodecError::UnknownProtocol(p) => write!(f, "unknown protocol 0x{p:02x}"),
            CodecError::UnknownMessageType(t) => write!(f, "unknown control message type {t}"),
            CodecError::UnsupportedLineRate(bps) => {
                write!(f, "line rate {bps}bps not supported in INT")
            }
            CodecError::InvalidField(field) => write!(f, "invalid value in field {field}"),
            CodecError::Deprecated(what) => write!(f, "{what} is deprecated"),
        }
    }
}

impl Error for CodecError {}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => CodecError::Truncated,
            _ => CodecError::InvalidField("io"),
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
