// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! In-band telemetry carried inside the RDMA header.
//!
//! Three forms are supported:
//!  - a list of per-hop INT records (used by HPCC),
//!  - a single timestamp,
//!  - a PINT power field: a compressed, max-held utilisation value.
//!
//! The size of the sub-header only depends on the [`TelemetryMode`] so it can
//! be computed without looking at the packet.

use byteorder::{BigEndian, ReadBytesExt};

use crate::codec::{Reader, put_u8, put_u16, put_u64};
use crate::error::{CodecError, CodecResult};

/// Maximum number of hop records in an INT sub-header.
pub const MAX_HOPS: usize = 5;

const RATE_BITS: u32 = 3;
const TIME_BITS: u32 = 24;
const BYTES_BITS: u32 = 20;
const QLEN_BITS: u32 = 17;

const TIME_SHIFT: u32 = RATE_BITS;
const BYTES_SHIFT: u32 = TIME_SHIFT + TIME_BITS;
const QLEN_SHIFT: u32 = BYTES_SHIFT + BYTES_BITS;

/// Granularity of the transmitted-bytes counter.
pub const BYTES_UNIT: u64 = 128;

/// Granularity of the queue length.
pub const QLEN_UNIT: u64 = 80;

const fn mask(bits: u32) -> u64 {
    (1 << bits) - 1
}

const LINE_RATES_BPS: [u64; 7] = [
    25_000_000_000,
    50_000_000_000,
    100_000_000_000,
    200_000_000_000,
    400_000_000_000,
    10_000_000_000,
    40_000_000_000,
];

/// One 64-bit INT hop record.
///
/// From the least significant bit: `line_rate:3 | time:24 | bytes:20 |
/// qlen:17`. Time and byte counters wrap; consumers work with differences.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IntHop(pub u64);

impl IntHop {
    pub fn new(time_ns: u64, tx_bytes: u64, qlen_bytes: u64, rate_bps: u64) -> CodecResult<Self> {
        let rate_code = LINE_RATES_BPS
            .iter()
            .position(|r| *r == rate_bps)
            .ok_or(CodecError::UnsupportedLineRate(rate_bps))? as u64;

        Ok(Self(
            rate_code
                | ((time_ns & mask(TIME_BITS)) << TIME_SHIFT)
                | (((tx_bytes / BYTES_UNIT) & mask(BYTES_BITS)) << BYTES_SHIFT)
                | (((qlen_bytes / QLEN_UNIT) & mask(QLEN_BITS)) << QLEN_SHIFT),
        ))
    }

    #[must_use]
    pub fn line_rate_bps(&self) -> u64 {
        let code = (self.0 & mask(RATE_BITS)) as usize;
        // Codes 7 and above are never produced by `new`
        LINE_RATES_BPS.get(code).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn time_ns(&self) -> u64 {
        (self.0 >> TIME_SHIFT) & mask(TIME_BITS)
    }

    #[must_use]
    pub fn tx_bytes(&self) -> u64 {
        ((self.0 >> BYTES_SHIFT) & mask(BYTES_BITS)) * BYTES_UNIT
    }

    #[must_use]
    pub fn qlen_bytes(&self) -> u64 {
        ((self.0 >> QLEN_SHIFT) & mask(QLEN_BITS)) * QLEN_UNIT
    }
}

/// Encoder for the PINT power field.
///
/// A utilisation `u` is stored as `ceil(log_base(u))` offset by half of the
/// field range so that values both above and below one can be represented.
/// Zero is reserved for "no value".
#[derive(Copy, Clone, Debug)]
pub struct PintCodec {
    bits: u32,
    log_base: f64,
}

impl PintCodec {
    pub fn new(pint_bytes: u8, log_base: f64) -> CodecResult<Self> {
        if !(1..=2).contains(&pint_bytes) {
            return Err(CodecError::InvalidField("pint bytes"));
        }
        if log_base <= 1.0 {
            return Err(CodecError::InvalidField("pint log base"));
        }
        Ok(Self {
            bits: u32::from(pint_bytes) * 8,
            log_base,
        })
    }

    #[must_use]
    pub fn pint_bytes(&self) -> u8 {
        (self.bits / 8) as u8
    }

    fn max_power(&self) -> u16 {
        mask(self.bits) as u16
    }

    fn offset(&self) -> f64 {
        f64::from(1u32 << (self.bits - 1))
    }

    #[must_use]
    pub fn encode_u(&self, u: f64) -> u16 {
        if u <= 0.0 || u.is_nan() {
            return 0;
        }
        let power = (u.ln() / self.log_base.ln()).ceil() + self.offset();
        power.clamp(1.0, f64::from(self.max_power())) as u16
    }

    #[must_use]
    pub fn decode_u(&self, power: u16) -> f64 {
        if power == 0 {
            return 0.0;
        }
        self.log_base.powf(f64::from(power) - self.offset())
    }
}

/// Selects the layout of the telemetry sub-header.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TelemetryMode {
    #[default]
    None,
    IntHops,
    Timestamp,
    Pint {
        bytes: u8,
    },
}

impl TelemetryMode {
    /// Number of bytes taken by a sub-header of this mode.
    #[must_use]
    pub fn static_size(&self) -> usize {
        match self {
            TelemetryMode::None => 0,
            TelemetryMode::IntHops => MAX_HOPS * 8 + 2,
            TelemetryMode::Timestamp => 8,
            TelemetryMode::Pint { bytes } => usize::from(*bytes),
        }
    }
}

/// The telemetry sub-header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TelemetryHeader {
    #[default]
    None,
    IntHops(Vec<IntHop>),
    Timestamp(u64),
    Pint {
        power: u16,
        bytes: u8,
    },
}

impl TelemetryHeader {
    /// An empty sub-header for the given mode.
    #[must_use]
    pub fn empty(mode: TelemetryMode) -> Self {
        match mode {
            TelemetryMode::None => TelemetryHeader::None,
            TelemetryMode::IntHops => TelemetryHeader::IntHops(Vec::with_capacity(MAX_HOPS)),
            TelemetryMode::Timestamp => TelemetryHeader::Timestamp(0),
            TelemetryMode::Pint { bytes } => TelemetryHeader::Pint { power: 0, bytes },
        }
    }

    #[must_use]
    pub fn mode(&self) -> TelemetryMode {
        match self {
            TelemetryHeader::None => TelemetryMode::None,
            TelemetryHeader::IntHops(_) => TelemetryMode::IntHops,
            TelemetryHeader::Timestamp(_) => TelemetryMode::Timestamp,
            TelemetryHeader::Pint { bytes, .. } => TelemetryMode::Pint { bytes: *bytes },
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.mode().static_size()
    }

    /// Append a hop record. Returns `false` if the header is not an INT header
    /// or it is already full.
    pub fn push_hop(&mut self, hop: IntHop) -> bool {
        match self {
            TelemetryHeader::IntHops(hops) if hops.len() < MAX_HOPS => {
                hops.push(hop);
                true
            }
            _ => false,
        }
    }

    /// Overwrite the PINT power only if `power` is larger than the current
    /// value. Returns whether the header changed.
    pub fn max_hold_power(&mut self, new_power: u16) -> bool {
        match self {
            TelemetryHeader::Pint { power, .. } if new_power > *power => {
                *power = new_power;
                true
            }
            _ => false,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            TelemetryHeader::None => {}
            TelemetryHeader::IntHops(hops) => {
                for slot in 0..MAX_HOPS {
                    put_u64(out, hops.get(slot).map_or(0, |h| h.0));
                }
                put_u16(out, hops.len() as u16);
            }
            TelemetryHeader::Timestamp(ts) => put_u64(out, *ts),
            TelemetryHeader::Pint { power, bytes } => {
                if *bytes == 1 {
                    put_u8(out, *power as u8);
                } else {
                    put_u16(out, *power);
                }
            }
        }
    }

    pub fn read_from(reader: &mut Reader, mode: TelemetryMode) -> CodecResult<Self> {
        match mode {
            TelemetryMode::None => Ok(TelemetryHeader::None),
            TelemetryMode::IntHops => {
                let mut slots = [IntHop::default(); MAX_HOPS];
                for slot in &mut slots {
                    *slot = IntHop(reader.read_u64::<BigEndian>()?);
                }
                let nhop = usize::from(reader.read_u16::<BigEndian>()?);
                if nhop > MAX_HOPS {
                    return Err(CodecError::InvalidField("nhop"));
                }
                Ok(TelemetryHeader::IntHops(slots[..nhop].to_vec()))
            }
            TelemetryMode::Timestamp => {
                Ok(TelemetryHeader::Timestamp(reader.read_u64::<BigEndian>()?))
            }
            TelemetryMode::Pint { bytes: 1 } => Ok(TelemetryHeader::Pint {
                power: u16::from(reader.read_u8()?),
                bytes: 1,
            }),
            TelemetryMode::Pint { bytes: 2 } => Ok(TelemetryHeader::Pint {
                power: reader.read_u16::<BigEndian>()?,
                bytes: 2,
            }),
            TelemetryMode::Pint { .. } => Err(CodecError::InvalidField("pint bytes")),
        }
    }
}
