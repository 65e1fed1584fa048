// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Per-port transmit statistics and the utilisation estimate used for PINT.
//!
//! The estimate follows HPCC: for a packet leaving a port with link bandwidth
//! `B` (bytes/s), maximum RTT `T` and queue length `q`,
//!
//! ```text
//! u' = dt * q / (B * T^2) + size / (B * T) + (T - dt) * u / T
//! ```
//!
//! where `dt` is the time since the previous packet (at most `T`) and `size`
//! is the size of the previous packet. Each term is evaluated in the log
//! domain using the fixed-point approximation [`log2apprx`].

use rand::RngCore;

/// Parameters used for all `log2apprx` calls.
const LOG_B: usize = 20;
const LOG_M: u32 = 16;
const LOG_L: u32 = 20;

/// Scale applied to the queue length before taking its log.
const QLEN_SCALE: u64 = 256;

/// Scale applied to `u` before taking its log.
const U_SCALE: f64 = 8192.0;

const LOGRES_DATA: [u32; 33] = [
    0, 0, 1, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4, 4, 4, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5,
    5,
];

/// Number of fractional bits in the result of [`log2apprx`].
#[must_use]
pub fn logres_shift(b: usize, l: u32) -> u32 {
    l - LOGRES_DATA[b.min(LOGRES_DATA.len() - 1)]
}

/// Approximate `log2(x) * 2^logres_shift(b, l)`.
///
/// `x` is first truncated to `m` significant bits. When bits are discarded the
/// truncated value is rounded up by one unit with a probability proportional
/// to the discarded part, using `rng`. Zero is treated as one.
pub fn log2apprx(x: u64, b: usize, m: u32, l: u32, rng: &mut impl RngCore) -> i64 {
    let x0 = x.max(1);
    let msb = u64::BITS - x0.leading_zeros();
    let mut x = x0;
    if msb > m {
        let dropped = msb - m;
        x = x0 >> dropped << dropped;
        let mask = (1u64 << dropped) - 1;
        if x0 & mask > rng.next_u64() & mask {
            x += 1 << dropped;
        }
    }
    ((x as f64).log2() * f64::from(1u32 << logres_shift(b, l))) as i64
}

/// Transmit statistics for one port.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortTelemetry {
    pub tx_bytes: u64,
    pub last_pkt_size: u64,
    pub last_pkt_ns: u64,

    /// Estimated utilisation of the link.
    pub u: f64,
}

impl PortTelemetry {
    /// Record a packet leaving the port.
    pub fn record_tx(&mut self, size: usize, now_ns: u64) {
        self.tx_bytes += size as u64;
        self.last_pkt_size = size as u64;
        self.last_pkt_ns = now_ns;
    }

    /// Update and return the utilisation estimate.
    pub fn update_utilisation(
        &mut self,
        now_ns: u64,
        qlen_bytes: u64,
        link_rate_bps: u64,
        max_rtt_ns: u64,
        rng: &mut impl RngCore,
    ) -> f64 {
        let max_rtt_ns = max_rtt_ns.max(1);
        let dt = now_ns.saturating_sub(self.last_pkt_ns).min(max_rtt_ns);
        let bytes_per_s = (link_rate_bps as f64 / 8.0).max(1.0);

        let fct = f64::from(1u32 << logres_shift(LOG_B, LOG_L));
        let log_t = (max_rtt_ns as f64).log2() * fct;
        let log_b = bytes_per_s.log2() * fct;
        let log_1e9 = 1e9f64.log2() * fct;
        let mut log2 = |x: u64| log2apprx(x, LOG_B, LOG_M, LOG_L, &mut *rng) as f64;

        let mut q_term = 0.0;
        if qlen_bytes / QLEN_SCALE > 0 && dt > 0 {
            let log_dt = log2(dt);
            let log_qlen = log2(qlen_bytes / QLEN_SCALE);
            q_term = ((log_dt + log_qlen + log_1e9 - log_b - 2.0 * log_t) / fct).exp2()
                * QLEN_SCALE as f64;
        }

        let mut byte_term = 0.0;
        if self.last_pkt_size > 0 {
            let log_byte = log2(self.last_pkt_size);
            byte_term = ((log_byte + log_1e9 - log_b - log_t) / fct).exp2();
        }

        let mut u_term = 0.0;
        let scaled_u = (self.u * U_SCALE).round() as u64;
        if max_rtt_ns > dt && scaled_u > 0 {
            let log_t_dt = log2(max_rtt_ns - dt);
            let log_u = log2(scaled_u);
            u_term = ((log_t_dt + log_u - log_t) / fct).exp2() / U_SCALE;
        }

        self.u = q_term + byte_term + u_term;
        self.u
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn shift() {
        assert_eq!(logres_shift(20, 20), 15);
        assert_eq!(logres_shift(2, 20), 19);
    }

    #[test]
    fn exact_below_m_bits() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(log2apprx(1, 20, 16, 20, &mut rng), 0);
        assert_eq!(log2apprx(1024, 20, 16, 20, &mut rng), 10 << 15);
        assert_eq!(log2apprx(3, 20, 16, 20, &mut rng), 51_936);
        assert_eq!(log2apprx(0xffff, 20, 16, 20, &mut rng), 524_287);
    }

    #[test]
    fn truncated_values() {
        let mut rng = StdRng::seed_from_u64(0);
        // No bits are lost so no rounding happens
        assert_eq!(log2apprx(1 << 40, 20, 16, 20, &mut rng), 40 << 15);

        // Either rounded down to 2^17 or up to 2^17 + 4
        let v = log2apprx((1 << 17) + 1, 20, 16, 20, &mut rng);
        assert!(v == 17 << 15 || v == 557_057, "{v}");
    }

    #[test]
    fn reproducible_with_seed() {
        let x = 123_456_789;
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20)
                .map(|_| log2apprx(x, 20, 16, 20, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(5), run(5));
    }

    #[test]
    fn line_rate_converges_to_one() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut telemetry = PortTelemetry::default();
        let link_rate_bps = 100_000_000_000;

        // 1000 bytes every 80ns is exactly line rate
        let mut now = 0;
        let mut u = 0.0;
        for _ in 0..3000 {
            now += 80;
            u = telemetry.update_utilisation(now, 0, link_rate_bps, 9000, &mut rng);
            telemetry.record_tx(1000, now);
        }
        assert_relative_eq!(u, 1.0, epsilon = 0.02);
    }

    #[test]
    fn idle_port_decays() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut telemetry = PortTelemetry {
            u: 1.0,
            ..Default::default()
        };
        let u = telemetry.update_utilisation(9000, 0, 100_000_000_000, 9000, &mut rng);
        assert_eq!(u, 0.0);
    }
}
