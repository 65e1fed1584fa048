// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! CNCP per-flow rate control.
//!
//! The [`FlowController`] holds the state of every flow passing through a
//! switch. It does not know about time or devices: the switch passes in the
//! current time and any device state that is needed, and drives the periodic
//! update, report and expiry steps from scheduled callbacks.
//!
//! A flow is created by the first packet seen for its [`FlowKey`]. Its rate
//! starts as an equal share of the egress link and then evolves as
//!
//! ```text
//! k      = 8 * gamma / T_report
//! U'     = lambda / max(rate, 1)
//! rate' += gamma * (q_v * k + U' - 1.1 * p_e * k - q_u * k)
//! ```
//!
//! clamped to `[0, egress link rate]`, where `q_u` is the number of bytes the
//! flow is estimated to hold on this node, `q_v` is the value last reported
//! by the next hop and `p_e` is the occupancy of the egress lane.
//!
//! Admission is a token bucket that fills at the flow's rate.
//!
//! Each flow carries a generation number. A flow that expires and is created
//! again for the same key gets a new generation, so timers left over from the
//! old flow find nothing to act on.

use std::collections::HashMap;

use dcsim_protocols::flow_key::FlowKey;

use crate::config::CncpConfig;

const NS_PER_S: f64 = 1e9;

/// Weight of the egress queue occupancy in the rate update.
const EGRESS_QUEUE_WEIGHT: f64 = 1.1;

fn bytes_at_rate(rate_bps: f64, dt_ns: u64) -> f64 {
    rate_bps * dt_ns as f64 / (8.0 * NS_PER_S)
}

/// The control state of one flow.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowState {
    pub rate_bps: f64,

    /// Unused admission credit.
    pub window_bytes: f64,

    pub last_admit_ns: u64,
    pub last_arrival_ns: u64,

    /// Bytes held on this node.
    pub q_u: f64,

    /// Bytes held on the next hop, as reported by it.
    pub q_v: f64,

    pub egress_port: usize,
    pub prev_hop_port: usize,
    pub lane: usize,

    pub generation: u64,
}

/// Where a new flow is going and where it came from.
#[derive(Copy, Clone, Debug)]
pub struct FlowPath {
    pub egress_port: usize,
    pub prev_hop_port: usize,
    pub lane: usize,
    pub egress_rate_bps: u64,
}

/// Result of an expiry check.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Expiry {
    /// The flow no longer exists.
    Missing,

    /// The flow has seen traffic recently.
    Active,

    /// The flow has been removed and its rate shared with the
    /// given number of flows.
    Removed { survivors: usize },
}

pub struct FlowController {
    config: CncpConfig,
    flows: HashMap<FlowKey, FlowState>,
    next_generation: u64,
}

impl FlowController {
    #[must_use]
    pub fn new(config: CncpConfig) -> Self {
        Self {
            config,
            flows: HashMap::new(),
            next_generation: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CncpConfig {
        &self.config
    }

    #[must_use]
    pub fn flow(&self, key: &FlowKey) -> Option<&FlowState> {
        self.flows.get(key)
    }

    /// The flow for `key` if it is still the one created as `generation`.
    fn live(&self, key: &FlowKey, generation: u64) -> Option<&FlowState> {
        self.flows.get(key).filter(|f| f.generation == generation)
    }

    #[must_use]
    pub fn contains(&self, key: &FlowKey) -> bool {
        self.flows.contains_key(key)
    }

    #[must_use]
    pub fn num_flows(&self) -> usize {
        self.flows.len()
    }

    /// Number of flows leaving through `egress_port`.
    #[must_use]
    pub fn flows_on_egress(&self, egress_port: usize) -> usize {
        self.flows
            .values()
            .filter(|f| f.egress_port == egress_port)
            .count()
    }

    /// Total rate of the flows leaving through `egress_port`.
    #[must_use]
    pub fn rate_on_egress(&self, egress_port: usize) -> f64 {
        self.flows
            .values()
            .filter(|f| f.egress_port == egress_port)
            .map(|f| f.rate_bps)
            .sum()
    }

    fn capacity(&self) -> f64 {
        self.config.default_flow_capacity_bytes as f64
    }

    /// Create the flow if this is the first packet seen for `key`.
    ///
    /// Every flow on the same egress port is given an equal share of the
    /// egress link rate. Returns the generation of a newly created flow.
    pub fn ensure_flow(
        &mut self,
        key: FlowKey,
        size: usize,
        now_ns: u64,
        path: FlowPath,
    ) -> Option<u64> {
        if self.flows.contains_key(&key) {
            return None;
        }

        let num_flows = self.flows_on_egress(path.egress_port) + 1;
        let rate_bps = path.egress_rate_bps as f64 / num_flows as f64;
        for flow in self.flows.values_mut() {
            if flow.egress_port == path.egress_port {
                flow.rate_bps = rate_bps;
            }
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let capacity = self.capacity();
        self.flows.insert(
            key,
            FlowState {
                rate_bps,
                window_bytes: size as f64,
                last_admit_ns: now_ns,
                last_arrival_ns: now_ns,
                q_u: capacity,
                q_v: capacity,
                egress_port: path.egress_port,
                prev_hop_port: path.prev_hop_port,
                lane: path.lane,
                generation,
            },
        );
        Some(generation)
    }

    /// Token bucket admission. Unknown flows are always admitted.
    pub fn admit(&mut self, key: &FlowKey, size: usize, now_ns: u64) -> bool {
        let Some(flow) = self.flows.get_mut(key) else {
            return true;
        };
        let dt_ns = now_ns.saturating_sub(flow.last_admit_ns);
        let window = flow.window_bytes + bytes_at_rate(flow.rate_bps, dt_ns);
        let size = size as f64;
        if window < size {
            return false;
        }
        flow.window_bytes = window - size;
        flow.last_admit_ns = now_ns;
        true
    }

    /// Update `q_u` for a packet that has been admitted.
    pub fn record_arrival(&mut self, key: &FlowKey, size: usize, now_ns: u64) {
        let capacity = self.capacity();
        let Some(flow) = self.flows.get_mut(key) else {
            return;
        };
        let dt_ns = now_ns.saturating_sub(flow.last_arrival_ns);
        let delta_q = bytes_at_rate(flow.rate_bps, dt_ns) - size as f64;
        flow.q_u = (flow.q_u + delta_q).clamp(0.0, capacity);
        flow.last_arrival_ns = now_ns;
    }

    /// The rate that the update step would move the flow to.
    #[must_use]
    pub fn next_rate(&self, flow: &FlowState, p_e_bytes: u32, egress_rate_bps: u64) -> f64 {
        let gamma = self.config.gamma;
        let k = 8.0 * gamma / self.config.report_interval_ns as f64;
        let u_prime = self.config.lambda / flow.rate_bps.max(1.0);
        let p_e = f64::from(p_e_bytes);
        let new_rate = flow.rate_bps
            + gamma * (flow.q_v * k + u_prime - EGRESS_QUEUE_WEIGHT * p_e * k - flow.q_u * k);
        new_rate.clamp(0.0, egress_rate_bps as f64)
    }

    /// Apply the rate update step. Returns the new rate, or `None` if the flow
    /// no longer exists.
    pub fn update_rate(
        &mut self,
        key: &FlowKey,
        generation: u64,
        p_e_bytes: u32,
        egress_rate_bps: u64,
    ) -> Option<f64> {
        let new_rate = self.next_rate(self.live(key, generation)?, p_e_bytes, egress_rate_bps);
        let flow = self.flows.get_mut(key)?;
        flow.rate_bps = new_rate;
        Some(new_rate)
    }

    /// The value to report to the previous hop: `(prev_hop_port, q_u)`.
    #[must_use]
    pub fn report(&self, key: &FlowKey, generation: u64) -> Option<(usize, u64)> {
        self.live(key, generation)
            .map(|flow| (flow.prev_hop_port, flow.q_u.round() as u64))
    }

    /// Store the value reported by the next hop. Returns `false` if the flow
    /// is not known here.
    pub fn ingest_report(&mut self, key: &FlowKey, q_v: u64) -> bool {
        let capacity = self.capacity();
        match self.flows.get_mut(key) {
            Some(flow) => {
                flow.q_v = (q_v as f64).min(capacity);
                true
            }
            None => false,
        }
    }

    /// Remove the flow if it has not seen traffic for the expiry interval.
    ///
    /// The rate of a removed flow is shared equally between the remaining
    /// flows on the same egress port.
    pub fn check_expiry(&mut self, key: &FlowKey, generation: u64, now_ns: u64) -> Expiry {
        let Some(flow) = self.live(key, generation) else {
            return Expiry::Missing;
        };
        if now_ns.saturating_sub(flow.last_arrival_ns) < self.config.flow_expired_interval_ns {
            return Expiry::Active;
        }

        let Some(removed) = self.flows.remove(key) else {
            return Expiry::Missing;
        };
        let survivors = self.flows_on_egress(removed.egress_port);
        if survivors > 0 {
            let share = removed.rate_bps / survivors as f64;
            for flow in self.flows.values_mut() {
                if flow.egress_port == removed.egress_port {
                    flow.rate_bps += share;
                }
            }
        }
        Expiry::Removed { survivors }
    }
}
