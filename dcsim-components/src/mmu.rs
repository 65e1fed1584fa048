// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Buffer admission.
//!
//! The switch asks an [`AdmissionAuthority`] whether each packet may be
//! buffered, tells it when bytes arrive and leave, and asks it when PFC
//! pause/resume frames should be sent and whether a packet should be ECN
//! marked.
//!
//! [`SharedBufferMmu`] is a shared-buffer implementation: every
//! `(port, lane)` has a small reserved allocation, beyond which it draws from
//! a shared pool. A lane whose shared usage crosses a dynamic threshold (a
//! fraction of the free shared buffer) is paused and its further arrivals are
//! absorbed by a per-port headroom.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// The interface used by the switch to manage its buffer.
pub trait AdmissionAuthority {
    /// Add state for another port. Ports are numbered in registration order.
    fn register_port(&mut self);

    fn check_ingress_admission(&self, port: usize, lane: usize, bytes: u32) -> bool;
    fn check_egress_admission(&self, port: usize, lane: usize, bytes: u32) -> bool;

    fn update_ingress_admission(&mut self, port: usize, lane: usize, bytes: u32);
    fn update_egress_admission(&mut self, port: usize, lane: usize, bytes: u32);

    fn remove_from_ingress_admission(&mut self, port: usize, lane: usize, bytes: u32);
    fn remove_from_egress_admission(&mut self, port: usize, lane: usize, bytes: u32);

    /// A pause frame should be sent for this ingress `(port, lane)`.
    fn check_should_pause(&self, port: usize, lane: usize) -> bool;

    /// A resume frame should be sent for this ingress `(port, lane)`.
    fn check_should_resume(&self, port: usize, lane: usize) -> bool;

    fn set_pause(&mut self, port: usize, lane: usize);
    fn set_resume(&mut self, port: usize, lane: usize);

    /// Whether a packet leaving egress `(port, lane)` should be ECN marked.
    fn should_send_cn(&mut self, port: usize, lane: usize) -> bool;

    fn ingress_bytes(&self, port: usize, lane: usize) -> u32;
    fn egress_bytes(&self, port: usize, lane: usize) -> u32;
}

/// Settings for a [`SharedBufferMmu`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmuConfig {
    /// Total buffer size.
    pub buffer_bytes: u32,

    /// Reserved bytes per `(port, lane)`.
    pub reserve_bytes: u32,

    /// How far below the pause threshold usage must fall before resuming.
    pub resume_offset_bytes: u32,

    /// Per-port headroom that absorbs packets in flight after a pause.
    pub headroom_bytes: u32,

    /// The pause threshold is the free shared buffer divided by
    /// `2^pfc_alpha_shift`.
    pub pfc_alpha_shift: u32,

    /// ECN marking starts above `kmin_bytes` of egress occupancy...
    pub kmin_bytes: u32,

    /// ...and is certain above `kmax_bytes`.
    pub kmax_bytes: u32,

    /// Marking probability reached at `kmax_bytes`.
    pub pmax: f64,
}

impl Default for MmuConfig {
    fn default() -> Self {
        Self {
            buffer_bytes: 12 * 1024 * 1024,
            reserve_bytes: 4 * 1024,
            resume_offset_bytes: 3 * 1024,
            headroom_bytes: 150_000,
            pfc_alpha_shift: 3,
            kmin_bytes: 40_000,
            kmax_bytes: 160_000,
            pmax: 0.2,
        }
    }
}

#[derive(Clone, Default)]
struct LaneState {
    ingress_bytes: u32,
    headroom_bytes: u32,
    egress_bytes: u32,
    paused: bool,
}

/// A shared-buffer admission authority.
pub struct SharedBufferMmu {
    config: MmuConfig,
    num_lanes: usize,
    ports: Vec<Vec<LaneState>>,
    shared_used_bytes: u32,
    rng: StdRng,
}

impl SharedBufferMmu {
    #[must_use]
    pub fn new(config: MmuConfig, num_lanes: usize, seed: u64) -> Self {
        Self {
            config,
            num_lanes,
            ports: Vec::new(),
            shared_used_bytes: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn lane(&self, port: usize, lane: usize) -> Option<&LaneState> {
        self.ports.get(port).and_then(|lanes| lanes.get(lane))
    }

    fn lane_mut(&mut self, port: usize, lane: usize) -> Option<&mut LaneState> {
        self.ports.get_mut(port).and_then(|lanes| lanes.get_mut(lane))
    }

    fn total_headroom(&self) -> u32 {
        let num_ports = u32::try_from(self.ports.len()).unwrap_or(u32::MAX);
        self.config.headroom_bytes.saturating_mul(num_ports)
    }

    fn total_reserve(&self) -> u32 {
        let num_queues = u32::try_from(self.ports.len() * self.num_lanes).unwrap_or(u32::MAX);
        self.config.reserve_bytes.saturating_mul(num_queues)
    }

    /// Dynamic threshold on the shared usage of one lane.
    #[must_use]
    pub fn pfc_threshold(&self) -> u32 {
        self.config
            .buffer_bytes
            .saturating_sub(self.total_headroom())
            .saturating_sub(self.total_reserve())
            .saturating_sub(self.shared_used_bytes)
            >> self.config.pfc_alpha_shift
    }

    fn shared_used(&self, state: &LaneState) -> u32 {
        state.ingress_bytes.saturating_sub(self.config.reserve_bytes)
    }

    #[must_use]
    pub fn shared_used_bytes(&self) -> u32 {
        self.shared_used_bytes
    }

    #[must_use]
    pub fn headroom_used(&self, port: usize, lane: usize) -> u32 {
        self.lane(port, lane).map_or(0, |s| s.headroom_bytes)
    }
}

impl AdmissionAuthority for SharedBufferMmu {
    fn register_port(&mut self) {
        self.ports.push(vec![LaneState::default(); self.num_lanes]);
    }

    fn check_ingress_admission(&self, port: usize, lane: usize, bytes: u32) -> bool {
        let Some(state) = self.lane(port, lane) else {
            return false;
        };
        let headroom_full =
            state.headroom_bytes.saturating_add(bytes) > self.config.headroom_bytes;
        let shared_full = self.shared_used(state).saturating_add(bytes) > self.pfc_threshold();
        !(headroom_full && shared_full)
    }

    fn check_egress_admission(&self, port: usize, lane: usize, _bytes: u32) -> bool {
        self.lane(port, lane).is_some()
    }

    fn update_ingress_admission(&mut self, port: usize, lane: usize, bytes: u32) {
        let reserve = self.config.reserve_bytes;
        let threshold = self.pfc_threshold();
        let Some(state) = self.lane_mut(port, lane) else {
            return;
        };
        let new_bytes = state.ingress_bytes.saturating_add(bytes);
        if new_bytes <= reserve {
            state.ingress_bytes = new_bytes;
        } else if new_bytes - reserve > threshold {
            state.headroom_bytes = state.headroom_bytes.saturating_add(bytes);
        } else {
            state.ingress_bytes = new_bytes;
            let from_shared = bytes.min(new_bytes - reserve);
            self.shared_used_bytes = self.shared_used_bytes.saturating_add(from_shared);
        }
    }

    fn update_egress_admission(&mut self, port: usize, lane: usize, bytes: u32) {
        if let Some(state) = self.lane_mut(port, lane) {
            state.egress_bytes = state.egress_bytes.saturating_add(bytes);
        }
    }

    fn remove_from_ingress_admission(&mut self, port: usize, lane: usize, bytes: u32) {
        let reserve = self.config.reserve_bytes;
        let Some(state) = self.lane_mut(port, lane) else {
            return;
        };
        let from_headroom = state.headroom_bytes.min(bytes);
        let from_ingress = bytes - from_headroom;
        let from_shared = from_ingress.min(state.ingress_bytes.saturating_sub(reserve));
        state.headroom_bytes -= from_headroom;
        state.ingress_bytes = state.ingress_bytes.saturating_sub(from_ingress);
        self.shared_used_bytes = self.shared_used_bytes.saturating_sub(from_shared);
    }

    fn remove_from_egress_admission(&mut self, port: usize, lane: usize, bytes: u32) {
        if let Some(state) = self.lane_mut(port, lane) {
            state.egress_bytes = state.egress_bytes.saturating_sub(bytes);
        }
    }

    fn check_should_pause(&self, port: usize, lane: usize) -> bool {
        self.lane(port, lane).is_some_and(|state| {
            !state.paused
                && (state.headroom_bytes > 0 || self.shared_used(state) >= self.pfc_threshold())
        })
    }

    fn check_should_resume(&self, port: usize, lane: usize) -> bool {
        self.lane(port, lane).is_some_and(|state| {
            let shared_used = self.shared_used(state);
            state.paused
                && state.headroom_bytes == 0
                && (shared_used == 0
                    || shared_used.saturating_add(self.config.resume_offset_bytes)
                        <= self.pfc_threshold())
        })
    }

    fn set_pause(&mut self, port: usize, lane: usize) {
        if let Some(state) = self.lane_mut(port, lane) {
            state.paused = true;
        }
    }

    fn set_resume(&mut self, port: usize, lane: usize) {
        if let Some(state) = self.lane_mut(port, lane) {
            state.paused = false;
        }
    }

    fn should_send_cn(&mut self, port: usize, lane: usize) -> bool {
        if lane == 0 {
            return false;
        }
        let Some(egress_bytes) = self.lane(port, lane).map(|s| s.egress_bytes) else {
            return false;
        };
        let (kmin, kmax) = (self.config.kmin_bytes, self.config.kmax_bytes);
        if egress_bytes > kmax {
            return true;
        }
        if egress_bytes > kmin && kmax > kmin {
            let p = self.config.pmax * f64::from(egress_bytes - kmin) / f64::from(kmax - kmin);
            return self.rng.gen_range(0.0..1.0) < p;
        }
        false
    }

    fn ingress_bytes(&self, port: usize, lane: usize) -> u32 {
        self.lane(port, lane)
            .map_or(0, |s| s.ingress_bytes.saturating_add(s.headroom_bytes))
    }

    fn egress_bytes(&self, port: usize, lane: usize) -> u32 {
        self.lane(port, lane).map_or(0, |s| s.egress_bytes)
    }
}
