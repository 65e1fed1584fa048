// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The switch model.
//!
//! A [`SwitchNode`] owns a registry of ports, each attached to a
//! [`NetDevice`] and holding an [`EgressQueueSet`]. Packets received on a port
//! go through:
//!
//!  1. ECMP route lookup to pick the output port,
//!  2. classification onto a lane (lane 0 for control traffic),
//!  3. admission (buffer, and CNCP when enabled) for anything not on lane 0,
//!  4. PFC pause generation towards the input port when its buffer fills.
//!
//! Each port transmits one packet at a time at its link rate. When a packet
//! leaves, its buffer credit is returned, it may be ECN marked, a PFC resume
//! may be sent and the telemetry of RDMA packets is stamped.
//!
//! CNCP flows are driven by three timer chains per flow (expiry, rate update
//! and report). The timers hold a weak reference to the switch and stop as
//! soon as the flow or the switch is gone.
//!
//! # Ports
//!
//! Ports are referred to by their index, which is the order in which they
//! were added with [`SwitchNode::add_port`].

pub mod device;
pub mod ecmp;
pub mod telemetry;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::rc::{Rc, Weak};

use dcsim_components::egress_queue::{EgressQueueSet, LaneMask};
use dcsim_components::mmu::{AdmissionAuthority, SharedBufferMmu};
use dcsim_engine::executor::Scheduler;
use dcsim_engine::sim_error;
use dcsim_engine::types::SimError;
use dcsim_protocols::cncp::CncpControlHeader;
use dcsim_protocols::flow_key::FlowKey;
use dcsim_protocols::ipv4::Ecn;
use dcsim_protocols::l4::{L4Header, PfcHeader};
use dcsim_protocols::packet::Packet;
use dcsim_protocols::protocol;
use dcsim_protocols::telemetry::{IntHop, PintCodec};
use dcsim_track::entity::Entity;
use dcsim_track::{debug, info, trace, value};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::cncp::{Expiry, FlowController, FlowPath, FlowState};
use crate::config::{CcMode, SwitchConfig};
use crate::switch::device::{DeviceKind, NetDevice};
use crate::switch::ecmp::{ecmp_hash, ecmp_key};
use crate::switch::telemetry::PortTelemetry;

pub type PortIndex = usize;

struct Port {
    kind: DeviceKind,
    device: Rc<dyn NetDevice>,
    queues: EgressQueueSet<Packet>,

    /// Lanes paused by the peer.
    paused: LaneMask,

    /// A packet is being serialised onto the link.
    busy: bool,

    telemetry: PortTelemetry,
}

/// Time to put `bytes` onto a link.
fn serialisation_ns(bytes: usize, link_rate_bps: u64) -> u64 {
    let bits = bytes as u128 * 8 * 1_000_000_000;
    let rate = u128::from(link_rate_bps.max(1));
    u64::try_from(bits.div_ceil(rate)).unwrap_or(u64::MAX).max(1)
}

pub struct SwitchNode {
    pub entity: Rc<Entity>,
    cncp_entity: Rc<Entity>,
    id: u32,
    config: SwitchConfig,
    scheduler: Scheduler,
    weak_self: Weak<SwitchNode>,

    ecmp_seed: Cell<u32>,
    routes: RefCell<HashMap<Ipv4Addr, Vec<PortIndex>>>,
    ports: RefCell<Vec<Port>>,
    mmu: RefCell<Box<dyn AdmissionAuthority>>,
    cncp: RefCell<FlowController>,

    /// Bytes enqueued per `(input port, output port, lane)`.
    monitor: RefCell<HashMap<(PortIndex, PortIndex, usize), u64>>,

    rng: RefCell<StdRng>,
    pint: PintCodec,
}

impl SwitchNode {
    /// Create a switch using a [`SharedBufferMmu`] configured from `config`.
    pub fn new(
        parent: &Rc<Entity>,
        name: &str,
        id: u32,
        config: SwitchConfig,
        scheduler: Scheduler,
    ) -> Result<Rc<Self>, SimError> {
        let seed = config.rng_seed.wrapping_add(u64::from(id));
        let mmu = SharedBufferMmu::new(config.mmu.clone(), config.num_lanes, seed);
        Self::new_with_mmu(parent, name, id, config, scheduler, Box::new(mmu))
    }

    /// Create a switch with an externally provided admission authority.
    pub fn new_with_mmu(
        parent: &Rc<Entity>,
        name: &str,
        id: u32,
        config: SwitchConfig,
        scheduler: Scheduler,
        mmu: Box<dyn AdmissionAuthority>,
    ) -> Result<Rc<Self>, SimError> {
        config.validate()?;
        let pint = match PintCodec::new(config.telemetry.pint_bytes, config.telemetry.pint_log_base)
        {
            Ok(pint) => pint,
            Err(e) => return sim_error!(format!("{name}: {e}")),
        };

        let entity = Rc::new(Entity::new(parent, name));
        let cncp_entity = Rc::new(Entity::new(&entity, "cncp"));
        let seed = config.rng_seed.wrapping_add(u64::from(id));
        let ecmp_seed = config.ecmp_seed.unwrap_or(id);
        let cncp = FlowController::new(config.cncp.clone());

        Ok(Rc::new_cyclic(|weak_self| Self {
            entity,
            cncp_entity,
            id,
            config,
            scheduler,
            weak_self: weak_self.clone(),
            ecmp_seed: Cell::new(ecmp_seed),
            routes: RefCell::new(HashMap::new()),
            ports: RefCell::new(Vec::new()),
            mmu: RefCell::new(mmu),
            cncp: RefCell::new(cncp),
            monitor: RefCell::new(HashMap::new()),
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            pint,
        }))
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    /// Attach a device to the next port.
    pub fn add_port(
        &self,
        kind: DeviceKind,
        device: Rc<dyn NetDevice>,
    ) -> Result<PortIndex, SimError> {
        let mut ports = self.ports.borrow_mut();
        let index = ports.len();
        let queues = EgressQueueSet::new(
            &self.entity,
            &format!("port{index}"),
            self.config.num_lanes,
            self.config.egress_max_bytes,
        )?;
        ports.push(Port {
            kind,
            device,
            queues,
            paused: LaneMask::default(),
            busy: false,
            telemetry: PortTelemetry::default(),
        });
        self.mmu.borrow_mut().register_port();
        debug!(self.entity ; "port{index}: {kind:?} device");
        Ok(index)
    }

    #[must_use]
    pub fn num_ports(&self) -> usize {
        self.ports.borrow().len()
    }

    /// Add `port` as a next hop towards `dst`.
    pub fn add_table_entry(&self, dst: Ipv4Addr, port: PortIndex) {
        self.routes.borrow_mut().entry(dst).or_default().push(port);
    }

    pub fn clear_table(&self) {
        self.routes.borrow_mut().clear();
    }

    pub fn set_ecmp_seed(&self, seed: u32) {
        self.ecmp_seed.set(seed);
    }

    /// The output port that `packet` would be forwarded to.
    #[must_use]
    pub fn ecmp_lookup(&self, packet: &Packet) -> Option<PortIndex> {
        let routes = self.routes.borrow();
        let candidates = routes.get(&packet.ip.dst)?;
        if candidates.is_empty() {
            return None;
        }
        let (sport, dport) = packet.ports().unwrap_or((0, 0));
        let key = ecmp_key(packet.ip.src, packet.ip.dst, sport, dport);
        let hash = ecmp_hash(&key, self.ecmp_seed.get());
        Some(candidates[hash as usize % candidates.len()])
    }

    /// The lane a packet is queued on.
    #[must_use]
    pub fn classify(&self, packet: &Packet) -> usize {
        match packet.protocol() {
            p if protocol::is_flow_control(p) => 0,
            p if protocol::is_ack(p) && self.config.ack_high_prio => 0,
            protocol::TCP => 1,
            _ => usize::from(packet.priority_group().unwrap_or(0)),
        }
    }

    /// Handle a packet arriving on `input_port`.
    pub fn receive(&self, input_port: PortIndex, mut packet: Packet) {
        let Some(input_kind) = self.port_kind(input_port) else {
            debug!(self.entity ; "drop {packet}: no port {input_port}");
            return;
        };

        match (&packet.l4, input_kind) {
            (L4Header::CncpReport(header), _) => {
                self.ingest_report(header);
                return;
            }
            (L4Header::Pfc(pfc), DeviceKind::Qbb) => {
                self.handle_pfc(input_port, *pfc);
                return;
            }
            (_, DeviceKind::Qbb | DeviceKind::Loopback) => {}
        }

        let Some(output_port) = self.ecmp_lookup(&packet) else {
            debug!(self.entity ; "drop {packet}: no route to {}", packet.ip.dst);
            return;
        };

        let lane = self.classify(&packet);
        if lane >= self.config.num_lanes {
            debug!(self.entity ; "drop {packet}: no lane {lane}");
            return;
        }

        if lane != 0 && !self.admit(input_port, output_port, lane, &packet) {
            return;
        }

        let size = packet.size();
        packet.ingress_port = Some(input_port);
        let enqueued = {
            let mut ports = self.ports.borrow_mut();
            match ports.get_mut(output_port) {
                Some(port) => port.queues.enqueue(packet, lane),
                None => false,
            }
        };
        if !enqueued {
            debug!(self.entity ; "port{output_port}: egress queues full, drop on lane {lane}");
            if lane != 0 {
                self.release_credit(input_port, output_port, lane, size as u32);
            }
            return;
        }
        *self
            .monitor
            .borrow_mut()
            .entry((input_port, output_port, lane))
            .or_default() += size as u64;

        self.start_transmit(output_port);
    }

    /// Buffer and CNCP admission. Returns whether the packet was admitted.
    fn admit(
        &self,
        input_port: PortIndex,
        output_port: PortIndex,
        lane: usize,
        packet: &Packet,
    ) -> bool {
        let now = self.scheduler.time_now_ns();
        let size = packet.size();
        let bytes = size as u32;

        let cncp_key = self.cncp_key(packet);
        if let Some(key) = cncp_key {
            let egress_rate_bps = self.link_rate(output_port);
            let path = FlowPath {
                egress_port: output_port,
                prev_hop_port: input_port,
                lane,
                egress_rate_bps,
            };
            let created = self.cncp.borrow_mut().ensure_flow(key, size, now, path);
            if let Some(generation) = created {
                info!(self.cncp_entity ; "new flow {key} on port{output_port}");
                self.schedule_expiry(key, generation);
                self.schedule_update(key, generation);
                self.schedule_report(key, generation);
            }
        }

        let buffer_ok = {
            let mmu = self.mmu.borrow();
            (!self.config.pfc_enabled || mmu.check_ingress_admission(input_port, lane, bytes))
                && mmu.check_egress_admission(output_port, lane, bytes)
        };
        let admitted = buffer_ok
            && cncp_key.is_none_or(|key| self.cncp.borrow_mut().admit(&key, size, now));
        if !admitted {
            debug!(self.entity ; "drop {packet}: not admitted (buffer ok: {buffer_ok})");
            return false;
        }

        {
            let mut mmu = self.mmu.borrow_mut();
            mmu.update_ingress_admission(input_port, lane, bytes);
            mmu.update_egress_admission(output_port, lane, bytes);
        }
        if let Some(key) = cncp_key {
            self.cncp.borrow_mut().record_arrival(&key, size, now);
        }

        self.check_and_send_pause(input_port, lane);
        true
    }

    /// The CNCP key of a packet if it is subject to rate control.
    fn cncp_key(&self, packet: &Packet) -> Option<FlowKey> {
        if self.config.cc_mode != CcMode::Cncp {
            return None;
        }
        if protocol::is_ack(packet.protocol()) {
            return None;
        }
        if packet.priority_group() == Some(self.config.cncp.background_pg) {
            return None;
        }
        packet.flow_key()
    }

    fn release_credit(&self, input_port: PortIndex, output_port: PortIndex, lane: usize, bytes: u32) {
        let mut mmu = self.mmu.borrow_mut();
        mmu.remove_from_ingress_admission(input_port, lane, bytes);
        mmu.remove_from_egress_admission(output_port, lane, bytes);
    }

    fn check_and_send_pause(&self, input_port: PortIndex, lane: usize) {
        if !self.config.pfc_enabled {
            return;
        }
        let (should_pause, qlen) = {
            let mmu = self.mmu.borrow();
            (
                mmu.check_should_pause(input_port, lane),
                mmu.ingress_bytes(input_port, lane),
            )
        };
        if should_pause {
            self.send_pfc(input_port, PfcHeader::pause(lane as u8, qlen));
        }
    }

    fn check_and_send_resume(&self, input_port: PortIndex, lane: usize) {
        let (should_resume, qlen) = {
            let mmu = self.mmu.borrow();
            (
                mmu.check_should_resume(input_port, lane),
                mmu.ingress_bytes(input_port, lane),
            )
        };
        if should_resume {
            self.send_pfc(input_port, PfcHeader::resume(lane as u8, qlen));
        }
    }

    fn send_pfc(&self, port: PortIndex, header: PfcHeader) {
        let Some((kind, device)) = self.port_device(port) else {
            return;
        };
        match kind {
            DeviceKind::Qbb => {
                let lane = usize::from(header.lane);
                {
                    let mut mmu = self.mmu.borrow_mut();
                    if header.is_resume() {
                        mmu.set_resume(port, lane);
                    } else {
                        mmu.set_pause(port, lane);
                    }
                }
                debug!(self.entity ; "port{port}: send {} for lane {lane}",
                    if header.is_resume() { "resume" } else { "pause" });
                device.send_pfc(header);
            }
            DeviceKind::Loopback => {}
        }
    }

    /// A PFC frame from the peer on `port` pauses or resumes one of its lanes.
    fn handle_pfc(&self, port: PortIndex, header: PfcHeader) {
        let lane = usize::from(header.lane);
        {
            let mut ports = self.ports.borrow_mut();
            let paused = &mut ports[port].paused;
            if header.is_resume() {
                paused.clear(lane);
            } else {
                paused.set(lane);
            }
        }
        trace!(self.entity ; "port{port}: peer {} lane {lane}",
            if header.is_resume() { "resumed" } else { "paused" });
        if header.is_resume() {
            self.start_transmit(port);
        }
    }

    fn ingest_report(&self, header: &CncpControlHeader) {
        let known = self
            .cncp
            .borrow_mut()
            .ingest_report(&header.key, header.flow_info);
        if known {
            trace!(self.cncp_entity ; "{} q_v={}", header.key, header.flow_info);
        } else {
            debug!(self.cncp_entity ; "report for unknown flow {}", header.key);
        }
    }

    /// Start sending the next packet on `port` unless it is already busy.
    ///
    /// This happens automatically when packets arrive. Call it after a link
    /// comes back up.
    pub fn start_transmit(&self, port: PortIndex) {
        let device = {
            let ports = self.ports.borrow();
            match ports.get(port) {
                Some(p) if !p.busy && p.device.is_link_up() => p.device.clone(),
                _ => return,
            }
        };
        let Some(packet) = self.transmit_next(port) else {
            return;
        };
        let tx_ns = serialisation_ns(packet.size(), device.link_rate_bps());
        self.ports.borrow_mut()[port].busy = true;
        device.transmit(packet);

        let weak = self.weak_self.clone();
        self.scheduler.schedule(tx_ns, move || {
            if let Some(switch) = weak.upgrade() {
                switch.ports.borrow_mut()[port].busy = false;
                switch.start_transmit(port);
            }
            Ok(())
        });
    }

    /// Take the next packet to send from `output_port` and apply the
    /// dequeue-time actions to it.
    pub fn transmit_next(&self, output_port: PortIndex) -> Option<Packet> {
        let (lane, packet) = {
            let mut ports = self.ports.borrow_mut();
            let port = ports.get_mut(output_port)?;
            let paused = port.paused;
            port.queues.dequeue_rr(paused)?
        };
        Some(self.notify_dequeue(output_port, lane, packet))
    }

    /// Actions for a packet that has just left lane `lane` of `output_port`.
    pub fn notify_dequeue(&self, output_port: PortIndex, lane: usize, mut packet: Packet) -> Packet {
        let size = packet.size();
        if let Some(input_port) = packet.ingress_port.take() {
            if let Some(bytes) = self
                .monitor
                .borrow_mut()
                .get_mut(&(input_port, output_port, lane))
            {
                *bytes = bytes.saturating_sub(size as u64);
            }

            if lane != 0 {
                self.release_credit(input_port, output_port, lane, size as u32);
                if self.config.ecn_enabled
                    && self.mmu.borrow_mut().should_send_cn(output_port, lane)
                {
                    trace!(self.entity ; "port{output_port}: mark {packet} CE");
                    packet.set_ecn(Ecn::Ce);
                }
                self.check_and_send_resume(input_port, lane);
            }
        }

        if packet.protocol() == protocol::UDP {
            self.stamp_telemetry(output_port, &mut packet);
        }

        let now = self.scheduler.time_now_ns();
        let mut ports = self.ports.borrow_mut();
        if let Some(port) = ports.get_mut(output_port) {
            port.telemetry.record_tx(size, now);
        }
        packet
    }

    fn stamp_telemetry(&self, output_port: PortIndex, packet: &mut Packet) {
        let now = self.scheduler.time_now_ns();
        let mut ports = self.ports.borrow_mut();
        let Some(port) = ports.get_mut(output_port) else {
            return;
        };
        let qlen = u64::from(port.queues.total_bytes());
        let rate = port.device.link_rate_bps();

        match self.config.cc_mode {
            CcMode::Hpcc => {
                match IntHop::new(now, port.telemetry.tx_bytes, qlen, rate) {
                    Ok(hop) => {
                        if let Some(header) = packet.telemetry_mut() {
                            header.push_hop(hop);
                        }
                    }
                    Err(e) => {
                        debug!(self.entity ; "port{output_port}: no INT hop: {e}");
                    }
                }
            }
            CcMode::HpccPint => {
                let u = port.telemetry.update_utilisation(
                    now,
                    qlen,
                    rate,
                    self.config.max_rtt_ns,
                    &mut *self.rng.borrow_mut(),
                );
                value!(port.queues.entity ; u);
                let power = self.pint.encode_u(u);
                if let Some(header) = packet.telemetry_mut() {
                    header.max_hold_power(power);
                }
            }
            CcMode::None | CcMode::Cncp => {}
        }
    }

    fn schedule_expiry(&self, key: FlowKey, generation: u64) {
        let weak = self.weak_self.clone();
        let interval = self.config.cncp.flow_expired_interval_ns;
        self.scheduler.schedule(interval, move || {
            if let Some(switch) = weak.upgrade() {
                switch.cncp_expiry(key, generation);
            }
            Ok(())
        });
    }

    fn cncp_expiry(&self, key: FlowKey, generation: u64) {
        let now = self.scheduler.time_now_ns();
        let expiry = self.cncp.borrow_mut().check_expiry(&key, generation, now);
        match expiry {
            Expiry::Missing => {}
            Expiry::Active => self.schedule_expiry(key, generation),
            Expiry::Removed { survivors } => {
                info!(self.cncp_entity ; "flow {key} expired, rate shared with {survivors} flows");
            }
        }
    }

    fn schedule_update(&self, key: FlowKey, generation: u64) {
        let weak = self.weak_self.clone();
        let interval = self.config.cncp.update_interval_ns;
        self.scheduler.schedule(interval, move || {
            if let Some(switch) = weak.upgrade() {
                switch.cncp_update(key, generation);
            }
            Ok(())
        });
    }

    fn cncp_update(&self, key: FlowKey, generation: u64) {
        let Some((egress_port, lane)) = self
            .cncp
            .borrow()
            .flow(&key)
            .filter(|f| f.generation == generation)
            .map(|f| (f.egress_port, f.lane))
        else {
            return;
        };
        let p_e = self.queue_bytes(egress_port, lane);
        let egress_rate_bps = self.link_rate(egress_port);
        let rate = self
            .cncp
            .borrow_mut()
            .update_rate(&key, generation, p_e, egress_rate_bps);
        if let Some(rate) = rate {
            trace!(self.cncp_entity ; "{key} rate={rate:.0} p_e={p_e}");
            self.schedule_update(key, generation);
        }
    }

    fn schedule_report(&self, key: FlowKey, generation: u64) {
        let weak = self.weak_self.clone();
        let interval = self.config.cncp.report_interval_ns;
        self.scheduler.schedule(interval, move || {
            if let Some(switch) = weak.upgrade() {
                switch.cncp_report(key, generation);
            }
            Ok(())
        });
    }

    fn cncp_report(&self, key: FlowKey, generation: u64) {
        let Some((prev_hop_port, q_u)) = self.cncp.borrow().report(&key, generation) else {
            return;
        };
        if let Some((kind, device)) = self.port_device(prev_hop_port) {
            match kind {
                DeviceKind::Qbb => device.send_cncp_report(CncpControlHeader {
                    key,
                    flow_info: q_u,
                }),
                DeviceKind::Loopback => {}
            }
        }
        self.schedule_report(key, generation);
    }

    fn port_kind(&self, port: PortIndex) -> Option<DeviceKind> {
        self.ports.borrow().get(port).map(|p| p.kind)
    }

    fn port_device(&self, port: PortIndex) -> Option<(DeviceKind, Rc<dyn NetDevice>)> {
        self.ports
            .borrow()
            .get(port)
            .map(|p| (p.kind, p.device.clone()))
    }

    fn link_rate(&self, port: PortIndex) -> u64 {
        self.ports
            .borrow()
            .get(port)
            .map_or(0, |p| p.device.link_rate_bps())
    }

    #[must_use]
    pub fn queue_bytes(&self, port: PortIndex, lane: usize) -> u32 {
        self.ports
            .borrow()
            .get(port)
            .map_or(0, |p| p.queues.bytes_in_lane(lane))
    }

    #[must_use]
    pub fn queue_total_bytes(&self, port: PortIndex) -> u32 {
        self.ports
            .borrow()
            .get(port)
            .map_or(0, |p| p.queues.total_bytes())
    }

    /// Whether the peer on `port` has paused `lane`.
    #[must_use]
    pub fn is_lane_paused(&self, port: PortIndex, lane: usize) -> bool {
        self.ports
            .borrow()
            .get(port)
            .is_some_and(|p| p.paused.contains(lane))
    }

    #[must_use]
    pub fn port_telemetry(&self, port: PortIndex) -> Option<PortTelemetry> {
        self.ports.borrow().get(port).map(|p| p.telemetry.clone())
    }

    /// Bytes currently queued that arrived on `input_port` and will leave on
    /// `output_port` from `lane`.
    #[must_use]
    pub fn monitor_bytes(&self, input_port: PortIndex, output_port: PortIndex, lane: usize) -> u64 {
        self.monitor
            .borrow()
            .get(&(input_port, output_port, lane))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn cncp_flow(&self, key: &FlowKey) -> Option<FlowState> {
        self.cncp.borrow().flow(key).cloned()
    }

    #[must_use]
    pub fn num_cncp_flows(&self) -> usize {
        self.cncp.borrow().num_flows()
    }

    /// Total CNCP rate of the flows leaving through `port`.
    #[must_use]
    pub fn cncp_rate_on_port(&self, port: PortIndex) -> f64 {
        self.cncp.borrow().rate_on_egress(port)
    }
}
