// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The interface between a switch and the links attached to its ports.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use dcsim_protocols::cncp::CncpControlHeader;
use dcsim_protocols::l4::PfcHeader;
use dcsim_protocols::packet::Packet;
use dcsim_track::entity::Entity;
use dcsim_track::{exit, trace};

/// The kinds of device a port can be attached to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    /// A lossless (PFC capable) link. PFC frames received on it pause and
    /// resume the port, and it carries PFC and CNCP report frames.
    Qbb,

    /// A plain link without flow control. Control frames received on it are
    /// forwarded like any other packet.
    Loopback,
}

/// A link attached to one switch port.
pub trait NetDevice {
    fn link_rate_bps(&self) -> u64;

    fn is_link_up(&self) -> bool;

    /// Put a packet on the wire.
    fn transmit(&self, packet: Packet);

    /// Send a PFC frame to the peer.
    fn send_pfc(&self, header: PfcHeader);

    /// Send a CNCP report to the peer.
    fn send_cncp_report(&self, header: CncpControlHeader);
}

/// A device that keeps everything it is asked to send.
///
/// Used to terminate ports in tests and in the demo.
pub struct CaptureDevice {
    pub entity: Rc<Entity>,
    link_rate_bps: u64,
    link_up: Cell<bool>,
    transmitted: RefCell<Vec<Packet>>,
    pfc_frames: RefCell<Vec<PfcHeader>>,
    reports: RefCell<Vec<CncpControlHeader>>,
}

impl CaptureDevice {
    #[must_use]
    pub fn new(parent: &Rc<Entity>, name: &str, link_rate_bps: u64) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, name)),
            link_rate_bps,
            link_up: Cell::new(true),
            transmitted: RefCell::new(Vec::new()),
            pfc_frames: RefCell::new(Vec::new()),
            reports: RefCell::new(Vec::new()),
        }
    }

    pub fn set_link_up(&self, up: bool) {
        self.link_up.set(up);
    }

    /// Remove and return the packets transmitted so far.
    pub fn take_transmitted(&self) -> Vec<Packet> {
        self.transmitted.take()
    }

    #[must_use]
    pub fn num_transmitted(&self) -> usize {
        self.transmitted.borrow().len()
    }

    #[must_use]
    pub fn pfc_frames(&self) -> Vec<PfcHeader> {
        self.pfc_frames.borrow().clone()
    }

    #[must_use]
    pub fn reports(&self) -> Vec<CncpControlHeader> {
        self.reports.borrow().clone()
    }
}

impl NetDevice for CaptureDevice {
    fn link_rate_bps(&self) -> u64 {
        self.link_rate_bps
    }

    fn is_link_up(&self) -> bool {
        self.link_up.get()
    }

    fn transmit(&self, packet: Packet) {
        exit!(self.entity ; packet.id);
        self.transmitted.borrow_mut().push(packet);
    }

    fn send_pfc(&self, header: PfcHeader) {
        trace!(self.entity ; "pfc lane {} time {}", header.lane, header.time);
        self.pfc_frames.borrow_mut().push(header);
    }

    fn send_cncp_report(&self, header: CncpControlHeader) {
        trace!(self.entity ; "report {} q_u={}", header.key, header.flow_info);
        self.reports.borrow_mut().push(header);
    }
}
