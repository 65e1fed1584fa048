// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use std::net::Ipv4Addr;
use std::rc::Rc;

use dcsim_components::mmu::MmuConfig;
use dcsim_engine::engine::Engine;
use dcsim_engine::test_helpers::start_test;
use dcsim_models::config::{CcMode, SwitchConfig};
use dcsim_models::switch::SwitchNode;
use dcsim_models::switch::device::{CaptureDevice, DeviceKind};
use dcsim_protocols::ipv4::Ecn;
use dcsim_protocols::l4::{AckHeader, L4Header, PfcHeader, TcpHeader};
use dcsim_protocols::packet::Packet;
use dcsim_protocols::telemetry::{TelemetryHeader, TelemetryMode};
use dcsim_track::Tracker;
use dcsim_track::tracker::{EntityManager, InMemoryTracker};

const GBPS: u64 = 1_000_000_000;
const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);

struct Rig {
    engine: Engine,
    switch: Rc<SwitchNode>,
    devices: Vec<Rc<CaptureDevice>>,
}

/// A switch with `rates_gbps.len()` lossless ports. Traffic to `DST` leaves
/// on the last port.
fn build_rig(file: &str, config: SwitchConfig, rates_gbps: &[u64]) -> Rig {
    let engine = start_test(file);
    let switch = SwitchNode::new(engine.top(), "switch0", 0, config, engine.scheduler()).unwrap();
    let mut devices = Vec::new();
    for (i, rate) in rates_gbps.iter().enumerate() {
        let device = Rc::new(CaptureDevice::new(engine.top(), &format!("link{i}"), rate * GBPS));
        switch.add_port(DeviceKind::Qbb, device.clone()).unwrap();
        devices.push(device);
    }
    switch.add_table_entry(DST, rates_gbps.len() - 1);
    Rig {
        engine,
        switch,
        devices,
    }
}

fn rdma(engine: &Engine, sport: u16, pg: u16, mode: TelemetryMode, size: usize) -> Packet {
    Packet::rdma(engine.top(), SRC, DST, sport, 100, pg, 0, mode, size)
}

#[test]
fn forwards_to_routed_port() {
    let mut rig = build_rig(file!(), SwitchConfig::default(), &[10, 10]);
    let pkt = rdma(&rig.engine, 1, 3, TelemetryMode::None, 1000);
    let id = pkt.id;
    rig.switch.receive(0, pkt);
    rig.engine.run().unwrap();

    let sent = rig.devices[1].take_transmitted();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, id);
    assert_eq!(sent[0].ingress_port, None);
    assert_eq!(rig.switch.port_telemetry(1).unwrap().tx_bytes, 1000);
    assert_eq!(rig.switch.monitor_bytes(0, 1, 3), 0);
}

#[test]
fn unroutable_is_dropped() {
    let mut rig = build_rig(file!(), SwitchConfig::default(), &[10, 10]);
    let pkt = Packet::rdma(
        rig.engine.top(),
        SRC,
        Ipv4Addr::new(192, 168, 0, 1),
        1,
        2,
        3,
        0,
        TelemetryMode::None,
        1000,
    );
    rig.switch.receive(0, pkt);
    rig.engine.run().unwrap();
    assert_eq!(rig.devices[1].num_transmitted(), 0);

    rig.switch.clear_table();
    rig.switch.receive(0, rdma(&rig.engine, 1, 3, TelemetryMode::None, 1000));
    rig.engine.run().unwrap();
    assert_eq!(rig.devices[1].num_transmitted(), 0);
}

#[test]
fn lane_out_of_range_is_dropped() {
    let mut rig = build_rig(file!(), SwitchConfig::default(), &[10, 10]);
    rig.switch.receive(0, rdma(&rig.engine, 1, 9, TelemetryMode::None, 1000));
    rig.engine.run().unwrap();
    assert_eq!(rig.devices[1].num_transmitted(), 0);
}

#[test]
fn classification() {
    let config = SwitchConfig {
        ack_high_prio: true,
        ..Default::default()
    };
    let rig = build_rig(file!(), config, &[10, 10]);
    let top = rig.engine.top();

    let tcp = Packet::tcp(top, SRC, DST, TcpHeader::default(), 500);
    assert_eq!(rig.switch.classify(&tcp), 1);
    assert_eq!(rig.switch.classify(&rdma(&rig.engine, 1, 5, TelemetryMode::None, 500)), 5);

    let ack = Packet::new(top, SRC, DST, L4Header::Ack(AckHeader { pg: 3, ..Default::default() }), 0);
    assert_eq!(rig.switch.classify(&ack), 0);
    let pfc = Packet::new(top, SRC, DST, L4Header::Pfc(PfcHeader::pause(3, 0)), 0);
    assert_eq!(rig.switch.classify(&pfc), 0);

    let low_prio_acks = build_rig(file!(), SwitchConfig::default(), &[10, 10]);
    assert_eq!(low_prio_acks.switch.classify(&ack), 3);
}

#[test]
fn ecmp_is_stable_and_spreads() {
    let rig = build_rig(file!(), SwitchConfig::default(), &[10, 10, 10, 10, 10]);
    rig.switch.clear_table();
    for port in 1..5 {
        rig.switch.add_table_entry(DST, port);
    }

    let pkt = rdma(&rig.engine, 7, 3, TelemetryMode::None, 100);
    let first = rig.switch.ecmp_lookup(&pkt);
    assert!(first.is_some());
    for _ in 0..100 {
        assert_eq!(rig.switch.ecmp_lookup(&pkt), first);
    }

    let mut used = [false; 5];
    for sport in 0..64 {
        let port = rig
            .switch
            .ecmp_lookup(&rdma(&rig.engine, sport, 3, TelemetryMode::None, 100))
            .unwrap();
        assert!((1..5).contains(&port));
        used[port] = true;
    }
    assert!(used.iter().filter(|u| **u).count() > 1);

    let mut moved = false;
    for seed in 1..16 {
        rig.switch.set_ecmp_seed(seed);
        moved |= rig.switch.ecmp_lookup(&pkt) != first;
    }
    assert!(moved);
}

fn small_buffer() -> SwitchConfig {
    SwitchConfig {
        mmu: MmuConfig {
            buffer_bytes: 100_000,
            reserve_bytes: 1_000,
            resume_offset_bytes: 500,
            headroom_bytes: 10_000,
            pfc_alpha_shift: 1,
            kmin_bytes: 1_000,
            kmax_bytes: 2_000,
            pmax: 0.0,
        },
        ..Default::default()
    }
}

#[test]
fn pfc_pause_once_then_resume() {
    let mut rig = build_rig(file!(), small_buffer(), &[10, 10]);
    rig.devices[1].set_link_up(false);

    for sport in 0..40 {
        rig.switch
            .receive(0, rdma(&rig.engine, sport, 3, TelemetryMode::None, 1000));
    }
    let frames = rig.devices[0].pfc_frames();
    assert_eq!(frames, vec![PfcHeader::pause(3, frames[0].qlen)]);
    assert!(rig.switch.queue_bytes(1, 3) > 0);
    assert!(rig.switch.monitor_bytes(0, 1, 3) > 0);

    rig.devices[1].set_link_up(true);
    rig.switch.start_transmit(1);
    rig.engine.run().unwrap();

    let frames = rig.devices[0].pfc_frames();
    assert_eq!(frames.len(), 2);
    assert!(frames[1].is_resume());
    assert_eq!(frames[1].lane, 3);
    assert_eq!(rig.switch.queue_total_bytes(1), 0);
    assert_eq!(rig.switch.monitor_bytes(0, 1, 3), 0);
}

#[test]
fn pfc_disabled_never_pauses() {
    let config = SwitchConfig {
        pfc_enabled: false,
        ..small_buffer()
    };
    let rig = build_rig(file!(), config, &[10, 10]);
    rig.devices[1].set_link_up(false);
    for sport in 0..40 {
        rig.switch
            .receive(0, rdma(&rig.engine, sport, 3, TelemetryMode::None, 1000));
    }
    assert!(rig.devices[0].pfc_frames().is_empty());
}

#[test]
fn peer_pause_holds_lane() {
    let mut rig = build_rig(file!(), SwitchConfig::default(), &[10, 10]);
    let top = rig.engine.top().clone();

    let pause = Packet::new(&top, DST, SRC, L4Header::Pfc(PfcHeader::pause(3, 0)), 0);
    rig.switch.receive(1, pause);
    assert!(rig.switch.is_lane_paused(1, 3));

    rig.switch.receive(0, rdma(&rig.engine, 1, 3, TelemetryMode::None, 1000));
    rig.switch
        .receive(0, Packet::tcp(&top, SRC, DST, TcpHeader::default(), 1000));
    rig.engine.run().unwrap();
    let sent = rig.devices[1].take_transmitted();
    assert_eq!(sent.len(), 1);
    assert_eq!(rig.switch.queue_bytes(1, 3), 1000);

    let resume = Packet::new(&top, DST, SRC, L4Header::Pfc(PfcHeader::resume(3, 0)), 0);
    rig.switch.receive(1, resume);
    rig.engine.run().unwrap();
    assert_eq!(rig.devices[1].num_transmitted(), 1);
    assert!(!rig.switch.is_lane_paused(1, 3));
}

#[test]
fn control_frames_pass_through_plain_links() {
    let mut engine = start_test(file!());
    let switch =
        SwitchNode::new(engine.top(), "switch0", 0, SwitchConfig::default(), engine.scheduler())
            .unwrap();
    let input = Rc::new(CaptureDevice::new(engine.top(), "in", 10 * GBPS));
    let output = Rc::new(CaptureDevice::new(engine.top(), "out", 10 * GBPS));
    switch.add_port(DeviceKind::Loopback, input.clone()).unwrap();
    switch.add_port(DeviceKind::Loopback, output.clone()).unwrap();
    switch.add_table_entry(DST, 1);

    let pause = Packet::new(engine.top(), SRC, DST, L4Header::Pfc(PfcHeader::pause(3, 0)), 0);
    switch.receive(0, pause);
    engine.run().unwrap();
    assert!(!switch.is_lane_paused(0, 3));
    assert_eq!(output.num_transmitted(), 1);
}

#[test]
fn ecn_marks_congested_lane() {
    let config = SwitchConfig {
        ecn_enabled: true,
        ..small_buffer()
    };
    let mut rig = build_rig(file!(), config, &[10, 10]);
    rig.devices[1].set_link_up(false);
    for sport in 0..5 {
        rig.switch
            .receive(0, rdma(&rig.engine, sport, 3, TelemetryMode::None, 1000));
    }
    rig.devices[1].set_link_up(true);
    rig.switch.start_transmit(1);
    rig.engine.run().unwrap();

    // Lane occupancy after each packet leaves: 4000, 3000, 2000, 1000, 0
    let marks: Vec<bool> = rig.devices[1]
        .take_transmitted()
        .iter()
        .map(|p| p.ip.ecn() == Ecn::Ce)
        .collect();
    assert_eq!(marks, vec![true, true, false, false, false]);
}

#[test]
fn hpcc_pushes_hops() {
    let config = SwitchConfig {
        cc_mode: CcMode::Hpcc,
        ..Default::default()
    };
    let mut rig = build_rig(file!(), config, &[100, 100]);
    for sport in 0..3 {
        rig.switch
            .receive(0, rdma(&rig.engine, sport, 3, TelemetryMode::IntHops, 1280));
    }
    rig.engine.run().unwrap();

    let hops: Vec<_> = rig.devices[1]
        .take_transmitted()
        .into_iter()
        .map(|p| match p.telemetry() {
            Some(TelemetryHeader::IntHops(hops)) => hops.clone(),
            other => panic!("unexpected telemetry {other:?}"),
        })
        .collect();
    assert_eq!(hops.len(), 3);
    assert!(hops.iter().all(|h| h.len() == 1));
    assert_eq!(hops[0][0].line_rate_bps(), 100 * GBPS);
    assert_eq!(hops[0][0].tx_bytes(), 0);
    assert_eq!(hops[1][0].tx_bytes(), 1280);
    assert_eq!(hops[1][0].qlen_bytes(), 1280);
    assert_eq!(hops[2][0].qlen_bytes(), 0);
}

#[test]
fn pint_max_holds_power() {
    let config = SwitchConfig {
        cc_mode: CcMode::HpccPint,
        ..Default::default()
    };
    let mut rig = build_rig(file!(), config, &[100, 100]);
    let mode = TelemetryMode::Pint { bytes: 2 };

    rig.switch.receive(0, rdma(&rig.engine, 1, 3, mode, 1000));
    rig.switch.receive(0, rdma(&rig.engine, 2, 3, mode, 1000));
    let mut held = rdma(&rig.engine, 3, 3, mode, 1000);
    if let Some(header) = held.telemetry_mut() {
        *header = TelemetryHeader::Pint {
            power: u16::MAX,
            bytes: 2,
        };
    }
    rig.switch.receive(0, held);
    rig.engine.run().unwrap();

    let powers: Vec<u16> = rig.devices[1]
        .take_transmitted()
        .iter()
        .map(|p| match p.telemetry() {
            Some(TelemetryHeader::Pint { power, .. }) => *power,
            other => panic!("unexpected telemetry {other:?}"),
        })
        .collect();
    assert_eq!(powers.len(), 3);
    assert!(powers[1] > 0);
    assert_eq!(powers[2], u16::MAX);
    assert!(rig.switch.port_telemetry(1).unwrap().u > 0.0);
}

#[test]
fn pint_utilisation_is_tracked() {
    let in_memory = Rc::new(InMemoryTracker::new(EntityManager::new(dcsim_track::log::Level::Trace)));
    let tracker: Tracker = in_memory.clone();
    let mut engine = Engine::new(&tracker);
    let config = SwitchConfig {
        cc_mode: CcMode::HpccPint,
        ..Default::default()
    };
    let switch = SwitchNode::new(engine.top(), "switch0", 0, config, engine.scheduler()).unwrap();
    for i in 0..2 {
        let device = Rc::new(CaptureDevice::new(engine.top(), &format!("link{i}"), 100 * GBPS));
        switch.add_port(DeviceKind::Qbb, device).unwrap();
    }
    switch.add_table_entry(DST, 1);

    let mode = TelemetryMode::Pint { bytes: 2 };
    for sport in 0..3 {
        switch.receive(0, rdma(&engine, sport, 3, mode, 1000));
    }
    engine.run().unwrap();

    let queue = in_memory.id_for_name("top::switch0::port1").unwrap();
    assert_eq!(in_memory.count_enter(queue), 3);
    assert_eq!(in_memory.count_exit(queue), 3);
    let values = in_memory.values(queue);
    assert_eq!(values.len(), 3);
    assert_eq!(values[0], (0, 0.0));
    assert!(values[2].1 > 0.0);

    let link = in_memory.id_for_name("top::link1").unwrap();
    assert_eq!(in_memory.bytes_exited(link), 3000);
}
