// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use std::net::Ipv4Addr;
use std::rc::Rc;

use approx::assert_relative_eq;
use dcsim_engine::engine::Engine;
use dcsim_engine::test_helpers::start_test;
use dcsim_models::config::{CcMode, CncpConfig, SwitchConfig};
use dcsim_models::switch::SwitchNode;
use dcsim_models::switch::device::{CaptureDevice, DeviceKind};
use dcsim_protocols::cncp::CncpControlHeader;
use dcsim_protocols::flow_key::FlowKey;
use dcsim_protocols::l4::{AckHeader, L4Header, PfcHeader};
use dcsim_protocols::packet::Packet;
use dcsim_protocols::telemetry::TelemetryMode;

const GBPS: u64 = 1_000_000_000;
const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);

/// Rate updates are pushed out of the way so that rates only change on
/// creation and expiry.
fn cncp_config() -> SwitchConfig {
    SwitchConfig {
        cc_mode: CcMode::Cncp,
        cncp: CncpConfig {
            update_interval_ns: 100_000_000,
            flow_expired_interval_ns: 100_000,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Rates are updated every microsecond.
fn fast_update_config() -> SwitchConfig {
    let mut config = cncp_config();
    config.cncp.update_interval_ns = 1000;
    config
}

struct Rig {
    engine: Engine,
    switch: Rc<SwitchNode>,
    upstream: Rc<CaptureDevice>,
    downstream: Rc<CaptureDevice>,
}

fn build_rig(file: &str, egress_gbps: u64) -> Rig {
    build_rig_with(file, cncp_config(), egress_gbps)
}

fn build_rig_with(file: &str, config: SwitchConfig, egress_gbps: u64) -> Rig {
    let engine = start_test(file);
    let switch =
        SwitchNode::new(engine.top(), "switch0", 0, config, engine.scheduler()).unwrap();
    let upstream = Rc::new(CaptureDevice::new(engine.top(), "upstream", 100 * GBPS));
    let downstream = Rc::new(CaptureDevice::new(engine.top(), "downstream", egress_gbps * GBPS));
    switch.add_port(DeviceKind::Qbb, upstream.clone()).unwrap();
    switch.add_port(DeviceKind::Qbb, downstream.clone()).unwrap();
    switch.add_table_entry(DST, 1);
    Rig {
        engine,
        switch,
        upstream,
        downstream,
    }
}

fn packet(engine: &Engine, sport: u16, pg: u16, size: usize) -> Packet {
    Packet::rdma(engine.top(), SRC, DST, sport, 100, pg, 0, TelemetryMode::None, size)
}

fn key(sport: u16) -> FlowKey {
    packet_key(sport, 3)
}

fn packet_key(sport: u16, pg: u8) -> FlowKey {
    FlowKey {
        src: SRC,
        dst: DST,
        sport,
        dport: 100,
        protocol: dcsim_protocols::protocol::UDP,
        pg,
    }
}

#[test]
fn window_limits_single_flow() {
    let mut rig = build_rig(file!(), 10);

    rig.switch.receive(0, packet(&rig.engine, 1, 3, 1500));
    rig.switch.receive(0, packet(&rig.engine, 1, 3, 1500));
    let flow = rig.switch.cncp_flow(&key(1)).unwrap();
    assert_relative_eq!(flow.rate_bps, 10e9);
    assert_eq!(flow.egress_port, 1);
    assert_eq!(flow.prev_hop_port, 0);

    // 1500 bytes at 10 Gbit/s takes 1200ns
    let switch = rig.switch.clone();
    let top = rig.engine.top().clone();
    rig.engine.scheduler().schedule(1200, move || {
        let pkt = Packet::rdma(&top, SRC, DST, 1, 100, 3, 0, TelemetryMode::None, 1500);
        switch.receive(0, pkt);
        Ok(())
    });
    rig.engine.run_until(10_000).unwrap();

    assert_eq!(rig.downstream.num_transmitted(), 2);
}

#[test]
fn reports_go_to_previous_hop_until_expiry() {
    let mut rig = build_rig(file!(), 10);
    rig.switch.receive(0, packet(&rig.engine, 1, 3, 1500));

    rig.engine.run_until(5_500).unwrap();
    let reports = rig.upstream.reports();
    assert_eq!(reports.len(), 5);
    assert!(reports.iter().all(|r| r.key == key(1)));
    // Capacity minus the one packet held here
    assert_eq!(reports[0].flow_info, 8_500);
    assert!(rig.downstream.reports().is_empty());

    rig.engine.run_until(150_000).unwrap();
    assert_eq!(rig.switch.num_cncp_flows(), 0);
    let num_reports = rig.upstream.reports().len();
    rig.engine.run().unwrap();
    assert_eq!(rig.upstream.reports().len(), num_reports);
}

#[test]
fn expired_flow_rate_is_shared() {
    let mut rig = build_rig(file!(), 40);

    rig.switch.receive(0, packet(&rig.engine, 1, 3, 1000));
    assert_relative_eq!(rig.switch.cncp_flow(&key(1)).unwrap().rate_bps, 40e9);
    rig.switch.receive(0, packet(&rig.engine, 2, 3, 1000));
    assert_relative_eq!(rig.switch.cncp_flow(&key(1)).unwrap().rate_bps, 20e9);
    assert_relative_eq!(rig.switch.cncp_flow(&key(2)).unwrap().rate_bps, 20e9);
    assert_relative_eq!(rig.switch.cncp_rate_on_port(1), 40e9);

    // Only the second flow keeps sending
    for i in 1..=15 {
        let switch = rig.switch.clone();
        let top = rig.engine.top().clone();
        rig.engine.scheduler().schedule(i * 10_000, move || {
            let pkt = Packet::rdma(&top, SRC, DST, 2, 100, 3, 0, TelemetryMode::None, 1000);
            switch.receive(0, pkt);
            Ok(())
        });
    }

    rig.engine.run_until(120_000).unwrap();
    assert!(rig.switch.cncp_flow(&key(1)).is_none());
    assert_relative_eq!(rig.switch.cncp_flow(&key(2)).unwrap().rate_bps, 40e9);
    assert_relative_eq!(rig.switch.cncp_rate_on_port(1), 40e9);

    rig.engine.run().unwrap();
    assert_eq!(rig.switch.num_cncp_flows(), 0);
    assert_eq!(rig.downstream.num_transmitted(), 17);
}

#[test]
fn report_packets_update_next_hop_occupancy() {
    let rig = build_rig(file!(), 10);
    let top = rig.engine.top();
    rig.switch.receive(0, packet(&rig.engine, 1, 3, 1500));

    let report = |flow_info| {
        Packet::new(
            top,
            DST,
            SRC,
            L4Header::CncpReport(CncpControlHeader {
                key: key(1),
                flow_info,
            }),
            0,
        )
    };
    rig.switch.receive(1, report(1234));
    assert_relative_eq!(rig.switch.cncp_flow(&key(1)).unwrap().q_v, 1234.0);

    // Clamped to the flow capacity
    rig.switch.receive(1, report(1 << 40));
    assert_relative_eq!(rig.switch.cncp_flow(&key(1)).unwrap().q_v, 10_000.0);

    let unknown = Packet::new(
        top,
        DST,
        SRC,
        L4Header::CncpReport(CncpControlHeader {
            key: key(7),
            flow_info: 10,
        }),
        0,
    );
    rig.switch.receive(1, unknown);
    assert!(rig.switch.cncp_flow(&key(7)).is_none());
    assert_eq!(rig.downstream.num_transmitted(), 1);
}

#[test]
fn background_and_acks_are_not_controlled() {
    let mut rig = build_rig(file!(), 10);

    for _ in 0..3 {
        rig.switch.receive(0, packet(&rig.engine, 1, 2, 1500));
    }
    assert!(rig.switch.cncp_flow(&packet_key(1, 2)).is_none());

    let ack = Packet::new(
        rig.engine.top(),
        SRC,
        DST,
        L4Header::Ack(AckHeader {
            sport: 5,
            dport: 100,
            pg: 3,
            ..Default::default()
        }),
        0,
    );
    rig.switch.receive(0, ack);
    assert_eq!(rig.switch.num_cncp_flows(), 0);

    rig.engine.run().unwrap();
    assert_eq!(rig.downstream.num_transmitted(), 4);
}

#[test]
fn timers_stop_with_the_switch() {
    let Rig {
        mut engine,
        switch,
        upstream,
        downstream,
    } = build_rig(file!(), 10);
    switch.receive(0, packet(&engine, 1, 3, 1500));
    assert_eq!(downstream.num_transmitted(), 1);

    drop(switch);
    engine.run().unwrap();
    assert!(upstream.reports().is_empty());
}

#[test]
fn recreated_flow_reports_once_per_interval() {
    let mut rig = build_rig(file!(), 10);
    rig.switch.receive(0, packet(&rig.engine, 1, 3, 1500));

    // Arrives just as the first flow expires
    let switch = rig.switch.clone();
    let top = rig.engine.top().clone();
    rig.engine.scheduler().schedule(100_000, move || {
        let pkt = Packet::rdma(&top, SRC, DST, 1, 100, 3, 0, TelemetryMode::None, 1500);
        switch.receive(0, pkt);
        Ok(())
    });

    rig.engine.run_until(150_000).unwrap();
    assert_eq!(rig.switch.num_cncp_flows(), 1);
    let before = rig.upstream.reports().len();
    rig.engine.run_until(160_000).unwrap();
    assert_eq!(rig.upstream.reports().len() - before, 10);

    rig.engine.run().unwrap();
    assert_eq!(rig.switch.num_cncp_flows(), 0);
}

#[test]
fn rate_is_capped_at_link_rate() {
    let mut rig = build_rig_with(file!(), fast_update_config(), 10);
    rig.switch.receive(0, packet(&rig.engine, 1, 3, 1500));

    // An empty egress lane pushes the rate up
    rig.engine.run_until(5_500).unwrap();
    assert_eq!(rig.switch.queue_bytes(1, 3), 0);
    assert_relative_eq!(rig.switch.cncp_flow(&key(1)).unwrap().rate_bps, 10e9);
}

#[test]
fn backlogged_lane_lowers_rate_until_expiry() {
    let mut rig = build_rig_with(file!(), fast_update_config(), 10);
    let top = rig.engine.top().clone();
    let pause = Packet::new(&top, DST, SRC, L4Header::Pfc(PfcHeader::pause(3, 0)), 0);
    rig.switch.receive(1, pause);
    rig.switch.receive(0, packet(&rig.engine, 1, 3, 1500));
    assert_eq!(rig.switch.queue_bytes(1, 3), 1500);

    rig.engine.run_until(1_500).unwrap();
    let first = rig.switch.cncp_flow(&key(1)).unwrap().rate_bps;
    // k = 12, U' = 10, q_u = 8500, q_v = 10000, p_e = 1500
    let expected =
        10e9 + 1500.0 * (10_000.0 * 12.0 + 10.0 - 1.1 * 1500.0 * 12.0 - 8500.0 * 12.0);
    assert_relative_eq!(first, expected);

    rig.engine.run_until(2_500).unwrap();
    let second = rig.switch.cncp_flow(&key(1)).unwrap().rate_bps;
    assert!(second < first);

    rig.engine.run_until(99_500).unwrap();
    let last = rig.switch.cncp_flow(&key(1)).unwrap().rate_bps;
    assert!(last < second);
    assert!(last >= 0.0);
    assert_relative_eq!(rig.switch.cncp_rate_on_port(1), last);

    // Expiry at 100us ends the update and report chains
    rig.engine.run().unwrap();
    assert_eq!(rig.switch.num_cncp_flows(), 0);
    assert!(rig.engine.time_now_ns() <= 101_000);
    assert_eq!(rig.switch.queue_bytes(1, 3), 1500);
}
