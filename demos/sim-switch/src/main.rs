// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Simulate several RDMA flows sharing one CNCP rate-controlled switch port.
//!
//! Each flow enters the switch on its own lossless port and all of them leave
//! through a single egress port. Flows send fixed-size packets at a fixed
//! interval. Flow `i` stops after `duration / (i + 1)` so that flows expire
//! one after another and their rate is handed to the survivors.
//!
//! Switch settings come from the defaults, an optional TOML file given with
//! `--config` and then `DCSIM_` environment variables.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use dcsim_engine::engine::Engine;
use dcsim_engine::executor::Scheduler;
use dcsim_engine::types::SimError;
use dcsim_models::config::{CcMode, SwitchConfig};
use dcsim_models::switch::SwitchNode;
use dcsim_models::switch::device::{CaptureDevice, DeviceKind};
use dcsim_protocols::flow_key::FlowKey;
use dcsim_protocols::packet::Packet;
use dcsim_protocols::protocol;
use dcsim_protocols::telemetry::TelemetryMode;
use dcsim_track::builder::{TrackerConfig, TrackersConfig, setup_trackers};
use dcsim_track::entity::Entity;
use dcsim_track::{Tracker, info};

const GBPS: u64 = 1_000_000_000;
const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 255, 1);
const DPORT: u16 = 4791;
const PG: u16 = 3;

/// Command-line arguments.
#[derive(Parser)]
#[command(about = "CNCP switch evaluation application")]
struct Cli {
    /// TOML file of switch settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable logging to the console.
    #[arg(long, default_value = "true")]
    stdout: bool,

    /// Level of log message to display.
    #[arg(long, default_value = "Info")]
    stdout_level: log::Level,

    /// Set a regular expression for which entites should have logging level set
    /// to `--stdout-level`. Others will have level set to `Error`.
    #[arg(long, default_value = "")]
    stdout_filter_regex: String,

    /// Enable logging to a text trace file.
    #[arg(long, default_value = "false")]
    text: bool,

    /// Level of text trace events to record.
    #[arg(long, default_value = "Trace")]
    text_level: log::Level,

    /// The filename text trace output is written to.
    #[arg(long, default_value = "trace.log")]
    text_file: String,

    /// Number of flows.
    #[arg(long, default_value = "2")]
    num_flows: u16,

    /// Link rate of the shared egress port in Gbit/s.
    #[arg(long, default_value = "40")]
    egress_gbps: u64,

    /// Link rate of each ingress port in Gbit/s.
    #[arg(long, default_value = "100")]
    ingress_gbps: u64,

    /// Size of every packet, headers included.
    #[arg(long, default_value = "1000")]
    packet_bytes: usize,

    /// Time between packets of one flow.
    #[arg(long, default_value = "200")]
    interval_ns: u64,

    /// Time for which the longest flow sends.
    #[arg(long, default_value = "2000000")]
    duration_ns: u64,
}

fn build_trackers(args: &Cli) -> Result<Tracker, SimError> {
    let config = TrackersConfig {
        log: TrackerConfig {
            enable: args.stdout,
            level: args.stdout_level,
            filter_regex: args.stdout_filter_regex.as_str(),
            file: None,
        },
        text: TrackerConfig {
            enable: args.text,
            level: args.text_level,
            filter_regex: "",
            file: Some(args.text_file.as_str()),
        },
    };
    Ok(setup_trackers(&config)?)
}

fn load_config(args: &Cli) -> Result<SwitchConfig, SimError> {
    let mut config = match &args.config {
        Some(path) => SwitchConfig::from_file(path)?,
        None => SwitchConfig::from_env()?,
    };
    if config.cc_mode == CcMode::None {
        config.cc_mode = CcMode::Cncp;
    }
    Ok(config)
}

fn flow_src(index: u16) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 1 + (index % 250) as u8)
}

fn flow_key(index: u16) -> FlowKey {
    FlowKey {
        src: flow_src(index),
        dst: DST,
        sport: 1000 + index,
        dport: DPORT,
        protocol: protocol::UDP,
        pg: PG as u8,
    }
}

struct FlowSender {
    top: Rc<Entity>,
    switch: Rc<SwitchNode>,
    scheduler: Scheduler,
    index: u16,
    input_port: usize,
    packet_bytes: usize,
    interval_ns: u64,
    stop_ns: u64,
}

/// Offer one packet now and schedule the next until `stop_ns`.
fn send_next(sender: Rc<FlowSender>, seq: u32) {
    let pkt = Packet::rdma(
        &sender.top,
        flow_src(sender.index),
        DST,
        1000 + sender.index,
        DPORT,
        PG,
        seq,
        TelemetryMode::None,
        sender.packet_bytes,
    );
    sender.switch.receive(sender.input_port, pkt);

    if sender.scheduler.time_now_ns() + sender.interval_ns < sender.stop_ns {
        let scheduler = sender.scheduler.clone();
        let interval_ns = sender.interval_ns;
        scheduler.schedule(interval_ns, move || {
            send_next(sender, seq + 1);
            Ok(())
        });
    }
}

fn main() -> Result<(), SimError> {
    let args = Cli::parse();
    let tracker = build_trackers(&args)?;
    let config = load_config(&args)?;

    let mut engine = Engine::new(&tracker);
    let top = engine.top().clone();
    let scheduler = engine.scheduler();

    let switch = SwitchNode::new(&top, "switch0", 0, config, scheduler.clone())?;
    let egress = Rc::new(CaptureDevice::new(
        &top,
        "egress",
        args.egress_gbps * GBPS,
    ));
    let mut ingress = Vec::new();
    for i in 0..args.num_flows {
        let device = Rc::new(CaptureDevice::new(
            &top,
            &format!("ingress{i}"),
            args.ingress_gbps * GBPS,
        ));
        let port = switch.add_port(DeviceKind::Qbb, device.clone())?;
        ingress.push((port, device));
    }
    let egress_port = switch.add_port(DeviceKind::Qbb, egress.clone())?;
    switch.add_table_entry(DST, egress_port);

    info!(top ;
        "{} flows of {}B packets every {}ns sharing a {}Gbit/s port",
        args.num_flows,
        args.packet_bytes,
        args.interval_ns,
        args.egress_gbps,
    );

    for (i, (port, _)) in ingress.iter().enumerate() {
        let index = i as u16;
        let sender = Rc::new(FlowSender {
            top: top.clone(),
            switch: switch.clone(),
            scheduler: scheduler.clone(),
            index,
            input_port: *port,
            packet_bytes: args.packet_bytes,
            interval_ns: args.interval_ns.max(1),
            stop_ns: args.duration_ns / (u64::from(index) + 1),
        });
        send_next(sender, 0);
    }

    // Sample the allocated rates halfway through
    let sample_ns = args.duration_ns / 2;
    engine.run_until(sample_ns)?;
    for i in 0..args.num_flows {
        match switch.cncp_flow(&flow_key(i)) {
            Some(flow) => {
                info!(top ; "@{sample_ns}ns flow {i}: {:.2}Gbit/s", flow.rate_bps / 1e9);
            }
            None => {
                info!(top ; "@{sample_ns}ns flow {i}: expired");
            }
        }
    }

    engine.run()?;

    let mut total_bytes = 0;
    let sent = egress.take_transmitted();
    for pkt in &sent {
        total_bytes += pkt.size();
    }
    let time_now_ns = engine.time_now_ns();
    info!(top ; "Done at {time_now_ns}ns: {} packets ({total_bytes}B) left the switch", sent.len());
    for (i, (port, device)) in ingress.iter().enumerate() {
        info!(top ; "flow {i}: {} reports and {} PFC frames on port{port}",
            device.reports().len(), device.pfc_frames().len());
    }

    tracker.shutdown();
    Ok(())
}
