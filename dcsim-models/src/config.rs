// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Switch configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `DCSIM_` (nested fields separated by
//! `__`, for example `DCSIM_CNCP__GAMMA=2000`).

use std::path::Path;

use dcsim_components::mmu::MmuConfig;
use dcsim_engine::sim_error;
use dcsim_engine::types::SimError;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// The congestion control scheme the switch supports.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CcMode {
    #[default]
    None,

    /// Push an INT hop record into every RDMA packet.
    Hpcc,

    /// Max-hold a compressed utilisation estimate into every RDMA packet.
    HpccPint,

    /// Explicit per-flow rate control.
    Cncp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CncpConfig {
    pub gamma: f64,
    pub lambda: f64,
    pub report_interval_ns: u64,
    pub update_interval_ns: u64,
    pub flow_expired_interval_ns: u64,

    /// Initial and maximum value of `q_u` and `q_v`.
    pub default_flow_capacity_bytes: u64,

    /// Priority group that is never rate controlled.
    pub background_pg: u16,
}

impl Default for CncpConfig {
    fn default() -> Self {
        Self {
            gamma: 1500.0,
            lambda: 1e11,
            report_interval_ns: 1000,
            update_interval_ns: 1000,
            flow_expired_interval_ns: 1_000_000,
            default_flow_capacity_bytes: 10_000,
            background_pg: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Width of the PINT power field (1 or 2 bytes).
    pub pint_bytes: u8,
    pub pint_log_base: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            pint_bytes: 2,
            pint_log_base: 1.05,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// ECMP hash seed. The switch id is used when not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecmp_seed: Option<u32>,

    pub ecn_enabled: bool,
    pub pfc_enabled: bool,
    pub cc_mode: CcMode,

    /// Upper bound on the interval used by the utilisation estimate.
    pub max_rtt_ns: u64,

    /// Send ACK/NACK on the control lane.
    pub ack_high_prio: bool,

    pub num_lanes: usize,

    /// Byte budget of each port's egress queues.
    pub egress_max_bytes: u32,

    /// Seed for the switch-local random stream.
    pub rng_seed: u64,

    pub cncp: CncpConfig,
    pub telemetry: TelemetryConfig,
    pub mmu: MmuConfig,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            ecmp_seed: None,
            ecn_enabled: false,
            pfc_enabled: true,
            cc_mode: CcMode::None,
            max_rtt_ns: 9000,
            ack_high_prio: false,
            num_lanes: 8,
            egress_max_bytes: 4 * 1024 * 1024,
            rng_seed: 0,
            cncp: CncpConfig::default(),
            telemetry: TelemetryConfig::default(),
            mmu: MmuConfig::default(),
        }
    }
}

impl SwitchConfig {
    /// The defaults with any `DCSIM_` environment overrides applied.
    pub fn from_env() -> Result<Self, SimError> {
        Self::extract(Self::figment_with_defaults())
    }

    /// The defaults, overridden by `conf_file` and then the environment.
    pub fn from_file(conf_file: &Path) -> Result<Self, SimError> {
        if !conf_file.exists() {
            return sim_error!(format!(
                "configuration file {} not found",
                conf_file.display()
            ));
        }
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(conf_file))
            .merge(Env::prefixed("DCSIM_").split("__"));
        Self::extract(figment)
    }

    /// The defaults overridden by TOML text (no environment).
    pub fn from_toml_str(toml: &str) -> Result<Self, SimError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml));
        Self::extract(figment)
    }

    fn figment_with_defaults() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("DCSIM_").split("__"))
    }

    fn extract(figment: Figment) -> Result<Self, SimError> {
        let config: Self = match figment.extract() {
            Ok(config) => config,
            Err(e) => return sim_error!(format!("invalid switch configuration: {e}")),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that would otherwise fail deep inside the model.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.num_lanes < 2 {
            return sim_error!("num_lanes must be at least 2 (control lane and TCP lane)");
        }
        if self.cncp.report_interval_ns == 0
            || self.cncp.update_interval_ns == 0
            || self.cncp.flow_expired_interval_ns == 0
        {
            return sim_error!("CNCP intervals must be non-zero");
        }
        if self.max_rtt_ns == 0 {
            return sim_error!("max_rtt_ns must be non-zero");
        }
        if self.mmu.kmax_bytes < self.mmu.kmin_bytes {
            return sim_error!("mmu.kmax_bytes must not be less than mmu.kmin_bytes");
        }
        Ok(())
    }
}
