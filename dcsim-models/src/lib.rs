// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Models of datacentre network nodes.
//!
//! - [switch](crate::switch): the [`SwitchNode`](crate::switch::SwitchNode)
//!   with ECMP forwarding, PFC, ECN and INT/PINT telemetry stamping.
//! - [cncp](crate::cncp): the per-flow CNCP rate controller used by the
//!   switch.
//! - [config](crate::config): switch settings, loaded from defaults, TOML and
//!   the environment.

pub mod cncp;
pub mod config;
pub mod switch;
