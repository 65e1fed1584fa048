// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Building blocks used by the switch models.
//!
//! - [egress_queue](crate::egress_queue): the per-port set of byte-bounded
//!   lanes with a strict-priority lane 0 and round-robin between the others.
//! - [mmu](crate::mmu): the [`AdmissionAuthority`](crate::mmu::AdmissionAuthority)
//!   interface which decides whether a packet may be buffered, and when PFC
//!   pause/resume frames and ECN marks are required. A shared-buffer
//!   implementation is provided.

pub mod egress_queue;
pub mod mmu;
