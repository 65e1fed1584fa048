// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

#![doc(test(attr(warn(unused))))]

//! The dcsim engine.
//!
//! This library provides a small deterministic [engine](crate::engine::Engine)
//! which executes callbacks in virtual-time order. Models never read a global
//! clock: they are given a [`Scheduler`](crate::executor::Scheduler) handle
//! which provides the current time and allows callbacks to be scheduled in the
//! future.
//!
//! There is no cancellation. A periodic activity stops by not scheduling its
//! next callback.
//!
//! # Simple Application
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use dcsim_engine::engine::Engine;
//! use dcsim_track::tracker::dev_null_tracker;
//!
//! let mut engine = Engine::new(&dev_null_tracker());
//! let scheduler = engine.scheduler();
//! let fired_at = Rc::new(Cell::new(0));
//! {
//!     let fired_at = fired_at.clone();
//!     let inner = scheduler.clone();
//!     scheduler.schedule(100, move || {
//!         fired_at.set(inner.time_now_ns());
//!         Ok(())
//!     });
//! }
//! engine.run().unwrap();
//! assert_eq!(fired_at.get(), 100);
//! ```

pub mod engine;
pub mod executor;
pub mod test_helpers;
pub mod time;
pub mod traits;
pub mod types;
