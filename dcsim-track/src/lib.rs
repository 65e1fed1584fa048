// Copyright (c) 2020 Graphcore Ltd. All rights reserved.

//! This module provides combined _track_ capabilities for the dcsim project.
//!
//! _Track_ means the combination of _log_ and _trace_ where:
//!
//!   - _log_ are text-based human-readable messages emitted at various levels
//!     of verbosity (from `Trace` through to `Error`).
//!   - _trace_ provides a standard set of modelling events that can be emitted.
//!     For example, packet creation or packets entering/exiting a queue
//!     [`Entity`](crate::entity::Entity).
//!
//! Every part of a switch model owns an [`Entity`](crate::entity::Entity) and
//! emits messages through the macros exported here, for example:
//!
//! ```rust
//! use dcsim_track::entity::{Entity, toplevel};
//! use dcsim_track::tracker::dev_null_tracker;
//! use dcsim_track::debug;
//!
//! let tracker = dev_null_tracker();
//! let top = toplevel(&tracker, "top");
//! let switch = Entity::new(&top, "switch0");
//! debug!(switch ; "Drop: no route to {}", "10.0.0.1");
//! ```

// Enable warnings for missing documentation
#![warn(missing_docs)]

use std::rc::Rc;

pub use log;

pub mod builder;
pub mod entity;
pub mod id;
pub mod test_helpers;

/// Include the trackers.
pub mod tracker;
pub use id::{Id, Unique};
pub use tracker::Track;

/// A type alias for objects that receive _log_ / _trace_ events.
pub type Writer = Box<dyn std::io::Write>;

/// The type of a [`Track`] implementation shared across entities.
///
/// The simulation is single-threaded so this is reference counted with [`Rc`].
pub type Tracker = Rc<dyn Track>;

/// Id value which indicates where there is no valid id
pub const NO_ID: Id = Id(0);

/// The root id from which all other ids are derived
pub const ROOT: Id = Id(1);

/// Create a unique id for tracking.
///
/// The user must specify an entity with a [`Tracker`] to create the id.
#[macro_export]
macro_rules! create_id {
    ($entity:expr) => {{ $entity.tracker.unique_id() }};
}

/// Track an object entering an entity.
#[macro_export]
macro_rules! enter {
    ($entity:expr ; $enter_id:expr) => {
        if $entity
            .tracker
            .is_entity_enabled($entity.id, $crate::log::Level::Trace)
        {
            $entity.tracker.enter($entity.id, $enter_id);
        }
    };
}

/// Track an object leaving an entity.
#[macro_export]
macro_rules! exit {
    ($entity:expr ; $exit_id:expr) => {
        if $entity
            .tracker
            .is_entity_enabled($entity.id, $crate::log::Level::Trace)
        {
            $entity.tracker.exit($entity.id, $exit_id);
        }
    };
}

/// Add a creation event.
///
/// The first form tracks the creation of an entity, the second the creation
/// of an object (for example a packet) by an entity.
#[macro_export]
macro_rules! create {
    ($entity:expr) => {{
        if $entity
            .tracker
            .is_entity_enabled($entity.id, $crate::log::Level::Trace)
        {
            let parent_id = match &$entity.parent {
                Some(parent) => parent.id,
                None => $crate::NO_ID,
            };
            $entity
                .tracker
                .create(parent_id, $entity.id, 0, $entity.full_name().as_str());
        }
    }};
    ($entity:expr ; $created:expr, $num_bytes:expr) => {{
        if $entity
            .tracker
            .is_entity_enabled($entity.id, $crate::log::Level::Trace)
        {
            $entity.tracker.create(
                $entity.id,
                $crate::Unique::id(&$created),
                $num_bytes,
                format!("{}", $created).as_str(),
            );
        }
    }};
}

/// Add a destroy event.
#[macro_export]
macro_rules! destroy {
    ($entity:expr) => {{
        if $entity
            .tracker
            .is_entity_enabled($entity.id, $crate::log::Level::Trace)
        {
            match &$entity.parent {
                Some(parent) => $entity.tracker.destroy(parent.id, $entity.id),
                None => $entity.tracker.destroy($crate::NO_ID, $entity.id),
            };
        }
    }};
    ($entity:expr ; $destroyed_id:expr) => {{
        if $entity
            .tracker
            .is_entity_enabled($entity.id, $crate::log::Level::Trace)
        {
            $entity.tracker.destroy($entity.id, $destroyed_id);
        }
    }};
}

/// Update the current time.
///
/// This is always forwarded so that trackers which prefix messages with the
/// time stay up to date. Each tracker decides whether to emit an event.
#[macro_export]
macro_rules! set_time {
    ($entity:expr ; $time_ns:expr) => {{
        $entity.tracker.time($entity.id, $time_ns);
    }};
}

/// Track an entity setting a value.
#[macro_export]
macro_rules! value {
    ($entity:expr ; $value:expr) => {{
        if $entity
            .tracker
            .is_entity_enabled($entity.id, $crate::log::Level::Trace)
        {
            $entity.tracker.value($entity.id, $value);
        }
    }};
}

/// Base macro for log messages of all levels.
#[macro_export]
macro_rules! log_base {
    ($entity:expr ; $lvl:expr, $($arg:tt)+) => (
        if $entity.tracker.is_entity_enabled($entity.id, $lvl) {
            $entity.tracker.log($entity.id, $lvl, format_args!($($arg)+));
        }
    );
}

/// Log at level `log::Level::Trace`
#[macro_export]
macro_rules! trace {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Trace, $($arg)+);
    );
}

/// Log at level `log::Level::Debug`
#[macro_export]
macro_rules! debug {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Debug, $($arg)+);
    );
}

/// Log at level `log::Level::Info`
#[macro_export]
macro_rules! info {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Info, $($arg)+);
    );
}

/// Log at level `log::Level::Warn`
#[macro_export]
macro_rules! warn {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Warn, $($arg)+);
    );
}

/// Log at level `log::Level::Error`
#[macro_export]
macro_rules! error {
    ($entity:expr ; $($arg:tt)+) => (
        $crate::log_base!($entity ; $crate::log::Level::Error, $($arg)+);
    );
}
