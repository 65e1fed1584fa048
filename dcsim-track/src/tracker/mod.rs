// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Define the [`Track`] trait a number of [`Tracker`]s.

/// Include the /dev/null tracker.
pub mod dev_null;
/// Include the in-memory tracker.
pub mod in_memory;
/// Include the tracker that forwards to the `log` facade.
pub mod log_tracker;
/// Include the multi-tracker.
pub mod multi_tracker;
/// Include the text-based tracker.
pub mod text;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

pub use dev_null::DevNullTracker;
pub use in_memory::InMemoryTracker;
pub use log_tracker::LogTracker;
use regex::Regex;
pub use text::TextTracker;

use crate::{Id, ROOT, Tracker};

/// Error used to return configuration errors
#[derive(Debug)]
pub struct TrackConfigError(pub String);

impl std::fmt::Display for TrackConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TrackConfigError {}

/// This is the interface that is supported by all [`Tracker`]s.
pub trait Track {
    /// Allocate a new global ID
    fn unique_id(&self) -> Id;

    /// Determine whether tracking is enabled, and at what level for an
    /// entity looked up by its ID.
    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool;

    /// Record an entity being created.
    fn add_entity(&self, id: Id, entity_name: &str);

    /// Track when an object with the given ID arrives.
    fn enter(&self, enter_into: Id, enter_obj: Id);

    /// Track when an object with the given ID leaves.
    fn exit(&self, exit_from: Id, exit_obj: Id);

    /// Track an entity setting a value (a rate, a queue depth, ...).
    fn value(&self, id: Id, value: f64);

    /// Track when an object with the given ID is created.
    fn create(&self, created_by: Id, created_obj: Id, num_bytes: usize, name: &str);

    /// Track when an object with the given ID is destroyed.
    fn destroy(&self, destroyed_by: Id, destroyed_obj: Id);

    /// Track a log message of the given level.
    fn log(&self, msg_by: Id, level: log::Level, msg: std::fmt::Arguments);

    /// Advance the time to the time specified in `ns`.
    fn time(&self, set_by: Id, time_ns: u64);

    /// Perform any pre-exit shutdown/cleanup
    fn shutdown(&self);
}

/// Create a [`Tracker`] that prints all track events to `stdout`.
#[must_use]
pub fn stdout_tracker(level: log::Level) -> Tracker {
    let entity_manager = EntityManager::new(level);
    let stdout_writer = Box::new(std::io::BufWriter::new(io::stdout()));
    let tracker: Tracker = Rc::new(TextTracker::new(entity_manager, stdout_writer));
    tracker
}

/// Create a [`Tracker`] that suppresses all track events.
#[must_use]
pub fn dev_null_tracker() -> Tracker {
    let tracker: Tracker = Rc::new(DevNullTracker {});
    tracker
}

/// The [`EntityManager`] is responsible for determining entity log / trace
/// enable states.
///
/// This is shared by all the trackers that produce output. It is also used to
/// allocate unique [`Id`] values and remembers the last simulation time seen.
pub struct EntityManager {
    /// Level of tracking events to output.
    default_entity_level: log::Level,

    /// List of regular expressions mapping entity names to log levels.
    regex_to_entity_level: Vec<(Regex, log::Level)>,

    /// Used to assign unique IDs.
    unique_id: Cell<u64>,

    /// Keep track of the current time.
    current_time_ns: Cell<u64>,

    /// Keep track of entities that have trace enable/log levels different to
    /// the default.
    log_entity_lookup: RefCell<HashMap<Id, log::Level>>,

    /// Full names of all entities seen.
    entity_names: RefCell<HashMap<Id, String>>,
}

impl EntityManager {
    /// Constructor with default [`log::Level`]
    #[must_use]
    pub fn new(default_entity_level: log::Level) -> Self {
        Self {
            default_entity_level,
            regex_to_entity_level: Vec::new(),
            unique_id: Cell::new(ROOT.0 + 1),
            current_time_ns: Cell::new(0),
            log_entity_lookup: RefCell::new(HashMap::new()),
            entity_names: RefCell::new(HashMap::new()),
        }
    }

    fn unique_id(&self) -> Id {
        let id = self.unique_id.get();
        self.unique_id.set(id + 1);
        Id(id)
    }

    fn is_log_enabled_at_level(&self, id: Id, level: log::Level) -> bool {
        match self.log_entity_lookup.borrow().get(&id) {
            None => level <= self.default_entity_level,
            Some(entity_level) => level <= *entity_level,
        }
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        let entity_level = self.log_level_for(entity_name);
        if entity_level != self.default_entity_level
            && self
                .log_entity_lookup
                .borrow_mut()
                .insert(id, entity_level)
                .is_some()
        {
            panic!("Entity ID {id} already seen ({entity_name})");
        }
        self.entity_names
            .borrow_mut()
            .insert(id, entity_name.to_owned());
    }

    fn log_level_for(&self, entity_name: &str) -> log::Level {
        for (regex, level) in &self.regex_to_entity_level {
            if regex.is_match(entity_name) {
                return *level;
            }
        }
        self.default_entity_level
    }

    fn name_of(&self, id: Id) -> Option<String> {
        self.entity_names.borrow().get(&id).cloned()
    }

    /// Add a filter regular expression to set matching entites to a given
    /// level.
    ///
    /// # Example
    ///
    /// ```rust
    /// use dcsim_track::tracker::EntityManager;
    /// let mut manager = EntityManager::new(log::Level::Warn);
    /// manager.add_entity_level_filter(".*cncp.*", log::Level::Trace).unwrap();
    /// ```
    pub fn add_entity_level_filter(
        &mut self,
        regex_str: &str,
        level: log::Level,
    ) -> Result<(), TrackConfigError> {
        match Regex::new(regex_str) {
            Ok(regex) => self.regex_to_entity_level.push((regex, level)),
            Err(e) => {
                return Err(TrackConfigError(format!(
                    "Failed to parse regex {regex_str}:\n{e}\n"
                )));
            }
        }
        Ok(())
    }

    fn time_ns(&self) -> u64 {
        self.current_time_ns.get()
    }

    fn set_time_ns(&self, new_time_ns: u64) {
        assert!(new_time_ns >= self.current_time_ns.get());
        self.current_time_ns.set(new_time_ns);
    }
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;

    fn entity_paths() -> Vec<&'static str> {
        vec!["top", "top::switch0", "top::switch0::port0", "top::switch0::cncp"]
    }

    #[test]
    fn no_filters() {
        let manager = EntityManager::new(Level::Error);

        for p in entity_paths() {
            assert_eq!(manager.log_level_for(p), Level::Error);
        }
    }

    #[test]
    fn filter_switch_trace() {
        let mut manager = EntityManager::new(Level::Error);
        manager
            .add_entity_level_filter(r".*switch0.*", Level::Trace)
            .unwrap();

        let expected_levels = [Level::Error, Level::Trace, Level::Trace, Level::Trace];

        for (i, p) in entity_paths().iter().enumerate() {
            assert_eq!(manager.log_level_for(p), expected_levels[i]);
        }
    }

    #[test]
    fn first_filter_wins() {
        let mut manager = EntityManager::new(Level::Error);
        manager
            .add_entity_level_filter(r".*cncp", Level::Warn)
            .unwrap();
        manager
            .add_entity_level_filter(r".*switch0.*", Level::Info)
            .unwrap();

        let expected_levels = [Level::Error, Level::Info, Level::Info, Level::Warn];

        for (i, p) in entity_paths().iter().enumerate() {
            assert_eq!(manager.log_level_for(p), expected_levels[i]);
        }
    }

    #[test]
    fn bad_regex_is_reported() {
        let mut manager = EntityManager::new(Level::Error);
        assert!(manager.add_entity_level_filter(r"(", Level::Info).is_err());
    }

    #[test]
    fn ids() {
        let manager = EntityManager::new(Level::Error);
        for i in 0..10 {
            assert_eq!(manager.unique_id(), Id(i + ROOT.0 + 1));
        }
    }

    #[test]
    fn names_are_remembered() {
        let manager = EntityManager::new(Level::Error);
        let id = manager.unique_id();
        manager.add_entity(id, "top::switch0");
        assert_eq!(manager.name_of(id).as_deref(), Some("top::switch0"));
        assert_eq!(manager.name_of(Id(999)), None);
    }
}
