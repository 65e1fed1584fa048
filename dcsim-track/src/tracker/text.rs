// Copyright (c) 2020 Graphcore Ltd. All rights reserved.

use std::cell::RefCell;
use std::io::Write;

use crate::tracker::{EntityManager, Track};
use crate::{Id, Writer};

/// A simple text logger to output messages to a Writer.
pub struct TextTracker {
    entity_manager: EntityManager,

    /// Writer to which all _log_ events will be written.
    writer: RefCell<Writer>,
}

impl TextTracker {
    /// Create a new [`TextTracker`] with an [`EntityManager`].
    pub fn new(entity_manager: EntityManager, writer: Writer) -> Self {
        Self {
            entity_manager,
            writer: RefCell::new(writer),
        }
    }

    fn write_line(&self, line: std::fmt::Arguments) {
        if let Err(e) = writeln!(self.writer.borrow_mut(), "{line}") {
            log::error!("Failed to write trace event: {e}");
        }
    }
}

/// Implementation for each [`Track`] event
impl Track for TextTracker {
    fn unique_id(&self) -> Id {
        self.entity_manager.unique_id()
    }

    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool {
        self.entity_manager.is_log_enabled_at_level(id, level)
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        self.entity_manager.add_entity(id, entity_name);
    }

    fn enter(&self, id: Id, object: Id) {
        self.write_line(format_args!("{id}: enter {object}"));
    }

    fn exit(&self, id: Id, object: Id) {
        self.write_line(format_args!("{id}: exit {object}"));
    }

    fn value(&self, id: Id, value: f64) {
        self.write_line(format_args!("{id}: value {value}"));
    }

    fn create(&self, created_by: Id, id: Id, num_bytes: usize, name: &str) {
        self.write_line(format_args!(
            "{created_by}: created {id}, {name}, {num_bytes} bytes"
        ));
    }

    fn destroy(&self, destroyed_by: Id, id: Id) {
        self.write_line(format_args!("{destroyed_by}: destroyed {id}"));
    }

    fn log(&self, id: Id, level: log::Level, msg: std::fmt::Arguments) {
        self.write_line(format_args!("{id}:{level}: {msg}"));
    }

    fn time(&self, set_by: Id, time_ns: u64) {
        self.entity_manager.set_time_ns(time_ns);
        if self.is_entity_enabled(set_by, log::Level::Trace) {
            self.write_line(format_args!("{set_by}: set time to {time_ns}ns"));
        }
    }

    fn shutdown(&self) {
        if let Err(e) = self.writer.borrow_mut().flush() {
            log::error!("Failed to flush trace writer: {e}");
        }
    }
}
