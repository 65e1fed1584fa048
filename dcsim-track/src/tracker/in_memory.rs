// Copyright (c) 2020 Graphcore Ltd. All rights reserved.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::Id;
use crate::tracker::{EntityManager, Track};

/// A [`Track`] event.
#[derive(Debug, Clone)]
struct EventCommon {
    /// The [`Id`] of the event originator.
    id: Id,

    /// The time at which the event occurred.
    time_ns: u64,

    /// Any event-specific state.
    event: Event,
}

#[derive(Debug, Clone)]
enum Event {
    Create,
    Destroy,
    Log { level: log::Level, text: String },
    Enter { entered: Id },
    Exit { exited: Id },
    Value { value: f64 },
}

#[derive(Default)]
struct TrackedState {
    events: Vec<EventCommon>,
    id_to_num_bytes: HashMap<Id, usize>,
    name_to_id: HashMap<String, Id>,
}

/// A tracker that keeps all events in memory so that they can be queried.
///
/// This is intended for tests and for small simulations where statistics are
/// collected after the run.
pub struct InMemoryTracker {
    entity_manager: EntityManager,
    state: RefCell<TrackedState>,
}

impl InMemoryTracker {
    /// Create a new [`InMemoryTracker`] with an [`EntityManager`].
    #[must_use]
    pub fn new(entity_manager: EntityManager) -> Self {
        Self {
            entity_manager,
            state: RefCell::new(TrackedState::default()),
        }
    }

    fn add_event(&self, id: Id, event: Event) {
        let time_ns = self.entity_manager.time_ns();
        self.state
            .borrow_mut()
            .events
            .push(EventCommon { id, time_ns, event });
    }

    /// Get the [`Id`] for the specified simulation entity/object.
    #[must_use]
    pub fn id_for_name(&self, name: &str) -> Option<Id> {
        self.state.borrow().name_to_id.get(name).copied()
    }

    /// Return the number of objects that entered the entity specified by `id`.
    #[must_use]
    pub fn count_enter(&self, id: Id) -> usize {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|e| e.id == id && matches!(e.event, Event::Enter { .. }))
            .count()
    }

    /// Return the number of objects that exited the entity specified by `id`.
    #[must_use]
    pub fn count_exit(&self, id: Id) -> usize {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|e| e.id == id && matches!(e.event, Event::Exit { .. }))
            .count()
    }

    /// Return the total number of bytes of objects that exited the entity.
    ///
    /// Objects whose creation was not tracked count as zero bytes.
    #[must_use]
    pub fn bytes_exited(&self, id: Id) -> usize {
        let state = self.state.borrow();
        state
            .events
            .iter()
            .filter(|e| e.id == id)
            .filter_map(|e| match e.event {
                Event::Exit { exited } => state.id_to_num_bytes.get(&exited).copied(),
                _ => None,
            })
            .sum()
    }

    /// Return all the `(time_ns, value)` pairs set by an entity.
    #[must_use]
    pub fn values(&self, id: Id) -> Vec<(u64, f64)> {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|e| e.id == id)
            .filter_map(|e| match e.event {
                Event::Value { value } => Some((e.time_ns, value)),
                _ => None,
            })
            .collect()
    }

    /// Return the number of _log_ messages at `level` that contain `text`.
    #[must_use]
    pub fn count_logs_containing(&self, level: log::Level, text: &str) -> usize {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|e| match &e.event {
                Event::Log { level: l, text: t } => *l == level && t.contains(text),
                _ => false,
            })
            .count()
    }

    /// Return the number of objects destroyed by the entity specified by `id`.
    #[must_use]
    pub fn count_destroy(&self, id: Id) -> usize {
        self.state
            .borrow()
            .events
            .iter()
            .filter(|e| e.id == id && matches!(e.event, Event::Destroy))
            .count()
    }
}

/// Implementation for each [`Track`] event
impl Track for InMemoryTracker {
    fn unique_id(&self) -> Id {
        self.entity_manager.unique_id()
    }

    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool {
        self.entity_manager.is_log_enabled_at_level(id, level)
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        self.entity_manager.add_entity(id, entity_name);
        self.state
            .borrow_mut()
            .name_to_id
            .insert(entity_name.to_owned(), id);
    }

    fn enter(&self, id: Id, object: Id) {
        self.add_event(id, Event::Enter { entered: object });
    }

    fn exit(&self, id: Id, object: Id) {
        self.add_event(id, Event::Exit { exited: object });
    }

    fn value(&self, id: Id, value: f64) {
        self.add_event(id, Event::Value { value });
    }

    fn create(&self, _created_by: Id, id: Id, num_bytes: usize, name: &str) {
        self.add_event(id, Event::Create);
        let mut state = self.state.borrow_mut();
        state.id_to_num_bytes.insert(id, num_bytes);
        state.name_to_id.entry(name.to_owned()).or_insert(id);
    }

    fn destroy(&self, destroyed_by: Id, id: Id) {
        self.add_event(destroyed_by, Event::Destroy);
        self.state.borrow_mut().id_to_num_bytes.remove(&id);
    }

    fn log(&self, id: Id, level: log::Level, msg: std::fmt::Arguments) {
        self.add_event(
            id,
            Event::Log {
                level,
                text: format!("{msg}"),
            },
        );
    }

    fn time(&self, _set_by: Id, time_ns: u64) {
        self.entity_manager.set_time_ns(time_ns);
    }

    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::entity::{Entity, toplevel};
    use crate::{Tracker, create, enter, exit, info, set_time, value};

    struct Blob(Id);

    impl crate::Unique for Blob {
        fn id(&self) -> Id {
            self.0
        }
    }

    impl std::fmt::Display for Blob {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "blob{}", self.0)
        }
    }

    #[test]
    fn counts_and_bytes() {
        let in_memory = Rc::new(InMemoryTracker::new(EntityManager::new(log::Level::Trace)));
        let tracker: Tracker = in_memory.clone();
        let top = toplevel(&tracker, "top");
        let port = Entity::new(&top, "port0");

        let blob = Blob(tracker.unique_id());
        create!(port ; blob, 1000);
        enter!(port ; blob.0);
        set_time!(port ; 10);
        exit!(port ; blob.0);
        value!(port ; 2.5);
        info!(port ; "sent {}", blob);

        let port_id = in_memory.id_for_name("top::port0").unwrap();
        assert_eq!(port_id, port.id);
        assert_eq!(in_memory.count_enter(port_id), 1);
        assert_eq!(in_memory.count_exit(port_id), 1);
        assert_eq!(in_memory.bytes_exited(port_id), 1000);
        assert_eq!(in_memory.values(port_id), vec![(10, 2.5)]);
        assert_eq!(in_memory.count_logs_containing(log::Level::Info, "sent blob"), 1);
    }
}
