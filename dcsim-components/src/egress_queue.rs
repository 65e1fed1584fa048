// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! The egress queue scheduler.
//!
//! Each output port owns an [`EgressQueueSet`]: a number of FIFO lanes that
//! share one byte budget. Lane 0 carries control traffic and is always served
//! first, even when paused. The remaining lanes are served round-robin,
//! skipping lanes that are empty or paused by PFC.
//!
//! # Example
//!
//! ```rust
//! use dcsim_components::egress_queue::{EgressQueueSet, LaneMask};
//! use dcsim_engine::traits::TotalBytes;
//! use dcsim_track::entity::toplevel;
//! use dcsim_track::tracker::dev_null_tracker;
//! use dcsim_track::{Id, Unique};
//!
//! #[derive(Debug, PartialEq)]
//! struct Frame(u64, usize);
//!
//! impl TotalBytes for Frame {
//!     fn total_bytes(&self) -> usize {
//!         self.1
//!     }
//! }
//!
//! impl Unique for Frame {
//!     fn id(&self) -> Id {
//!         Id(self.0)
//!     }
//! }
//!
//! let top = toplevel(&dev_null_tracker(), "top");
//! let mut queues = EgressQueueSet::new(&top, "queues", 4, 10_000).unwrap();
//! assert!(queues.enqueue(Frame(1, 1000), 2));
//! assert!(queues.enqueue(Frame(2, 64), 0));
//!
//! // Lane 0 first, even if paused
//! let paused = LaneMask::from_lanes(&[0, 2]);
//! assert_eq!(queues.dequeue_rr(paused), Some((0, Frame(2, 64))));
//! assert_eq!(queues.dequeue_rr(paused), None);
//! assert_eq!(queues.dequeue_rr(LaneMask::default()), Some((2, Frame(1, 1000))));
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use dcsim_engine::sim_error;
use dcsim_engine::traits::TotalBytes;
use dcsim_engine::types::SimError;
use dcsim_track::entity::Entity;
use dcsim_track::{Unique, enter, exit, trace};

/// Maximum number of lanes supported by a [`LaneMask`].
pub const MAX_LANES: usize = 32;

/// A set of lanes, used to describe which lanes are paused.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct LaneMask(u32);

impl LaneMask {
    #[must_use]
    pub fn from_lanes(lanes: &[usize]) -> Self {
        let mut mask = Self::default();
        for lane in lanes {
            mask.set(*lane);
        }
        mask
    }

    pub fn set(&mut self, lane: usize) {
        if lane < MAX_LANES {
            self.0 |= 1 << lane;
        }
    }

    pub fn clear(&mut self, lane: usize) {
        if lane < MAX_LANES {
            self.0 &= !(1 << lane);
        }
    }

    #[must_use]
    pub fn contains(&self, lane: usize) -> bool {
        lane < MAX_LANES && self.0 & (1 << lane) != 0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for LaneMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LaneMask({:#b})", self.0)
    }
}

struct QueueLane<T> {
    bytes: u32,
    fifo: VecDeque<T>,
}

impl<T> QueueLane<T> {
    fn new() -> Self {
        Self {
            bytes: 0,
            fifo: VecDeque::new(),
        }
    }
}

/// The set of lanes for one output port.
pub struct EgressQueueSet<T> {
    pub entity: Rc<Entity>,
    lanes: Vec<QueueLane<T>>,
    total_bytes: u32,
    max_bytes: u32,
    last_rr: usize,
    last_served: usize,
}

impl<T> EgressQueueSet<T>
where
    T: TotalBytes + Unique,
{
    pub fn new(
        parent: &Rc<Entity>,
        name: &str,
        num_lanes: usize,
        max_bytes: u32,
    ) -> Result<Self, SimError> {
        if num_lanes == 0 || num_lanes > MAX_LANES {
            return sim_error!(format!(
                "{name}: number of lanes must be between 1 and {MAX_LANES}"
            ));
        }
        Ok(Self {
            entity: Rc::new(Entity::new(parent, name)),
            lanes: (0..num_lanes).map(|_| QueueLane::new()).collect(),
            total_bytes: 0,
            max_bytes,
            last_rr: 0,
            last_served: 0,
        })
    }

    /// Add `item` to the end of `lane`.
    ///
    /// Returns `false` (and drops the item) if the lane does not exist or the
    /// item would take the total to or beyond the byte budget.
    pub fn enqueue(&mut self, item: T, lane: usize) -> bool {
        if lane >= self.lanes.len() {
            trace!(self.entity ; "refuse {}: no lane {lane}", item.id());
            return false;
        }
        let Ok(size) = u32::try_from(item.total_bytes()) else {
            return false;
        };
        match self.total_bytes.checked_add(size) {
            Some(new_total) if new_total < self.max_bytes => {
                enter!(self.entity ; item.id());
                self.total_bytes = new_total;
                let queue = &mut self.lanes[lane];
                queue.bytes += size;
                queue.fifo.push_back(item);
                true
            }
            _ => {
                trace!(self.entity ; "refuse {} ({size} bytes) to lane {lane}: {} of {} bytes used",
                    item.id(), self.total_bytes, self.max_bytes);
                false
            }
        }
    }

    /// Remove the next item according to the strict priority / round-robin
    /// policy.
    ///
    /// Returns the lane served along with the item.
    pub fn dequeue_rr(&mut self, paused: LaneMask) -> Option<(usize, T)> {
        let num_lanes = self.lanes.len();
        let lane = if self.lanes[0].fifo.is_empty() {
            let lane = (1..=num_lanes)
                .map(|i| (self.last_rr + i) % num_lanes)
                .find(|lane| {
                    *lane != 0 && !paused.contains(*lane) && !self.lanes[*lane].fifo.is_empty()
                })?;
            self.last_rr = lane;
            lane
        } else {
            0
        };

        let item = self.lanes[lane].fifo.pop_front()?;
        let size = item.total_bytes() as u32;
        self.lanes[lane].bytes = checked_release(self.lanes[lane].bytes, size, "lane");
        self.total_bytes = checked_release(self.total_bytes, size, "total");
        self.last_served = lane;
        exit!(self.entity ; item.id());
        Some((lane, item))
    }

    #[must_use]
    pub fn bytes_in_lane(&self, lane: usize) -> u32 {
        self.lanes.get(lane).map_or(0, |l| l.bytes)
    }

    #[must_use]
    pub fn total_bytes(&self) -> u32 {
        self.total_bytes
    }

    #[must_use]
    pub fn num_packets(&self, lane: usize) -> usize {
        self.lanes.get(lane).map_or(0, |l| l.fifo.len())
    }

    #[must_use]
    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }

    #[must_use]
    pub fn max_bytes(&self) -> u32 {
        self.max_bytes
    }

    #[must_use]
    pub fn last_served(&self) -> usize {
        self.last_served
    }
}

/// Byte counters going negative means the accounting is broken.
fn checked_release(current: u32, size: u32, counter: &str) -> u32 {
    match current.checked_sub(size) {
        Some(remaining) => remaining,
        None => panic!("{counter} byte count underflow: releasing {size} from {current}"),
    }
}

#[cfg(test)]
mod tests {
    use dcsim_track::Id;
    use dcsim_track::entity::toplevel;
    use dcsim_track::tracker::dev_null_tracker;

    use super::*;

    struct Item(u64, usize);

    impl TotalBytes for Item {
        fn total_bytes(&self) -> usize {
            self.1
        }
    }

    impl Unique for Item {
        fn id(&self) -> Id {
            Id(self.0)
        }
    }

    #[test]
    fn lane_mask() {
        let mut mask = LaneMask::from_lanes(&[1, 3]);
        assert!(mask.contains(1));
        assert!(!mask.contains(2));
        mask.clear(1);
        assert!(!mask.contains(1));
        mask.set(40);
        assert!(!mask.contains(40));
        mask.clear(3);
        assert!(mask.is_empty());
    }

    #[test]
    fn lane_count_is_checked() {
        let top = toplevel(&dev_null_tracker(), "top");
        assert!(EgressQueueSet::<Item>::new(&top, "q", 0, 100).is_err());
        assert!(EgressQueueSet::<Item>::new(&top, "q", 33, 100).is_err());
    }

    #[test]
    fn budget_is_strict() {
        let top = toplevel(&dev_null_tracker(), "top");
        let mut queues = EgressQueueSet::new(&top, "q", 2, 1000).unwrap();
        assert!(queues.enqueue(Item(1, 600), 1));
        assert!(!queues.enqueue(Item(2, 400), 1));
        assert!(queues.enqueue(Item(3, 399), 1));
        assert_eq!(queues.total_bytes(), 999);
        assert!(!queues.enqueue(Item(4, 1), 5));
    }

    #[test]
    #[should_panic(expected = "byte count underflow")]
    fn underflow_is_fatal() {
        checked_release(10, 11, "lane");
    }
}
