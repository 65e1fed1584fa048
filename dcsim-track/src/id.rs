// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Unique identifiers.

/// Ids that are unique across the simulation
///
/// Each _log_/_trace_ event within the application is given a unique id to
/// identify it. There are two reserved values: [NO_ID](crate::NO_ID) and
/// [ROOT](crate::ROOT).
#[derive(Copy, Clone, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Id(pub u64);

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Objects that carry a unique [`Id`] used when tracking them.
pub trait Unique {
    /// Return the unique id of an object.
    fn id(&self) -> Id;
}

impl Unique for Id {
    fn id(&self) -> Id {
        *self
    }
}
