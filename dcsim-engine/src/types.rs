// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Shared types.

use std::error::Error;
use std::fmt;

use dcsim_track::tracker::TrackConfigError;

// Simulation errors

#[macro_export]
/// Build a [SimError] from a message that supports `to_string`
macro_rules! sim_error {
    ($msg:expr) => {
        Err($crate::types::SimError($msg.to_string()))
    };
}

/// The `SimError` is what should be returned in the case of an error
#[derive(Debug)]
pub struct SimError(pub String);

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {}", self.0)
    }
}

impl Error for SimError {}

impl From<TrackConfigError> for SimError {
    fn from(e: TrackConfigError) -> Self {
        SimError(format!("tracker setup failed: {e}"))
    }
}

/// The SimResult is the return type for most simulation functions
pub type SimResult = Result<(), SimError>;

/// A callback that can be scheduled to run at a point in virtual time.
pub type Callback = Box<dyn FnOnce() -> SimResult + 'static>;
