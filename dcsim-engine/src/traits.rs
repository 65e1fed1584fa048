// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Traits shared by objects passed around the simulation.

/// The `TotalBytes` trait is used to determine how many bytes an object
/// represents
///
/// This is what queues and buffers use for their occupancy accounting.
pub trait TotalBytes {
    fn total_bytes(&self) -> usize;
}

impl TotalBytes for Vec<u8> {
    fn total_bytes(&self) -> usize {
        self.len()
    }
}

impl TotalBytes for usize {
    fn total_bytes(&self) -> usize {
        *self
    }
}
