// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

use std::fs;
use std::io::BufWriter;
use std::path::Path;
use std::rc::Rc;

use dcsim_track::tracker::{EntityManager, TextTracker};
use dcsim_track::{Tracker, Writer};

use crate::engine::Engine;

/// Create a tracker that writes a text trace of a test to `traces/`.
///
/// # Panics
///
/// Only intended for tests, so panics if the trace file cannot be created.
#[must_use]
pub fn create_tracker(full_filepath: &str) -> Tracker {
    // Place all trace files in one folder
    const FOLDER: &str = "traces";

    fs::create_dir_all(FOLDER).unwrap();

    let filename_only = Path::new(full_filepath)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap();

    let writer: Writer = Box::new(BufWriter::new(
        fs::File::create(format!("{FOLDER}/{filename_only}.log")).unwrap(),
    ));

    let entity_manager = EntityManager::new(log::Level::Trace);
    let tracker: Tracker = Rc::new(TextTracker::new(entity_manager, writer));
    tracker
}

#[must_use]
pub fn start_test(full_filepath: &str) -> Engine {
    Engine::new(&create_tracker(full_filepath))
}
