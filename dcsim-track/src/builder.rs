// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Library functions to build trackers as defined by the user.

use std::fs;
use std::io::BufWriter;
use std::rc::Rc;

use log::LevelFilter;
use simplelog::{ConfigBuilder, SimpleLogger};

use crate::tracker::multi_tracker::MultiTracker;
use crate::tracker::{EntityManager, LogTracker, TextTracker, TrackConfigError};
use crate::{Tracker, Writer};

/// Configuration options for an individual tracker.
pub struct TrackerConfig<'a> {
    /// Enable this tracker.
    pub enable: bool,

    /// Set the level at which this tracker should be enabled.
    pub level: log::Level,

    /// A regular expression to match which entities should have this level
    /// applied.
    pub filter_regex: &'a str,

    /// If required, the name of the file to which the tracker will write.
    pub file: Option<&'a str>,
}

impl Default for TrackerConfig<'_> {
    fn default() -> Self {
        Self {
            enable: true,
            level: log::Level::Warn,
            filter_regex: "",
            file: None,
        }
    }
}

/// Configuration options for all tracking.
pub struct TrackersConfig<'a> {
    /// Configuration for messages sent to the `log` facade (stderr).
    pub log: TrackerConfig<'a>,

    /// Configuration for the text trace file.
    pub text: TrackerConfig<'a>,
}

/// Create the [`EntityManager`] for a tracker.
///
/// The user can pass a filter regular expression which will set the level only
/// for matching Entities and set all other Entities to only emit errors.
fn build_entity_manager(config: &TrackerConfig) -> Result<EntityManager, TrackConfigError> {
    let default_level = if config.filter_regex.is_empty() {
        config.level
    } else {
        log::Level::Error
    };

    let mut entity_manager = EntityManager::new(default_level);
    if !config.filter_regex.is_empty() {
        entity_manager.add_entity_level_filter(config.filter_regex, config.level)?;
    }
    Ok(entity_manager)
}

/// Install a `simplelog` logger and forward entity _log_ events to it.
fn build_log_tracker(config: &TrackerConfig) -> Result<Tracker, TrackConfigError> {
    init_logger(config.level.to_level_filter())?;
    Ok(Rc::new(LogTracker::new(build_entity_manager(config)?)))
}

/// Write all enabled events to a text file.
fn build_text_tracker(config: &TrackerConfig) -> Result<Tracker, TrackConfigError> {
    let Some(file_name) = config.file else {
        return Err(TrackConfigError(
            "A text tracker requires an output file".to_string(),
        ));
    };
    let file = fs::File::create(file_name)
        .map_err(|e| TrackConfigError(format!("Failed to create {file_name}: {e}")))?;
    let writer: Writer = Box::new(BufWriter::new(file));
    Ok(Rc::new(TextTracker::new(
        build_entity_manager(config)?,
        writer,
    )))
}

/// Install the global `simplelog` logger used for plain `log` messages.
///
/// Installing a second logger is not an error: the first one stays active.
pub fn init_logger(level: LevelFilter) -> Result<(), TrackConfigError> {
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_location_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();
    if SimpleLogger::init(level, config).is_err() {
        log::debug!("Logger already installed");
    }
    Ok(())
}

/// Set up log/text trackers according the the command-line arguments
pub fn setup_trackers(config: &TrackersConfig) -> Result<Tracker, TrackConfigError> {
    match (config.log.enable, config.text.enable) {
        (true, true) => {
            let mut tracker = MultiTracker::default();
            tracker.add_tracker(build_log_tracker(&config.log)?);
            tracker.add_tracker(build_text_tracker(&config.text)?);
            Ok(Rc::new(tracker))
        }
        (true, false) => build_log_tracker(&config.log),
        (false, true) => build_text_tracker(&config.text),
        (false, false) => build_log_tracker(&TrackerConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_tracker_requires_file() {
        let config = TrackerConfig {
            file: None,
            ..Default::default()
        };
        assert!(build_text_tracker(&config).is_err());
    }

    #[test]
    fn bad_filter_rejected() {
        let config = TrackerConfig {
            filter_regex: "[",
            ..Default::default()
        };
        assert!(build_entity_manager(&config).is_err());
    }
}
