//! Runner configuration and event callbacks
//!
//! The configuration owns the options that apply across scripts
//! (disassembly, image dumping) and the event sink that receives parse
//! errors, per-test notifications, and the final-state inspection data.

use std::path::PathBuf;

use crate::inspect::InspectData;
use crate::result::TestResult;

/// Receiver for runner events
///
/// All methods have empty default implementations so an implementation
/// only needs to override the events it cares about. The executor calls
/// these synchronously from the thread running the scripts.
pub trait EventSink {
    /// Called for every parse or execution error with a human-readable
    /// message
    fn error(&mut self, message: &str) {
        let _ = message;
    }

    /// Called before a script starts executing
    fn before_test(&mut self, filename: &str) {
        let _ = filename;
    }

    /// Called after a script finishes with its result
    fn after_test(&mut self, filename: &str, result: TestResult) {
        let _ = (filename, result);
    }

    /// Called after the command sequence of a script completes, with the
    /// final framebuffer and buffer contents
    fn inspect(&mut self, data: &InspectData) {
        let _ = data;
    }
}

/// Sink that logs errors and discards everything else
struct LogSink;

impl EventSink for LogSink {
    fn error(&mut self, message: &str) {
        log::error!("{message}");
    }
}

/// Options and callbacks shared by every script an executor runs
pub struct Config {
    pub(crate) show_disassembly: bool,
    pub(crate) image_filename: Option<PathBuf>,
    pub(crate) sink: Box<dyn EventSink>,
}

impl Config {
    /// Create a configuration with default options and a sink that routes
    /// errors to the `log` crate
    pub fn new() -> Self {
        Self {
            show_disassembly: false,
            image_filename: None,
            sink: Box::new(LogSink),
        }
    }

    /// Log the disassembly of every shader after it is built
    pub fn set_show_disassembly(&mut self, show: bool) -> &mut Self {
        self.show_disassembly = show;
        self
    }

    /// Write a PPM image of the final framebuffer after each script
    pub fn set_image_filename(&mut self, path: Option<PathBuf>) -> &mut Self {
        self.image_filename = path;
        self
    }

    /// Replace the event sink
    pub fn set_sink(&mut self, sink: Box<dyn EventSink>) -> &mut Self {
        self.sink = sink;
        self
    }

    pub(crate) fn error(&mut self, message: &str) {
        self.sink.error(message);
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
