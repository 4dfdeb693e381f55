//! # vkscript
//!
//! A scriptable conformance and regression runner for Vulkan.
//!
//! A test script describes, in a declarative text format, the shaders to
//! load, the device features and extensions required, the framebuffer
//! format, optional vertex/index data, pipeline state, and a sequence of
//! imperative commands (clears, draws, compute dispatches, push-constant
//! and buffer updates, and pixel/buffer probes). The library parses the
//! script, builds the matching GPU pipelines and resources, executes the
//! commands against a device, and reports pass/fail/skip per script.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vkscript::{Config, Executor, Source};
//!
//! let source = Source::from_string(
//!     "[require]\nfbsize 4 4\n[test]\nclear color 1 0 0 1\nclear\nprobe all rgba 1 0 0 1\n",
//! );
//! let mut executor = Executor::new(Config::new());
//! let result = executor.execute(&source);
//! println!("{result:?}");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::too_many_arguments
)]

pub mod config;
pub mod exec;
pub mod format;
pub mod inspect;
pub mod layout;
pub mod pipeline;
pub mod pipeline_key;
pub mod ppm;
pub mod requirements;
pub mod result;
pub mod script;
pub mod vulkan;

pub use config::{Config, EventSink};
pub use exec::Executor;
pub use inspect::{InspectBuffer, InspectData};
pub use result::TestResult;
pub use script::source::Source;
pub use script::Script;
