#![forbid(unsafe_code)]
//! Static front-end asset pipeline: a small task DAG over glob-driven file
//! transforms, with cached image optimization, an optional watch mode with
//! WebSocket live reload, and an optional development HTTP server.
//!
//! The pipeline is configured with an immutable [`Paths`] value and exposed
//! through [`Pipeline`], which maps task names (`styles`, `minify:css`,
//! `build`, ...) onto a prerequisite graph. External heavy lifting (script
//! transpilation, minification, linting) is delegated to the tools the
//! front-end ecosystem already ships; Sass compilation and image
//! re-encoding run in-process.

mod config;
mod error;
mod globset;
mod images;
mod io;
mod lint;
mod pipeline;
mod registry;
mod scripts;
mod styles;

#[cfg(feature = "server")]
mod serve;
#[cfg(feature = "live")]
mod watch;

pub use crate::config::Paths;
pub use crate::error::*;
pub use crate::globset::GlobSet;
pub use crate::pipeline::Pipeline;
pub use crate::registry::{Registry, ReloadSink, TaskContext};
#[cfg(feature = "live")]
pub use crate::watch::{Reaction, ReloadHub, WatchBinding};
