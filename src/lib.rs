#![forbid(unsafe_code)]
//! A static asset pipeline.
//!
//! Sources under `src/` are turned into deployable files under `public/` by
//! a handful of named tasks:
//!
//! | task          | input                         | output                           |
//! |---------------|-------------------------------|----------------------------------|
//! | `html`        | `src/views/**/*.html`         | minified, cache-busted mirror    |
//! | `style`       | `src/styles/**/*.scss`        | `public/styles/styles.css`       |
//! | `clean-style` | built HTML + `styles.css`     | `styles.css` without dead rules  |
//! | `script`      | `src/scripts/**/*.js`         | transpiled and minified mirror   |
//! | `image`       | `src/images/**/*.{png,jpg,svg}` | optimized mirror               |
//! | `image-webp`  | `src/images/**/*.{png,jpg}`   | `.webp` siblings                 |
//! | `image-avif`  | `src/images/**/*.{png,jpg}`   | `.avif` siblings                 |
//!
//! Every output except images gets a `.map` next to it. The [`Pipeline`]
//! runs tasks once by name, or under a [`WatchDispatcher`] that re-runs a
//! task whenever its sources change.

mod cache;
mod config;
mod core;
mod error;
mod io;
#[cfg(feature = "logging")]
pub mod logging;
mod pipeline;
mod sourcemap;
mod task;
pub mod tasks;
mod watch;

pub use crate::cache::{CacheKey, ImageCache};
pub use crate::config::*;
pub use crate::core::{Hash32, TaskName};
pub use crate::error::*;
pub use crate::io::SourceFile;
pub use crate::pipeline::{Pipeline, Started, Summary};
pub use crate::task::{Outcome, Report};
pub use crate::watch::{
    DispatcherState, TaskRunner, WatchBinding, WatchDispatcher, resolve_watch_path,
};
