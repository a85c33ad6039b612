//! The individual build tasks. Each one is synchronous and reads its inputs
//! from a [`Config`](crate::Config) captured at construction.

pub mod clean;
pub mod html;
pub mod image;
pub mod script;
pub mod style;
pub mod transcode;

pub use clean::{HtmlSnapshot, StyleCleanTask};
pub use html::{HtmlError, HtmlTask};
pub use image::{DefaultOptimizer, ImageError, ImageKind, ImageTask, Optimizer};
pub use script::{ScriptError, ScriptTask};
pub use style::{StyleError, StyleTask};
pub use transcode::{Format, TranscodeTask};
