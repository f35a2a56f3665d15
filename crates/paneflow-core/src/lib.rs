//! Core types for the paneflow window-aggregation engine
//!
//! Shared by every other crate in the workspace: the keyed delta model,
//! timestamped values, the emitted `Windowed` aggregate, and the error type.

pub mod error;
pub mod types;

pub use error::{Result, StreamError};
pub use types::*;
