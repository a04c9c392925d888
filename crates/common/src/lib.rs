//! Common utilities and types shared across the probe agent crates.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
