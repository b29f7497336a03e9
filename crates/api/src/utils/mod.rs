//! Logging bootstrap and command helpers

pub mod command_helpers;
pub mod logging;
