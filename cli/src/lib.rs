//! weft-cli library: command handlers exposed for unit tests.

pub mod commands;
