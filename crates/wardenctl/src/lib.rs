//! Wardenctl library - exposes the CLI definition and handlers for testing.

pub mod cli;
pub mod commands;
pub mod output;

pub use cli::{Cli, Commands};
