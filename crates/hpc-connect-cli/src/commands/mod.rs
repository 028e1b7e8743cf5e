//! Implementations of the `hpcc` subcommands.

pub mod config;
pub mod launch;
pub mod submit;
