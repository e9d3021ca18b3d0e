//! stratus-cli
//!
//! The driver around the engine: config loading, blob files on disk, and
//! the plan/apply commands. The `stratus` binary is a thin clap front end
//! over this library.

pub mod commands;
pub mod config;
pub mod persistence;
