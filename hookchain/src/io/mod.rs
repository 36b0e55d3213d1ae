//! I/O adapters: config, model and tool commands, recorders, seed files.

pub mod config;
pub mod memory;
pub mod model;
pub mod process;
pub mod recorder;
pub mod seed;
pub mod tools;
