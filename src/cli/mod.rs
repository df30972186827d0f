//! CLI command handlers

pub mod commands;

pub use commands::{create_template, flatten, read_sheets, unflatten};
