//! Subcommand implementations

pub mod experiments;
pub mod live;
pub mod settings;
