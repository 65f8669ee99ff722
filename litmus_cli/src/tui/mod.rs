//! Terminal User Interface for the live report view

mod app;
mod ui;

pub use app::{AppAction, Notice, WatchApp};
pub use ui::draw;
