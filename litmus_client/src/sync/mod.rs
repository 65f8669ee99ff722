//! Live report synchronization
//!
//! `ReportSync::mount` starts a controller task for one experiment and
//! returns a `SyncHandle`. Renderers read `ReportView`s from the handle and
//! dispatch actions through it.

mod controller;
mod view;

pub use controller::{NewGuardrail, ReportSync, SyncHandle};
pub use view::{ChannelStatus, ReportMerge, ReportView, Slice, SyncPhase};
