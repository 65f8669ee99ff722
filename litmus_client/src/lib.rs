//! Litmus Client - Transport and live report sync for the experimentation platform
//!
//! - `api`: typed REST client (`ApiClient`) and the `ExperimentApi` seam
//! - `live`: push channel (`WsConnector`)
//! - `sync`: per-experiment report controller merging REST and push updates

pub mod api;
pub mod backoff;
pub mod config;
pub mod error;
pub mod live;
pub mod sync;

pub use api::{ApiClient, ExperimentApi};
pub use backoff::{Backoff, ReconnectPolicy};
pub use config::{ClientConfig, ConfigError};
pub use error::{ActionError, LiveError, RequestError};
pub use live::{LiveChannel, LiveConnector, WsChannel, WsConnector};
pub use sync::{
    ChannelStatus, NewGuardrail, ReportMerge, ReportSync, ReportView, Slice, SyncHandle, SyncPhase,
};

/// Controller wired to the real REST client and WebSocket connector
pub type LiveReportSync = ReportSync<ApiClient, WsConnector>;

/// Build a `LiveReportSync` from resolved configuration
pub fn live_report_sync(config: &ClientConfig) -> Result<LiveReportSync, RequestError> {
    let api = ApiClient::new(config)?;
    let connector = WsConnector::new(config.request_timeout);
    Ok(ReportSync::new(
        std::sync::Arc::new(api),
        std::sync::Arc::new(connector),
        config.clone(),
    ))
}
