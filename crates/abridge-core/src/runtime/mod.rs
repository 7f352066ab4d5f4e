//! Runtime orchestration layer: model lifecycle, request execution and status.

mod loader;
mod service;
mod status;

pub use loader::BartLoader;
pub use service::SummaryEngine;
pub use status::{JobStatus, ModelLoadingStatus, ServiceStatus, StatusTracker};
