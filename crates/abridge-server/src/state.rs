//! Application state shared by all handlers

use std::sync::Arc;

use abridge_core::SummaryEngine;

#[derive(Clone)]
pub struct AppState {
    /// Engine reference; it bounds concurrency and owns the shared model
    pub engine: Arc<SummaryEngine>,
    /// Client for fetching pages to summarise
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(engine: SummaryEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            http: reqwest::Client::new(),
        }
    }
}
