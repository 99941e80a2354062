//! Webserver state shared by every handler

use std::sync::Arc;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use orchestrator::BatchService;

/// Cheap to clone; handlers receive it through axum's `State`
#[derive(Clone)]
pub struct WebServerState {
    pub service: BatchService,
    inner: Arc<StateInner>,
}

struct StateInner {
    started: Instant,
    started_at: DateTime<Utc>,
}

impl WebServerState {
    pub fn new(service: BatchService) -> Self {
        Self {
            service,
            inner: Arc::new(StateInner {
                started: Instant::now(),
                started_at: Utc::now(),
            }),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.started.elapsed().as_secs()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }
}
