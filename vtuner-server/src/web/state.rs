//! Web server shared state.

use std::sync::Arc;
use std::time::Instant;

use vtuner_core::TunerContext;

pub struct WebState {
    pub context: Arc<TunerContext>,
    pub started_at: Instant,
}

impl WebState {
    pub fn new(context: Arc<TunerContext>) -> Self {
        Self {
            context,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
