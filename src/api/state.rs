use std::sync::Arc;

use crate::observability::Metrics;
use crate::queue::JobQueue;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(queue: Arc<JobQueue>, metrics: Arc<Metrics>) -> Self {
        Self { queue, metrics }
    }
}
