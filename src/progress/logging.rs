//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::PlanRendered {
                stages,
                instructions,
            } => {
                info!(stages, instructions, "Build plan rendered");
            }
            ProgressEvent::PrefetchStarted { model, files } => {
                info!(model = %model, files, "Prefetching model");
            }
            ProgressEvent::FileFetched { file, bytes } => {
                debug!(file = %file, bytes, "Model file cached");
            }
            ProgressEvent::PrefetchComplete {
                model,
                total_bytes,
                duration,
            } => {
                info!(
                    model = %model,
                    total_bytes,
                    duration_ms = duration.as_millis(),
                    "Model prefetch complete"
                );
            }
            ProgressEvent::CacheVerified { model, complete } => {
                if *complete {
                    debug!(model = %model, "Model cache verified");
                } else {
                    warn!(model = %model, "Model cache incomplete");
                }
            }
            ProgressEvent::Launching { program, port } => {
                info!(program = %program, port, "Launching server");
            }
        }
    }
}
