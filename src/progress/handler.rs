//! Progress handler trait and events

use std::time::Duration;

/// Events emitted while the bootstrap pipeline runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Build plan assembled and validated
    PlanRendered { stages: usize, instructions: usize },

    /// Model download started
    PrefetchStarted { model: String, files: usize },

    /// One model file is present in the cache
    FileFetched { file: String, bytes: u64 },

    /// All model files downloaded
    PrefetchComplete {
        model: String,
        total_bytes: u64,
        duration: Duration,
    },

    /// Offline cache lookup finished
    CacheVerified { model: String, complete: bool },

    /// About to replace this process with the server
    Launching { program: String, port: u16 },
}

/// Trait for handling progress events
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl ProgressHandler for CountingHandler {
        fn on_progress(&self, _event: &ProgressEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_progress_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            count: count.clone(),
        };

        handler.on_progress(&ProgressEvent::PrefetchStarted {
            model: "m".to_string(),
            files: 2,
        });
        handler.on_progress(&ProgressEvent::FileFetched {
            file: "config.json".to_string(),
            bytes: 10,
        });
        handler.on_progress(&ProgressEvent::PrefetchComplete {
            model: "m".to_string(),
            total_bytes: 10,
            duration: Duration::from_millis(5),
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_event_debug() {
        let event = ProgressEvent::Launching {
            program: "uvicorn".to_string(),
            port: 3000,
        };
        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("Launching"));
        assert!(debug_str.contains("port: 3000"));
    }
}
