//! Host-runtime access discipline and the injected progress channel
//!
//! The host runtime is one logical resource: at most one dispatch may be
//! actively executing inside it at a time. Concurrent native threads
//! serialize on the process-wide gate below. The gate is reentrant so a
//! native body may dispatch a nested call (e.g. a captured closure)
//! without deadlocking against its own guard.

use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::sync::Arc;

static GATE: Lazy<ReentrantMutex<()>> = Lazy::new(|| ReentrantMutex::new(()));

/// Acquire exclusive access to the host runtime for one dispatch
///
/// Blocks until every other thread's dispatch has completed. Reentrant
/// acquisition from the same thread succeeds immediately.
pub fn acquire() -> ReentrantMutexGuard<'static, ()> {
    GATE.lock()
}

/// Sink for progress/log text owned by the host environment
pub trait ProgressSink: Send + Sync {
    fn emit(&self, message: &str);
}

/// Default sink: forwards progress text to the tracing subscriber
struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, message: &str) {
        tracing::info!(target: "pylon::progress", "{}", message);
    }
}

static SINK: Lazy<RwLock<Arc<dyn ProgressSink>>> =
    Lazy::new(|| RwLock::new(Arc::new(TracingSink)));

/// Install the host-owned progress sink
pub fn set_progress_sink(sink: Arc<dyn ProgressSink>) {
    *SINK.write() = sink;
}

/// Emit one line of progress text through the installed sink
pub fn emit(message: &str) {
    SINK.read().emit(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct CollectingSink {
        lines: Mutex<Vec<String>>,
    }

    impl ProgressSink for CollectingSink {
        fn emit(&self, message: &str) {
            self.lines.lock().push(message.to_string());
        }
    }

    #[test]
    fn test_injected_sink_receives_text() {
        let sink = Arc::new(CollectingSink { lines: Mutex::new(Vec::new()) });
        set_progress_sink(sink.clone());
        emit("50% complete");
        assert_eq!(sink.lines.lock().as_slice(), &["50% complete".to_string()]);
    }

    #[test]
    fn test_gate_is_reentrant() {
        let _outer = acquire();
        let _inner = acquire();
    }
}
