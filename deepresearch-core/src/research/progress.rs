//! Shared progress state for one traversal.
//!
//! A single [`ResearchProgress`] lives behind a mutex. Every update mutates it,
//! restores the `completed <= total` invariant, and hands the observer a copy
//! while the lock is still held, so observers see updates in one total order.
//! Observers must not call back into the tracker. A panicking observer is
//! logged and skipped for that update; the traversal carries on.

use super::types::ResearchProgress;
use crate::config::ResearchConfig;
use crate::error::panic_message;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::error;

/// Receives progress snapshots.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: ResearchProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(ResearchProgress) + Send + Sync,
{
    fn on_progress(&self, progress: ResearchProgress) {
        self(progress)
    }
}

/// Observer that ignores every update.
pub struct NoOpProgressObserver;

impl ProgressObserver for NoOpProgressObserver {
    fn on_progress(&self, _progress: ResearchProgress) {}
}

/// Progress context constructed once per traversal root.
pub struct ProgressTracker {
    state: Mutex<ResearchProgress>,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl ProgressTracker {
    /// Start tracking a traversal described by `config`. The observer receives
    /// the initial snapshot immediately.
    pub fn new(config: &ResearchConfig, observer: Option<Arc<dyn ProgressObserver>>) -> Self {
        let initial = ResearchProgress {
            current_depth: 1,
            total_depth: config.depth,
            current_breadth: config.breadth,
            total_breadth: config.breadth,
            completed_queries: 0,
            total_queries: config.estimated_total_queries(),
            current_query: None,
        };
        let tracker = Self {
            state: Mutex::new(initial),
            observer,
        };
        tracker.update(|_| {});
        tracker
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> ResearchProgress {
        self.lock().clone()
    }

    /// A node at `level` started planning `breadth` queries.
    pub fn enter_level(&self, level: usize, breadth: usize) {
        self.update(|p| {
            p.current_depth = level;
            p.current_breadth = breadth;
        });
    }

    /// One unit finished executing, successfully or not. Called exactly once
    /// per executed unit.
    pub fn record_completion(&self, query: &str, level: usize, breadth: usize) {
        self.update(|p| {
            p.completed_queries += 1;
            p.current_query = Some(query.to_string());
            p.current_depth = level;
            p.current_breadth = breadth;
        });
    }

    /// Apply `f`, clamp `total_queries`, and notify the observer.
    pub fn update(&self, f: impl FnOnce(&mut ResearchProgress)) {
        let mut state = self.lock();
        f(&mut state);
        if state.total_queries < state.completed_queries {
            state.total_queries = state.completed_queries;
        }
        if let Some(observer) = &self.observer {
            let snapshot = state.clone();
            let notified =
                std::panic::catch_unwind(AssertUnwindSafe(|| observer.on_progress(snapshot)));
            if let Err(panic) = notified {
                error!(
                    completed = state.completed_queries,
                    panic = %panic_message(&*panic),
                    "Progress observer panicked"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResearchProgress> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
