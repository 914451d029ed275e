//! Busy/idle aggregation across every evaluation on a page.
//!
//! Each `Indicator` belongs to an explicit `IndicatorRegistry`. When one
//! indicator starts running, every registered indicator receives `busy`;
//! when the last running indicator finishes, every one receives `idle`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Hooks a host attaches to an indicator. All default to no-ops.
pub trait IndicatorCallbacks: Send + Sync {
    /// Some evaluation on the page started.
    fn busy(&self) {}
    /// No evaluation on the page is running any more.
    fn idle(&self) {}
    /// This indicator's evaluation started.
    fn running(&self) {}
    /// This indicator's evaluation ended.
    fn finished(&self) {}
}

struct NoCallbacks;

impl IndicatorCallbacks for NoCallbacks {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorStatus {
    pub running: bool,
    /// Whether any indicator in the registry is running.
    pub busy: bool,
    pub destroyed: bool,
}

struct IndicatorState {
    id: u64,
    running: AtomicBool,
    destroyed: AtomicBool,
    callbacks: Arc<dyn IndicatorCallbacks>,
}

#[derive(Default)]
pub struct IndicatorRegistry {
    members: Mutex<Vec<Arc<IndicatorState>>>,
    next_id: AtomicU64,
}

impl IndicatorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn snapshot(&self) -> Vec<Arc<IndicatorState>> {
        self.members.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_busy(&self) -> bool {
        self.snapshot()
            .iter()
            .any(|m| m.running.load(Ordering::SeqCst))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct Indicator {
    registry: Arc<IndicatorRegistry>,
    state: Arc<IndicatorState>,
}

impl Indicator {
    pub fn new(registry: &Arc<IndicatorRegistry>) -> Self {
        Self::with_callbacks(registry, Arc::new(NoCallbacks))
    }

    pub fn with_callbacks(registry: &Arc<IndicatorRegistry>, callbacks: Arc<dyn IndicatorCallbacks>) -> Self {
        let state = Arc::new(IndicatorState {
            id: registry.next_id.fetch_add(1, Ordering::Relaxed),
            running: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            callbacks,
        });
        registry
            .members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(state.clone());
        Self {
            registry: registry.clone(),
            state,
        }
    }

    pub fn running(&self) {
        self.state.running.store(true, Ordering::SeqCst);
        for member in self.registry.snapshot() {
            member.callbacks.busy();
        }
        self.state.callbacks.running();
    }

    pub fn finished(&self) {
        self.state.running.store(false, Ordering::SeqCst);
        self.state.callbacks.finished();
        if !self.registry.is_busy() {
            for member in self.registry.snapshot() {
                member.callbacks.idle();
            }
        }
    }

    pub fn status(&self) -> IndicatorStatus {
        IndicatorStatus {
            running: self.state.running.load(Ordering::SeqCst),
            busy: self.registry.is_busy(),
            destroyed: self.state.destroyed.load(Ordering::SeqCst),
        }
    }

    /// Leaves the registry. The indicator no longer receives busy/idle
    /// signals nor counts towards `busy`.
    pub fn destroy(&self) {
        self.state.destroyed.store(true, Ordering::SeqCst);
        self.state.running.store(false, Ordering::SeqCst);
        self.registry
            .members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|m| m.id != self.state.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        events: Mutex<Vec<&'static str>>,
    }

    impl Counter {
        fn take(&self) -> Vec<&'static str> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl IndicatorCallbacks for Counter {
        fn busy(&self) {
            self.events.lock().unwrap().push("busy");
        }
        fn idle(&self) {
            self.events.lock().unwrap().push("idle");
        }
        fn running(&self) {
            self.events.lock().unwrap().push("running");
        }
        fn finished(&self) {
            self.events.lock().unwrap().push("finished");
        }
    }

    #[test]
    fn busy_and_idle_fan_out_to_every_indicator() {
        let registry = IndicatorRegistry::new();
        let a_events = Arc::new(Counter::default());
        let b_events = Arc::new(Counter::default());
        let a = Indicator::with_callbacks(&registry, a_events.clone());
        let _b = Indicator::with_callbacks(&registry, b_events.clone());

        a.running();
        assert_eq!(a_events.take(), vec!["busy", "running"]);
        assert_eq!(b_events.take(), vec!["busy"]);

        a.finished();
        assert_eq!(a_events.take(), vec!["finished", "idle"]);
        assert_eq!(b_events.take(), vec!["idle"]);
    }

    #[test]
    fn idle_waits_for_the_last_runner() {
        let registry = IndicatorRegistry::new();
        let events = Arc::new(Counter::default());
        let a = Indicator::with_callbacks(&registry, events.clone());
        let b = Indicator::new(&registry);

        a.running();
        b.running();
        events.take();

        a.finished();
        assert_eq!(events.take(), vec!["finished"]);
        assert!(a.status().busy);
        assert!(!a.status().running);

        b.finished();
        assert_eq!(events.take(), vec!["idle"]);
        assert!(!registry.is_busy());
    }

    #[test]
    fn destroyed_indicators_leave_the_registry() {
        let registry = IndicatorRegistry::new();
        let a = Indicator::new(&registry);
        a.running();
        a.destroy();
        assert!(registry.is_empty());
        assert_eq!(
            a.status(),
            IndicatorStatus { running: false, busy: false, destroyed: true }
        );
    }
}
