//! Per-call arena for interpreter-side handles.
//!
//! Every handle an evaluation produces (capture values, plots, looked-up
//! bindings, describe children) is tracked here and released by one `purge`
//! when the call ends. Nothing tracked may outlive the call unless it was
//! retained separately.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::errors::{LiveError, RuntimeError};
use crate::runtime::{ObjectRef, Runtime};

/// Tracked handles in first-seen order, with a set for O(1) dedup.
#[derive(Default)]
struct Tracked {
    order: Vec<ObjectRef>,
    seen: HashSet<ObjectRef>,
}

impl Tracked {
    fn insert(&mut self, handle: ObjectRef) {
        if self.seen.insert(handle) {
            self.order.push(handle);
        }
    }

    fn take(&mut self) -> Vec<ObjectRef> {
        self.seen.clear();
        std::mem::take(&mut self.order)
    }
}

pub struct Shelter {
    id: Uuid,
    runtime: Arc<dyn Runtime>,
    handles: Mutex<Tracked>,
}

impl Shelter {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            id: Uuid::new_v4(),
            runtime,
            handles: Mutex::new(Tracked::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, Tracked> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn track(&self, handle: ObjectRef) -> ObjectRef {
        self.handles().insert(handle);
        handle
    }

    pub fn track_all(&self, handles: impl IntoIterator<Item = ObjectRef>) {
        let mut tracked = self.handles();
        for handle in handles {
            tracked.insert(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.handles().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles().order.is_empty()
    }

    /// Releases everything tracked so far. Handles the interpreter already
    /// reclaimed are skipped silently.
    pub async fn purge(&self) -> Result<(), LiveError> {
        let handles = self.handles().take();
        if handles.is_empty() {
            return Ok(());
        }

        log::debug!("Purging {} handle(s) from shelter {}", handles.len(), self.id);
        match self.runtime.release(&handles).await {
            Ok(()) | Err(RuntimeError::AlreadyReleased(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Shelter {
    fn drop(&mut self) {
        let handles = self.handles().take();
        if handles.is_empty() {
            return;
        }

        log::warn!(
            "Shelter {} dropped with {} unreleased handle(s)",
            self.id,
            handles.len()
        );
        release_detached(self.runtime.clone(), handles, format!("shelter {}", self.id));
    }
}

/// Releases handles from a synchronous context (typically `Drop`). Can't
/// await there, so the release runs on the ambient tokio runtime, if any.
pub(crate) fn release_detached(runtime: Arc<dyn Runtime>, handles: Vec<ObjectRef>, owner: String) {
    if let Ok(rt) = tokio::runtime::Handle::try_current() {
        rt.spawn(async move {
            match runtime.release(&handles).await {
                Ok(()) | Err(RuntimeError::AlreadyReleased(_)) => {}
                Err(e) => log::error!("Failed to release {}: {}", owner, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::MinirInterpreter;
    use crate::runtime::{BindValue, WorkerRuntime};
    use serde_json::json;

    #[tokio::test]
    async fn purge_releases_tracked_handles() {
        let runtime = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
        let shelter = Shelter::new(runtime.clone());
        let a = runtime.convert_from_host(&BindValue::Json(json!(1))).await.unwrap();
        let b = runtime.convert_from_host(&BindValue::Json(json!(2))).await.unwrap();
        shelter.track(a);
        shelter.track_all([b, a]);
        assert_eq!(shelter.len(), 2);

        shelter.purge().await.unwrap();
        assert!(shelter.is_empty());
        assert!(matches!(
            runtime.describe(a).await,
            Err(RuntimeError::AlreadyReleased(_))
        ));
    }

    #[tokio::test]
    async fn purge_skips_handles_released_elsewhere() {
        let runtime = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
        let shelter = Shelter::new(runtime.clone());
        let a = runtime.convert_from_host(&BindValue::Json(json!("x"))).await.unwrap();
        shelter.track(a);
        runtime.release(&[a]).await.unwrap();
        shelter.purge().await.unwrap();
        shelter.purge().await.unwrap();
    }

    #[tokio::test]
    async fn many_children_are_tracked_once_in_order() {
        let runtime = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
        let shelter = Shelter::new(runtime);
        shelter.track_all((0..50_000).map(ObjectRef));
        shelter.track_all((0..50_000).rev().map(ObjectRef));
        assert_eq!(shelter.len(), 50_000);
        assert_eq!(shelter.handles().take().first(), Some(&ObjectRef(0)));
        assert!(shelter.is_empty());
    }
}
