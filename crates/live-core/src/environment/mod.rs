//! Named scopes inside one interpreter connection.
//!
//! An `EnvironmentInstance` is created once per runtime connection and passed
//! by reference to every `EnvironmentManager` built for that runtime. Scopes
//! are created lazily; each id maps to at most one live interpreter-side
//! container at a time.

pub mod manager;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::errors::{LiveError, RuntimeError};
use crate::runtime::{BindValue, ObjectRef, Runtime, RuntimeKind};

pub use manager::{DiscardPolicy, EnvRole, EnvironmentManager};

/// Id of the runtime's top-level namespace. Always present, never destroyed.
pub const GLOBAL_SCOPE: &str = "global";

type ScopeSlot = Arc<OnceCell<ObjectRef>>;

pub struct EnvironmentInstance {
    runtime: Arc<dyn Runtime>,
    scopes: Mutex<HashMap<String, ScopeSlot>>,
}

impl EnvironmentInstance {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn kind(&self) -> RuntimeKind {
        self.runtime.kind()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, ScopeSlot>> {
        self.scopes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a container is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        id == GLOBAL_SCOPE || self.slots().contains_key(id)
    }

    /// Registered scope ids, sorted.
    pub fn scope_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the container for `id`, creating an empty child of the global
    /// namespace on first use.
    pub async fn get(&self, id: &str) -> Result<ObjectRef, LiveError> {
        let global = self.runtime.global_scope();
        if id == GLOBAL_SCOPE {
            return Ok(global);
        }

        let slot = self.slots().entry(id.to_string()).or_default().clone();
        let handle = slot
            .get_or_try_init(|| async {
                log::debug!("Creating scope '{}'", id);
                self.runtime.create_scope(global).await
            })
            .await?;
        Ok(*handle)
    }

    /// Creates `target` as a child of `parent`.
    ///
    /// With `discard`, an existing container under `target` is destroyed and
    /// rebuilt; without it, the existing container is returned unchanged.
    pub async fn create(&self, target: &str, parent: &str, discard: bool) -> Result<ObjectRef, LiveError> {
        if target == parent || target == GLOBAL_SCOPE {
            return self.get(target).await;
        }

        if self.contains(target) {
            if !discard {
                log::debug!("Reusing scope '{}'", target);
                return self.get(target).await;
            }
            self.destroy(target).await?;
        }

        let parent_handle = self.get(parent).await?;
        let slot: ScopeSlot = Arc::new(OnceCell::new());
        self.slots().insert(target.to_string(), slot.clone());

        let created = slot
            .get_or_try_init(|| async {
                log::debug!("Creating scope '{}' with parent '{}'", target, parent);
                self.runtime.create_scope(parent_handle).await
            })
            .await;

        match created {
            Ok(handle) => Ok(*handle),
            Err(err) => {
                let mut slots = self.slots();
                if slots.get(target).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                    slots.remove(target);
                }
                Err(err.into())
            }
        }
    }

    /// Binds `key` in the container at `id`. Host values are converted to
    /// native objects first; native handles are bound as they are.
    pub async fn bind(&self, key: &str, value: BindValue, id: &str) -> Result<(), LiveError> {
        let scope = self.get(id).await?;

        if let BindValue::Native(handle) = value {
            self.runtime.bind(scope, key, handle).await?;
            return Ok(());
        }

        let converted = self.runtime.convert_from_host(&value).await?;
        let bound = self.runtime.bind(scope, key, converted).await;
        if let Err(e) = self.runtime.release(&[converted]).await {
            log::debug!("Converted value for '{}' was not released: {}", key, e);
        }
        bound.map_err(LiveError::from)
    }

    /// Looks `key` up from the container at `id`, falling through parents.
    /// The returned handle is owned by the caller.
    pub async fn lookup(&self, key: &str, id: &str) -> Result<ObjectRef, LiveError> {
        let scope = self.get(id).await?;
        Ok(self.runtime.lookup(scope, key).await?)
    }

    /// Releases the container at `id`. A no-op for the global namespace and
    /// for ids without a container; a container the interpreter already
    /// reclaimed is not an error.
    pub async fn destroy(&self, id: &str) -> Result<(), LiveError> {
        if id == GLOBAL_SCOPE {
            return Ok(());
        }

        let Some(slot) = self.slots().remove(id) else {
            return Ok(());
        };
        let Some(handle) = slot.get().copied() else {
            log::debug!("Scope '{}' was never realized", id);
            return Ok(());
        };

        match self.runtime.release(&[handle]).await {
            Ok(()) => {
                log::debug!("Destroyed scope '{}'", id);
                Ok(())
            }
            Err(RuntimeError::AlreadyReleased(_)) => {
                log::debug!("Scope '{}' was already released", id);
                Ok(())
            }
            Err(e) => Err(LiveError::ScopeRelease {
                scope: id.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::MinirInterpreter;
    use crate::runtime::{NativeValue, WorkerRuntime};
    use serde_json::json;

    async fn instance() -> EnvironmentInstance {
        let runtime = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
        EnvironmentInstance::new(runtime)
    }

    async fn read(env: &EnvironmentInstance, key: &str, id: &str) -> Option<NativeValue> {
        let handle = env.lookup(key, id).await.ok()?;
        let value = env.runtime().describe(handle).await.ok();
        env.runtime().release(&[handle]).await.unwrap();
        value
    }

    #[tokio::test]
    async fn get_is_idempotent() {
        let env = instance().await;
        let a = env.get("ex-prep").await.unwrap();
        let b = env.get("ex-prep").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(env.get(GLOBAL_SCOPE).await.unwrap(), env.runtime().global_scope());
    }

    #[tokio::test]
    async fn concurrent_gets_share_one_container() {
        let env = instance().await;
        let (a, b) = tokio::join!(env.get("shared"), env.get("shared"));
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn create_derives_from_parent() {
        let env = instance().await;
        env.bind("x", json!(5).into(), "ex-prep").await.unwrap();
        env.create("ex-result", "ex-prep", true).await.unwrap();
        assert_eq!(
            read(&env, "x", "ex-result").await,
            Some(NativeValue::Double { values: vec![Some(5.0)] })
        );
    }

    #[tokio::test]
    async fn create_with_discard_rebuilds() {
        let env = instance().await;
        let first = env.create("ex-result", "ex-prep", true).await.unwrap();
        env.bind("y", json!("a").into(), "ex-result").await.unwrap();
        let second = env.create("ex-result", "ex-prep", true).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(read(&env, "y", "ex-result").await, None);
    }

    #[tokio::test]
    async fn create_without_discard_reuses() {
        let env = instance().await;
        let first = env.create("ex-result", "ex-prep", false).await.unwrap();
        env.bind("y", json!("a").into(), "ex-result").await.unwrap();
        let second = env.create("ex-result", "ex-prep", false).await.unwrap();
        assert_eq!(first, second);
        assert!(read(&env, "y", "ex-result").await.is_some());
    }

    #[tokio::test]
    async fn create_onto_self_or_global_is_get() {
        let env = instance().await;
        let prep = env.get("ex-prep").await.unwrap();
        assert_eq!(env.create("ex-prep", "ex-prep", true).await.unwrap(), prep);
        assert_eq!(
            env.create(GLOBAL_SCOPE, "ex-prep", true).await.unwrap(),
            env.runtime().global_scope()
        );
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let env = instance().await;
        env.get("gone").await.unwrap();
        env.destroy("gone").await.unwrap();
        env.destroy("gone").await.unwrap();
        env.destroy("never-created").await.unwrap();
        env.destroy(GLOBAL_SCOPE).await.unwrap();
        assert!(!env.contains("gone"));
        assert!(env.contains(GLOBAL_SCOPE));
    }

    #[tokio::test]
    async fn destroy_tolerates_containers_released_elsewhere() {
        let env = instance().await;
        let handle = env.get("ex-prep").await.unwrap();
        env.runtime().release(&[handle]).await.unwrap();
        env.destroy("ex-prep").await.unwrap();
    }

    #[tokio::test]
    async fn records_bind_as_named_lists() {
        let env = instance().await;
        env.bind("rec", json!({"a": 1, "b": "two"}).into(), GLOBAL_SCOPE)
            .await
            .unwrap();
        match read(&env, "rec", GLOBAL_SCOPE).await {
            Some(NativeValue::List { names, items }) => {
                assert_eq!(names, Some(vec!["a".to_string(), "b".to_string()]));
                env.runtime().release(&items).await.unwrap();
            }
            other => panic!("expected a named list, got {:?}", other),
        }
    }
}
