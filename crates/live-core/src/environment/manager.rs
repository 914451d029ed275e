//! Role-addressed view of an `EnvironmentInstance` for one evaluation context.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::{EnvironmentInstance, GLOBAL_SCOPE};
use crate::errors::LiveError;
use crate::runtime::{BindValue, ObjectRef};

/// Purpose of a scope within one evaluation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvRole {
    /// Inputs and setup code.
    Prep,
    /// User code; child of `Prep`.
    Result,
    /// Checking routine; child of `Result`.
    Grading,
    /// Instructor solution; child of `Prep`.
    Solution,
    Global,
}

impl EnvRole {
    pub const ALL: [EnvRole; 5] = [
        EnvRole::Prep,
        EnvRole::Result,
        EnvRole::Grading,
        EnvRole::Solution,
        EnvRole::Global,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvRole::Prep => "prep",
            EnvRole::Result => "result",
            EnvRole::Grading => "grading",
            EnvRole::Solution => "solution",
            EnvRole::Global => "global",
        }
    }

    fn index(&self) -> usize {
        match self {
            EnvRole::Prep => 0,
            EnvRole::Result => 1,
            EnvRole::Grading => 2,
            EnvRole::Solution => 3,
            EnvRole::Global => 4,
        }
    }
}

impl fmt::Display for EnvRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When derived scopes are torn down and rebuilt on `create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    /// Discard when the context names an exercise and a non-global namespace.
    #[default]
    Exercise,
    Always,
    Never,
}

impl DiscardPolicy {
    pub fn discards(&self, exercise: Option<&str>, envir: &str) -> bool {
        match self {
            DiscardPolicy::Always => true,
            DiscardPolicy::Never => false,
            DiscardPolicy::Exercise => exercise.is_some() && envir != GLOBAL_SCOPE,
        }
    }
}

/// Maps role labels to scope ids and forwards to one `EnvironmentInstance`.
/// The mapping and the discard flag are fixed at construction.
pub struct EnvironmentManager {
    instance: Arc<EnvironmentInstance>,
    ids: [String; 5],
    discard: bool,
}

impl EnvironmentManager {
    /// Without an exercise id, or when `envir` is the global namespace, every
    /// role resolves to the global scope.
    pub fn new(
        instance: Arc<EnvironmentInstance>,
        exercise: Option<&str>,
        envir: &str,
        policy: DiscardPolicy,
    ) -> Self {
        let shared = exercise.is_none() || envir == GLOBAL_SCOPE;
        let ids = EnvRole::ALL.map(|role| {
            if shared || role == EnvRole::Global {
                GLOBAL_SCOPE.to_string()
            } else {
                format!("{}-{}", envir, role)
            }
        });

        Self {
            instance,
            ids,
            discard: policy.discards(exercise, envir),
        }
    }

    pub fn instance(&self) -> &Arc<EnvironmentInstance> {
        &self.instance
    }

    pub fn scope_id(&self, role: EnvRole) -> &str {
        &self.ids[role.index()]
    }

    pub fn discard(&self) -> bool {
        self.discard
    }

    /// Whether all roles share the global namespace.
    pub fn is_shared(&self) -> bool {
        self.ids.iter().all(|id| id == GLOBAL_SCOPE)
    }

    pub async fn get(&self, role: EnvRole) -> Result<ObjectRef, LiveError> {
        self.instance.get(self.scope_id(role)).await
    }

    pub async fn bind(&self, key: &str, value: BindValue, role: EnvRole) -> Result<(), LiveError> {
        self.instance.bind(key, value, self.scope_id(role)).await
    }

    pub async fn create(&self, target: EnvRole, parent: EnvRole) -> Result<ObjectRef, LiveError> {
        self.instance
            .create(self.scope_id(target), self.scope_id(parent), self.discard)
            .await
    }

    pub async fn destroy(&self, role: EnvRole) -> Result<(), LiveError> {
        self.instance.destroy(self.scope_id(role)).await
    }

    pub async fn lookup(&self, key: &str, role: EnvRole) -> Result<ObjectRef, LiveError> {
        self.instance.lookup(key, self.scope_id(role)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::MinirInterpreter;
    use crate::runtime::WorkerRuntime;
    use serde_json::json;

    async fn instance() -> Arc<EnvironmentInstance> {
        let runtime = WorkerRuntime::spawn(MinirInterpreter::new).await.unwrap();
        Arc::new(EnvironmentInstance::new(runtime))
    }

    #[tokio::test]
    async fn exercise_roles_map_to_envir_prefixed_ids() {
        let manager = EnvironmentManager::new(instance().await, Some("ex1"), "ex1", DiscardPolicy::Exercise);
        assert_eq!(manager.scope_id(EnvRole::Prep), "ex1-prep");
        assert_eq!(manager.scope_id(EnvRole::Result), "ex1-result");
        assert_eq!(manager.scope_id(EnvRole::Grading), "ex1-grading");
        assert_eq!(manager.scope_id(EnvRole::Solution), "ex1-solution");
        assert_eq!(manager.scope_id(EnvRole::Global), "global");
        assert!(manager.discard());
        assert!(!manager.is_shared());
    }

    #[tokio::test]
    async fn global_envir_collapses_every_role() {
        let env = instance().await;
        for manager in [
            EnvironmentManager::new(env.clone(), Some("ex1"), "global", DiscardPolicy::Exercise),
            EnvironmentManager::new(env.clone(), None, "ex1", DiscardPolicy::Exercise),
        ] {
            assert!(manager.is_shared());
            assert!(!manager.discard());
            manager.bind("z", json!(1).into(), EnvRole::Result).await.unwrap();
            let prep = manager.get(EnvRole::Prep).await.unwrap();
            let grading = manager.get(EnvRole::Grading).await.unwrap();
            assert_eq!(prep, grading);
            let found = manager.lookup("z", EnvRole::Solution).await.unwrap();
            env.runtime().release(&[found]).await.unwrap();
        }
    }

    #[tokio::test]
    async fn policy_overrides_discard_flag() {
        let env = instance().await;
        let never = EnvironmentManager::new(env.clone(), Some("ex1"), "ex1", DiscardPolicy::Never);
        assert!(!never.discard());
        let always = EnvironmentManager::new(env, None, "global", DiscardPolicy::Always);
        assert!(always.discard());
    }

    #[tokio::test]
    async fn separate_exercises_are_isolated() {
        let env = instance().await;
        let a = EnvironmentManager::new(env.clone(), Some("a"), "a", DiscardPolicy::Exercise);
        let b = EnvironmentManager::new(env.clone(), Some("b"), "b", DiscardPolicy::Exercise);
        a.create(EnvRole::Result, EnvRole::Prep).await.unwrap();
        b.create(EnvRole::Result, EnvRole::Prep).await.unwrap();
        a.bind("secret", json!(42).into(), EnvRole::Result).await.unwrap();
        assert!(matches!(
            b.lookup("secret", EnvRole::Result).await,
            Err(LiveError::NotFound(_))
        ));
    }
}
