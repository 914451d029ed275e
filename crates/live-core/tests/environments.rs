mod common;

use live_core::runtime::NativeValue;
use live_core::{DiscardPolicy, EnvRole, EnvironmentInstance, EnvironmentManager, LiveError};
use serde_json::json;
use std::sync::Arc;

fn manager(instance: &Arc<EnvironmentInstance>, exercise: Option<&str>, envir: &str) -> EnvironmentManager {
    EnvironmentManager::new(instance.clone(), exercise, envir, DiscardPolicy::Exercise)
}

async fn number(manager: &EnvironmentManager, key: &str, role: EnvRole) -> Option<f64> {
    let handle = match manager.lookup(key, role).await {
        Ok(handle) => handle,
        Err(LiveError::NotFound(_)) => return None,
        Err(e) => panic!("lookup failed: {}", e),
    };
    let runtime = manager.instance().runtime();
    let value = runtime.describe(handle).await.unwrap();
    runtime.release(&[handle]).await.unwrap();
    match value {
        NativeValue::Double { values } => values[0],
        other => panic!("expected a number, got {:?}", other),
    }
}

#[tokio::test]
async fn exercises_do_not_see_each_other() {
    let instance = common::instance().await;
    let a = manager(&instance, Some("a"), "a");
    let b = manager(&instance, Some("b"), "b");
    for m in [&a, &b] {
        m.create(EnvRole::Result, EnvRole::Prep).await.unwrap();
    }

    a.bind("secret", json!(42).into(), EnvRole::Result).await.unwrap();
    assert_eq!(number(&a, "secret", EnvRole::Result).await, Some(42.0));
    assert_eq!(number(&b, "secret", EnvRole::Result).await, None);
}

#[tokio::test]
async fn result_inherits_from_prep() {
    let instance = common::instance().await;
    let m = manager(&instance, Some("ex"), "ex");
    m.bind("n", json!(3).into(), EnvRole::Prep).await.unwrap();
    m.create(EnvRole::Result, EnvRole::Prep).await.unwrap();
    assert_eq!(number(&m, "n", EnvRole::Result).await, Some(3.0));

    m.bind("n", json!(4).into(), EnvRole::Result).await.unwrap();
    assert_eq!(number(&m, "n", EnvRole::Result).await, Some(4.0));
    assert_eq!(number(&m, "n", EnvRole::Prep).await, Some(3.0));
}

#[tokio::test]
async fn discard_rebuilds_and_reuse_keeps() {
    let instance = common::instance().await;

    let discarding = manager(&instance, Some("ex"), "ex");
    let first = discarding.create(EnvRole::Result, EnvRole::Prep).await.unwrap();
    discarding.bind("x", json!(1).into(), EnvRole::Result).await.unwrap();
    let second = discarding.create(EnvRole::Result, EnvRole::Prep).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(number(&discarding, "x", EnvRole::Result).await, None);

    let reusing = EnvironmentManager::new(instance.clone(), Some("ex2"), "ex2", DiscardPolicy::Never);
    let first = reusing.create(EnvRole::Result, EnvRole::Prep).await.unwrap();
    reusing.bind("x", json!(1).into(), EnvRole::Result).await.unwrap();
    let second = reusing.create(EnvRole::Result, EnvRole::Prep).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(number(&reusing, "x", EnvRole::Result).await, Some(1.0));
}

#[tokio::test]
async fn global_envir_collapses_every_role() {
    let instance = common::instance().await;
    for m in [manager(&instance, None, "ex"), manager(&instance, Some("ex"), "global")] {
        assert!(m.is_shared());
        let global = m.get(EnvRole::Global).await.unwrap();
        for role in [EnvRole::Prep, EnvRole::Result, EnvRole::Grading, EnvRole::Solution] {
            assert_eq!(m.get(role).await.unwrap(), global);
        }
        m.bind("shared", json!(7).into(), EnvRole::Grading).await.unwrap();
        assert_eq!(number(&m, "shared", EnvRole::Solution).await, Some(7.0));
    }
}

#[tokio::test]
async fn destroy_is_idempotent() {
    let instance = common::instance().await;
    instance.destroy("never-created").await.unwrap();
    instance.destroy("global").await.unwrap();

    let m = manager(&instance, Some("ex"), "ex");
    m.get(EnvRole::Prep).await.unwrap();
    m.destroy(EnvRole::Prep).await.unwrap();
    m.destroy(EnvRole::Prep).await.unwrap();
    assert!(!instance.contains("ex-prep"));
}
